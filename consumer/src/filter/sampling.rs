use std::num::NonZeroU64;

/// Stream frames are scored at indices 0, stride, 2*stride, ...
pub fn should_score(frame_index: u64, stride: NonZeroU64) -> bool {
    frame_index % stride.get() == 0
}

/// Number of indices in `0..len` that pass [`should_score`].
pub fn selected_count(len: u64, stride: NonZeroU64) -> u64 {
    len.div_ceil(stride.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stride(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn stride_one_scores_everything() {
        assert!((0..100).all(|i| should_score(i, stride(1))));
    }

    #[test]
    fn twenty_five_frames_stride_ten() {
        let selected: Vec<u64> = (0..25).filter(|&i| should_score(i, stride(10))).collect();
        assert_eq!(selected, vec![0, 10, 20]);
        assert_eq!(selected_count(25, stride(10)), 3);
    }

    #[test]
    fn selection_matches_ceiling_for_all_small_inputs() {
        for n in 1..=12 {
            for len in 0..=60 {
                let selected: Vec<u64> = (0..len).filter(|&i| should_score(i, stride(n))).collect();
                assert_eq!(selected.len() as u64, selected_count(len, stride(n)));
                let expected: Vec<u64> = (0..len).step_by(n as usize).collect();
                assert_eq!(selected, expected, "stride {n}, len {len}");
            }
        }
    }

    #[test]
    fn large_indices_are_total() {
        assert!(should_score(u64::MAX - (u64::MAX % 7), stride(7)));
        assert!(!should_score(u64::MAX, stride(2)));
        assert!(should_score(0, stride(u64::MAX)));
    }
}
