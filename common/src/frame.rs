/// Layout of the samples in a [`Frame`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One 8-bit intensity sample per pixel.
    Gray8,
    /// Three interleaved 8-bit samples per pixel, R then G then B.
    Rgb8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// A decoded image: a row-major grid of 8-bit samples with no row padding.
///
/// Zero-sized frames are representable so that a misbehaving source can be
/// detected downstream; consumers must check [`Frame::is_empty`].
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a pixel buffer. The buffer length must equal
    /// `width * height * format.channels()`.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
                width,
                height,
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(width, height, PixelFormat::Gray8, data)
    }

    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(width, height, PixelFormat::Rgb8, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True when the frame has zero width or zero height.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("pixel buffer is {got} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
}
