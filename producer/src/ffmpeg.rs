use frame_clarity_common::frame::Frame;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::source::{FrameSource, IndexedFrame, SourceError, StreamMetadata};

const RGB_CHANNELS: usize = 3;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees, normalised to 0..360. The display matrix
    /// side data wins over the legacy `rotate` tag.
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360) as u32
    }
}

/// Continuous stream decoder backed by an `ffmpeg` subprocess.
///
/// The resource is probed with `ffprobe` for dimensions and frame rate, then
/// ffmpeg decodes the first video stream to packed RGB24 on stdout. Each
/// `next_frame` call reads exactly one frame worth of bytes.
///
/// Autorotation is disabled: frames arrive in coded orientation so their
/// row length always matches the probed width.
pub struct FfmpegSource {
    identifier: String,
    metadata: StreamMetadata,
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    frame_size: usize,
    next_index: u64,
    finished: bool,
}

impl FfmpegSource {
    /// Probe and start decoding `identifier` (a path or any URL ffmpeg accepts).
    pub async fn open(identifier: &str) -> Result<Self, SourceError> {
        let metadata = probe(identifier).await?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-nostdin",
            "-v", "error",
            "-noautorotate",
            "-i", identifier,
            "-map", "0:v:0",
            "-vsync", "passthrough",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| open_error(identifier, format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| open_error(identifier, "could not get ffmpeg stdout handle"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        let frame_size = metadata.width as usize * metadata.height as usize * RGB_CHANNELS;

        info!(
            stream = identifier,
            fps = format!("{:.2}", metadata.frame_rate),
            total_frames = ?metadata.total_frames,
            width = metadata.width,
            height = metadata.height,
            rotation = metadata.rotation,
            "opened video stream"
        );

        Ok(Self {
            identifier: identifier.to_string(),
            metadata,
            child,
            stdout,
            stderr_task,
            frame_size,
            next_index: 0,
            finished: false,
        })
    }

    fn decode_error(&self, reason: impl Into<String>) -> SourceError {
        SourceError::Decode {
            index: self.next_index,
            reason: reason.into(),
        }
    }

    async fn collect_stderr(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    async fn next_frame(&mut self) -> Result<Option<IndexedFrame>, SourceError> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_size];
        let filled = match read_frame(&mut self.stdout, &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                self.finished = true;
                return Err(self.decode_error(format!("failed to read ffmpeg output: {e}")));
            }
        };

        if filled == self.frame_size {
            let frame = Frame::rgb(self.metadata.width, self.metadata.height, buf)
                .map_err(|e| self.decode_error(e.to_string()))?;
            let index = self.next_index;
            self.next_index += 1;
            return Ok(Some(IndexedFrame { index, frame }));
        }

        self.finished = true;
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| self.decode_error(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr = self.collect_stderr().await;

        if filled > 0 {
            return Err(self.decode_error(format!(
                "truncated frame: got {filled} of {} bytes",
                self.frame_size
            )));
        }
        if !status.success() {
            return Err(self.decode_error(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }

        debug!(
            stream = self.identifier,
            frames = self.next_index,
            "ffmpeg reached end of stream"
        );
        Ok(None)
    }
}

/// Fill `buf` from `reader`, stopping early only at EOF.
/// Returns the number of bytes read; 0 means EOF on a frame boundary.
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn probe(identifier: &str) -> Result<StreamMetadata, SourceError> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames\
                 :stream_tags=rotate:stream_side_data=rotation",
            "-of", "json",
            identifier,
        ])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| open_error(identifier, format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(open_error(
            identifier,
            format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    parse_probe(identifier, &output.stdout)
}

fn parse_probe(identifier: &str, json: &[u8]) -> Result<StreamMetadata, SourceError> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| open_error(identifier, format!("unreadable ffprobe output: {e}")))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| open_error(identifier, "no video stream found"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(open_error(identifier, "video stream has no dimensions")),
    };

    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| open_error(identifier, "video stream reports no usable frame rate"))?;

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok());

    Ok(StreamMetadata {
        frame_rate,
        total_frames,
        width,
        height,
        rotation: stream.rotation(),
    })
}

/// Parse an ffprobe rational such as `30000/1001` or a plain number.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn open_error(identifier: &str, reason: impl Into<String>) -> SourceError {
    SourceError::Open {
        identifier: identifier.to_string(),
        reason: reason.into(),
    }
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub async fn check_ffmpeg_available() {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; stream decoding may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; stream inputs cannot be decoded. \
                 Install ffmpeg (with ffprobe) to score video streams."
            );
        }
    }
}
