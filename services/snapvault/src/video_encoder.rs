//! Video encoding backed by an `ffmpeg` child process.
//!
//! Frames are streamed to ffmpeg's stdin as raw RGB24; ffmpeg muxes them
//! into an AVI container at the requested frame rate.

use crate::config::ExportConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How much of ffmpeg's stderr is kept for error messages
const STDERR_TAIL_BYTES: usize = 4096;

/// How long to wait for a failed ffmpeg to exit before giving up on its stderr
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Errors raised by a video encoder
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("Failed to start video encoder: {0}")]
    Spawn(String),

    #[error("Video encoder rejected frame {index}: {message}")]
    Write { index: usize, message: String },

    #[error("Video encoder failed: {0}")]
    Encoder(String),
}

/// Opens a video stream of fixed dimensions and frame rate.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn open(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Box<dyn VideoWriter>, VideoError>;
}

/// An open video stream. Frames are tightly packed RGB24, `width * height * 3` bytes.
#[async_trait]
pub trait VideoWriter: Send {
    async fn write_frame(&mut self, rgb: &[u8]) -> Result<(), VideoError>;

    /// Close the stream and wait until the output file is complete
    async fn finish(self: Box<Self>) -> Result<(), VideoError>;

    /// Stop encoding; the output file is left in an unspecified state
    async fn abort(self: Box<Self>);
}

/// ffmpeg-backed encoder
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    codec: String,
    fourcc: String,
}

impl FfmpegEncoder {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            codec: config.video_codec.clone(),
            fourcc: config.video_fourcc.clone(),
        }
    }

    /// Command line for one encode
    pub fn args(&self, output: &Path, width: u32, height: u32, frame_rate: u32) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.extend([
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            frame_rate.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-an".to_string(),
            "-c:v".to_string(),
            self.codec.clone(),
            "-vtag".to_string(),
            self.fourcc.clone(),
            "-q:v".to_string(),
            "5".to_string(),
            // yuv420p needs even dimensions
            "-vf".to_string(),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-f".to_string(),
            "avi".to_string(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ]);

        args
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn open(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Box<dyn VideoWriter>, VideoError> {
        let args = self.args(output, width, height, frame_rate);
        debug!(ffmpeg = %self.ffmpeg_path, args = ?args, "Starting video encoder");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VideoError::Spawn(format!("{}: {}", self.ffmpeg_path, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VideoError::Spawn("ffmpeg stdin unavailable".to_string()))?;

        // Drained concurrently so a full stderr pipe never stalls frame writes
        let stderr = child.stderr.take().map(drain);

        Ok(Box::new(FfmpegWriter {
            child,
            stdin: Some(stdin),
            stderr,
            output: output.to_path_buf(),
            frames_written: 0,
        }))
    }
}

struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    output: PathBuf,
    frames_written: usize,
}

impl FfmpegWriter {
    /// Close stdin, let ffmpeg exit and return what it wrote to stderr
    async fn exit_message(&mut self) -> String {
        drop(self.stdin.take());

        let collect = async {
            let _ = self.child.wait().await;
            collect_stderr(self.stderr.take()).await
        };

        tokio::time::timeout(EXIT_GRACE, collect)
            .await
            .unwrap_or_default()
    }
}

fn drain<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "ffmpeg stderr closed with error");
        }
        buf
    })
}

async fn collect_stderr(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = match task {
        Some(task) => task.await.unwrap_or_default(),
        None => return String::new(),
    };
    let tail = &bytes[bytes.len().saturating_sub(STDERR_TAIL_BYTES)..];
    String::from_utf8_lossy(tail).trim().to_string()
}

#[async_trait]
impl VideoWriter for FfmpegWriter {
    async fn write_frame(&mut self, rgb: &[u8]) -> Result<(), VideoError> {
        let index = self.frames_written;
        let stdin = self.stdin.as_mut().ok_or_else(|| VideoError::Write {
            index,
            message: "stream already closed".to_string(),
        })?;

        let written = stdin.write_all(rgb).await;
        if let Err(e) = written {
            let stderr = self.exit_message().await;
            return Err(VideoError::Write {
                index,
                message: if stderr.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", e, stderr)
                },
            });
        }

        self.frames_written += 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), VideoError> {
        let FfmpegWriter {
            mut child,
            stdin,
            stderr,
            output: path,
            frames_written,
        } = *self;

        // Closing stdin signals end of input
        if let Some(mut stdin) = stdin {
            stdin
                .shutdown()
                .await
                .map_err(|e| VideoError::Encoder(format!("closing ffmpeg stdin: {}", e)))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| VideoError::Encoder(e.to_string()))?;
        let stderr = collect_stderr(stderr).await;

        if !status.success() {
            return Err(VideoError::Encoder(format!(
                "ffmpeg exited with {}: {}",
                status, stderr
            )));
        }

        debug!(
            output = %path.display(),
            frames = frames_written,
            "Video encoder finished"
        );
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        let mut this = *self;
        drop(this.stdin.take());
        if let Err(e) = this.child.kill().await {
            warn!(error = %e, "Failed to stop ffmpeg");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive_store::test_support::TempDir;

    fn encoder() -> FfmpegEncoder {
        FfmpegEncoder::new(&ExportConfig::default())
    }

    fn ffmpeg_available() -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_args_carry_geometry_and_rate() {
        let args = encoder().args(Path::new("/tmp/out.avi"), 640, 480, 12);
        let joined = args.join(" ");

        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 640x480 -r 12 -i -"));
        assert!(joined.contains("-c:v mpeg4 -vtag DIVX"));
        assert!(joined.contains("-f avi"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.avi"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let config = ExportConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            ..ExportConfig::default()
        };
        let dir = TempDir::new();

        let result = FfmpegEncoder::new(&config)
            .open(&dir.join("out.avi"), 4, 4, 1)
            .await;

        assert!(matches!(result, Err(VideoError::Spawn(_))));
    }

    /// Stand-in encoder that floods stderr well past the pipe buffer, then
    /// exits without reading its input
    #[cfg(unix)]
    fn noisy_encoder(dir: &TempDir) -> FfmpegEncoder {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("noisy-ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\nyes 'encoder exploded' | head -c 262144 >&2\nexit 3\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        FfmpegEncoder::new(&ExportConfig {
            ffmpeg_path: script.to_string_lossy().into_owned(),
            ..ExportConfig::default()
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_noisy_encoder_does_not_stall_writes() {
        let dir = TempDir::new();
        let encoder = noisy_encoder(&dir);
        let output = dir.join("out.avi");

        // A freshly written script can briefly be busy for exec
        let mut opened = None;
        for _ in 0..5 {
            match encoder.open(&output, 256, 256, 5).await {
                Ok(writer) => {
                    opened = Some(writer);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        let mut writer = opened.expect("encoder script did not start");

        let run = async {
            let frame = vec![0u8; 256 * 256 * 3];
            for _ in 0..8 {
                writer.write_frame(&frame).await?;
            }
            writer.finish().await
        };

        let err = tokio::time::timeout(Duration::from_secs(20), run)
            .await
            .expect("encoder writes stalled")
            .unwrap_err();

        assert!(
            err.to_string().contains("encoder exploded"),
            "stderr missing from {}",
            err
        );
    }

    #[tokio::test]
    async fn test_ffmpeg_writes_avi() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }

        let dir = TempDir::new();
        let output = dir.join("out.avi");
        let mut writer = encoder().open(&output, 16, 16, 5).await.unwrap();

        for shade in [0u8, 64, 128, 255] {
            writer.write_frame(&vec![shade; 16 * 16 * 3]).await.unwrap();
        }
        writer.finish().await.unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
    }
}
