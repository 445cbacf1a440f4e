//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::EngineProgress;

/// Builder for ffmpeg invocations.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek position before input (fast seek).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Encode duration limit.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Video filter chain.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Target video bitrate in kbps.
    pub fn video_bitrate(self, kbps: u32) -> Self {
        self.output_arg("-b:v").output_arg(format!("{kbps}k"))
    }

    /// Rate-control ceiling in kbps, with a matching VBV buffer.
    pub fn max_bitrate(self, kbps: u32) -> Self {
        self.output_arg("-maxrate")
            .output_arg(format!("{kbps}k"))
            .output_arg("-bufsize")
            .output_arg(format!("{}k", kbps * 2))
    }

    /// Audio bitrate in kbps.
    pub fn audio_bitrate(self, kbps: u32) -> Self {
        self.output_arg("-b:a").output_arg(format!("{kbps}k"))
    }

    /// Encoder preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Fixed GOP length in frames, closed GOPs.
    pub fn keyframe_interval(self, frames: u32) -> Self {
        self.output_arg("-g")
            .output_arg(frames.to_string())
            .output_arg("-keyint_min")
            .output_arg(frames.to_string())
            .output_arg("-sc_threshold")
            .output_arg("0")
    }

    /// Drop the audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Extract a single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress key-value stream goes to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for ffmpeg commands with progress tracking and cancellation.
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            timeout_secs: None,
        }
    }

    /// Set the cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set a hard wall-clock timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an ffmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an ffmpeg command, reporting parsed progress to the callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(EngineProgress) + Send + 'static,
    {
        if let Some(rx) = &self.cancel_rx {
            if *rx.borrow() {
                return Err(MediaError::Cancelled);
            }
        }
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = match child.stderr.take() {
            Some(stderr) => stderr,
            None => {
                let _ = child.kill().await;
                return Err(MediaError::ffmpeg_failed("stderr not captured", None, None));
            }
        };
        let mut reader = BufReader::new(stderr).lines();

        let progress_handle = tokio::spawn(async move {
            let mut current = EngineProgress::default();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(progress) = parse_progress_line(&line, &mut current) {
                    progress_callback(progress);
                }
            }
        });

        let result = self.wait_for_completion(&mut child).await;
        let _ = progress_handle.await;
        result
    }

    /// Wait for the child, honoring cancellation and the timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let mut cancel_rx = self.cancel_rx.clone();

        let status = loop {
            let cancelled = async {
                match cancel_rx.as_mut() {
                    Some(rx) => {
                        while !*rx.borrow() {
                            if rx.changed().await.is_err() {
                                // Sender dropped; nobody can cancel anymore
                                std::future::pending::<()>().await;
                            }
                        }
                    }
                    None => std::future::pending().await,
                }
            };

            let timeout = async {
                match self.timeout_secs {
                    Some(secs) => {
                        tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
                        secs
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                status = child.wait() => break status?,
                _ = cancelled => {
                    info!("ffmpeg cancelled, killing process");
                    let _ = child.kill().await;
                    return Err(MediaError::Cancelled);
                }
                secs = timeout => {
                    warn!("ffmpeg timed out after {} seconds, killing process", secs);
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(secs));
                }
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "ffmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Parse one line of ffmpeg's `-progress` key-value stream. Returns a
/// snapshot on each `progress=` terminator line.
fn parse_progress_line(line: &str, current: &mut EngineProgress) -> Option<EngineProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys carry microseconds in modern ffmpeg builds
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // "1.5x" or "N/A"
                if let Some(speed_str) = value.strip_suffix('x') {
                    if let Ok(speed) = speed_str.parse() {
                        current.speed = speed;
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Check that ffmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check that ffprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "out.mp4")
            .seek(10.0)
            .duration(30.0)
            .video_codec("libx264")
            .video_bitrate(2500)
            .max_bitrate(2675);

        let args = cmd.build_args();
        assert!(args.contains(&"-ss".to_string()));
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"2500k".to_string()));
        assert!(args.contains(&"-bufsize".to_string()));
        assert!(args.contains(&"5350k".to_string()));
    }

    #[test]
    fn test_keyframe_interval_pins_gop() {
        let args = FfmpegCommand::new("a.mp4", "b.mp4")
            .keyframe_interval(48)
            .build_args();
        assert!(args.contains(&"-g".to_string()));
        assert!(args.contains(&"48".to_string()));
        assert!(args.contains(&"-sc_threshold".to_string()));
    }

    #[test]
    fn test_progress_parsing() {
        let mut progress = EngineProgress::default();

        parse_progress_line("out_time_us=5000000", &mut progress);
        assert_eq!(progress.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let result = parse_progress_line("progress=end", &mut progress);
        assert!(result.is_some());
        assert!(progress.is_complete);
    }

    #[test]
    fn test_input_args_precede_input_file() {
        let args = FfmpegCommand::new("in.mp4", "out.mp4").seek(5.0).build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
    }
}
