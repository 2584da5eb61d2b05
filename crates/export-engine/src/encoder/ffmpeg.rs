//! ffmpeg-backed chunk encoder.
//!
//! Raw RGBA frames are piped to `ffmpeg` on stdin; the muxed container comes
//! back on stdout as a fragmented MP4 or WebM byte stream, so output can be
//! delivered before the run ends.

use std::io::{BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{BitrateMode, ContainerFormat, HardwareAcceleration, VideoCodec};

use super::{ChunkEncoder, ChunkEncoderFactory, EncodedChunk, EncoderConfig};
use crate::frame_source::Frame;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Keyframe interval in seconds; bounds fragment length in fragmented MP4.
const KEYFRAME_INTERVAL_SECS: u32 = 2;

fn hardware_encoders(codec: VideoCodec) -> &'static [&'static str] {
    match codec {
        VideoCodec::Avc => &["h264_videotoolbox", "h264_nvenc", "h264_qsv"],
        VideoCodec::Hevc => &["hevc_videotoolbox", "hevc_nvenc", "hevc_qsv"],
        VideoCodec::Vp9 => &["vp9_qsv"],
        VideoCodec::Av1 => &["av1_nvenc", "av1_qsv"],
    }
}

fn software_encoders(codec: VideoCodec) -> &'static [&'static str] {
    match codec {
        VideoCodec::Avc => &["libx264", "libopenh264"],
        VideoCodec::Hevc => &["libx265"],
        VideoCodec::Vp9 => &["libvpx-vp9"],
        VideoCodec::Av1 => &["libsvtav1", "libaom-av1"],
    }
}

/// ffmpeg encoder names for `codec`, most preferred first.
///
/// Without a preference software encoders come first: they behave the same on
/// every machine.
pub fn encoder_candidates(codec: VideoCodec, hw: HardwareAcceleration) -> Vec<&'static str> {
    let (first, second) = match hw {
        HardwareAcceleration::PreferHardware => (hardware_encoders(codec), software_encoders(codec)),
        HardwareAcceleration::PreferSoftware | HardwareAcceleration::NoPreference => {
            (software_encoders(codec), hardware_encoders(codec))
        }
    };
    first.iter().chain(second).copied().collect()
}

/// First candidate for `codec` that this ffmpeg build provides.
pub fn select_encoder(
    codec: VideoCodec,
    hw: HardwareAcceleration,
    available: &[String],
) -> Option<&'static str> {
    encoder_candidates(codec, hw)
        .into_iter()
        .find(|name| available.iter().any(|a| a == name))
}

/// Video encoder names from `ffmpeg -encoders` output.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            flags.starts_with('V').then(|| name.to_string())
        })
        .collect()
}

/// Command-line arguments for encoding `config` with `encoder`.
pub fn build_args(config: &EncoderConfig, encoder: &str) -> Vec<String> {
    let size = format!("{}x{}", config.dimensions.width, config.dimensions.height);
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
        size.as_str(),
        "-r",
        &config.fps.to_string(),
        "-i",
        "pipe:0",
        "-an",
        "-c:v",
        encoder,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let bitrate = config.bitrate_bps;
    match config.bitrate_mode {
        BitrateMode::Constant => args.extend([
            "-b:v".to_string(),
            bitrate.to_string(),
            "-minrate".to_string(),
            bitrate.to_string(),
            "-maxrate".to_string(),
            bitrate.to_string(),
            "-bufsize".to_string(),
            (bitrate * 2).to_string(),
        ]),
        BitrateMode::Variable => args.extend([
            "-b:v".to_string(),
            bitrate.to_string(),
            "-maxrate".to_string(),
            (bitrate * 2).to_string(),
            "-bufsize".to_string(),
            (bitrate * 4).to_string(),
        ]),
    }

    let pix_fmt = if encoder.ends_with("_qsv") { "nv12" } else { "yuv420p" };
    args.extend([
        "-pix_fmt".to_string(),
        pix_fmt.to_string(),
        "-g".to_string(),
        (config.fps * KEYFRAME_INTERVAL_SECS).to_string(),
    ]);

    let tuning: &[&str] = match encoder {
        "libx264" | "libx265" => &["-preset", "medium"],
        "libvpx-vp9" => &["-deadline", "good", "-cpu-used", "4", "-row-mt", "1"],
        "libsvtav1" => &["-preset", "8"],
        "libaom-av1" => &["-cpu-used", "6", "-row-mt", "1"],
        _ => &[],
    };
    args.extend(tuning.iter().map(|s| s.to_string()));

    match config.format {
        ContainerFormat::Mp4 => {
            if config.codec == VideoCodec::Hevc {
                args.extend(["-tag:v".to_string(), "hvc1".to_string()]);
            }
            args.extend([
                "-movflags".to_string(),
                "frag_keyframe+empty_moov+default_base_moof".to_string(),
                "-f".to_string(),
                "mp4".to_string(),
            ]);
        }
        ContainerFormat::Webm => args.extend(["-f".to_string(), "webm".to_string()]),
    }
    args.push("pipe:1".to_string());
    args
}

/// One running ffmpeg process.
pub struct FfmpegChunkEncoder {
    encoder: &'static str,
    child: Child,
    stdin: Option<ChildStdin>,
    chunks: mpsc::Receiver<EncodedChunk>,
    stdout_task: Option<JoinHandle<std::io::Result<()>>>,
    stderr_task: Option<JoinHandle<String>>,
    frame_len: usize,
    finished: bool,
}

impl FfmpegChunkEncoder {
    pub fn spawn(binary: &str, config: &EncoderConfig, encoder: &'static str) -> ExportResult<Self> {
        config.validate()?;
        let args = build_args(config, encoder);
        tracing::info!(
            encoder,
            size = %config.dimensions,
            fps = config.fps,
            format = %config.format,
            "Spawning ffmpeg encoder"
        );
        tracing::debug!(args = ?args, "ffmpeg arguments");

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExportError::encode(format!(
                    "failed to spawn {binary} (is it installed and on PATH?): {e}"
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExportError::encode("failed to open ffmpeg stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExportError::encode("failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExportError::encode("failed to capture ffmpeg stderr"))?;

        let (tx, chunks) = mpsc::channel();
        let stdout_task = std::thread::spawn(move || -> std::io::Result<()> {
            let mut stdout = stdout;
            let mut buf = vec![0u8; READ_CHUNK_BYTES];
            loop {
                let n = stdout.read(&mut buf)?;
                if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                    return Ok(());
                }
            }
        });

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut text = String::new();
            match reader.read_to_string(&mut text) {
                Ok(_) => text,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        Ok(Self {
            encoder,
            child,
            stdin: Some(stdin),
            chunks,
            stdout_task: Some(stdout_task),
            stderr_task: Some(stderr_task),
            frame_len: config.dimensions.rgba_len(),
            finished: false,
        })
    }

    fn ready_chunks(&self) -> Vec<EncodedChunk> {
        self.chunks.try_iter().collect()
    }

    fn join_stderr(&mut self) -> String {
        self.stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default()
    }

    /// Stop the process and return what it printed on stderr.
    fn terminate(&mut self) -> String {
        self.finished = true;
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(task) = self.stdout_task.take() {
            let _ = task.join();
        }
        self.join_stderr()
    }
}

impl ChunkEncoder for FfmpegChunkEncoder {
    fn encode(&mut self, frame: &Frame) -> ExportResult<Vec<EncodedChunk>> {
        if frame.data.len() != self.frame_len {
            return Err(ExportError::encode(format!(
                "frame {} holds {} bytes, ffmpeg expects {}",
                frame.index,
                frame.data.len(),
                self.frame_len
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ExportError::encode("ffmpeg encoder is already finished"));
        };
        if let Err(err) = stdin.write_all(&frame.data) {
            let stderr = self.terminate();
            return Err(ExportError::encode(format!(
                "ffmpeg rejected frame {}: {err}: {}",
                frame.index,
                stderr.trim()
            )));
        }
        Ok(self.ready_chunks())
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        if self.finished {
            return Err(ExportError::encode("ffmpeg encoder is already finished"));
        }
        self.finished = true;
        drop(self.stdin.take());

        let status = self
            .child
            .wait()
            .map_err(|e| ExportError::encode(format!("failed to wait for ffmpeg: {e}")))?;
        let read_result = match self.stdout_task.take() {
            Some(task) => task
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdout reader panicked"))),
            None => Ok(()),
        };
        let stderr = self.join_stderr();

        if !status.success() {
            return Err(ExportError::encode(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }
        read_result.map_err(|e| ExportError::encode(format!("failed to read ffmpeg output: {e}")))?;
        Ok(self.ready_chunks())
    }

    fn abort(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!(encoder = self.encoder, "Aborting ffmpeg encoder");
        self.terminate();
    }
}

impl Drop for FfmpegChunkEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Spawns [`FfmpegChunkEncoder`]s using encoders known to be available.
#[derive(Debug, Clone)]
pub struct FfmpegEncoderFactory {
    binary: String,
    available: Arc<Vec<String>>,
}

impl FfmpegEncoderFactory {
    pub fn new(binary: impl Into<String>, available: Arc<Vec<String>>) -> Self {
        Self {
            binary: binary.into(),
            available,
        }
    }
}

impl ChunkEncoderFactory for FfmpegEncoderFactory {
    fn create(&self, config: &EncoderConfig) -> ExportResult<Box<dyn ChunkEncoder>> {
        let encoder = select_encoder(config.codec, config.hardware_acceleration, &self.available)
            .ok_or_else(|| {
                ExportError::unsupported_codec(format!(
                    "{} does not provide a {} encoder",
                    self.binary, config.codec
                ))
            })?;
        Ok(Box::new(FfmpegChunkEncoder::spawn(&self.binary, config, encoder)?))
    }
}

/// Whether `binary -version` runs successfully.
pub fn is_ffmpeg_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
