//! Segmented delivery: the video is cut into independently playable files.
//!
//! Every segment gets its own encoder so each file starts with a keyframe and
//! a complete container header. A segment is closed at the first frame
//! boundary where it reaches the configured duration or byte size.

use std::path::PathBuf;

use async_trait::async_trait;
use mdim_common::clock::secs_to_us;
use mdim_common::config::SegmentPolicy;
use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{BackendKind, CompletionDetails, ContainerFormat};

use super::{BackendContext, ChunkEncoder, EncoderBackend, FrameOrder, Lifecycle};
use crate::frame_source::Frame;

struct OpenSegment {
    number: u32,
    encoder: Box<dyn ChunkEncoder>,
    buffer: Vec<u8>,
    start_us: u64,
    end_us: u64,
}

pub struct SegmentedBackend {
    ctx: BackendContext,
    policy: SegmentPolicy,
    output_dir: PathBuf,
    current: Option<OpenSegment>,
    files: Vec<PathBuf>,
    order: FrameOrder,
    lifecycle: Lifecycle,
}

/// File name of segment `number` (1-based).
pub fn segment_filename(stem: &str, number: u32, format: ContainerFormat) -> String {
    format!("{stem}-part{number:03}.{}", format.extension())
}

/// Instructions for joining the segments back into one file without
/// re-encoding.
pub fn merge_instructions(stem: &str, files: &[PathBuf], format: ContainerFormat) -> String {
    let names: Vec<String> = files
        .iter()
        .map(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect();

    let mut text = format!("Exported {} segments:\n", names.len());
    for name in &names {
        text.push_str(&format!("  {name}\n"));
    }
    text.push_str(
        "\nTo merge them without re-encoding, save the following lines as list.txt \
         next to the segments:\n",
    );
    for name in &names {
        text.push_str(&format!("  file '{name}'\n"));
    }
    text.push_str(&format!(
        "\nthen run:\n  ffmpeg -f concat -safe 0 -i list.txt -c copy {stem}.{}\n",
        format.extension()
    ));
    text
}

impl SegmentedBackend {
    pub fn new(ctx: BackendContext, policy: SegmentPolicy, output_dir: PathBuf) -> Self {
        let order = FrameOrder::new(ctx.config.dimensions);
        Self {
            ctx,
            policy,
            output_dir,
            current: None,
            files: Vec::new(),
            order,
            lifecycle: Lifecycle::Created,
        }
    }

    /// Segments written so far.
    #[cfg(test)]
    fn closed_segments(&self) -> &[PathBuf] {
        &self.files
    }

    fn is_full(&self, segment: &OpenSegment) -> bool {
        match self.policy {
            SegmentPolicy::MaxDuration(secs) => {
                let limit = if secs.is_finite() && secs > 0.0 {
                    secs_to_us(secs)
                } else {
                    0
                };
                segment.end_us.saturating_sub(segment.start_us) >= limit
            }
            SegmentPolicy::MaxBytes(bytes) => segment.buffer.len() as u64 >= bytes,
        }
    }

    fn open_segment(&self, frame: &Frame) -> ExportResult<OpenSegment> {
        let number = self.files.len() as u32 + 1;
        tracing::debug!(segment = number, first_frame = frame.index, "Opening segment");
        Ok(OpenSegment {
            number,
            encoder: self.ctx.create_encoder()?,
            buffer: Vec::new(),
            start_us: frame.pts_us,
            end_us: frame.pts_us,
        })
    }

    async fn close_segment(&mut self) -> ExportResult<()> {
        let Some(mut segment) = self.current.take() else {
            return Ok(());
        };
        for chunk in segment.encoder.flush()? {
            segment.buffer.extend_from_slice(&chunk);
        }
        let path = self.output_dir.join(segment_filename(
            &self.ctx.stem,
            segment.number,
            self.ctx.config.format,
        ));
        tokio::fs::write(&path, &segment.buffer).await.map_err(|e| {
            ExportError::encode(format!("failed to write segment {}: {e}", path.display()))
        })?;
        tracing::info!(
            segment = segment.number,
            path = %path.display(),
            bytes = segment.buffer.len(),
            "Segment delivered"
        );
        self.files.push(path);
        Ok(())
    }
}

#[async_trait]
impl EncoderBackend for SegmentedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Segmented
    }

    async fn initialize(&mut self) -> ExportResult<()> {
        self.lifecycle.ensure_created()?;
        self.ctx.ensure_supported()?;
        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            ExportError::encode(format!(
                "cannot create segment directory {}: {e}",
                self.output_dir.display()
            ))
        })?;
        self.lifecycle = Lifecycle::Ready;
        tracing::info!(
            dir = %self.output_dir.display(),
            policy = ?self.policy,
            "Segmented export ready"
        );
        Ok(())
    }

    async fn ingest(&mut self, frame: Frame) -> ExportResult<()> {
        self.lifecycle.ensure_ready("ingest")?;
        self.order.check(&frame)?;

        let mut segment = match self.current.take() {
            Some(segment) => segment,
            None => self.open_segment(&frame)?,
        };
        let encoded = segment.encoder.encode(&frame);
        let chunks = match encoded {
            Ok(chunks) => chunks,
            Err(e) => {
                segment.encoder.abort();
                return Err(e);
            }
        };
        for chunk in chunks {
            segment.buffer.extend_from_slice(&chunk);
        }
        segment.end_us = frame.pts_us + frame.duration_us;

        let full = self.is_full(&segment);
        self.current = Some(segment);
        if full {
            self.close_segment().await?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> ExportResult<CompletionDetails> {
        self.lifecycle.ensure_ready("finalize")?;
        if self.order.frames() == 0 {
            return Err(ExportError::encode("no frames were encoded"));
        }
        self.close_segment().await?;
        self.lifecycle = Lifecycle::Finalized;

        let files = std::mem::take(&mut self.files);
        let merge_instructions = merge_instructions(&self.ctx.stem, &files, self.ctx.config.format);
        tracing::info!(segments = files.len(), "Segmented export finished");
        Ok(CompletionDetails::Segmented {
            segment_count: files.len() as u32,
            files,
            merge_instructions,
        })
    }

    async fn dispose(&mut self) {
        if let Some(mut segment) = self.current.take() {
            tracing::debug!(segment = segment.number, "Discarding open segment");
            segment.encoder.abort();
        }
        self.lifecycle = Lifecycle::Disposed;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::encoder::testing::{context, frame, TestFactory, TRAILER};

    #[tokio::test]
    async fn test_duration_policy_rotates_segments() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(TestFactory::new(10));
        let mut backend = SegmentedBackend::new(
            context(factory.clone()),
            SegmentPolicy::MaxDuration(1.0),
            dir.path().to_path_buf(),
        );
        backend.initialize().await.unwrap();
        // 24 fps test frames, 60 frames = 2.5 s
        for i in 0..60 {
            backend.ingest(frame(i)).await.unwrap();
        }
        assert_eq!(backend.closed_segments().len(), 2);

        let details = backend.finalize().await.unwrap();
        let CompletionDetails::Segmented {
            segment_count,
            files,
            merge_instructions,
        } = details
        else {
            panic!("expected segmented completion");
        };
        assert_eq!(segment_count, 3);
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        assert!(files[0].ends_with("mdimension-20260101-000000-part001.mp4"));
        assert!(files[2].ends_with("mdimension-20260101-000000-part003.mp4"));
        assert_eq!(
            std::fs::read(&files[0]).unwrap().len(),
            24 * 10 + TRAILER.len()
        );
        assert_eq!(std::fs::read(&files[2]).unwrap().len(), 12 * 10 + TRAILER.len());
        assert!(merge_instructions.contains("file 'mdimension-20260101-000000-part002.mp4'"));
        assert!(merge_instructions.contains("-c copy mdimension-20260101-000000.mp4"));
    }

    #[tokio::test]
    async fn test_byte_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SegmentedBackend::new(
            context(Arc::new(TestFactory::new(10))),
            SegmentPolicy::MaxBytes(25),
            dir.path().to_path_buf(),
        );
        backend.initialize().await.unwrap();
        for i in 0..6 {
            backend.ingest(frame(i)).await.unwrap();
        }
        // closes after frames 2 and 5
        assert_eq!(backend.closed_segments().len(), 2);
        let details = backend.finalize().await.unwrap();
        assert!(matches!(
            details,
            CompletionDetails::Segmented { segment_count: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_dispose_discards_open_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SegmentedBackend::new(
            context(Arc::new(TestFactory::new(10))),
            SegmentPolicy::MaxDuration(1.0),
            dir.path().to_path_buf(),
        );
        backend.initialize().await.unwrap();
        for i in 0..30 {
            backend.ingest(frame(i)).await.unwrap();
        }
        backend.dispose().await;
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1);
        assert!(backend.finalize().await.is_err());
    }

    #[test]
    fn test_segment_filename() {
        assert_eq!(
            segment_filename("mdim-x", 12, ContainerFormat::Webm),
            "mdim-x-part012.webm"
        );
    }
}
