//! In-memory delivery: the whole video is buffered and returned as one
//! artifact.

use std::sync::Arc;

use async_trait::async_trait;
use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{Artifact, BackendKind, CompletionDetails};

use super::{BackendContext, ChunkEncoder, EncodedChunk, EncoderBackend, FrameOrder, Lifecycle};
use crate::frame_source::Frame;

pub struct InMemoryBackend {
    ctx: BackendContext,
    memory_limit: Option<u64>,
    encoder: Option<Box<dyn ChunkEncoder>>,
    buffer: Vec<u8>,
    order: FrameOrder,
    lifecycle: Lifecycle,
}

impl InMemoryBackend {
    pub fn new(ctx: BackendContext, memory_limit: Option<u64>) -> Self {
        let order = FrameOrder::new(ctx.config.dimensions);
        Self {
            ctx,
            memory_limit,
            encoder: None,
            buffer: Vec::new(),
            order,
            lifecycle: Lifecycle::Created,
        }
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn append(&mut self, chunks: Vec<EncodedChunk>) -> ExportResult<()> {
        for chunk in chunks {
            let total = self.buffer.len() as u64 + chunk.len() as u64;
            if let Some(limit) = self.memory_limit {
                if total > limit {
                    return Err(ExportError::encode(format!(
                        "in-memory output would exceed {limit} bytes; use stream or segmented delivery"
                    )));
                }
            }
            self.buffer.extend_from_slice(&chunk);
        }
        Ok(())
    }
}

#[async_trait]
impl EncoderBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn initialize(&mut self) -> ExportResult<()> {
        self.lifecycle.ensure_created()?;
        self.ctx.ensure_supported()?;
        self.encoder = Some(self.ctx.create_encoder()?);
        self.lifecycle = Lifecycle::Ready;
        tracing::debug!(filename = %self.ctx.filename(), "In-memory backend ready");
        Ok(())
    }

    async fn ingest(&mut self, frame: Frame) -> ExportResult<()> {
        self.lifecycle.ensure_ready("ingest")?;
        self.order.check(&frame)?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ExportError::encode("encoder is not running"))?;
        let chunks = encoder.encode(&frame)?;
        self.append(chunks)
    }

    async fn finalize(&mut self) -> ExportResult<CompletionDetails> {
        self.lifecycle.ensure_ready("finalize")?;
        if self.order.frames() == 0 {
            return Err(ExportError::encode("no frames were encoded"));
        }
        let mut encoder = self
            .encoder
            .take()
            .ok_or_else(|| ExportError::encode("encoder is not running"))?;
        let tail = encoder.flush()?;
        self.append(tail)?;
        self.lifecycle = Lifecycle::Finalized;

        let artifact = Artifact {
            filename: self.ctx.filename(),
            mime_type: self.ctx.config.format.mime_type().to_string(),
            data: Arc::new(std::mem::take(&mut self.buffer)),
        };
        tracing::info!(
            filename = %artifact.filename,
            bytes = artifact.size_bytes(),
            "In-memory artifact ready"
        );
        Ok(CompletionDetails::InMemory { artifact })
    }

    async fn dispose(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.abort();
        }
        self.buffer = Vec::new();
        self.lifecycle = Lifecycle::Disposed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::testing::{context, frame, TestFactory, TRAILER};

    #[tokio::test]
    async fn test_buffers_all_chunks_into_artifact() {
        let mut backend = InMemoryBackend::new(context(Arc::new(TestFactory::new(10))), None);
        backend.initialize().await.unwrap();
        for i in 0..3 {
            backend.ingest(frame(i)).await.unwrap();
        }
        assert_eq!(backend.buffered_bytes(), 30);

        let details = backend.finalize().await.unwrap();
        let CompletionDetails::InMemory { artifact } = details else {
            panic!("expected in-memory completion");
        };
        assert_eq!(artifact.filename, "mdimension-20260101-000000.mp4");
        assert_eq!(artifact.mime_type, "video/mp4");
        assert_eq!(artifact.size_bytes(), 30 + TRAILER.len() as u64);
        assert!(artifact.data.ends_with(TRAILER));
    }

    #[tokio::test]
    async fn test_memory_limit_is_encode_error() {
        let mut backend =
            InMemoryBackend::new(context(Arc::new(TestFactory::new(10))), Some(25));
        backend.initialize().await.unwrap();
        backend.ingest(frame(0)).await.unwrap();
        backend.ingest(frame(1)).await.unwrap();
        let err = backend.ingest(frame(2)).await.unwrap_err();
        assert!(matches!(err, ExportError::Encode { .. }));
    }

    #[tokio::test]
    async fn test_ingest_after_dispose_fails() {
        let mut backend = InMemoryBackend::new(context(Arc::new(TestFactory::new(4))), None);
        backend.initialize().await.unwrap();
        backend.dispose().await;
        backend.dispose().await;
        assert!(backend.ingest(frame(0)).await.is_err());
        assert!(backend.finalize().await.is_err());
    }

    #[tokio::test]
    async fn test_out_of_order_frame_rejected() {
        let mut backend = InMemoryBackend::new(context(Arc::new(TestFactory::new(4))), None);
        backend.initialize().await.unwrap();
        backend.ingest(frame(2)).await.unwrap();
        assert!(backend.ingest(frame(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_finalize_without_frames_fails() {
        let mut backend = InMemoryBackend::new(context(Arc::new(TestFactory::new(4))), None);
        backend.initialize().await.unwrap();
        assert!(backend.finalize().await.is_err());
    }
}
