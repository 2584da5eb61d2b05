//! Stream delivery: encoded chunks are written to a user-granted file while
//! the export runs.
//!
//! Chunks travel through a bounded channel to a writer task. When the sink
//! falls behind the channel fills up and `ingest` waits, which in turn stalls
//! the frame loop instead of growing memory without bound.

use std::path::PathBuf;

use async_trait::async_trait;
use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{BackendKind, CompletionDetails};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    BackendContext, ChunkEncoder, EncodedChunk, EncoderBackend, FileGrant, FrameOrder, Lifecycle,
};
use crate::frame_source::Frame;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

enum Target {
    Grant(FileGrant),
    Writer(Sink),
}

pub struct StreamBackend {
    ctx: BackendContext,
    path: PathBuf,
    capacity: usize,
    target: Option<Target>,
    encoder: Option<Box<dyn ChunkEncoder>>,
    tx: Option<mpsc::Sender<EncodedChunk>>,
    writer: Option<JoinHandle<std::io::Result<u64>>>,
    order: FrameOrder,
    lifecycle: Lifecycle,
}

async fn write_chunks(mut sink: Sink, mut rx: mpsc::Receiver<EncodedChunk>) -> std::io::Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = rx.recv().await {
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    sink.shutdown().await?;
    Ok(written)
}

impl StreamBackend {
    /// Stream into the granted file. The file is created (or truncated) on
    /// `initialize`.
    pub fn new(ctx: BackendContext, grant: FileGrant, capacity: usize) -> Self {
        let path = grant.path().to_path_buf();
        Self::with_target(ctx, path, Target::Grant(grant), capacity)
    }

    /// Stream into an already open writer. `label` is reported as the output
    /// path.
    pub fn with_writer(
        ctx: BackendContext,
        label: impl Into<PathBuf>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        capacity: usize,
    ) -> Self {
        Self::with_target(ctx, label.into(), Target::Writer(Box::new(writer)), capacity)
    }

    fn with_target(ctx: BackendContext, path: PathBuf, target: Target, capacity: usize) -> Self {
        let order = FrameOrder::new(ctx.config.dimensions);
        Self {
            ctx,
            path,
            capacity: capacity.max(1),
            target: Some(target),
            encoder: None,
            tx: None,
            writer: None,
            order,
            lifecycle: Lifecycle::Created,
        }
    }

    async fn open(&mut self) -> ExportResult<Sink> {
        match self.target.take() {
            Some(Target::Writer(sink)) => Ok(sink),
            Some(Target::Grant(grant)) => {
                let file = tokio::fs::File::create(grant.path()).await.map_err(|e| {
                    ExportError::encode(format!(
                        "cannot open stream target {}: {e}",
                        grant.path().display()
                    ))
                })?;
                Ok(Box::new(file))
            }
            None => Err(ExportError::encode("stream target already consumed")),
        }
    }

    async fn send(&mut self, chunks: Vec<EncodedChunk>) -> ExportResult<()> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| ExportError::encode("stream is closed"))?;
        for chunk in chunks.into_iter().filter(|c| !c.is_empty()) {
            if tx.send(chunk).await.is_err() {
                return Err(self.writer_failure().await);
            }
        }
        Ok(())
    }

    /// The writer task stopped early; collect its error.
    async fn writer_failure(&mut self) -> ExportError {
        self.tx = None;
        let Some(handle) = self.writer.take() else {
            return ExportError::encode("stream writer is not running");
        };
        match handle.await {
            Ok(Err(e)) => ExportError::encode(format!("writing to {} failed: {e}", self.path.display())),
            Ok(Ok(_)) => ExportError::encode("stream writer stopped early"),
            Err(e) => ExportError::encode(format!("stream writer crashed: {e}")),
        }
    }
}

#[async_trait]
impl EncoderBackend for StreamBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Stream
    }

    async fn initialize(&mut self) -> ExportResult<()> {
        self.lifecycle.ensure_created()?;
        self.ctx.ensure_supported()?;
        let sink = self.open().await?;
        self.encoder = Some(self.ctx.create_encoder()?);

        let (tx, rx) = mpsc::channel(self.capacity);
        self.tx = Some(tx);
        self.writer = Some(tokio::spawn(write_chunks(sink, rx)));
        self.lifecycle = Lifecycle::Ready;
        tracing::info!(
            path = %self.path.display(),
            capacity = self.capacity,
            "Streaming export output"
        );
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
        self.send(chunks).await
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
        self.send(tail).await?;

        self.tx = None;
        let handle = self
            .writer
            .take()
            .ok_or_else(|| ExportError::encode("stream writer is not running"))?;
        let bytes_written = handle
            .await
            .map_err(|e| ExportError::encode(format!("stream writer crashed: {e}")))?
            .map_err(|e| {
                ExportError::encode(format!("writing to {} failed: {e}", self.path.display()))
            })?;
        self.lifecycle = Lifecycle::Finalized;

        tracing::info!(path = %self.path.display(), bytes_written, "Stream closed");
        Ok(CompletionDetails::Stream {
            path: self.path.clone(),
            bytes_written,
        })
    }

    async fn dispose(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.abort();
        }
        self.tx = None;
        if let Some(handle) = self.writer.take() {
            // Let the writer drain and close the file handle.
            if let Ok(Err(e)) = handle.await {
                tracing::warn!(path = %self.path.display(), error = %e, "Stream writer failed during dispose");
            }
        }
        self.target = None;
        self.lifecycle = Lifecycle::Disposed;
    }
}
