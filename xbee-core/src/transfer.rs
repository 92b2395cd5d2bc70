//! Chunked transfer engine: one worker per job reads a byte source, encodes each chunk into a
//! relay frame and hands it to the session's link, emitting progress and exactly one terminal event.
//!
//! Dispatch is fire-and-forget. A chunk counts as sent once the link queue accepts it; the module
//! never acknowledges relay data, so there is no retry and no peer-driven backpressure.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chunk::ChunkReader;
use crate::event::Event;
use crate::job::{JobState, TransferJob};
use crate::protocol::LogicalInterface;
use crate::session::{Session, SessionRegistry};
use crate::source::ByteSource;
use crate::wire::RelayCodec;
use crate::RelayError;

/// Starts transfer jobs against sessions in a registry.
pub struct TransferEngine {
    registry: Arc<SessionRegistry>,
    codec: RelayCodec,
    interface: LogicalInterface,
    events: mpsc::UnboundedSender<Event>,
}

/// Returned by `start` once the job exists. Dropping it does not stop the job.
#[derive(Debug)]
pub struct TransferHandle {
    job_id: Uuid,
    address: String,
    task: JoinHandle<JobState>,
}

impl TransferHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wait for the job's terminal state.
    pub async fn wait(self) -> JobState {
        self.task.await.unwrap_or(JobState::Failed)
    }
}

impl TransferEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        codec: RelayCodec,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            registry,
            codec,
            interface: LogicalInterface::Serial,
            events,
        }
    }

    /// Logical interface transfer chunks are addressed to (serial by default).
    pub fn with_interface(mut self, interface: LogicalInterface) -> Self {
        self.interface = interface;
        self
    }

    pub fn codec(&self) -> &RelayCodec {
        &self.codec
    }

    /// Create a job and spawn its worker. Only precondition failures are returned here;
    /// everything after this point surfaces as the job's `TransferFailed` event.
    /// Must be called from within a tokio runtime.
    pub fn start<S: ByteSource>(
        &self,
        address: &str,
        source: S,
        declared_length: u64,
        chunk_size: usize,
    ) -> Result<TransferHandle, RelayError> {
        if chunk_size == 0 {
            return Err(RelayError::InvalidChunkSize);
        }
        let session = self
            .registry
            .lookup(address)
            .ok_or_else(|| RelayError::SessionNotFound(address.to_string()))?;
        let job = TransferJob::new(address, declared_length);
        let job_id = job.id;
        tracing::info!(
            %job_id,
            address,
            declared_length,
            chunk_size,
            "transfer started"
        );
        let worker = Worker {
            session,
            codec: self.codec,
            interface: self.interface,
            events: self.events.clone(),
        };
        let task = tokio::spawn(worker.run(job, ChunkReader::new(source, chunk_size)));
        Ok(TransferHandle {
            job_id,
            address: address.to_string(),
            task,
        })
    }
}

struct Worker {
    session: Arc<Session>,
    codec: RelayCodec,
    interface: LogicalInterface,
    events: mpsc::UnboundedSender<Event>,
}

impl Worker {
    async fn run<S: ByteSource>(self, mut job: TransferJob, mut reader: ChunkReader<S>) -> JobState {
        loop {
            let chunk = match reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return self.complete(&mut job),
                Err(e) => {
                    return self.fail(&mut job, RelayError::SourceReadFailure(e.to_string()))
                }
            };
            let frame = match self.codec.encode(&self.session, self.interface, &chunk) {
                Ok(frame) => frame,
                Err(e) => return self.fail(&mut job, RelayError::EncodeFailure(e.to_string())),
            };
            if let Err(e) = self.session.dispatch(&frame).await {
                return self.fail(&mut job, RelayError::DispatchFailure(e.to_string()));
            }
            job.record_dispatch(chunk.len());
            tracing::debug!(
                job_id = %job.id,
                seq = frame.sequence_id,
                chunk = job.chunks_sent,
                bytes = job.bytes_sent,
                "chunk dispatched"
            );
            self.emit(Event::TransferProgress(job.snapshot(false)));
        }
    }

    fn complete(&self, job: &mut TransferJob) -> JobState {
        if job.complete() {
            let last = job.snapshot(true);
            tracing::info!(
                job_id = %job.id,
                bytes = job.bytes_sent,
                chunks = job.chunks_sent,
                throughput = last.throughput,
                "transfer completed"
            );
            self.emit(Event::TransferProgress(last));
            self.emit(Event::TransferCompleted {
                job_id: job.id,
                address: job.session_address.clone(),
            });
        }
        job.state()
    }

    fn fail(&self, job: &mut TransferJob, err: RelayError) -> JobState {
        if job.fail() {
            tracing::warn!(
                job_id = %job.id,
                chunks = job.chunks_sent,
                "transfer failed: {}",
                err
            );
            self.emit(Event::TransferFailed {
                job_id: job.id,
                address: job.session_address.clone(),
                kind: err.kind().to_string(),
                reason: err.to_string(),
            });
        }
        job.state()
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}
