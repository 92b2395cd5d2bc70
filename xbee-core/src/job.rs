//! Transfer job state: counters and progress math, owned by the worker that drives the job.

use std::time::Instant;

use uuid::Uuid;

use crate::event::TransferProgress;

/// Job lifecycle. Running is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

/// One chunked transfer. Not shared: observers only see `TransferProgress` snapshots.
#[derive(Debug)]
pub struct TransferJob {
    pub id: Uuid,
    pub session_address: String,
    /// 0 when unknown.
    pub declared_length: u64,
    pub bytes_sent: u64,
    pub chunks_sent: u64,
    pub started: Instant,
    state: JobState,
}

impl TransferJob {
    pub fn new(session_address: &str, declared_length: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_address: session_address.to_string(),
            declared_length,
            bytes_sent: 0,
            chunks_sent: 0,
            started: Instant::now(),
            state: JobState::Running,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state != JobState::Running
    }

    /// Count one dispatched chunk. Ignored once terminal.
    pub fn record_dispatch(&mut self, len: usize) {
        if self.is_terminal() {
            return;
        }
        self.bytes_sent += len as u64;
        self.chunks_sent += 1;
    }

    /// Running -> Completed. Returns false if the job was already terminal.
    pub fn complete(&mut self) -> bool {
        self.finish(JobState::Completed)
    }

    /// Running -> Failed. Returns false if the job was already terminal.
    pub fn fail(&mut self) -> bool {
        self.finish(JobState::Failed)
    }

    fn finish(&mut self, to: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = to;
        true
    }

    /// floor(bytes_sent * 100 / declared_length), capped at 100; None when length is unknown.
    pub fn progress_percent(&self) -> Option<u8> {
        if self.declared_length == 0 {
            return None;
        }
        let pct = (self.bytes_sent as u128 * 100) / self.declared_length as u128;
        Some(pct.min(100) as u8)
    }

    /// Bytes per millisecond over `elapsed_ms`; elapsed is floored at 1 ms.
    pub fn throughput(&self, elapsed_ms: u128) -> f64 {
        self.bytes_sent as f64 / elapsed_ms.max(1) as f64
    }

    pub fn snapshot_at(&self, now: Instant, is_done: bool) -> TransferProgress {
        let elapsed_ms = now.saturating_duration_since(self.started).as_millis();
        TransferProgress {
            job_id: self.id,
            address: self.session_address.clone(),
            chunks_sent: self.chunks_sent,
            bytes_sent: self.bytes_sent,
            declared_length: self.declared_length,
            progress_percent: self.progress_percent(),
            throughput: self.throughput(elapsed_ms),
            is_done,
        }
    }

    pub fn snapshot(&self, is_done: bool) -> TransferProgress {
        self.snapshot_at(Instant::now(), is_done)
    }
}
