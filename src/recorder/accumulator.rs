//! Chunk accumulation
//!
//! Buffers the data fragments delivered during a session and assembles them
//! into the finished artifact exactly once.

use super::error::{RecorderError, RecorderResult};
use super::state::FinishedArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No session attached
    Closed,
    /// Accepting chunks
    Open,
    /// Artifact produced; no further chunks or finalization
    Finalized,
}

/// Append-only chunk buffer for one capture session
#[derive(Debug)]
pub struct ChunkAccumulator {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
    phase: Phase,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            total_bytes: 0,
            phase: Phase::Closed,
        }
    }

    /// Start accepting chunks for a new session
    pub fn open(&mut self) {
        self.clear();
        self.phase = Phase::Open;
    }

    /// Append a chunk. Zero-length chunks are discarded (`Ok(false)`).
    pub fn push(&mut self, chunk: Vec<u8>) -> RecorderResult<bool> {
        if self.phase != Phase::Open {
            return Err(RecorderError::ChunkRejected);
        }
        if chunk.is_empty() {
            return Ok(false);
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        Ok(true)
    }

    /// Concatenate all chunks into the session artifact
    pub fn finalize(
        &mut self,
        media_type: &str,
        duration_seconds: u64,
    ) -> RecorderResult<FinishedArtifact> {
        match self.phase {
            Phase::Open => {}
            Phase::Finalized => return Err(RecorderError::FinalizeConflict),
            Phase::Closed => return Err(RecorderError::ChunkRejected),
        }

        let mut payload = Vec::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            payload.extend_from_slice(chunk);
        }
        self.phase = Phase::Finalized;

        Ok(FinishedArtifact::new(
            payload,
            media_type,
            duration_seconds,
            self.chunks.len(),
        ))
    }

    /// Drop all chunks and detach from the session
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
        self.phase = Phase::Closed;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == Phase::Finalized
    }
}

impl Default for ChunkAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
