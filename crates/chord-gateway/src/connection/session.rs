//! Session state
//!
//! Tracks the session id and sequence number that make a Resume possible.
//! The reader loop is the only writer; the heartbeat task reads the sequence.

use crate::protocol::ResumePayload;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the resumable session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    pub shard_id: Option<u32>,
}

/// Live session state shared between the reader loop and the heartbeat driver
#[derive(Debug)]
pub struct SessionState {
    session_id: RwLock<Option<String>>,

    /// Last dispatch sequence; 0 means none seen yet
    sequence: AtomicU64,

    shard_id: Option<u32>,
}

impl SessionState {
    #[must_use]
    pub fn new(shard_id: Option<u32>) -> Self {
        Self {
            session_id: RwLock::new(None),
            sequence: AtomicU64::new(0),
            shard_id,
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn sequence(&self) -> Option<u64> {
        match self.sequence.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    pub fn shard_id(&self) -> Option<u32> {
        self.shard_id
    }

    /// Record a dispatch sequence number
    ///
    /// Lower or repeated values keep the current one. Returns the value in
    /// effect afterwards.
    pub fn observe_sequence(&self, seq: u64) -> u64 {
        let previous = self.sequence.fetch_max(seq, Ordering::AcqRel);
        previous.max(seq)
    }

    /// Start a new session after READY
    pub fn establish(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        tracing::debug!(session_id = %session_id, shard_id = ?self.shard_id, "Session established");
        *self.session_id.write() = Some(session_id);
    }

    /// Drop the session so the next connection identifies from scratch
    pub fn invalidate(&self) {
        let previous = self.session_id.write().take();
        self.sequence.store(0, Ordering::Release);
        if let Some(session_id) = previous {
            tracing::debug!(session_id = %session_id, "Session invalidated");
        }
    }

    /// A Resume needs both a session id and a sequence
    pub fn can_resume(&self) -> bool {
        self.session_id.read().is_some() && self.sequence().is_some()
    }

    /// Build the Resume payload, if the session is resumable
    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        let session_id = self.session_id.read().clone()?;
        let seq = self.sequence()?;
        Some(ResumePayload {
            token: token.to_string(),
            session_id,
            seq,
        })
    }

    pub fn snapshot(&self) -> Session {
        Session {
            session_id: self.session_id(),
            sequence: self.sequence(),
            shard_id: self.shard_id,
        }
    }
}
