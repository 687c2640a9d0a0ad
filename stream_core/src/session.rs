//! Per-request stream bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Received,
    Validated,
    Generating,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted | SessionState::Failed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, next),
            (Received, Validated)
                | (Received, Failed)
                | (Validated, Generating)
                | (Validated, Failed)
                | (Generating, Streaming)
                | (Generating, Failed)
                | (Streaming, Completed)
                | (Streaming, Aborted)
                | (Streaming, Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Received => "received",
            SessionState::Validated => "validated",
            SessionState::Generating => "generating",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },
}

/// One request's pipeline, from receipt to a terminal state.
#[derive(Debug, Clone)]
pub struct StreamSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    state: SessionState,
    parameters: Option<JobParameters>,
    bytes: u64,
    diagnostic: Option<String>,
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            state: SessionState::Received,
            parameters: None,
            bytes: 0,
            diagnostic: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn validated(&mut self, parameters: JobParameters) -> Result<(), SessionError> {
        self.advance(SessionState::Validated)?;
        self.parameters = Some(parameters);
        Ok(())
    }

    pub fn complete(&mut self, bytes: u64) -> Result<(), SessionError> {
        self.advance(SessionState::Completed)?;
        self.bytes = bytes;
        Ok(())
    }

    pub fn abort(&mut self, bytes: u64) -> Result<(), SessionError> {
        self.advance(SessionState::Aborted)?;
        self.bytes = bytes;
        Ok(())
    }

    pub fn fail(&mut self, bytes: u64, diagnostic: impl Into<String>) -> Result<(), SessionError> {
        self.advance(SessionState::Failed)?;
        self.bytes = bytes;
        self.diagnostic = Some(diagnostic.into());
        Ok(())
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            id: self.id,
            state: self.state,
            bytes: self.bytes,
            started_at: self.started_at,
            finished_at: self.finished_at,
            parameters: self.parameters.clone(),
            diagnostic: self.diagnostic.clone(),
        }
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub state: SessionState,
    pub bytes: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JobParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}
