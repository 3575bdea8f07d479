//! Client session registry.
//!
//! Each browser connection gets a uuid-identified [`ClientSession`] holding
//! its last-known view state (node positions). Sessions are isolated: an
//! update names its session id and can never touch another session's
//! positions. WebSocket connections create their session on upgrade and
//! remove it on disconnect; the REST session routes allow the same lifecycle
//! for clients that do not hold a socket open.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::snapshot::Position;
use crate::{Error, Result};

/// One browser connection's view state.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSession {
    pub id: String,
    pub created_at: DateTime<Utc>,

    /// Node id → last position reported by this session
    pub positions: HashMap<String, Position>,
}

impl ClientSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            positions: HashMap::new(),
        }
    }
}

/// All live sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ClientSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session and return its id.
    pub fn create(&mut self) -> String {
        let session = ClientSession::new();
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        id
    }

    pub fn get(&self, id: &str) -> Option<&ClientSession> {
        self.sessions.get(id)
    }

    /// Apply position updates to one session.
    ///
    /// Returns the number of positions applied; unknown sessions are
    /// NotFound. Other sessions are untouched by construction - the update
    /// path only ever reaches the addressed entry.
    pub fn update_positions(
        &mut self,
        id: &str,
        updates: HashMap<String, Position>,
    ) -> Result<usize> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("session '{}'", id)))?;
        let count = updates.len();
        session.positions.extend(updates);
        Ok(count)
    }

    /// Drop a session. Returns false when the id was unknown.
    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
