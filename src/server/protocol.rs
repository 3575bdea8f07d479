//! WebSocket protocol types for the diagram client.
//!
//! Messages are JSON-encoded and use a `type` field for discrimination.
//!
//! ## Client → Server ([`ClientMessage`])
//! - `update_positions`: move nodes in this session's view state
//! - `ping`: keepalive
//!
//! ## Server → Client ([`ServerMessage`])
//! - `session`: the session id assigned on connect
//! - `graph_changed`: a flowsheet's served document has a new version
//! - `reload`: the save file changed on disk; re-fetch
//! - `positions_applied`: acknowledgement of an `update_positions`
//! - `pong`: keepalive response
//! - `error`: a client message could not be handled; the connection stays open

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::snapshot::Position;

/// Messages sent from the diagram client to the server.
///
/// # Examples
///
/// ```json
/// {"type": "update_positions", "positions": {"H01": {"x": 120.0, "y": 40.0}}}
/// {"type": "ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Move one or more nodes in this session's view state.
    ///
    /// Scoped to the sending connection's session; applied in receipt
    /// order.
    UpdatePositions {
        positions: HashMap<String, Position>,
    },

    /// Keepalive ping; answered with `pong`.
    Ping,
}

/// Messages sent from the server to diagram clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect: the session id backing this connection.
    Session { session: String },

    /// A flowsheet's served document changed; clients re-fetch `/fs`.
    GraphChanged {
        flowsheet: String,
        version: u64,
        timestamp: DateTime<Utc>,
    },

    /// The save file changed on disk (external edit); clients re-fetch.
    Reload { timestamp: DateTime<Utc> },

    /// Acknowledgement of `update_positions`.
    PositionsApplied { count: usize },

    Pong,

    /// A client message could not be handled. The connection stays open.
    Error { message: String },
}

impl ServerMessage {
    /// Encode for the broadcast channel / socket.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("protocol types serialize infallibly")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_wire_format() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "update_positions", "positions": {"H01": {"x": 1.5, "y": -2.0}}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::UpdatePositions { positions } => {
                assert_eq!(positions["H01"], Position { x: 1.5, y: -2.0 });
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let ping: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn server_message_wire_format() {
        let msg = ServerMessage::GraphChanged {
            flowsheet: "plant".into(),
            version: 3,
            timestamp: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "graph_changed");
        assert_eq!(value["flowsheet"], "plant");
        assert_eq!(value["version"], 3);
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let res: Result<ClientMessage, _> = serde_json::from_str(r#"{"type": "dance"}"#);
        assert!(res.is_err());
    }
}
