//! Snapshot extraction: turning a live model into a serializable graph.
//!
//! [`extract`] walks a [`Flowsheet`] and produces a [`FlowsheetGraph`], the
//! document the server hands to browser clients: nodes (unit operations) and
//! edges (streams), each carrying the current variable values. Extraction is
//! read-only and deterministic - nodes and edges come out sorted by id, so
//! two extractions of an unchanged model produce identical id sets.
//!
//! The extractor re-checks referential integrity even though the model API
//! enforces it on construction: a model deserialized from an external
//! document can be malformed, and a snapshot with dangling edges must never
//! reach a client.

pub mod diff;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::model::{Flowsheet, StreamType, UnitType, VariableValue};
use crate::{Error, Result};

/// A user-settable diagram position, in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One unit operation in an extracted graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub unit_type: UnitType,

    /// Layout position; never set by extraction, only by saved layouts and
    /// client edits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    #[serde(default)]
    pub variables: BTreeMap<String, VariableValue>,
}

/// One stream connection in an extracted graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub stream_type: StreamType,

    /// Id of the source node
    pub source: String,

    /// Id of the target node
    pub target: String,

    #[serde(default)]
    pub variables: BTreeMap<String, VariableValue>,
}

/// A point-in-time serialization of a flowsheet.
///
/// Invariant: every edge's `source` and `target` name a node present in
/// `nodes`. Snapshots are immutable once produced; the server supersedes
/// them wholesale on refresh and tracks `version` monotonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowsheetGraph {
    pub name: String,

    /// Sequence number assigned by the serving layer; 0 for a fresh
    /// extraction that has not been registered yet.
    #[serde(default)]
    pub version: u64,

    pub extracted_at: DateTime<Utc>,

    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl FlowsheetGraph {
    /// Ids of all nodes in this snapshot.
    pub fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Verify the edge-reference invariant.
    pub fn validate(&self) -> Result<()> {
        let ids = self.node_ids();
        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !ids.contains(end.as_str()) {
                    return Err(Error::Extraction(format!(
                        "Edge '{}' references missing node '{}'",
                        edge.id, end
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Extract a serializable snapshot from a live flowsheet.
///
/// Fails with [`Error::Extraction`] if the model's stream graph cannot be
/// walked: duplicate ids, or a stream endpoint naming a unit that does not
/// exist.
pub fn extract(flowsheet: &Flowsheet) -> Result<FlowsheetGraph> {
    let mut unit_ids: HashSet<&str> = HashSet::new();
    for unit in &flowsheet.units {
        if !unit_ids.insert(unit.id.as_str()) {
            return Err(Error::Extraction(format!(
                "Duplicate unit id '{}'",
                unit.id
            )));
        }
    }

    let mut nodes: Vec<Node> = flowsheet
        .units
        .iter()
        .map(|u| Node {
            id: u.id.clone(),
            label: u.label.clone(),
            unit_type: u.unit_type.clone(),
            position: None,
            variables: u.variables.clone(),
        })
        .collect();

    let mut edge_ids: HashSet<&str> = HashSet::new();
    let mut edges: Vec<Edge> = Vec::with_capacity(flowsheet.streams.len());
    for stream in &flowsheet.streams {
        if !edge_ids.insert(stream.id.as_str()) {
            return Err(Error::Extraction(format!(
                "Duplicate stream id '{}'",
                stream.id
            )));
        }
        for endpoint in [&stream.source, &stream.target] {
            if !unit_ids.contains(endpoint.unit.as_str()) {
                return Err(Error::Extraction(format!(
                    "Stream '{}' references missing unit '{}'",
                    stream.id, endpoint.unit
                )));
            }
        }
        edges.push(Edge {
            id: stream.id.clone(),
            stream_type: stream.stream_type,
            source: stream.source.unit.clone(),
            target: stream.target.unit.clone(),
            variables: stream.variables.clone(),
        });
    }

    // Stable ordering regardless of model insertion order
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    edges.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(FlowsheetGraph {
        name: flowsheet.name.clone(),
        version: 0,
        extracted_at: Utc::now(),
        nodes,
        edges,
    })
}
