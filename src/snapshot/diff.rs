//! Layout-preserving merge of a saved graph document with a fresh extraction.
//!
//! The server keeps two views of each flowsheet: the document last saved to
//! the datastore (which carries user layout) and the live model. On every
//! retrieval the two are reconciled: model-derived data always comes from the
//! fresh extraction, while node positions survive from the saved document for
//! nodes that still exist. The diff's change count tells the server whether
//! the merged document needs to be written back.

use std::collections::HashMap;

use crate::snapshot::{FlowsheetGraph, Position};

/// Difference between a saved graph document and a fresh extraction,
/// together with the merged result.
#[derive(Debug, Clone)]
pub struct GraphDiff {
    /// Node ids present in the fresh extraction but not the saved document
    pub added_nodes: Vec<String>,
    /// Node ids present in the saved document but gone from the model
    pub removed_nodes: Vec<String>,
    pub added_edges: Vec<String>,
    pub removed_edges: Vec<String>,
    /// Nodes/edges present in both whose label or variables differ
    pub changed: Vec<String>,
    merged: FlowsheetGraph,
}

impl GraphDiff {
    /// Compare `saved` against `fresh` and build the merged document.
    ///
    /// The merged graph is the fresh extraction with positions carried over
    /// from the saved document; its version is the larger of the two inputs'.
    pub fn new(saved: &FlowsheetGraph, fresh: &FlowsheetGraph) -> Self {
        let saved_positions: HashMap<&str, Position> = saved
            .nodes
            .iter()
            .filter_map(|n| n.position.map(|p| (n.id.as_str(), p)))
            .collect();

        let mut added_nodes = Vec::new();
        let mut changed = Vec::new();

        for node in &fresh.nodes {
            match saved.node(&node.id) {
                None => added_nodes.push(node.id.clone()),
                Some(old) => {
                    if old.label != node.label
                        || old.variables != node.variables
                        || old.unit_type != node.unit_type
                    {
                        changed.push(node.id.clone());
                    }
                }
            }
        }

        let removed_nodes: Vec<String> = saved
            .nodes
            .iter()
            .filter(|n| fresh.node(&n.id).is_none())
            .map(|n| n.id.clone())
            .collect();

        let fresh_edge = |id: &str| fresh.edges.iter().find(|e| e.id == id);
        let saved_edge = |id: &str| saved.edges.iter().find(|e| e.id == id);

        let mut added_edges = Vec::new();
        for edge in &fresh.edges {
            match saved_edge(&edge.id) {
                None => added_edges.push(edge.id.clone()),
                Some(old) => {
                    if old.source != edge.source
                        || old.target != edge.target
                        || old.variables != edge.variables
                    {
                        changed.push(edge.id.clone());
                    }
                }
            }
        }
        let removed_edges: Vec<String> = saved
            .edges
            .iter()
            .filter(|e| fresh_edge(&e.id).is_none())
            .map(|e| e.id.clone())
            .collect();

        let mut merged = fresh.clone();
        merged.version = saved.version.max(fresh.version);
        for node in &mut merged.nodes {
            if let Some(pos) = saved_positions.get(node.id.as_str()) {
                node.position = Some(*pos);
            }
        }

        Self {
            added_nodes,
            removed_nodes,
            added_edges,
            removed_edges,
            changed,
            merged,
        }
    }

    /// Number of differing items between the two documents.
    pub fn len(&self) -> usize {
        self.added_nodes.len()
            + self.removed_nodes.len()
            + self.added_edges.len()
            + self.removed_edges.len()
            + self.changed.len()
    }

    /// True when the saved document already matches the model.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The merged document: fresh model data plus surviving saved layout.
    pub fn merged(&self) -> FlowsheetGraph {
        self.merged.clone()
    }

    pub fn into_merged(self) -> FlowsheetGraph {
        self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Flowsheet, Stream, UnitOperation, UnitType, VariableValue};
    use crate::snapshot::extract;

    fn fixture() -> Flowsheet {
        let mut fs = Flowsheet::new("merge_fixture");
        fs.add_unit(UnitOperation::new("F01", UnitType::Feed)).unwrap();
        fs.add_unit(
            UnitOperation::new("H01", UnitType::Heater)
                .with_variable("duty", VariableValue::with_units(500.0, "W")),
        )
        .unwrap();
        fs.add_stream(Stream::material("S01", "F01", "H01")).unwrap();
        fs
    }

    fn positioned(graph: &FlowsheetGraph, id: &str, x: f64, y: f64) -> FlowsheetGraph {
        let mut g = graph.clone();
        for node in &mut g.nodes {
            if node.id == id {
                node.position = Some(Position { x, y });
            }
        }
        g
    }

    #[test]
    fn identical_documents_have_empty_diff() {
        let graph = extract(&fixture()).unwrap();
        let diff = GraphDiff::new(&graph, &graph);
        assert!(diff.is_empty());
        assert_eq!(diff.merged(), graph);
    }

    #[test]
    fn saved_positions_survive_merge() {
        let fresh = extract(&fixture()).unwrap();
        let saved = positioned(&fresh, "H01", 120.0, 40.0);
        let merged = GraphDiff::new(&saved, &fresh).into_merged();
        assert_eq!(
            merged.node("H01").unwrap().position,
            Some(Position { x: 120.0, y: 40.0 })
        );
    }

    #[test]
    fn model_values_win_over_saved_values() {
        let mut fs = fixture();
        let saved = extract(&fs).unwrap();
        fs.set_unit_variable("H01", "duty", VariableValue::with_units(900.0, "W"))
            .unwrap();
        let fresh = extract(&fs).unwrap();
        let diff = GraphDiff::new(&saved, &fresh);
        assert_eq!(diff.changed, vec!["H01".to_string()]);
        assert_eq!(
            diff.merged().node("H01").unwrap().variables["duty"].value,
            900.0
        );
    }

    #[test]
    fn deleted_node_drops_out_of_merge() {
        let mut fs = fixture();
        let saved = positioned(&extract(&fs).unwrap(), "H01", 10.0, 10.0);
        fs.remove_unit("H01").unwrap();
        let fresh = extract(&fs).unwrap();
        let diff = GraphDiff::new(&saved, &fresh);
        assert_eq!(diff.removed_nodes, vec!["H01".to_string()]);
        assert_eq!(diff.removed_edges, vec!["S01".to_string()]);
        assert!(diff.merged().node("H01").is_none());
    }

    #[test]
    fn new_unit_shows_up_as_added() {
        let mut fs = fixture();
        let saved = extract(&fs).unwrap();
        fs.add_unit(UnitOperation::new("P01", UnitType::Product)).unwrap();
        fs.add_stream(Stream::material("S02", "H01", "P01")).unwrap();
        let fresh = extract(&fs).unwrap();
        let diff = GraphDiff::new(&saved, &fresh);
        assert_eq!(diff.added_nodes, vec!["P01".to_string()]);
        assert_eq!(diff.added_edges, vec!["S02".to_string()]);
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn merge_keeps_larger_version() {
        let fresh = extract(&fixture()).unwrap();
        let mut saved = fresh.clone();
        saved.version = 7;
        assert_eq!(GraphDiff::new(&saved, &fresh).merged().version, 7);
    }
}
