//! Snapshot extraction properties over the public API.

mod common;

use flowvis::model::{Stream, UnitOperation, UnitType, VariableValue};
use flowvis::snapshot::{diff::GraphDiff, extract};

#[test]
fn scenario_three_units_two_streams() {
    let graph = extract(&common::plant()).unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);

    let ids = graph.node_ids();
    for edge in &graph.edges {
        assert!(ids.contains(edge.source.as_str()), "edge {} source", edge.id);
        assert!(ids.contains(edge.target.as_str()), "edge {} target", edge.id);
    }
    graph.validate().unwrap();
}

#[test]
fn repeated_extraction_has_identical_id_sets() {
    let fs = common::plant();
    let a = extract(&fs).unwrap();
    let b = extract(&fs).unwrap();
    assert_eq!(
        a.nodes.iter().map(|n| &n.id).collect::<Vec<_>>(),
        b.nodes.iter().map(|n| &n.id).collect::<Vec<_>>()
    );
    assert_eq!(
        a.edges.iter().map(|e| &e.id).collect::<Vec<_>>(),
        b.edges.iter().map(|e| &e.id).collect::<Vec<_>>()
    );
}

#[test]
fn extraction_reflects_current_values_without_structural_change() {
    let mut fs = common::plant();
    let before = extract(&fs).unwrap();
    fs.set_unit_variable("H01", "duty", VariableValue::with_units(9.9e4, "W"))
        .unwrap();
    let after = extract(&fs).unwrap();

    assert_eq!(before.nodes.len(), after.nodes.len());
    assert_eq!(before.edges.len(), after.edges.len());
    assert_ne!(
        before.node("H01").unwrap().variables["duty"].value,
        after.node("H01").unwrap().variables["duty"].value
    );
}

#[test]
fn growing_the_model_grows_the_snapshot() {
    let mut fs = common::plant();
    fs.add_unit(UnitOperation::new("K01", UnitType::Compressor)).unwrap();
    fs.add_stream(Stream::material("S03", "P01", "K01")).unwrap();
    fs.add_stream(Stream::energy("E01", "H01", "K01")).unwrap();

    let graph = extract(&fs).unwrap();
    assert_eq!(graph.nodes.len(), 4);
    assert_eq!(graph.edges.len(), 4);
    graph.validate().unwrap();
}

#[test]
fn merge_of_consecutive_snapshots_preserves_layout_only() {
    let mut fs = common::plant();
    let mut saved = extract(&fs).unwrap();
    for node in &mut saved.nodes {
        node.position = Some(flowvis::snapshot::Position { x: 5.0, y: 6.0 });
    }

    fs.set_stream_variable("S01", "flow_mol", VariableValue::with_units(120.0, "mol/s"))
        .unwrap();
    let fresh = extract(&fs).unwrap();
    let merged = GraphDiff::new(&saved, &fresh).into_merged();

    // Positions from the saved layout, values from the model
    assert!(merged.nodes.iter().all(|n| n.position.is_some()));
    let s01 = merged.edges.iter().find(|e| e.id == "S01").unwrap();
    assert_eq!(s01.variables["flow_mol"].value, 120.0);
}
