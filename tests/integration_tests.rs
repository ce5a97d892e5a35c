//! Integration tests for the complete AMAQL pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Pattern text → InputDescriptor → QueryDescriptor
//! - Rule text → DerivationEngine → derived edges in GraphDB
//! - QueryEngine over bonded and path relationships
//! - GraphSnapshot persistence
//!
//! Run with: cargo test --test integration_tests

use amaql_dsl::{mount_input_descriptor, AmaqlError, DerivationRule, Direction, QueryDescriptor};
use amaql_graphdb::{
    DerivationEngine, Edge, EngineError, GraphDB, GraphSnapshot, OutputMode, QueryEngine,
    QueryEngineConfig, QueryOutput, Vertex,
};
use tempfile::tempdir;

// ============================================================================
// Fixture
// ============================================================================

fn fixture() -> GraphDB {
    let mut db = GraphDB::new();
    db.add_many_vertices([
        Vertex::new("1", "First", ["t1"]),
        Vertex::new("2", "Second", ["t1"]),
        Vertex::new("3", "Third", ["t3"]),
        Vertex::new("4", "Fourth", ["t2"]),
        Vertex::new("5", "Fifth", ["t2"]),
    ])
    .unwrap();
    db.add_many_edges([
        Edge::new("1", "2", ["et1"]),
        Edge::new("2", "3", ["et2", "et3"]),
        Edge::new("4", "3", ["et1"]),
        Edge::new("4", "5", ["et3"]),
        Edge::new("1", "5", ["et2"]),
    ])
    .unwrap();
    db
}

fn rules() -> Vec<DerivationRule> {
    vec![
        DerivationRule::new("()[et1]>()[et2,et3]>()", "(1)[et1](3)")
            .unwrap()
            .with_label("et1-through-et2"),
        DerivationRule::new("()[et1]>(t3)<[et1]()", "(1)[sibling](3)").unwrap(),
        DerivationRule::new("(t1)[et2]>(t2)<[et3](t2)", "(1)[et3](2)").unwrap(),
    ]
}

async fn derived_fixture() -> GraphDB {
    let mut db = fixture();
    let report = DerivationEngine::new(&mut db, rules(), None, None)
        .unwrap()
        .derive_edges(1)
        .await;
    assert_eq!(report.passes, 1);
    db
}

fn vertex_ids(output: QueryOutput) -> Vec<Vec<String>> {
    output
        .into_paths()
        .iter()
        .map(|p| p.vertex_ids().into_iter().map(str::to_string).collect())
        .collect()
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_pattern_compiles_to_triples() {
    let query = "?(node)-[realization]->(applicationcomponent)=[serving]=>(businessprocess)";
    let input = mount_input_descriptor(query).unwrap();
    assert_eq!(input.chain().len(), 5);

    let descriptor = input.generate_query_descriptor();
    assert_eq!(descriptor, QueryDescriptor::parse(query).unwrap());
    assert_eq!(descriptor.query_chain.len(), 2);
    assert!(descriptor
        .query_chain
        .iter()
        .all(|t| t.relationship.direction == Direction::Right));
    assert!(!descriptor.query_chain[0].relationship.is_derived);
    assert!(descriptor.query_chain[1].relationship.is_derived);
}

// ============================================================================
// Derivation
// ============================================================================

#[tokio::test]
async fn test_derivation_creates_transitive_edge() {
    let db = derived_fixture().await;

    let edge = db.get_edge("1-[et1]->3").expect("derived edge");
    assert!(edge.is_derived());
    assert_eq!(
        edge.derivation_path,
        vec!["et1-through-et2", "1-[et1]->2", "2-[et2,et3]->3"]
    );

    // Second rule sees the edge the first one produced in the same pass.
    assert!(db.exists("1-[sibling]->4"));
    assert!(db.exists("4-[sibling]->1"));
    assert!(db.exists("1-[et3]->5"));
    assert_eq!(db.derived_edge_count(), 4);
    assert_eq!(db.edge_count(), 9);
}

#[tokio::test]
async fn test_rederiving_is_idempotent() {
    let mut db = derived_fixture().await;
    let before = db.edge_count();
    let report = DerivationEngine::new(&mut db, rules(), None, None)
        .unwrap()
        .derive_edges(5)
        .await;
    assert_eq!(report.edges_added, 0);
    assert_eq!(report.passes, 1);
    assert_eq!(db.edge_count(), before);
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_bonded_queries_ignore_derived_edges() {
    let db = derived_fixture().await;
    let engine = QueryEngine::new(&db);

    let any_outbound = engine.run("?(t1)->(*)", None).await.unwrap();
    assert_eq!(
        vertex_ids(any_outbound),
        vec![vec!["1", "2"], vec!["2", "3"], vec!["1", "5"]]
    );

    let typed = engine.run("?(t1)-[et2]->(*)", None).await.unwrap();
    assert_eq!(typed.len(), 2);

    let chained = engine.run("?(t3)<-(*)-[et3]->(t2)", None).await.unwrap();
    assert_eq!(vertex_ids(chained), vec![vec!["3", "4", "5"]]);
}

#[tokio::test]
async fn test_path_queries_use_derived_edges() {
    let db = derived_fixture().await;
    let engine = QueryEngine::new(&db);

    let output = engine.run("?(t1)=[et1]=>(t3)", None).await.unwrap();
    let paths = output.into_paths();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].vertex_ids(), vec!["1", "3"]);
    assert!(paths[0].edges().all(Edge::is_derived));
}

#[tokio::test]
async fn test_scope_list_and_initial_ids() {
    let db = derived_fixture().await;
    let scope = QueryEngine::new(&db).with_config(QueryEngineConfig {
        output: OutputMode::ScopeList,
    });
    let QueryOutput::ScopeList(vertices) = scope.run("?(t1)->(*)", None).await.unwrap() else {
        panic!("expected a scope list");
    };
    let ids: Vec<&str> = vertices.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "5"]);

    let engine = QueryEngine::new(&db);
    let resumed = engine
        .run("?(t1)->(*)", Some(&["2".to_string()]))
        .await
        .unwrap();
    assert_eq!(vertex_ids(resumed), vec![vec!["2", "3"]]);
}

#[tokio::test]
async fn test_vertex_removal_cascades_into_queries() {
    let mut db = derived_fixture().await;
    assert!(db.remove_vertex("4"));
    assert!(!db.exists("1-[sibling]->4"));
    assert!(db.get_all_edges().iter().all(|e| e.source_id != "4" && e.target_id != "4"));

    let chained = QueryEngine::new(&db)
        .run("?(t3)<-(*)-[et3]->(t2)", None)
        .await
        .unwrap();
    assert!(chained.is_empty());
}

#[tokio::test]
async fn test_invalid_queries_surface_to_the_caller() {
    let db = fixture();
    let engine = QueryEngine::new(&db);
    for query in ["?(*)", "?()", "?(t1)-[et1]-(t2)", "t1"] {
        let err = engine.run(query, None).await.unwrap_err();
        assert!(
            matches!(err, EngineError::Query(AmaqlError::InvalidQuery { .. })),
            "{query}"
        );
    }
}

#[tokio::test]
async fn test_query_output_json_shape() {
    let db = derived_fixture().await;
    let output = QueryEngine::new(&db)
        .run("?(t1)=[et1]=>(t3)", None)
        .await
        .unwrap();

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["mode"], "paths");
    let elements = &json["results"][0]["elements"];
    assert_eq!(elements[0]["element"], "vertex");
    assert_eq!(elements[0]["id"], "1");
    assert_eq!(elements[1]["element"], "edge");
    assert_eq!(elements[1]["id"], "1-[et1]->3");
    assert_eq!(elements[1]["derivation_path"][0], "et1-through-et2");
    assert_eq!(elements[2]["id"], "3");

    let back: QueryOutput = serde_json::from_value(json).unwrap();
    assert_eq!(back, output);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_snapshot_round_trip_preserves_derivations() {
    let db = derived_fixture().await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.json");

    GraphSnapshot::from_graph(&db).save_json(&path).unwrap();
    let restored = GraphSnapshot::load_json(&path).unwrap().into_graph().unwrap();

    assert_eq!(restored.vertex_count(), db.vertex_count());
    assert_eq!(restored.edge_count(), db.edge_count());
    assert_eq!(restored.derived_edge_count(), db.derived_edge_count());

    let paths = QueryEngine::new(&restored)
        .run("?(t1)=[et1]=>(t3)", None)
        .await
        .unwrap();
    assert_eq!(paths.len(), 1);
}
