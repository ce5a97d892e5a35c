//! JSON snapshots: `{"vertices": [...], "edges": [...]}`.
//!
//! Edge ids may be omitted in hand-written files; they are recomputed from
//! `(source_id, types, target_id)` when the snapshot is loaded into a graph.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Edge, GraphDB, Result, Vertex};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    /// Capture every live vertex and edge in insertion order.
    pub fn from_graph(db: &GraphDB) -> Self {
        Self {
            vertices: db.get_all_vertices().into_iter().cloned().collect(),
            edges: db.get_all_edges().into_iter().cloned().collect(),
        }
    }

    /// Rebuild a graph. Vertices are inserted before edges, so edge order in
    /// the file does not matter.
    pub fn into_graph(self) -> Result<GraphDB> {
        let mut db = GraphDB::new();
        db.add_many_vertices(self.vertices)?;
        db.add_many_edges(self.edges)?;
        Ok(db)
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_without_ids_get_canonical_ones() {
        let snapshot: GraphSnapshot = serde_json::from_str(
            r#"{
                "vertices": [
                    {"id": "a", "name": "A", "types": ["Server"]},
                    {"id": "b", "name": "B", "types": ["software"]}
                ],
                "edges": [{"source_id": "a", "target_id": "b", "types": ["Hosts"]}]
            }"#,
        )
        .unwrap();
        let db = snapshot.into_graph().unwrap();
        assert!(db.exists("a-[hosts]->b"));
        assert_eq!(GraphSnapshot::from_graph(&db).edges[0].id, "a-[hosts]->b");
    }

    #[test]
    fn dangling_edges_fail_to_load() {
        let snapshot = GraphSnapshot {
            vertices: vec![Vertex::new("a", "A", ["x"])],
            edges: vec![Edge::new("a", "ghost", ["t"])],
        };
        assert!(snapshot.into_graph().is_err());
    }

    #[test]
    fn file_round_trip_keeps_derivation_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        let mut db = GraphDB::new();
        db.add_many_vertices([Vertex::new("a", "A", ["x"]), Vertex::new("b", "B", ["y"])])
            .unwrap();
        let mut derived = Edge::new("a", "b", ["t"]);
        derived.derivation_path = vec!["rule".into()];
        db.add_edge(derived).unwrap();

        GraphSnapshot::from_graph(&db).save_json(&path).unwrap();
        let restored = GraphSnapshot::load_json(&path).unwrap().into_graph().unwrap();
        assert_eq!(restored.derived_edge_count(), 1);
        assert_eq!(restored.get_edge("a-[t]->b").unwrap().derivation_path, vec!["rule"]);
    }

    #[test]
    fn missing_and_malformed_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            GraphSnapshot::load_json(&missing),
            Err(crate::GraphError::Io(_))
        ));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            GraphSnapshot::load_json(&broken),
            Err(crate::GraphError::Json(_))
        ));
    }
}
