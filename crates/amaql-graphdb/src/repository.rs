//! The repository seam the engines are written against.
//!
//! [`GraphDB`] is the in-memory implementation; other backends implement
//! [`GraphRepository`] with the same observable semantics (idempotent edge
//! insertion, cascading vertex removal, filter ordering).

use async_trait::async_trait;

use crate::{AddedEdge, Edge, EdgeFilter, GraphDB, Result, Vertex, VertexFilter};

#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn add_vertex(&mut self, vertex: Vertex) -> Result<String>;

    async fn add_many_vertices(&mut self, vertices: Vec<Vertex>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(vertices.len());
        for vertex in vertices {
            ids.push(self.add_vertex(vertex).await?);
        }
        Ok(ids)
    }

    /// Remove a vertex and its incident edges; `false` if it was absent.
    async fn remove_vertex(&mut self, id: &str) -> Result<bool>;

    async fn add_edge(&mut self, edge: Edge) -> Result<AddedEdge>;

    async fn add_many_edges(&mut self, edges: Vec<Edge>) -> Result<Vec<AddedEdge>> {
        let mut added = Vec::with_capacity(edges.len());
        for edge in edges {
            added.push(self.add_edge(edge).await?);
        }
        Ok(added)
    }

    async fn remove_edge(&mut self, id: &str) -> Result<bool>;

    async fn exists(&self, id: &str) -> Result<bool>;

    async fn get_vertex(&self, id: &str) -> Result<Option<Vertex>>;

    async fn get_vertices(&self, ids: &[String]) -> Result<Vec<Vertex>>;

    async fn get_edge(&self, id: &str) -> Result<Option<Edge>>;

    async fn get_edges(&self, ids: &[String]) -> Result<Vec<Edge>>;

    async fn get_all_vertices(&self) -> Result<Vec<Vertex>>;

    async fn get_all_edges(&self) -> Result<Vec<Edge>>;

    async fn get_vertices_by_filter(&self, filter: &VertexFilter) -> Result<Vec<Vertex>>;

    async fn get_edges_by_filter(
        &self,
        source: Option<&VertexFilter>,
        edge: &EdgeFilter,
        target: Option<&VertexFilter>,
    ) -> Result<Vec<Edge>>;
}

#[async_trait]
impl GraphRepository for GraphDB {
    async fn add_vertex(&mut self, vertex: Vertex) -> Result<String> {
        GraphDB::add_vertex(self, vertex)
    }

    async fn add_many_vertices(&mut self, vertices: Vec<Vertex>) -> Result<Vec<String>> {
        GraphDB::add_many_vertices(self, vertices)
    }

    async fn remove_vertex(&mut self, id: &str) -> Result<bool> {
        Ok(GraphDB::remove_vertex(self, id))
    }

    async fn add_edge(&mut self, edge: Edge) -> Result<AddedEdge> {
        GraphDB::add_edge(self, edge)
    }

    async fn add_many_edges(&mut self, edges: Vec<Edge>) -> Result<Vec<AddedEdge>> {
        GraphDB::add_many_edges(self, edges)
    }

    async fn remove_edge(&mut self, id: &str) -> Result<bool> {
        GraphDB::remove_edge(self, id)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(GraphDB::exists(self, id))
    }

    async fn get_vertex(&self, id: &str) -> Result<Option<Vertex>> {
        Ok(GraphDB::get_vertex(self, id).cloned())
    }

    async fn get_vertices(&self, ids: &[String]) -> Result<Vec<Vertex>> {
        Ok(GraphDB::get_vertices(self, ids).into_iter().cloned().collect())
    }

    async fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        Ok(GraphDB::get_edge(self, id).cloned())
    }

    async fn get_edges(&self, ids: &[String]) -> Result<Vec<Edge>> {
        Ok(GraphDB::get_edges(self, ids).into_iter().cloned().collect())
    }

    async fn get_all_vertices(&self) -> Result<Vec<Vertex>> {
        Ok(GraphDB::get_all_vertices(self).into_iter().cloned().collect())
    }

    async fn get_all_edges(&self) -> Result<Vec<Edge>> {
        Ok(GraphDB::get_all_edges(self).into_iter().cloned().collect())
    }

    async fn get_vertices_by_filter(&self, filter: &VertexFilter) -> Result<Vec<Vertex>> {
        Ok(GraphDB::get_vertices_by_filter(self, filter)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn get_edges_by_filter(
        &self,
        source: Option<&VertexFilter>,
        edge: &EdgeFilter,
        target: Option<&VertexFilter>,
    ) -> Result<Vec<Edge>> {
        Ok(GraphDB::get_edges_by_filter(self, source, edge, target)
            .into_iter()
            .cloned()
            .collect())
    }
}
