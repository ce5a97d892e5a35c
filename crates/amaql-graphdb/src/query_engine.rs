//! AMAQL execution: a left-to-right pipeline over the query's triple chain.
//!
//! Stage `i` asks the repository for the edges of triple `i`, with the
//! triple's entry side bound to the ids that stage `i - 1` exited through
//! (its *memory*). Once every stage has run, the per-stage edge lists are
//! stitched into paths, pass-through nodes are dropped, and paths with the
//! same returned vertex sequence are collapsed.
//!
//! ```text
//! ?(a)-[t]->(*)<-[u]-(b)
//!
//! stage 0: a --t--> x          memory = {x}
//! stage 1: x <--u-- b          entry bound to {x}
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use amaql_dsl::{AmaqlError, Direction, QueryDescriptor, QueryTriple};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::logger::Logger;
use crate::repository::GraphRepository;
use crate::{Edge, EdgeFilter, EdgeScope, GraphError, Vertex, VertexFilter};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Query(#[from] AmaqlError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Matched paths, in discovery order.
    #[default]
    Paths,
    /// Unique returned vertices across all paths, first-seen order.
    ScopeList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEngineConfig {
    pub output: OutputMode,
}

/// Query text or an already compiled descriptor.
#[derive(Debug, Clone, Copy)]
pub enum QueryInput<'a> {
    Text(&'a str),
    Descriptor(&'a QueryDescriptor),
}

impl<'a> From<&'a str> for QueryInput<'a> {
    fn from(text: &'a str) -> Self {
        QueryInput::Text(text)
    }
}

impl<'a> From<&'a String> for QueryInput<'a> {
    fn from(text: &'a String) -> Self {
        QueryInput::Text(text)
    }
}

impl<'a> From<&'a QueryDescriptor> for QueryInput<'a> {
    fn from(descriptor: &'a QueryDescriptor) -> Self {
        QueryInput::Descriptor(descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum PathElement {
    Vertex(Vertex),
    Edge(Edge),
}

/// Returned vertices and the edges between them, in chain order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPath {
    pub elements: Vec<PathElement>,
}

impl MatchedPath {
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.elements.iter().filter_map(|e| match e {
            PathElement::Vertex(v) => Some(v),
            PathElement::Edge(_) => None,
        })
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.elements.iter().filter_map(|e| match e {
            PathElement::Edge(edge) => Some(edge),
            PathElement::Vertex(_) => None,
        })
    }

    pub fn vertex_ids(&self) -> Vec<&str> {
        self.vertices().map(|v| v.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "results", rename_all = "snake_case")]
pub enum QueryOutput {
    Paths(Vec<MatchedPath>),
    ScopeList(Vec<Vertex>),
}

impl QueryOutput {
    fn empty(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Paths => QueryOutput::Paths(Vec::new()),
            OutputMode::ScopeList => QueryOutput::ScopeList(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryOutput::Paths(paths) => paths.len(),
            QueryOutput::ScopeList(vertices) => vertices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep at most `limit` results.
    pub fn truncate(&mut self, limit: usize) {
        match self {
            QueryOutput::Paths(paths) => paths.truncate(limit),
            QueryOutput::ScopeList(vertices) => vertices.truncate(limit),
        }
    }

    pub fn into_paths(self) -> Vec<MatchedPath> {
        match self {
            QueryOutput::Paths(paths) => paths,
            QueryOutput::ScopeList(vertices) => vertices
                .into_iter()
                .map(|v| MatchedPath {
                    elements: vec![PathElement::Vertex(v)],
                })
                .collect(),
        }
    }
}

/// An edge matched by one stage, oriented along the chain.
#[derive(Debug, Clone)]
struct StageEdge {
    edge: Edge,
    entry: String,
    exit: String,
}

/// Chain positions visited so far; `edges[i]` joins `vertices[i]` and
/// `vertices[i + 1]`.
#[derive(Debug, Clone)]
struct PartialPath<'s> {
    vertices: Vec<&'s str>,
    edges: Vec<&'s Edge>,
}

pub struct QueryEngine<'g, R: GraphRepository> {
    graph: &'g R,
    config: QueryEngineConfig,
    logger: Option<Arc<dyn Logger>>,
}

impl<'g, R: GraphRepository> QueryEngine<'g, R> {
    pub fn new(graph: &'g R) -> Self {
        Self {
            graph,
            config: QueryEngineConfig::default(),
            logger: None,
        }
    }

    pub fn with_config(mut self, config: QueryEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &QueryEngineConfig {
        &self.config
    }

    /// Run a query. `initial_ids` binds the first stage's entry side (or,
    /// for a single-node query, restricts the candidate vertices).
    pub async fn run<'q>(
        &self,
        query: impl Into<QueryInput<'q>>,
        initial_ids: Option<&[String]>,
    ) -> Result<QueryOutput> {
        let compiled;
        let descriptor = match query.into() {
            QueryInput::Text(text) => {
                compiled = QueryDescriptor::parse(text)?;
                &compiled
            }
            QueryInput::Descriptor(descriptor) => descriptor,
        };

        let output = if descriptor.is_complex_query() {
            self.run_chain(&descriptor.query_chain, initial_ids).await?
        } else {
            self.run_filter(descriptor, initial_ids).await?
        };

        if let Some(logger) = &self.logger {
            logger.info(&format!(
                "query over {} triple(s) returned {} result(s)",
                descriptor.query_chain.len(),
                output.len()
            ));
        }
        Ok(output)
    }

    async fn run_filter(
        &self,
        descriptor: &QueryDescriptor,
        initial_ids: Option<&[String]>,
    ) -> Result<QueryOutput> {
        let mut filter = descriptor
            .query_filter
            .as_ref()
            .map(VertexFilter::from)
            .unwrap_or_default();
        if let Some(ids) = initial_ids {
            filter.ids = Some(ids.to_vec());
        }
        let vertices = self.graph.get_vertices_by_filter(&filter).await?;
        Ok(match self.config.output {
            OutputMode::ScopeList => QueryOutput::ScopeList(vertices),
            OutputMode::Paths => QueryOutput::Paths(
                vertices
                    .into_iter()
                    .map(|v| MatchedPath {
                        elements: vec![PathElement::Vertex(v)],
                    })
                    .collect(),
            ),
        })
    }

    async fn run_chain(
        &self,
        chain: &[QueryTriple],
        initial_ids: Option<&[String]>,
    ) -> Result<QueryOutput> {
        let mut memory: Option<Vec<String>> = initial_ids.map(<[String]>::to_vec);
        let mut stages: Vec<Vec<StageEdge>> = Vec::with_capacity(chain.len());

        for (index, triple) in chain.iter().enumerate() {
            let stage = self.run_stage(triple, memory.as_deref()).await?;
            debug!(
                stage = index,
                edges = stage.len(),
                direction = triple.relationship.direction.as_number(),
                "query stage finished"
            );
            if stage.is_empty() {
                return Ok(QueryOutput::empty(self.config.output));
            }

            memory = Some(exit_ids(&stage));
            stages.push(stage);
        }

        let partials = consolidate(&stages);
        self.materialize(chain, partials).await
    }

    async fn run_stage(
        &self,
        triple: &QueryTriple,
        memory: Option<&[String]>,
    ) -> Result<Vec<StageEdge>> {
        let mut entry_side = VertexFilter::from(&triple.left_node);
        if let Some(ids) = memory {
            entry_side.ids = Some(ids.to_vec());
        }
        let exit_side = VertexFilter::from(&triple.right_node);

        let relationship = &triple.relationship;
        let mut edge_filter = EdgeFilter::new().with_scope(if relationship.is_derived {
            EdgeScope::All
        } else {
            EdgeScope::NonDerivedOnly
        });
        if !relationship.types.is_empty() {
            edge_filter = edge_filter.with_types(relationship.types.iter().cloned());
        }
        edge_filter.is_negated = relationship.is_negated;

        let mut out = Vec::new();
        if matches!(relationship.direction, Direction::Right | Direction::Both) {
            let edges = self
                .graph
                .get_edges_by_filter(Some(&entry_side), &edge_filter, Some(&exit_side))
                .await?;
            out.extend(edges.into_iter().map(|edge| StageEdge {
                entry: edge.source_id.clone(),
                exit: edge.target_id.clone(),
                edge,
            }));
        }
        if matches!(relationship.direction, Direction::Left | Direction::Both) {
            let edges = self
                .graph
                .get_edges_by_filter(Some(&exit_side), &edge_filter, Some(&entry_side))
                .await?;
            out.extend(edges.into_iter().map(|edge| StageEdge {
                entry: edge.target_id.clone(),
                exit: edge.source_id.clone(),
                edge,
            }));
        }

        // A self-loop under direction 0 is found in both orientations.
        let mut seen = HashSet::new();
        out.retain(|s| seen.insert((s.edge.id.clone(), s.entry.clone())));
        Ok(out)
    }

    /// Resolve vertices, drop pass-through positions and duplicate paths,
    /// and shape the output.
    async fn materialize(
        &self,
        chain: &[QueryTriple],
        partials: Vec<PartialPath<'_>>,
    ) -> Result<QueryOutput> {
        // Position 0 is the first triple's left node; position i + 1 is
        // triple i's right node.
        let returned: Vec<bool> = std::iter::once(&chain[0].left_node)
            .chain(chain.iter().map(|t| &t.right_node))
            .map(|node| node.should_be_returned)
            .collect();

        let mut ids: Vec<String> = Vec::new();
        let mut seen_ids = HashSet::new();
        for partial in &partials {
            for (position, id) in partial.vertices.iter().enumerate() {
                if returned[position] && seen_ids.insert(*id) {
                    ids.push(id.to_string());
                }
            }
        }
        let vertices: HashMap<String, Vertex> = self
            .graph
            .get_vertices(&ids)
            .await?
            .into_iter()
            .map(|v| (v.id.clone(), v))
            .collect();

        let mut seen_sequences: HashSet<Vec<&str>> = HashSet::new();
        let mut paths = Vec::new();
        for partial in &partials {
            let sequence: Vec<&str> = partial
                .vertices
                .iter()
                .enumerate()
                .filter(|(position, _)| returned[*position])
                .map(|(_, id)| *id)
                .collect();
            if !seen_sequences.insert(sequence) {
                continue;
            }

            let mut elements = Vec::with_capacity(partial.vertices.len() + partial.edges.len());
            for (position, id) in partial.vertices.iter().enumerate() {
                if position > 0 {
                    elements.push(PathElement::Edge(partial.edges[position - 1].clone()));
                }
                if returned[position] {
                    if let Some(vertex) = vertices.get(*id) {
                        elements.push(PathElement::Vertex(vertex.clone()));
                    }
                }
            }
            paths.push(MatchedPath { elements });
        }

        Ok(match self.config.output {
            OutputMode::Paths => QueryOutput::Paths(paths),
            OutputMode::ScopeList => {
                let mut seen = HashSet::new();
                QueryOutput::ScopeList(
                    paths
                        .into_iter()
                        .flat_map(|p| p.elements)
                        .filter_map(|e| match e {
                            PathElement::Vertex(v) => Some(v),
                            PathElement::Edge(_) => None,
                        })
                        .filter(|v| seen.insert(v.id.clone()))
                        .collect(),
                )
            }
        })
    }
}

/// De-duplicated exit ids in first-seen order.
fn exit_ids(stage: &[StageEdge]) -> Vec<String> {
    let mut seen = HashSet::new();
    stage
        .iter()
        .filter(|s| seen.insert(s.exit.as_str()))
        .map(|s| s.exit.clone())
        .collect()
}

/// Stitch stage edges into full-length paths: a path is extended by every
/// edge of the next stage whose entry is the path's current tail.
fn consolidate(stages: &[Vec<StageEdge>]) -> Vec<PartialPath<'_>> {
    let Some((first, rest)) = stages.split_first() else {
        return Vec::new();
    };
    let mut partials: Vec<PartialPath<'_>> = first
        .iter()
        .map(|s| PartialPath {
            vertices: vec![s.entry.as_str(), s.exit.as_str()],
            edges: vec![&s.edge],
        })
        .collect();

    for stage in rest {
        let mut by_entry: HashMap<&str, Vec<&StageEdge>> = HashMap::new();
        for s in stage {
            by_entry.entry(s.entry.as_str()).or_default().push(s);
        }
        let mut next = Vec::new();
        for partial in partials {
            let Some(tail) = partial.vertices.last() else {
                continue;
            };
            let Some(candidates) = by_entry.get(tail) else {
                continue;
            };
            for s in candidates {
                let mut extended = partial.clone();
                extended.vertices.push(s.exit.as_str());
                extended.edges.push(&s.edge);
                next.push(extended);
            }
        }
        partials = next;
    }
    partials
}
