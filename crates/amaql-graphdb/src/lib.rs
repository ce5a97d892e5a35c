//! GraphDB: an indexed, in-memory labeled graph with rule-based edge derivation.
//!
//! Layout:
//! 1. **String interning**: vertex and edge types are stored once and
//!    referenced by [`StrId`] inside the indexes.
//! 2. **Slot storage**: vertices and edges live in append-only slot vectors;
//!    removal tombstones a slot. Slot order is insertion order, so slots are
//!    not reused; [`GraphDB::compact`] reclaims tombstones. Each store holds
//!    at most `u32::MAX` slots.
//! 3. **Bitmap indexes**: per-type vertex bitmaps, a `(source type, edge
//!    type, target type)` triple index, and a derived-edge bitmap.
//! 4. **Adjacency**: outbound/inbound edge lists per vertex slot.
//!
//! ## Module Organization
//!
//! - [`filter`]: vertex/edge filters and their evaluation
//! - [`repository`]: the async [`GraphRepository`] seam consumed by the engines
//! - [`derivation`]: fixed-point edge derivation from rules
//! - [`query_engine`]: AMAQL pattern execution
//! - [`snapshot`]: JSON persistence

pub mod derivation;
pub mod filter;
pub mod logger;
pub mod query_engine;
pub mod repository;
pub mod snapshot;
mod triple_index;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use triple_index::TripleIndex;

pub use derivation::{DerivationEngine, DerivationError, DerivationReport, EdgeBuilder};
pub use filter::{EdgeFilter, EdgeScope, VertexFilter};
pub use logger::{Logger, TracingLogger};
pub use query_engine::{
    EngineError, MatchedPath, OutputMode, PathElement, QueryEngine, QueryEngineConfig, QueryInput,
    QueryOutput,
};
pub use repository::GraphRepository;
pub use snapshot::GraphSnapshot;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("InvalidEdgeId: `{0}` is not of the form `source-[types]->target`")]
    InvalidEdgeId(String),

    #[error("vertex `{0}` already exists")]
    DuplicateVertex(String),

    #[error("edge `{edge}` references missing vertex `{vertex}`")]
    DanglingEdge { edge: String, vertex: String },

    #[error("{0} capacity exceeded (slots are addressed by u32)")]
    CapacityExceeded(&'static str),

    #[error("repository backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;

// ============================================================================
// String Interning
// ============================================================================

/// Interned type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct StrId(u32);

impl StrId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Type-name interner owned by a single [`GraphDB`].
#[derive(Debug, Clone, Default)]
pub struct StringInterner {
    ids: AHashMap<String, StrId>,
    names: Vec<String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Result<StrId> {
        if let Some(id) = self.ids.get(s) {
            return Ok(*id);
        }
        let id = StrId(next_slot(self.names.len(), "type interner")?);
        self.ids.insert(s.to_string(), id);
        self.names.push(s.to_string());
        Ok(id)
    }

    /// Look up an existing ID without inserting.
    pub fn id_of(&self, s: &str) -> Option<StrId> {
        self.ids.get(s).copied()
    }

    pub fn lookup(&self, id: StrId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Slot number for the next push onto a store of length `len`.
fn next_slot(len: usize, store: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| GraphError::CapacityExceeded(store))
}

// ============================================================================
// Data Model
// ============================================================================

fn normalize_types<I, S>(types: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    types
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub types: BTreeSet<String>,
}

impl Vertex {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            types: normalize_types(types),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Always `source-[types]->target`; recomputed on insertion.
    #[serde(default)]
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub types: BTreeSet<String>,
    /// Non-empty for derived edges: rule label followed by the ids of the
    /// edges the rule matched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derivation_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl Edge {
    pub fn new<I, S>(source_id: impl Into<String>, target_id: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let source_id = source_id.into();
        let target_id = target_id.into();
        let types = normalize_types(types);
        Self {
            id: EdgeKey::compose(&source_id, &types, &target_id),
            source_id,
            target_id,
            types,
            derivation_path: Vec::new(),
            external_id: None,
        }
    }

    /// Default edge construction used by the derivation engine.
    pub fn build(
        source_id: &str,
        target_id: &str,
        types: &BTreeSet<String>,
        external_id: Option<&str>,
        derivation_path: &[String],
    ) -> Self {
        let mut edge = Edge::new(source_id, target_id, types);
        edge.external_id = external_id.map(str::to_string);
        edge.derivation_path = derivation_path.to_vec();
        edge
    }

    pub fn is_derived(&self) -> bool {
        !self.derivation_path.is_empty()
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source_id: self.source_id.clone(),
            types: self.types.clone(),
            target_id: self.target_id.clone(),
        }
    }
}

/// Composite identity of an edge: `(source, types, target)`.
///
/// Textual form is `source-[t1,t2]->target` with types sorted, so equal keys
/// always produce equal ids. Vertex ids containing `-[` or `]->` cannot be
/// round-tripped through [`EdgeKey::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub source_id: String,
    pub types: BTreeSet<String>,
    pub target_id: String,
}

impl EdgeKey {
    pub fn compose(source_id: &str, types: &BTreeSet<String>, target_id: &str) -> String {
        let types: Vec<&str> = types.iter().map(String::as_str).collect();
        format!("{source_id}-[{}]->{target_id}", types.join(","))
    }

    pub fn parse(id: &str) -> Result<Self> {
        let invalid = || GraphError::InvalidEdgeId(id.to_string());
        let (source_id, rest) = id.split_once("-[").ok_or_else(invalid)?;
        let (types, target_id) = rest.rsplit_once("]->").ok_or_else(invalid)?;
        if source_id.is_empty() || target_id.is_empty() {
            return Err(invalid());
        }
        let types: BTreeSet<String> = if types.is_empty() {
            BTreeSet::new()
        } else {
            let parts: Vec<&str> = types.split(',').collect();
            if parts.iter().any(|t| t.trim().is_empty()) {
                return Err(invalid());
            }
            normalize_types(parts)
        };
        Ok(Self {
            source_id: source_id.to_string(),
            types,
            target_id: target_id.to_string(),
        })
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&EdgeKey::compose(&self.source_id, &self.types, &self.target_id))
    }
}

/// Outcome of an edge insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedEdge {
    pub id: String,
    /// `false` when an edge with the same key was already present.
    pub inserted: bool,
}

// ============================================================================
// Vertex Storage
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct VertexStore {
    slots: Vec<Option<Vertex>>,
    type_ids: Vec<Vec<StrId>>,
    by_id: HashMap<String, u32>,
    /// Type index: type -> bitmap of vertex slots
    type_index: HashMap<StrId, RoaringBitmap>,
    pub(crate) live: RoaringBitmap,
}

impl VertexStore {
    fn insert(&mut self, vertex: Vertex, type_ids: Vec<StrId>) -> Result<u32> {
        let slot = next_slot(self.slots.len(), "vertex store")?;
        for type_id in &type_ids {
            self.type_index.entry(*type_id).or_default().insert(slot);
        }
        self.by_id.insert(vertex.id.clone(), slot);
        self.slots.push(Some(vertex));
        self.type_ids.push(type_ids);
        self.live.insert(slot);
        Ok(slot)
    }

    fn remove(&mut self, slot: u32) -> Option<Vertex> {
        let vertex = self.slots.get_mut(slot as usize)?.take()?;
        for type_id in &self.type_ids[slot as usize] {
            if let Some(bitmap) = self.type_index.get_mut(type_id) {
                bitmap.remove(slot);
                if bitmap.is_empty() {
                    self.type_index.remove(type_id);
                }
            }
        }
        self.type_ids[slot as usize].clear();
        self.by_id.remove(&vertex.id);
        self.live.remove(slot);
        Some(vertex)
    }

    pub(crate) fn slot_of(&self, id: &str) -> Option<u32> {
        self.by_id.get(id).copied()
    }

    pub(crate) fn get(&self, slot: u32) -> Option<&Vertex> {
        self.slots.get(slot as usize)?.as_ref()
    }

    pub(crate) fn by_type(&self, type_id: StrId) -> Option<&RoaringBitmap> {
        self.type_index.get(&type_id)
    }

    fn type_ids(&self, slot: u32) -> &[StrId] {
        self.type_ids
            .get(slot as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len() as usize
    }
}

// ============================================================================
// Edge Storage (Slots with Adjacency and Triple Index)
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct EdgeStore {
    slots: Vec<Option<Edge>>,
    /// Edge slot -> (source vertex slot, target vertex slot)
    endpoints: Vec<(u32, u32)>,
    type_ids: Vec<Vec<StrId>>,
    by_id: HashMap<String, u32>,
    /// Vertex slot -> outgoing edge slots
    outbound: HashMap<u32, Vec<u32>>,
    /// Vertex slot -> incoming edge slots
    inbound: HashMap<u32, Vec<u32>>,
    pub(crate) triples: TripleIndex,
    pub(crate) derived: RoaringBitmap,
    pub(crate) live: RoaringBitmap,
}

impl EdgeStore {
    pub(crate) fn slot_of(&self, id: &str) -> Option<u32> {
        self.by_id.get(id).copied()
    }

    pub(crate) fn get(&self, slot: u32) -> Option<&Edge> {
        self.slots.get(slot as usize)?.as_ref()
    }

    pub(crate) fn endpoints(&self, slot: u32) -> Option<(u32, u32)> {
        self.endpoints.get(slot as usize).copied()
    }

    pub(crate) fn outbound(&self, vertex_slot: u32) -> &[u32] {
        self.outbound
            .get(&vertex_slot)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn inbound(&self, vertex_slot: u32) -> &[u32] {
        self.inbound
            .get(&vertex_slot)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len() as usize
    }
}

// ============================================================================
// GraphDB
// ============================================================================

/// In-memory graph repository.
///
/// Mutations keep every index consistent: removing a vertex cascades to its
/// incident edges, and an edge is never stored without both endpoints.
#[derive(Debug, Default)]
pub struct GraphDB {
    pub(crate) interner: StringInterner,
    pub(crate) vertices: VertexStore,
    pub(crate) edges: EdgeStore,
}

impl GraphDB {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interner(&self) -> &StringInterner {
        &self.interner
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn derived_edge_count(&self) -> usize {
        self.edges.derived.len() as usize
    }

    /// Vertex and edge slots left behind by removals.
    pub fn tombstones(&self) -> usize {
        (self.vertices.slots.len() - self.vertices.len())
            + (self.edges.slots.len() - self.edges.len())
    }

    /// Rebuild every store from the live vertices and edges, in insertion
    /// order, dropping tombstoned slots.
    pub fn compact(&mut self) -> Result<()> {
        let mut rebuilt = GraphDB::new();
        for vertex in self.get_all_vertices() {
            rebuilt.add_vertex(vertex.clone())?;
        }
        for edge in self.get_all_edges() {
            rebuilt.add_edge(edge.clone())?;
        }
        debug!(reclaimed = self.tombstones(), "compacted graph");
        *self = rebuilt;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert a vertex. Types are lowercased.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<String> {
        if self.vertices.slot_of(&vertex.id).is_some() {
            return Err(GraphError::DuplicateVertex(vertex.id));
        }
        let vertex = Vertex {
            types: normalize_types(&vertex.types),
            ..vertex
        };
        let type_ids = vertex
            .types
            .iter()
            .map(|t| self.interner.intern(t))
            .collect::<Result<Vec<_>>>()?;
        let id = vertex.id.clone();
        self.vertices.insert(vertex, type_ids)?;
        Ok(id)
    }

    /// Insert vertices in order, stopping at the first failure.
    pub fn add_many_vertices<I>(&mut self, vertices: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Vertex>,
    {
        vertices.into_iter().map(|v| self.add_vertex(v)).collect()
    }

    /// Remove a vertex and every edge incident to it.
    pub fn remove_vertex(&mut self, id: &str) -> bool {
        let Some(slot) = self.vertices.slot_of(id) else {
            return false;
        };
        let mut incident: Vec<u32> = self.edges.outbound(slot).to_vec();
        incident.extend_from_slice(self.edges.inbound(slot));
        incident.sort_unstable();
        incident.dedup();
        for edge_slot in incident {
            self.remove_edge_slot(edge_slot);
        }
        self.edges.outbound.remove(&slot);
        self.edges.inbound.remove(&slot);
        let removed = self.vertices.remove(slot).is_some();
        debug!(vertex = id, "removed vertex with incident edges");
        removed
    }

    /// Insert an edge. Idempotent on `(source, types, target)`: inserting an
    /// existing key returns its id with `inserted == false`.
    pub fn add_edge(&mut self, edge: Edge) -> Result<AddedEdge> {
        let types = normalize_types(&edge.types);
        let id = EdgeKey::compose(&edge.source_id, &types, &edge.target_id);
        if self.edges.slot_of(&id).is_some() {
            return Ok(AddedEdge {
                id,
                inserted: false,
            });
        }

        let source_slot = self
            .vertices
            .slot_of(&edge.source_id)
            .ok_or_else(|| GraphError::DanglingEdge {
                edge: id.clone(),
                vertex: edge.source_id.clone(),
            })?;
        let target_slot = self
            .vertices
            .slot_of(&edge.target_id)
            .ok_or_else(|| GraphError::DanglingEdge {
                edge: id.clone(),
                vertex: edge.target_id.clone(),
            })?;

        let slot = next_slot(self.edges.slots.len(), "edge store")?;
        let edge_type_ids = types
            .iter()
            .map(|t| self.interner.intern(t))
            .collect::<Result<Vec<_>>>()?;
        self.edges.triples.insert(
            slot,
            self.vertices.type_ids(source_slot),
            &edge_type_ids,
            self.vertices.type_ids(target_slot),
        );
        self.edges.outbound.entry(source_slot).or_default().push(slot);
        self.edges.inbound.entry(target_slot).or_default().push(slot);
        if !edge.derivation_path.is_empty() {
            self.edges.derived.insert(slot);
        }
        self.edges.live.insert(slot);
        self.edges.by_id.insert(id.clone(), slot);
        self.edges.endpoints.push((source_slot, target_slot));
        self.edges.type_ids.push(edge_type_ids);
        self.edges.slots.push(Some(Edge {
            id: id.clone(),
            types,
            ..edge
        }));

        Ok(AddedEdge { id, inserted: true })
    }

    /// Insert edges in order, stopping at the first failure.
    pub fn add_many_edges<I>(&mut self, edges: I) -> Result<Vec<AddedEdge>>
    where
        I: IntoIterator<Item = Edge>,
    {
        edges.into_iter().map(|e| self.add_edge(e)).collect()
    }

    /// Remove an edge by id. A malformed id is an error; a well-formed id
    /// that is not stored returns `Ok(false)`.
    ///
    /// A stored id is always accepted, even when its endpoints contain
    /// `-[` or `]->` and the id no longer parses.
    pub fn remove_edge(&mut self, id: &str) -> Result<bool> {
        let slot = match self.edges.slot_of(id) {
            Some(slot) => Some(slot),
            None => {
                let canonical = EdgeKey::parse(id)?.to_string();
                self.edges.slot_of(&canonical)
            }
        };
        Ok(match slot {
            Some(slot) => self.remove_edge_slot(slot).is_some(),
            None => false,
        })
    }

    fn remove_edge_slot(&mut self, slot: u32) -> Option<Edge> {
        let edge = self.edges.slots.get_mut(slot as usize)?.take()?;
        let (source_slot, target_slot) = self.edges.endpoints[slot as usize];
        let edge_type_ids = std::mem::take(&mut self.edges.type_ids[slot as usize]);
        self.edges.triples.remove(
            slot,
            self.vertices.type_ids(source_slot),
            &edge_type_ids,
            self.vertices.type_ids(target_slot),
        );
        if let Some(out) = self.edges.outbound.get_mut(&source_slot) {
            out.retain(|&s| s != slot);
        }
        if let Some(inc) = self.edges.inbound.get_mut(&target_slot) {
            inc.retain(|&s| s != slot);
        }
        self.edges.by_id.remove(&edge.id);
        self.edges.derived.remove(slot);
        self.edges.live.remove(slot);
        Some(edge)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// True when `id` names a stored vertex or edge.
    pub fn exists(&self, id: &str) -> bool {
        self.vertices.slot_of(id).is_some() || self.edges.slot_of(id).is_some()
    }

    pub fn get_vertex(&self, id: &str) -> Option<&Vertex> {
        self.vertices.get(self.vertices.slot_of(id)?)
    }

    /// Vertices for the given ids, in request order; unknown ids are skipped.
    pub fn get_vertices<S: AsRef<str>>(&self, ids: &[S]) -> Vec<&Vertex> {
        ids.iter()
            .filter_map(|id| self.get_vertex(id.as_ref()))
            .collect()
    }

    pub fn get_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(self.edges.slot_of(id)?)
    }

    pub fn get_edges<S: AsRef<str>>(&self, ids: &[S]) -> Vec<&Edge> {
        ids.iter()
            .filter_map(|id| self.get_edge(id.as_ref()))
            .collect()
    }

    pub fn get_all_vertices(&self) -> Vec<&Vertex> {
        self.vertices
            .live
            .iter()
            .filter_map(|slot| self.vertices.get(slot))
            .collect()
    }

    pub fn get_all_edges(&self) -> Vec<&Edge> {
        self.edges
            .live
            .iter()
            .filter_map(|slot| self.edges.get(slot))
            .collect()
    }
}
