//! Vertex and edge filters, and their evaluation against [`GraphDB`].
//!
//! Vertex filters combine three optional predicates (explicit ids, any-of
//! types, a case-insensitive name substring). The most selective one seeds
//! the candidate set from an index and the rest narrow it:
//!
//! | seed               | source                         | output order   |
//! |--------------------|--------------------------------|----------------|
//! | `ids`              | id lookup                      | order of `ids` |
//! | `types`            | union of per-type bitmaps      | insertion      |
//! | `search_term` only | linear scan of live vertices   | insertion      |
//! | nothing            | every live vertex              | insertion      |
//!
//! Edge queries seed from adjacency when an endpoint filter names explicit
//! ids, from the triple index for typed non-negated queries, and otherwise
//! from adjacency of the resolved endpoint sets or a full scan.

use std::fmt;

use amaql_dsl::QueryNode;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Edge, GraphDB, StrId, Vertex};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexFilter {
    /// `Some(vec![])` matches nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
}

impl VertexFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_search_term(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    /// True when no predicate constrains the result.
    pub fn is_empty(&self) -> bool {
        self.ids.is_none() && self.normalized_types().is_none() && self.normalized_search().is_none()
    }

    fn normalized_types(&self) -> Option<Vec<String>> {
        let types: Vec<String> = self
            .types
            .iter()
            .flatten()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        (!types.is_empty()).then_some(types)
    }

    fn normalized_search(&self) -> Option<String> {
        self.search_term
            .as_deref()
            .map(str::to_lowercase)
            .filter(|t| !t.is_empty())
    }
}

impl From<&QueryNode> for VertexFilter {
    fn from(node: &QueryNode) -> Self {
        Self {
            ids: None,
            types: (!node.types.is_empty()).then(|| node.types.iter().cloned().collect()),
            search_term: node.search_term.clone(),
        }
    }
}

/// Which edges an edge query may return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeScope {
    #[default]
    All,
    NonDerivedOnly,
    DerivedOnly,
    /// Unknown scope name; matches no edge.
    Unrecognized(String),
}

impl EdgeScope {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeScope::All => "ALL",
            EdgeScope::NonDerivedOnly => "NON_DERIVED_ONLY",
            EdgeScope::DerivedOnly => "DERIVED_ONLY",
            EdgeScope::Unrecognized(s) => s,
        }
    }

    fn admits(&self, derived: bool) -> bool {
        match self {
            EdgeScope::All => true,
            EdgeScope::NonDerivedOnly => !derived,
            EdgeScope::DerivedOnly => derived,
            EdgeScope::Unrecognized(_) => false,
        }
    }
}

impl From<&str> for EdgeScope {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => EdgeScope::All,
            "NON_DERIVED_ONLY" => EdgeScope::NonDerivedOnly,
            "DERIVED_ONLY" => EdgeScope::DerivedOnly,
            _ => EdgeScope::Unrecognized(s.to_string()),
        }
    }
}

impl From<String> for EdgeScope {
    fn from(s: String) -> Self {
        EdgeScope::from(s.as_str())
    }
}

impl From<EdgeScope> for String {
    fn from(scope: EdgeScope) -> Self {
        scope.as_str().to_string()
    }
}

impl fmt::Display for EdgeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFilter {
    /// Any-of; none-of when `is_negated`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub scope: EdgeScope,
    #[serde(default)]
    pub is_negated: bool,
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_scope(mut self, scope: EdgeScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn negated(mut self) -> Self {
        self.is_negated = true;
        self
    }

    fn normalized_types(&self) -> Option<Vec<String>> {
        let types: Vec<String> = self
            .types
            .iter()
            .flatten()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        (!types.is_empty()).then_some(types)
    }
}

fn any_type_of(have: &std::collections::BTreeSet<String>, wanted: &[String]) -> bool {
    wanted.iter().any(|t| have.contains(t))
}

fn name_contains(vertex: &Vertex, needle: &str) -> bool {
    vertex.name.to_lowercase().contains(needle)
}

impl GraphDB {
    fn known_type_ids(&self, types: &[String]) -> Vec<StrId> {
        types
            .iter()
            .filter_map(|t| self.interner.id_of(t))
            .collect()
    }

    /// Matching vertex slots in output order.
    pub(crate) fn matching_vertex_slots(&self, filter: &VertexFilter) -> Vec<u32> {
        let types = filter.normalized_types();
        let search = filter.normalized_search();
        let narrow = |slot: &u32| {
            let Some(vertex) = self.vertices.get(*slot) else {
                return false;
            };
            types.as_ref().map_or(true, |t| any_type_of(&vertex.types, t))
                && search.as_ref().map_or(true, |s| name_contains(vertex, s))
        };

        if let Some(ids) = &filter.ids {
            let mut seen = RoaringBitmap::new();
            return ids
                .iter()
                .filter_map(|id| self.vertices.slot_of(id))
                .filter(|slot| seen.insert(*slot))
                .filter(narrow)
                .collect();
        }

        if let Some(types) = &types {
            let mut seeded = RoaringBitmap::new();
            for type_id in self.known_type_ids(types) {
                if let Some(bitmap) = self.vertices.by_type(type_id) {
                    seeded |= bitmap;
                }
            }
            return seeded.iter().filter(narrow).collect();
        }

        self.vertices.live.iter().filter(narrow).collect()
    }

    /// Vertices matching `filter`; an empty filter returns every vertex.
    pub fn get_vertices_by_filter(&self, filter: &VertexFilter) -> Vec<&Vertex> {
        self.matching_vertex_slots(filter)
            .into_iter()
            .filter_map(|slot| self.vertices.get(slot))
            .collect()
    }

    /// Resolve an endpoint filter to a slot set; `None` means unconstrained.
    fn endpoint_set(&self, filter: Option<&VertexFilter>) -> Option<RoaringBitmap> {
        let filter = filter.filter(|f| !f.is_empty())?;
        Some(self.matching_vertex_slots(filter).into_iter().collect())
    }

    fn adjacent_edges(&self, vertices: &RoaringBitmap, outbound: bool) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        for slot in vertices {
            let edges = if outbound {
                self.edges.outbound(slot)
            } else {
                self.edges.inbound(slot)
            };
            out.extend(edges.iter().copied());
        }
        out
    }

    /// Edges whose source matches `source`, target matches `target`, and
    /// which satisfy `edge`. Results are unique and in insertion order.
    pub fn get_edges_by_filter(
        &self,
        source: Option<&VertexFilter>,
        edge: &EdgeFilter,
        target: Option<&VertexFilter>,
    ) -> Vec<&Edge> {
        if let EdgeScope::Unrecognized(scope) = &edge.scope {
            debug!(scope = scope.as_str(), "unrecognized edge scope matches nothing");
            return Vec::new();
        }

        let sources = self.endpoint_set(source);
        let targets = self.endpoint_set(target);
        if sources.as_ref().is_some_and(RoaringBitmap::is_empty)
            || targets.as_ref().is_some_and(RoaringBitmap::is_empty)
        {
            return Vec::new();
        }

        let edge_types = edge.normalized_types();
        let has_ids = |f: Option<&VertexFilter>| f.is_some_and(|f| f.ids.is_some());

        let candidates = match (&sources, &targets) {
            (Some(s), _) if has_ids(source) => self.adjacent_edges(s, true),
            (_, Some(t)) if has_ids(target) => self.adjacent_edges(t, false),
            _ if edge_types.is_some() && !edge.is_negated => {
                let edge_type_ids = self.known_type_ids(edge_types.as_deref().unwrap_or(&[]));
                if edge_type_ids.is_empty() {
                    return Vec::new();
                }
                let endpoint_types = |f: Option<&VertexFilter>| {
                    f.and_then(VertexFilter::normalized_types)
                        .map(|t| self.known_type_ids(&t))
                };
                let source_types = endpoint_types(source);
                let target_types = endpoint_types(target);
                self.edges.triples.candidates(
                    source_types.as_deref(),
                    Some(&edge_type_ids),
                    target_types.as_deref(),
                )
            }
            (Some(s), _) => self.adjacent_edges(s, true),
            (_, Some(t)) => self.adjacent_edges(t, false),
            (None, None) => self.edges.live.clone(),
        };

        candidates
            .iter()
            .filter(|&slot| {
                let Some((s, t)) = self.edges.endpoints(slot) else {
                    return false;
                };
                sources.as_ref().map_or(true, |set| set.contains(s))
                    && targets.as_ref().map_or(true, |set| set.contains(t))
                    && edge.scope.admits(self.edges.derived.contains(slot))
            })
            .filter_map(|slot| self.edges.get(slot))
            .filter(|e| match &edge_types {
                None => true,
                Some(wanted) => any_type_of(&e.types, wanted) != edge.is_negated,
            })
            .collect()
    }
}
