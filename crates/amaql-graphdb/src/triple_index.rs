//! TripleIndex: `(source type, edge type, target type) -> {edge slots}`.
//!
//! Every live edge is registered under the full product of its endpoint and
//! edge types, with each position also registered under the `_` wildcard.
//! A typed edge query can then seed its candidates from a handful of bitmap
//! unions instead of scanning every edge.
//!
//! Example: an edge `a{server} -[hosts]-> b{software, db}` is registered under
//!
//! - `(server, hosts, software)`, `(server, hosts, db)`
//! - `(_, hosts, software)`, `(server, _, db)`, ... and `(_, _, _)`.

use ahash::AHashMap;
use roaring::RoaringBitmap;

use crate::StrId;

/// One triple position: a concrete type, or `None` for the `_` wildcard.
pub(crate) type TypeKey = Option<StrId>;

type TripleKey = (TypeKey, TypeKey, TypeKey);

#[derive(Debug, Default)]
pub(crate) struct TripleIndex {
    entries: AHashMap<TripleKey, RoaringBitmap>,
}

fn with_wildcard(types: &[StrId]) -> impl Iterator<Item = TypeKey> + Clone + '_ {
    std::iter::once(None).chain(types.iter().copied().map(Some))
}

fn keys<'a>(
    source_types: &'a [StrId],
    edge_types: &'a [StrId],
    target_types: &'a [StrId],
) -> impl Iterator<Item = TripleKey> + 'a {
    with_wildcard(source_types).flat_map(move |s| {
        with_wildcard(edge_types)
            .flat_map(move |e| with_wildcard(target_types).map(move |t| (s, e, t)))
    })
}

impl TripleIndex {
    pub(crate) fn insert(
        &mut self,
        slot: u32,
        source_types: &[StrId],
        edge_types: &[StrId],
        target_types: &[StrId],
    ) {
        for key in keys(source_types, edge_types, target_types) {
            self.entries.entry(key).or_default().insert(slot);
        }
    }

    pub(crate) fn remove(
        &mut self,
        slot: u32,
        source_types: &[StrId],
        edge_types: &[StrId],
        target_types: &[StrId],
    ) {
        for key in keys(source_types, edge_types, target_types) {
            if let Some(bitmap) = self.entries.get_mut(&key) {
                bitmap.remove(slot);
                if bitmap.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    pub(crate) fn lookup(
        &self,
        source: TypeKey,
        edge: TypeKey,
        target: TypeKey,
    ) -> Option<&RoaringBitmap> {
        self.entries.get(&(source, edge, target))
    }

    /// Union over every combination of the given positions. `None` means the
    /// position is unconstrained.
    pub(crate) fn candidates(
        &self,
        source_types: Option<&[StrId]>,
        edge_types: Option<&[StrId]>,
        target_types: Option<&[StrId]>,
    ) -> RoaringBitmap {
        let positions = |types: Option<&[StrId]>| -> Vec<TypeKey> {
            match types {
                None => vec![None],
                Some(types) => types.iter().copied().map(Some).collect(),
            }
        };
        let (sources, edges, targets) = (
            positions(source_types),
            positions(edge_types),
            positions(target_types),
        );

        let mut out = RoaringBitmap::new();
        for &s in &sources {
            for &e in &edges {
                for &t in &targets {
                    if let Some(bitmap) = self.lookup(s, e, t) {
                        out |= bitmap;
                    }
                }
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
