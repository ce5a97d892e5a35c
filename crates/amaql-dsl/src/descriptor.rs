//! Query descriptors: the normalized, direction-resolved form of a pattern.
//!
//! The naive chain `node rel node rel node ...` is rewritten into a list of
//! [`QueryTriple`]s, one execution stage each. Connectors whose two sides use
//! different framing (`-[t]=>`, `<-[t]=>`) are split into two triples joined
//! by a synthesized placeholder node that is never returned to the caller.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::pattern::{
    mount_input_descriptor, Connector, Framing, InputDescriptor, InputElement, InputNode,
    InputRelationship, NodeKind,
};
use crate::Result;

/// Resolved relationship direction relative to the triple's left node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// right -> left
    Left,
    /// either way
    Both,
    /// left -> right
    Right,
}

impl Direction {
    pub fn as_number(self) -> i8 {
        match self {
            Direction::Left => -1,
            Direction::Both => 0,
            Direction::Right => 1,
        }
    }

    /// Canonical connector table:
    ///
    /// | source  | target  | direction |
    /// |---------|---------|-----------|
    /// | `LEFT`  | `BASE`  | -1        |
    /// | `BASE`  | `RIGHT` | +1        |
    /// | `LEFT`  | `RIGHT` | 0         |
    /// | `BASE`  | `BASE`  | 0         |
    pub fn from_connectors(source: Connector, target: Connector) -> Self {
        match (source.has_arrow(), target.has_arrow()) {
            (true, false) => Direction::Left,
            (false, true) => Direction::Right,
            (true, true) | (false, false) => Direction::Both,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryNode {
    /// Alias from the pattern; `None` for synthesized nodes.
    pub alias: Option<String>,
    pub types: BTreeSet<String>,
    pub search_term: Option<String>,
    /// `false` for pass-through nodes (`()` and synthesized intermediates).
    pub should_be_returned: bool,
}

impl QueryNode {
    /// Unbound node inserted between the two halves of a heterogeneous connector.
    pub fn placeholder() -> Self {
        Self {
            alias: None,
            types: BTreeSet::new(),
            search_term: None,
            should_be_returned: false,
        }
    }

    pub fn from_input(node: &InputNode) -> Self {
        let (types, search_term, should_be_returned) = match &node.kind {
            NodeKind::Typed { types } => (types.iter().cloned().collect(), None, true),
            NodeKind::Described { name, types } => (
                types.iter().cloned().collect(),
                Some(name.to_lowercase()),
                true,
            ),
            NodeKind::Identified { name } => (BTreeSet::new(), Some(name.to_lowercase()), true),
            NodeKind::Group => (BTreeSet::new(), None, true),
            NodeKind::NonDescribed => (BTreeSet::new(), None, false),
        };
        Self {
            alias: Some(node.alias.clone()),
            types,
            search_term,
            should_be_returned,
        }
    }

    /// No type or search constraint.
    pub fn is_unconstrained(&self) -> bool {
        self.types.is_empty() && self.search_term.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRelationship {
    pub alias: Option<String>,
    pub types: BTreeSet<String>,
    pub direction: Direction,
    pub is_negated: bool,
    /// Derived edges may satisfy this relationship (PATH framing).
    pub is_derived: bool,
}

impl QueryRelationship {
    fn from_input(rel: &InputRelationship, direction: Direction, framing: Framing) -> Self {
        Self {
            alias: Some(rel.alias.clone()),
            types: rel.types().iter().cloned().collect(),
            direction,
            is_negated: rel.is_negated(),
            is_derived: framing == Framing::Path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTriple {
    pub left_node: QueryNode,
    pub relationship: QueryRelationship,
    pub right_node: QueryNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub query_chain: Vec<QueryTriple>,
    /// Set when the pattern is a single node.
    pub query_filter: Option<QueryNode>,
}

impl QueryDescriptor {
    pub fn parse(query: &str) -> Result<Self> {
        Ok(mount_input_descriptor(query)?.generate_query_descriptor())
    }

    pub fn is_complex_query(&self) -> bool {
        !self.query_chain.is_empty()
    }
}

impl InputDescriptor {
    /// Normalize the naive chain into direction-resolved triples.
    pub fn generate_query_descriptor(&self) -> QueryDescriptor {
        let chain = &self.chain;
        if chain.len() == 1 {
            let query_filter = match &chain[0] {
                InputElement::Node(node) => Some(QueryNode::from_input(node)),
                InputElement::Relationship(_) => None,
            };
            return QueryDescriptor {
                query_chain: Vec::new(),
                query_filter,
            };
        }

        let mut query_chain = Vec::with_capacity(chain.len());
        let mut i = 0;
        while i + 2 < chain.len() {
            if let (
                InputElement::Node(left),
                InputElement::Relationship(rel),
                InputElement::Node(right),
            ) = (&chain[i], &chain[i + 1], &chain[i + 2])
            {
                push_triples(
                    &mut query_chain,
                    QueryNode::from_input(left),
                    rel,
                    QueryNode::from_input(right),
                );
            }
            i += 2;
        }

        QueryDescriptor {
            query_chain,
            query_filter: None,
        }
    }
}

fn push_triples(
    out: &mut Vec<QueryTriple>,
    left_node: QueryNode,
    rel: &InputRelationship,
    right_node: QueryNode,
) {
    if rel.is_homogeneous() {
        let direction = Direction::from_connectors(rel.source, rel.target);
        out.push(QueryTriple {
            left_node,
            relationship: QueryRelationship::from_input(rel, direction, rel.source.framing()),
            right_node,
        });
        return;
    }

    // Heterogeneous: each half keeps the framing of its own connector.
    let (first_direction, second_direction) = if rel.source.has_arrow() && rel.target.has_arrow()
    {
        (Direction::Left, Direction::Right)
    } else {
        let direction = Direction::from_connectors(rel.source, rel.target);
        (direction, direction)
    };

    let middle = QueryNode::placeholder();
    out.push(QueryTriple {
        left_node,
        relationship: QueryRelationship::from_input(rel, first_direction, rel.source.framing()),
        right_node: middle.clone(),
    });
    out.push(QueryTriple {
        left_node: middle,
        relationship: QueryRelationship::from_input(rel, second_direction, rel.target.framing()),
        right_node,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(q: &str) -> QueryDescriptor {
        QueryDescriptor::parse(q).unwrap()
    }

    #[test]
    fn single_node_becomes_a_filter() {
        let d = compile("?('Core DB' node)");
        assert!(!d.is_complex_query());
        let filter = d.query_filter.unwrap();
        assert_eq!(filter.types, BTreeSet::from(["node".to_string()]));
        assert_eq!(filter.search_term.as_deref(), Some("core db"));
    }

    #[test]
    fn bonded_right_is_one_non_derived_triple() {
        let d = compile("?(a)-[t]->(b)");
        assert_eq!(d.query_chain.len(), 1);
        let rel = &d.query_chain[0].relationship;
        assert_eq!(rel.direction.as_number(), 1);
        assert!(!rel.is_derived);
        assert_eq!(rel.types, BTreeSet::from(["t".to_string()]));
    }

    #[test]
    fn path_left_is_one_derived_triple() {
        let d = compile("?(a)<=[t]=(b)");
        assert_eq!(d.query_chain.len(), 1);
        let rel = &d.query_chain[0].relationship;
        assert_eq!(rel.direction.as_number(), -1);
        assert!(rel.is_derived);
    }

    #[test]
    fn undirected_and_bidirectional_are_direction_zero() {
        for q in ["?(a)-(b)", "?(a)<->(b)", "?(a)=(b)", "?(a)<=[t]=>(b)"] {
            let d = compile(q);
            assert_eq!(d.query_chain.len(), 1, "{q}");
            assert_eq!(d.query_chain[0].relationship.direction, Direction::Both, "{q}");
        }
    }

    #[test]
    fn mixed_directed_connector_splits_through_placeholder() {
        let d = compile("?(a)-[t]=>(b)");
        assert_eq!(d.query_chain.len(), 2);
        let (first, second) = (&d.query_chain[0], &d.query_chain[1]);
        assert!(!first.relationship.is_derived);
        assert!(second.relationship.is_derived);
        assert_eq!(first.relationship.direction, Direction::Right);
        assert_eq!(second.relationship.direction, Direction::Right);
        assert_eq!(first.right_node, QueryNode::placeholder());
        assert_eq!(second.left_node, QueryNode::placeholder());
        assert!(!first.right_node.should_be_returned);
        assert_eq!(second.right_node.types, BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn mixed_left_connectors_keep_direction_on_both_halves() {
        let d = compile("?(a)<-[t]=(b)");
        assert_eq!(d.query_chain.len(), 2);
        let (first, second) = (&d.query_chain[0].relationship, &d.query_chain[1].relationship);
        assert_eq!(first.direction, Direction::Left);
        assert_eq!(second.direction, Direction::Left);
        assert!(!first.is_derived);
        assert!(second.is_derived);
        assert_eq!(first.types, BTreeSet::from(["t".to_string()]));
        assert_eq!(second.types, first.types);

        let d = compile("?(a)<=[t]-(b)");
        assert_eq!(d.query_chain.len(), 2);
        let (first, second) = (&d.query_chain[0].relationship, &d.query_chain[1].relationship);
        assert_eq!(first.direction, Direction::Left);
        assert_eq!(second.direction, Direction::Left);
        assert!(first.is_derived);
        assert!(!second.is_derived);
        assert_eq!(d.query_chain[0].right_node, QueryNode::placeholder());
    }

    #[test]
    fn mixed_bidirectional_connector_points_outwards() {
        let d = compile("?(a)<-[t]=>(b)");
        assert_eq!(d.query_chain.len(), 2);
        assert_eq!(d.query_chain[0].relationship.direction, Direction::Left);
        assert!(!d.query_chain[0].relationship.is_derived);
        assert_eq!(d.query_chain[1].relationship.direction, Direction::Right);
        assert!(d.query_chain[1].relationship.is_derived);
    }

    #[test]
    fn triples_follow_reading_order() {
        let d = compile("?(node)-[realization]->(applicationcomponent)=[serving]=>(businessprocess)");
        assert_eq!(d.query_chain.len(), 2);
        assert_eq!(
            d.query_chain[0].left_node.types,
            BTreeSet::from(["node".to_string()])
        );
        assert_eq!(d.query_chain[0].right_node, d.query_chain[1].left_node);
        assert_eq!(
            d.query_chain[1].right_node.types,
            BTreeSet::from(["businessprocess".to_string()])
        );
        assert!(d.query_chain[1].relationship.is_derived);
    }

    #[test]
    fn empty_parens_are_pass_through() {
        let d = compile("?(a)->()->(b)");
        assert!(!d.query_chain[0].right_node.should_be_returned);
        assert!(d.query_chain[1].right_node.should_be_returned);
    }
}
