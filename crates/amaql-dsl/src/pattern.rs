//! AMAQL pattern grammar and the input descriptor it produces.
//!
//! A pattern is a `?` marker followed by a chain of node elements joined by
//! relationship connectors:
//!
//! ```text
//! ?(node)-[realization]->(applicationcomponent)=[serving]=>(businessprocess)
//! ?('core db')
//! ?(software or node)
//! ```
//!
//! Node elements:
//!
//! | syntax              | kind            |
//! |---------------------|-----------------|
//! | `('name')`          | `Identified`    |
//! | `('name' t1 or t2)` | `Described`     |
//! | `(t1 or t2)`        | `Typed`         |
//! | `(*)`               | `Group`         |
//! | `()`                | `NonDescribed`  |
//!
//! Relationship connectors come in a BONDED family (`-`, `->`, `<-`, `<->`)
//! and a PATH family (`=`, `=>`, `<=`, `<=>`). Typed connectors wrap a
//! bracketed type list (`-[t]->`, `<=[t]=`, `-[t]=>`, `-[!t]->` for negation)
//! and may mix the two families, one glyph per side.
//!
//! Parsing happens in two steps: nom builds a raw element list, then a
//! semantic pass assigns aliases and checks the structural rules that the
//! grammar alone cannot express.

use std::collections::BTreeMap;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char as pchar, multispace0, multispace1};
use nom::combinator::{all_consuming, map, opt, value};
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::lexer::{error_offset, quoted_name, type_list, ws};
use crate::{AmaqlError, Result};

// ============================================================================
// Input descriptor model
// ============================================================================

/// Visual framing of one side of a relationship connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framing {
    /// `-`, `->`, `<-`: asserted edges only.
    Bonded,
    /// `=`, `=>`, `<=`: derived edges allowed.
    Path,
}

/// One side of a relationship connector, as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Connector {
    BondedBase,
    BondedLeft,
    BondedRight,
    PathBase,
    PathLeft,
    PathRight,
}

impl Connector {
    pub fn framing(self) -> Framing {
        match self {
            Connector::BondedBase | Connector::BondedLeft | Connector::BondedRight => {
                Framing::Bonded
            }
            Connector::PathBase | Connector::PathLeft | Connector::PathRight => Framing::Path,
        }
    }

    /// Whether this side carries an arrowhead (`<` or `>`).
    pub fn has_arrow(self) -> bool {
        !matches!(self, Connector::BondedBase | Connector::PathBase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Typed { types: Vec<String> },
    Described { name: String, types: Vec<String> },
    Identified { name: String },
    Group,
    NonDescribed,
}

impl NodeKind {
    fn can_start_pattern(&self) -> bool {
        matches!(
            self,
            NodeKind::Typed { .. } | NodeKind::Described { .. } | NodeKind::Identified { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputNode {
    pub alias: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    /// Bare connector, any edge type.
    Short,
    /// Bracketed connector with an explicit type list.
    Typed { types: Vec<String>, negated: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRelationship {
    pub alias: String,
    pub kind: RelationshipKind,
    pub source: Connector,
    pub target: Connector,
}

impl InputRelationship {
    /// Both sides use the same framing.
    pub fn is_homogeneous(&self) -> bool {
        self.source.framing() == self.target.framing()
    }

    pub fn types(&self) -> &[String] {
        match &self.kind {
            RelationshipKind::Short => &[],
            RelationshipKind::Typed { types, .. } => types,
        }
    }

    pub fn is_negated(&self) -> bool {
        matches!(self.kind, RelationshipKind::Typed { negated: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum InputElement {
    Node(InputNode),
    Relationship(InputRelationship),
}

/// The naive chain of a parsed pattern: nodes and relationships alternate,
/// starting and ending with a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub(crate) chain: Vec<InputElement>,
    /// alias -> lowercased search term, for identified/described nodes.
    pub(crate) identifiers: BTreeMap<String, String>,
}

impl InputDescriptor {
    pub fn chain(&self) -> &[InputElement] {
        &self.chain
    }

    pub fn identifiers(&self) -> &BTreeMap<String, String> {
        &self.identifiers
    }

    pub fn nodes(&self) -> impl Iterator<Item = &InputNode> {
        self.chain.iter().filter_map(|e| match e {
            InputElement::Node(n) => Some(n),
            InputElement::Relationship(_) => None,
        })
    }

    pub fn relationships(&self) -> impl Iterator<Item = &InputRelationship> {
        self.chain.iter().filter_map(|e| match e {
            InputElement::Relationship(r) => Some(r),
            InputElement::Node(_) => None,
        })
    }
}

/// Parse a pattern string into its input descriptor.
pub fn mount_input_descriptor(query: &str) -> Result<InputDescriptor> {
    let (_, (first, rest)) = all_consuming(pattern)(query).map_err(|e| {
        AmaqlError::invalid(
            query,
            format!("syntax error at offset {}", error_offset(query, &e)),
        )
    })?;

    let descriptor = build_descriptor(first, rest);
    validate(query, &descriptor)?;
    Ok(descriptor)
}

// ============================================================================
// Semantic actions
// ============================================================================

#[derive(Default)]
struct AliasCounters {
    nodes: usize,
    short: usize,
    typed: usize,
}

impl AliasCounters {
    fn node(&mut self) -> String {
        let alias = format!("n{}", self.nodes);
        self.nodes += 1;
        alias
    }

    fn relationship(&mut self, kind: &RelationshipKind) -> String {
        match kind {
            RelationshipKind::Short => {
                let alias = format!("e{}", self.short);
                self.short += 1;
                alias
            }
            RelationshipKind::Typed { .. } => {
                let alias = format!("r{}", self.typed);
                self.typed += 1;
                alias
            }
        }
    }
}

fn build_descriptor(first: NodeKind, rest: Vec<(RawRelationship, NodeKind)>) -> InputDescriptor {
    let mut counters = AliasCounters::default();
    let mut descriptor = InputDescriptor {
        chain: Vec::with_capacity(1 + rest.len() * 2),
        identifiers: BTreeMap::new(),
    };

    descriptor.push_node(counters.node(), first);
    for (rel, node) in rest {
        let alias = counters.relationship(&rel.kind);
        descriptor
            .chain
            .push(InputElement::Relationship(InputRelationship {
                alias,
                kind: rel.kind,
                source: rel.source,
                target: rel.target,
            }));
        descriptor.push_node(counters.node(), node);
    }
    descriptor
}

impl InputDescriptor {
    fn push_node(&mut self, alias: String, kind: NodeKind) {
        match &kind {
            NodeKind::Identified { name } | NodeKind::Described { name, .. } => {
                self.identifiers.insert(alias.clone(), name.to_lowercase());
            }
            NodeKind::Typed { .. } | NodeKind::Group | NodeKind::NonDescribed => {}
        }
        self.chain.push(InputElement::Node(InputNode { alias, kind }));
    }
}

fn validate(query: &str, descriptor: &InputDescriptor) -> Result<()> {
    let mut nodes = descriptor.nodes();
    let Some(first) = nodes.next() else {
        return Err(AmaqlError::invalid(query, "pattern has no node element"));
    };

    if descriptor.chain.len() == 1 {
        match first.kind {
            NodeKind::Group => {
                return Err(AmaqlError::invalid(
                    query,
                    "a group node `(*)` cannot stand alone",
                ))
            }
            NodeKind::NonDescribed => {
                return Err(AmaqlError::invalid(
                    query,
                    "a non-described node `()` cannot stand alone",
                ))
            }
            _ => {}
        }
    }

    if !first.kind.can_start_pattern() {
        return Err(AmaqlError::invalid(
            query,
            "pattern must start with a typed, described or identified node",
        ));
    }

    for rel in descriptor.relationships() {
        let undirected = !rel.source.has_arrow() && !rel.target.has_arrow();
        if undirected && !rel.is_homogeneous() {
            return Err(AmaqlError::invalid(
                query,
                format!(
                    "relationship {} mixes bonded and path framing without a direction",
                    rel.alias
                ),
            ));
        }
        if undirected && matches!(rel.kind, RelationshipKind::Typed { .. }) {
            return Err(AmaqlError::invalid(
                query,
                format!(
                    "typed relationship {} needs at least one arrowhead",
                    rel.alias
                ),
            ));
        }
    }

    Ok(())
}

// ============================================================================
// Grammar
// ============================================================================

struct RawRelationship {
    kind: RelationshipKind,
    source: Connector,
    target: Connector,
}

fn pattern(input: &str) -> IResult<&str, (NodeKind, Vec<(RawRelationship, NodeKind)>)> {
    delimited(
        pair(multispace0, pchar('?')),
        pair(ws(node_element), many0(pair(ws(relationship), ws(node_element)))),
        multispace0,
    )(input)
}

fn node_element(input: &str) -> IResult<&str, NodeKind> {
    delimited(ws(pchar('(')), node_body, ws(pchar(')')))(input)
}

fn node_body(input: &str) -> IResult<&str, NodeKind> {
    alt((
        value(NodeKind::Group, pchar('*')),
        named_node,
        map(type_list, |types| NodeKind::Typed { types }),
        value(NodeKind::NonDescribed, multispace0),
    ))(input)
}

fn named_node(input: &str) -> IResult<&str, NodeKind> {
    map(
        pair(
            quoted_name,
            opt(preceded(alt((ws(tag(":")), multispace1)), type_list)),
        ),
        |(name, types)| match types {
            Some(types) => NodeKind::Described { name, types },
            None => NodeKind::Identified { name },
        },
    )(input)
}

fn relationship(input: &str) -> IResult<&str, RawRelationship> {
    alt((typed_relationship, short_relationship))(input)
}

fn typed_relationship(input: &str) -> IResult<&str, RawRelationship> {
    map(
        tuple((
            source_glyph,
            pchar('['),
            ws(opt(pchar('!'))),
            ws(type_list),
            pchar(']'),
            target_glyph,
        )),
        |(source, _, negated, types, _, target)| RawRelationship {
            kind: RelationshipKind::Typed {
                types,
                negated: negated.is_some(),
            },
            source,
            target,
        },
    )(input)
}

fn source_glyph(input: &str) -> IResult<&str, Connector> {
    alt((
        value(Connector::BondedLeft, tag("<-")),
        value(Connector::PathLeft, tag("<=")),
        value(Connector::BondedBase, tag("-")),
        value(Connector::PathBase, tag("=")),
    ))(input)
}

fn target_glyph(input: &str) -> IResult<&str, Connector> {
    alt((
        value(Connector::BondedRight, tag("->")),
        value(Connector::PathRight, tag("=>")),
        value(Connector::BondedBase, tag("-")),
        value(Connector::PathBase, tag("=")),
    ))(input)
}

fn short_relationship(input: &str) -> IResult<&str, RawRelationship> {
    use Connector::*;
    // Longest glyphs first.
    let (rest, (source, target)) = alt((
        value((BondedLeft, BondedRight), tag("<->")),
        value((PathLeft, PathRight), tag("<=>")),
        value((BondedLeft, BondedBase), tag("<-")),
        value((PathLeft, PathBase), tag("<=")),
        value((BondedBase, BondedRight), tag("->")),
        value((PathBase, PathRight), tag("=>")),
        value((BondedBase, BondedBase), tag("-")),
        value((PathBase, PathBase), tag("=")),
    ))(input)?;
    Ok((
        rest,
        RawRelationship {
            kind: RelationshipKind::Short,
            source,
            target,
        },
    ))
}
