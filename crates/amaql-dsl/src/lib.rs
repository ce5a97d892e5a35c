//! AMAQL surface syntax.
//!
//! - [`pattern`]: the pattern grammar and the naive input descriptor it builds;
//! - [`descriptor`]: normalization into direction-resolved query triples;
//! - [`rules`]: derivation-rule conditions and effects.

mod lexer;

pub mod descriptor;
pub mod pattern;
pub mod rules;

use thiserror::Error;

pub use descriptor::{Direction, QueryDescriptor, QueryNode, QueryRelationship, QueryTriple};
pub use pattern::{
    mount_input_descriptor, Connector, Framing, InputDescriptor, InputElement, InputNode,
    InputRelationship, NodeKind, RelationshipKind,
};
pub use rules::{
    DerivationRule, EdgeDescription, EdgeDirection, RuleConditional, RuleEffect, RuleParseError,
    RulePart,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmaqlError {
    #[error("InvalidQuery: {reason} (in `{query}`)")]
    InvalidQuery { query: String, reason: String },
}

impl AmaqlError {
    pub(crate) fn invalid(query: &str, reason: impl Into<String>) -> Self {
        AmaqlError::InvalidQuery {
            query: query.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AmaqlError>;
