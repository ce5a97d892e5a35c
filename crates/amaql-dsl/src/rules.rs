//! Derivation-rule text: two-hop conditions and their effects.
//!
//! Conditional: `(types1)[edgeTypes1]>(types2)<[edgeTypes2](types3)`
//!
//! - exactly three vertex groups and two edge groups, alternating;
//! - every edge group carries one direction glyph, `]>` (left to right) or
//!   `<[` (right to left);
//! - empty groups match any type.
//!
//! Effect: `(1)[type1,type2](3)`, where `1`, `2`, `3` name the first, middle
//! and last vertex of the condition. The effect edge points from the left
//! position to the right one and must not carry direction glyphs.

use std::collections::BTreeSet;
use std::fmt;

use nom::branch::alt;
use nom::character::complete::{char as pchar, multispace0, one_of};
use nom::combinator::{all_consuming, map, opt};
use nom::multi::many0;
use nom::sequence::{delimited, tuple};
use nom::IResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lexer::{error_offset, type_list, ws};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("InvalidRuleConditional: {0}")]
    InvalidRuleConditional(String),
    #[error("InvalidRuleEffect: {0}")]
    InvalidRuleEffect(String),
}

/// One of the three vertices of a two-hop condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RulePart {
    FirstPartElement,
    MiddleElement,
    SecondPartElement,
}

impl RulePart {
    fn from_position(c: char) -> Option<Self> {
        match c {
            '1' => Some(RulePart::FirstPartElement),
            '2' => Some(RulePart::MiddleElement),
            '3' => Some(RulePart::SecondPartElement),
            _ => None,
        }
    }

    pub fn position(self) -> u8 {
        match self {
            RulePart::FirstPartElement => 1,
            RulePart::MiddleElement => 2,
            RulePart::SecondPartElement => 3,
        }
    }
}

/// Orientation of a condition edge relative to reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeDirection {
    /// `[..]>`
    Forward,
    /// `<[..]`
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    /// Types of the outer vertex of this hop (first or last element).
    pub element_types: BTreeSet<String>,
    pub edge_types: BTreeSet<String>,
    pub direction: EdgeDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConditional {
    pub first_part: EdgeDescription,
    pub middle_element_types: BTreeSet<String>,
    pub second_part: EdgeDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEffect {
    pub source: RulePart,
    pub target: RulePart,
    pub types: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationRule {
    pub label: String,
    pub conditional: RuleConditional,
    pub effect: RuleEffect,
}

impl DerivationRule {
    pub fn new(conditional: &str, effect: &str) -> Result<Self, RuleParseError> {
        let label = format!("{} => {}", conditional.trim(), effect.trim());
        Ok(Self {
            label,
            conditional: parse_conditional(conditional)?,
            effect: parse_effect(effect)?,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Every edge type the condition mentions, in sorted order.
    pub fn condition_edge_types(&self) -> impl Iterator<Item = &String> {
        self.conditional
            .first_part
            .edge_types
            .union(&self.conditional.second_part.edge_types)
    }
}

impl fmt::Display for DerivationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

// ============================================================================
// Conditional
// ============================================================================

enum Group {
    Vertex(Vec<String>),
    Edge {
        types: Vec<String>,
        backward: bool,
        forward: bool,
    },
}

fn vertex_group(input: &str) -> IResult<&str, Group> {
    map(
        delimited(ws(pchar('(')), opt(ws(type_list)), ws(pchar(')'))),
        |types| Group::Vertex(types.unwrap_or_default()),
    )(input)
}

fn edge_group(input: &str) -> IResult<&str, Group> {
    map(
        tuple((
            multispace0,
            opt(pchar('<')),
            pchar('['),
            opt(ws(type_list)),
            pchar(']'),
            opt(pchar('>')),
            multispace0,
        )),
        |(_, backward, _, types, _, forward, _)| Group::Edge {
            types: types.unwrap_or_default(),
            backward: backward.is_some(),
            forward: forward.is_some(),
        },
    )(input)
}

fn conditional_err(message: impl Into<String>) -> RuleParseError {
    RuleParseError::InvalidRuleConditional(message.into())
}

fn effect_err(message: impl Into<String>) -> RuleParseError {
    RuleParseError::InvalidRuleEffect(message.into())
}

pub fn parse_conditional(text: &str) -> Result<RuleConditional, RuleParseError> {
    let (_, groups) = all_consuming(many0(alt((vertex_group, edge_group))))(text).map_err(|e| {
        conditional_err(format!(
            "unexpected input at offset {} in `{text}`",
            error_offset(text, &e)
        ))
    })?;

    let vertex_count = groups
        .iter()
        .filter(|g| matches!(g, Group::Vertex(_)))
        .count();
    let edge_count = groups.len() - vertex_count;
    if vertex_count != 3 || edge_count != 2 {
        return Err(conditional_err(format!(
            "expected 3 vertex groups and 2 edge groups, found {vertex_count} and {edge_count} in `{text}`"
        )));
    }

    let mut vertices: Vec<BTreeSet<String>> = Vec::with_capacity(3);
    let mut edges: Vec<(BTreeSet<String>, EdgeDirection)> = Vec::with_capacity(2);
    for (i, group) in groups.into_iter().enumerate() {
        match (i % 2, group) {
            (0, Group::Vertex(types)) => vertices.push(types.into_iter().collect()),
            (
                1,
                Group::Edge {
                    types,
                    backward,
                    forward,
                },
            ) => {
                let direction = match (backward, forward) {
                    (false, true) => EdgeDirection::Forward,
                    (true, false) => EdgeDirection::Backward,
                    (true, true) => {
                        return Err(conditional_err(format!(
                            "bidirectional edge group in `{text}`"
                        )))
                    }
                    (false, false) => {
                        return Err(conditional_err(format!(
                            "edge group without direction glyph in `{text}`"
                        )))
                    }
                };
                edges.push((types.into_iter().collect(), direction));
            }
            _ => {
                return Err(conditional_err(format!(
                    "vertex and edge groups must alternate in `{text}`"
                )))
            }
        }
    }

    let incomplete = || conditional_err(format!("incomplete condition `{text}`"));
    let [first, middle, last]: [BTreeSet<String>; 3] =
        vertices.try_into().map_err(|_| incomplete())?;
    let [(first_edges, first_direction), (second_edges, second_direction)]: [(
        BTreeSet<String>,
        EdgeDirection,
    ); 2] = edges.try_into().map_err(|_| incomplete())?;

    Ok(RuleConditional {
        first_part: EdgeDescription {
            element_types: first,
            edge_types: first_edges,
            direction: first_direction,
        },
        middle_element_types: middle,
        second_part: EdgeDescription {
            element_types: last,
            edge_types: second_edges,
            direction: second_direction,
        },
    })
}

// ============================================================================
// Effect
// ============================================================================

fn position(input: &str) -> IResult<&str, char> {
    delimited(ws(pchar('(')), ws(one_of("123")), ws(pchar(')')))(input)
}

pub fn parse_effect(text: &str) -> Result<RuleEffect, RuleParseError> {
    if text.contains('<') || text.contains('>') {
        return Err(effect_err(format!(
            "direction glyphs are not allowed in effect `{text}`"
        )));
    }

    let (_, (source, _, types, _, target)) = all_consuming(tuple((
        position,
        pchar('['),
        ws(type_list),
        pchar(']'),
        position,
    )))(text)
    .map_err(|e| {
        effect_err(format!(
            "expected `(#)[types](#)`, unexpected input at offset {} in `{text}`",
            error_offset(text, &e)
        ))
    })?;

    if source == target {
        return Err(effect_err(format!(
            "source and target reference the same element in `{text}`"
        )));
    }

    match (RulePart::from_position(source), RulePart::from_position(target)) {
        (Some(source), Some(target)) => Ok(RuleEffect {
            source,
            target,
            types: types.into_iter().collect(),
        }),
        _ => Err(effect_err(format!("unknown element position in `{text}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_documented_conditional() {
        let c = parse_conditional("(t1,t2)[et1,et2]>(t3)<[et3](t4,t5)").unwrap();
        assert_eq!(c.first_part.element_types, set(&["t1", "t2"]));
        assert_eq!(c.first_part.edge_types, set(&["et1", "et2"]));
        assert_eq!(c.first_part.direction, EdgeDirection::Forward);
        assert_eq!(c.middle_element_types, set(&["t3"]));
        assert_eq!(c.second_part.edge_types, set(&["et3"]));
        assert_eq!(c.second_part.direction, EdgeDirection::Backward);
        assert_eq!(c.second_part.element_types, set(&["t4", "t5"]));
    }

    #[test]
    fn empty_vertex_groups_match_anything() {
        let c = parse_conditional("()[et1]>()[et2,et3]>()").unwrap();
        assert!(c.first_part.element_types.is_empty());
        assert!(c.middle_element_types.is_empty());
        assert_eq!(c.second_part.edge_types, set(&["et2", "et3"]));
    }

    #[test]
    fn conditional_group_counts_are_checked() {
        for text in [
            "()[a]>()",
            "()[a]>()[b]>()[c]>()",
            "()()[a]>()",
            "",
            "()[a]>()[b]>()()",
        ] {
            assert!(
                matches!(
                    parse_conditional(text),
                    Err(RuleParseError::InvalidRuleConditional(_))
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn conditional_rejects_missing_or_double_glyphs() {
        let missing = parse_conditional("()[a]()[b]>()").unwrap_err();
        assert!(missing.to_string().contains("without direction"));
        let both = parse_conditional("()<[a]>()[b]>()").unwrap_err();
        assert!(both.to_string().contains("bidirectional"));
    }

    #[test]
    fn conditional_rejects_non_alternating_groups() {
        assert!(parse_conditional("()[a]>[b]>()()").is_err());
    }

    #[test]
    fn parses_effect() {
        let e = parse_effect("(1)[et1, et2](3)").unwrap();
        assert_eq!(e.source, RulePart::FirstPartElement);
        assert_eq!(e.target, RulePart::SecondPartElement);
        assert_eq!(e.types, set(&["et1", "et2"]));
    }

    #[test]
    fn effect_rejects_self_reference() {
        let err = parse_effect("(2)[x](2)").unwrap_err();
        assert_eq!(
            err,
            RuleParseError::InvalidRuleEffect(
                "source and target reference the same element in `(2)[x](2)`".into()
            )
        );
        assert!(err.to_string().starts_with("InvalidRuleEffect:"));
        assert!(err.to_string().contains("same element"));
    }

    #[test]
    fn effect_rejects_glyphs_and_bad_positions() {
        assert!(parse_effect("(1)[x]>(3)").is_err());
        assert!(parse_effect("(1)<[x](3)").is_err());
        assert!(parse_effect("(0)[x](3)").is_err());
        assert!(parse_effect("(1)[x](4)").is_err());
        assert!(parse_effect("(1)[](3)").is_err());
        assert!(parse_effect("(1)[x]").is_err());
    }

    #[test]
    fn rule_label_defaults_to_source_text() {
        let rule = DerivationRule::new("()[et1]>()[et2]>()", "(1)[et1](3)").unwrap();
        assert_eq!(rule.label, "()[et1]>()[et2]>() => (1)[et1](3)");
        let rule = rule.with_label("transitive-et1");
        assert_eq!(rule.to_string(), "transitive-et1");
        let types: Vec<_> = rule.condition_edge_types().cloned().collect();
        assert_eq!(types, vec!["et1", "et2"]);
    }
}
