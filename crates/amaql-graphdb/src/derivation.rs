//! Rule-based edge derivation.
//!
//! Each rule describes a two-hop chain `A -[first]- M -[second]- B` and an
//! edge to synthesize between two of `A`, `M`, `B`. A pass applies every rule
//! once, in list order, matching against the graph as it stands (including
//! edges derived earlier in the same pass). Passes repeat until one adds no
//! edge or `max_passes` is reached.
//!
//! Edge insertion goes through the repository's idempotent `add_edge`, so a
//! re-derived edge is never duplicated. Per-edge failures are logged and
//! skipped; they never abort a pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use amaql_dsl::{DerivationRule, EdgeDescription, EdgeDirection, RuleParseError, RulePart};
use thiserror::Error;
use tracing::{debug, warn};

use crate::logger::Logger;
use crate::repository::GraphRepository;
use crate::{Edge, EdgeFilter, EdgeScope, GraphError, VertexFilter};

/// Pass budget used when the caller has no better bound.
pub const DEFAULT_MAX_PASSES: usize = 5;

/// Constructs the synthesized edge:
/// `(source_id, target_id, types, external_id, derivation_path) -> Edge`.
pub type EdgeBuilder = Arc<
    dyn Fn(&str, &str, &BTreeSet<String>, Option<&str>, &[String]) -> Option<Edge> + Send + Sync,
>;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error(transparent)]
    Rule(#[from] RuleParseError),

    #[error("InvalidEdgeBuilder: {0}")]
    InvalidEdgeBuilder(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, DerivationError>;

/// Summary of a [`DerivationEngine::derive_edges`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivationReport {
    pub passes: usize,
    pub edges_added: usize,
    /// Matches whose edge could not be built or stored.
    pub skipped: usize,
}

fn default_builder() -> EdgeBuilder {
    Arc::new(
        |source: &str,
         target: &str,
         types: &BTreeSet<String>,
         external_id: Option<&str>,
         path: &[String]| {
            Some(Edge::build(source, target, types, external_id, path))
        },
    )
}

/// Invoke the builder once on sample values and check the returned shape.
fn validate_builder(builder: &EdgeBuilder) -> Result<()> {
    let types = BTreeSet::from(["probe".to_string()]);
    let path = ["probe-rule".to_string()];
    let edge = builder("probe-source", "probe-target", &types, Some("probe-external"), &path)
        .ok_or_else(|| DerivationError::InvalidEdgeBuilder("builder returned no edge".into()))?;

    let problem = if edge.id.is_empty() {
        Some("edge has an empty id")
    } else if edge.source_id != "probe-source" || edge.target_id != "probe-target" {
        Some("edge endpoints do not match the requested ones")
    } else if edge.types.is_empty() {
        Some("edge has no types")
    } else {
        None
    };
    match problem {
        Some(problem) => Err(DerivationError::InvalidEdgeBuilder(problem.to_string())),
        None => Ok(()),
    }
}

fn type_filter(types: &BTreeSet<String>) -> VertexFilter {
    if types.is_empty() {
        VertexFilter::new()
    } else {
        VertexFilter::new().with_types(types.iter().cloned())
    }
}

fn hop_filter(hop: &EdgeDescription) -> EdgeFilter {
    let filter = EdgeFilter::new().with_scope(EdgeScope::All);
    if hop.edge_types.is_empty() {
        filter
    } else {
        filter.with_types(hop.edge_types.iter().cloned())
    }
}

/// First-hop match: the outer vertex and the edge that reached the middle.
struct HalfMatch {
    outer: String,
    edge_id: String,
}

pub struct DerivationEngine<'g, R: GraphRepository> {
    graph: &'g mut R,
    rules: Vec<DerivationRule>,
    edge_builder: EdgeBuilder,
    logger: Option<Arc<dyn Logger>>,
    /// Edge type -> indices of the rules whose condition mentions it.
    rules_by_edge_type: BTreeMap<String, Vec<usize>>,
}

impl<'g, R: GraphRepository> DerivationEngine<'g, R> {
    /// Build an engine over `graph`. A custom `edge_builder` is validated
    /// before any rule runs.
    pub fn new(
        graph: &'g mut R,
        rules: Vec<DerivationRule>,
        edge_builder: Option<EdgeBuilder>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Self> {
        let edge_builder = match edge_builder {
            Some(builder) => {
                validate_builder(&builder)?;
                builder
            }
            None => default_builder(),
        };

        let mut rules_by_edge_type: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, rule) in rules.iter().enumerate() {
            for edge_type in rule.condition_edge_types() {
                rules_by_edge_type
                    .entry(edge_type.clone())
                    .or_default()
                    .push(index);
            }
        }

        Ok(Self {
            graph,
            rules,
            edge_builder,
            logger,
            rules_by_edge_type,
        })
    }

    /// Parse `(conditional, effect)` pairs and build an engine with the
    /// default edge builder.
    pub fn from_rule_text(
        graph: &'g mut R,
        rules: &[(&str, &str)],
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(conditional, effect)| DerivationRule::new(conditional, effect))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(graph, rules, None, logger)
    }

    pub fn rules(&self) -> &[DerivationRule] {
        &self.rules
    }

    /// Indices of the rules whose condition mentions `edge_type`.
    pub fn rules_for_edge_type(&self, edge_type: &str) -> &[usize] {
        self.rules_by_edge_type
            .get(&edge_type.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Run up to `max_passes` derivation passes, stopping early at a fixed
    /// point.
    pub async fn derive_edges(&mut self, max_passes: usize) -> DerivationReport {
        let mut report = DerivationReport::default();
        for pass in 0..max_passes {
            let mut added = 0;
            for rule in &self.rules {
                let (rule_added, rule_skipped) = Self::apply_rule(
                    &mut *self.graph,
                    rule,
                    &self.edge_builder,
                    self.logger.as_deref(),
                )
                .await;
                added += rule_added;
                report.skipped += rule_skipped;
            }
            report.passes += 1;
            report.edges_added += added;
            debug!(pass, added, "derivation pass finished");
            if added == 0 {
                break;
            }
        }
        if let Some(logger) = &self.logger {
            logger.info(&format!(
                "derivation finished after {} pass(es): {} edge(s) added, {} skipped",
                report.passes, report.edges_added, report.skipped
            ));
        }
        report
    }

    /// Returns `(added, skipped)`.
    async fn apply_rule(
        graph: &mut R,
        rule: &DerivationRule,
        builder: &EdgeBuilder,
        logger: Option<&dyn Logger>,
    ) -> (usize, usize) {
        let report = |message: String| {
            warn!(rule = rule.label.as_str(), "{message}");
            if let Some(logger) = logger {
                logger.warn(&message);
            }
        };

        let conditional = &rule.conditional;
        let first = type_filter(&conditional.first_part.element_types);
        let middle = type_filter(&conditional.middle_element_types);
        let last = type_filter(&conditional.second_part.element_types);

        let first_edges = match Self::hop(graph, &conditional.first_part, &first, &middle).await {
            Ok(edges) => edges,
            Err(err) => {
                report(format!("rule `{}` skipped: {err}", rule.label));
                return (0, 0);
            }
        };
        if first_edges.is_empty() {
            return (0, 0);
        }

        // middle id -> first-hop matches, middles in first-seen order
        let mut by_middle: HashMap<String, Vec<HalfMatch>> = HashMap::new();
        let mut middle_ids = Vec::new();
        for edge in first_edges {
            let (outer, mid) = match conditional.first_part.direction {
                EdgeDirection::Forward => (edge.source_id, edge.target_id),
                EdgeDirection::Backward => (edge.target_id, edge.source_id),
            };
            let entry = by_middle.entry(mid.clone()).or_default();
            if entry.is_empty() {
                middle_ids.push(mid);
            }
            entry.push(HalfMatch {
                outer,
                edge_id: edge.id,
            });
        }

        let middle = middle.with_ids(middle_ids);
        let second_edges =
            match Self::hop(graph, &conditional.second_part, &middle, &last).await {
                Ok(edges) => edges,
                Err(err) => {
                    report(format!("rule `{}` skipped: {err}", rule.label));
                    return (0, 0);
                }
            };

        let (mut added, mut skipped) = (0, 0);
        for edge in second_edges {
            let (mid, outer) = match conditional.second_part.direction {
                EdgeDirection::Forward => (&edge.source_id, &edge.target_id),
                EdgeDirection::Backward => (&edge.target_id, &edge.source_id),
            };
            let Some(halves) = by_middle.get(mid) else {
                continue;
            };
            for half in halves {
                let pick = |part: RulePart| match part {
                    RulePart::FirstPartElement => half.outer.as_str(),
                    RulePart::MiddleElement => mid.as_str(),
                    RulePart::SecondPartElement => outer.as_str(),
                };
                let (source, target) = (pick(rule.effect.source), pick(rule.effect.target));
                if source == target {
                    continue;
                }

                let path = [rule.label.clone(), half.edge_id.clone(), edge.id.clone()];
                let Some(derived) = builder(source, target, &rule.effect.types, None, &path)
                else {
                    report(format!("edge builder declined {source} -> {target}"));
                    skipped += 1;
                    continue;
                };
                match graph.add_edge(derived).await {
                    Ok(result) if result.inserted => {
                        debug!(
                            edge = result.id.as_str(),
                            rule = rule.label.as_str(),
                            "derived edge"
                        );
                        added += 1;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        report(format!("derived edge {source} -> {target} skipped: {err}"));
                        skipped += 1;
                    }
                }
            }
        }
        (added, skipped)
    }

    /// Edges for one hop, read left to right in the rule text.
    async fn hop(
        graph: &R,
        hop: &EdgeDescription,
        left: &VertexFilter,
        right: &VertexFilter,
    ) -> std::result::Result<Vec<Edge>, GraphError> {
        let filter = hop_filter(hop);
        let (source, target) = match hop.direction {
            EdgeDirection::Forward => (left, right),
            EdgeDirection::Backward => (right, left),
        };
        graph
            .get_edges_by_filter(Some(source), &filter, Some(target))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GraphDB, Vertex};

    fn chain() -> GraphDB {
        let mut db = GraphDB::new();
        db.add_many_vertices((1..=4).map(|i| Vertex::new(i.to_string(), format!("v{i}"), ["n"])))
            .unwrap();
        db.add_many_edges([
            Edge::new("1", "2", ["next"]),
            Edge::new("2", "3", ["next"]),
            Edge::new("3", "4", ["next"]),
        ])
        .unwrap();
        db
    }

    fn rule(conditional: &str, effect: &str) -> DerivationRule {
        DerivationRule::new(conditional, effect).unwrap()
    }

    #[tokio::test]
    async fn transitive_closure_reaches_a_fixed_point() {
        let mut db = chain();
        let report = {
            let mut engine = DerivationEngine::new(
                &mut db,
                vec![rule("()[next]>()[next]>()", "(1)[next](3)")],
                None,
                None,
            )
            .unwrap();
            engine.derive_edges(10).await
        };
        // 1->3, 2->4, then 1->4; the last pass adds nothing.
        assert_eq!(report.edges_added, 3);
        assert_eq!(report.passes, 3);
        assert!(db.exists("1-[next]->4"));
        assert_eq!(db.derived_edge_count(), 3);
    }

    #[tokio::test]
    async fn pass_budget_bounds_the_closure() {
        let mut db = chain();
        let report = DerivationEngine::new(
            &mut db,
            vec![rule("()[next]>()[next]>()", "(1)[next](3)")],
            None,
            None,
        )
        .unwrap()
        .derive_edges(1)
        .await;
        assert_eq!(report.passes, 1);
        assert!(db.exists("1-[next]->3"));
        assert!(db.exists("2-[next]->4"));
        // 1->4 needs a second pass.
        assert!(!db.exists("1-[next]->4"));
        assert_eq!(report.edges_added, 2);
    }

    #[tokio::test]
    async fn derivation_path_records_rule_and_hops() {
        let mut db = chain();
        DerivationEngine::new(
            &mut db,
            vec![rule("()[next]>()[next]>()", "(1)[next](3)").with_label("skip")],
            None,
            None,
        )
        .unwrap()
        .derive_edges(1)
        .await;
        let edge = db.get_edge("1-[next]->3").unwrap();
        assert_eq!(
            edge.derivation_path,
            vec!["skip", "1-[next]->2", "2-[next]->3"]
        );
    }

    #[tokio::test]
    async fn backward_hops_and_self_loops() {
        let mut db = GraphDB::new();
        db.add_many_vertices([
            Vertex::new("a", "a", ["app"]),
            Vertex::new("b", "b", ["app"]),
            Vertex::new("s", "s", ["server"]),
        ])
        .unwrap();
        db.add_many_edges([Edge::new("a", "s", ["runs_on"]), Edge::new("b", "s", ["runs_on"])])
            .unwrap();

        // a -> s <- b  =>  a peers b (and b peers a); a/a pairs are skipped.
        let report = DerivationEngine::new(
            &mut db,
            vec![rule("(app)[runs_on]>(server)<[runs_on](app)", "(1)[peer](3)")],
            None,
            None,
        )
        .unwrap()
        .derive_edges(2)
        .await;
        assert_eq!(report.edges_added, 2);
        assert!(db.exists("a-[peer]->b"));
        assert!(db.exists("b-[peer]->a"));
        assert!(!db.exists("a-[peer]->a"));
    }

    #[test]
    fn invalid_edge_builders_are_rejected() {
        let mut db = GraphDB::new();
        let nothing: EdgeBuilder = Arc::new(
            |_: &str, _: &str, _: &BTreeSet<String>, _: Option<&str>, _: &[String]| None,
        );
        assert!(matches!(
            DerivationEngine::new(&mut db, Vec::new(), Some(nothing), None),
            Err(DerivationError::InvalidEdgeBuilder(_))
        ));

        let swapped: EdgeBuilder = Arc::new(
            |source: &str, target: &str, types: &BTreeSet<String>, _: Option<&str>, _: &[String]| {
                Some(Edge::new(target, source, types))
            },
        );
        assert!(matches!(
            DerivationEngine::new(&mut db, Vec::new(), Some(swapped), None),
            Err(DerivationError::InvalidEdgeBuilder(_))
        ));

        let tagged: EdgeBuilder = Arc::new(
            |source: &str,
             target: &str,
             types: &BTreeSet<String>,
             external: Option<&str>,
             path: &[String]| {
                let mut edge = Edge::build(source, target, types, external, path);
                edge.external_id = Some("custom".into());
                Some(edge)
            },
        );
        assert!(DerivationEngine::new(&mut db, Vec::new(), Some(tagged), None).is_ok());
    }

    #[test]
    fn rule_index_maps_edge_types_to_rules() {
        let mut db = GraphDB::new();
        let engine = DerivationEngine::from_rule_text(
            &mut db,
            &[
                ("()[a]>()[b]>()", "(1)[a](3)"),
                ("()[b]>()<[c]()", "(1)[d](3)"),
            ],
            None,
        )
        .unwrap();
        assert_eq!(engine.rules_for_edge_type("b"), &[0, 1]);
        assert_eq!(engine.rules_for_edge_type("C"), &[1]);
        assert!(engine.rules_for_edge_type("zzz").is_empty());
    }

    #[test]
    fn malformed_rule_text_fails_construction() {
        let mut db = GraphDB::new();
        let err =
            DerivationEngine::from_rule_text(&mut db, &[("()[a]()[b]>()", "(1)[a](3)")], None)
                .err()
                .unwrap();
        assert!(matches!(
            err,
            DerivationError::Rule(RuleParseError::InvalidRuleConditional(_))
        ));
    }
}
