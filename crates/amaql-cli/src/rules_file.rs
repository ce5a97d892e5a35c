//! Rule files: `{"rules": [{"conditional": "...", "effect": "...", "label": "..."}]}`.

use std::fs;
use std::path::Path;

use amaql_dsl::DerivationRule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    pub conditional: String,
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

impl RuleFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read rule file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse rule file {}", path.display()))
    }

    /// Parse every rule; the first malformed one fails the whole file.
    pub fn compile(&self) -> Result<Vec<DerivationRule>> {
        self.rules
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let rule = DerivationRule::new(&entry.conditional, &entry.effect)
                    .with_context(|| format!("rule #{index}"))?;
                Ok(match &entry.label {
                    Some(label) => rule.with_label(label.clone()),
                    None => rule,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_compiles_labelled_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        fs::write(
            &path,
            r#"{"rules": [
                {"conditional": "()[et1]>()[et2,et3]>()", "effect": "(1)[et1](3)", "label": "skip"},
                {"conditional": "()[a]>()<[b]()", "effect": "(1)[c](3)"}
            ]}"#,
        )
        .unwrap();

        let rules = RuleFile::load(&path).unwrap().compile().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].label, "skip");
        assert_eq!(rules[1].label, "()[a]>()<[b]() => (1)[c](3)");
    }

    #[test]
    fn malformed_rules_name_their_position() {
        let file = RuleFile {
            rules: vec![RuleEntry {
                conditional: "()[a]()".into(),
                effect: "(1)[a](3)".into(),
                label: None,
            }],
        };
        let err = file.compile().unwrap_err();
        assert!(format!("{err:#}").contains("rule #0"));
        assert!(format!("{err:#}").contains("InvalidRuleConditional"));
    }
}
