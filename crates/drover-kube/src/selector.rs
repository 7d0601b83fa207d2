//! Label selector parsing and matching
//!
//! Child and revision claiming both filter candidates through the parent's
//! label selector. Selectors follow the Kubernetes rules: `matchLabels`
//! entries become equality requirements, `matchExpressions` support the
//! `In`, `NotIn`, `Exists`, and `DoesNotExist` operators, and all
//! requirements must hold at once.

use std::collections::HashMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::error::{Result, SyncError};

/// A parsed, validated label selector
#[derive(Debug, Clone, Default)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

#[derive(Debug, Clone)]
enum Requirement {
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self {
            Requirement::In(key, values) => labels
                .get(key)
                .is_some_and(|v| values.iter().any(|allowed| allowed == v)),
            // A missing label satisfies NotIn, same as the API server.
            Requirement::NotIn(key, values) => labels
                .get(key)
                .is_none_or(|v| !values.iter().any(|denied| denied == v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

impl Selector {
    /// Parse a Kubernetes `LabelSelector`, rejecting malformed requirements.
    pub fn from_label_selector(selector: &LabelSelector) -> Result<Self> {
        let mut requirements = Vec::new();

        if let Some(match_labels) = &selector.match_labels {
            for (key, value) in match_labels {
                requirements.push(Requirement::In(key.clone(), vec![value.clone()]));
            }
        }

        if let Some(expressions) = &selector.match_expressions {
            for expr in expressions {
                let values = expr.values.clone().unwrap_or_default();
                let requirement = match expr.operator.as_str() {
                    "In" | "NotIn" => {
                        if values.is_empty() {
                            return Err(SyncError::InvalidConfig(format!(
                                "selector requirement on {} uses operator {} with no values",
                                expr.key, expr.operator
                            )));
                        }
                        if expr.operator == "In" {
                            Requirement::In(expr.key.clone(), values)
                        } else {
                            Requirement::NotIn(expr.key.clone(), values)
                        }
                    }
                    "Exists" | "DoesNotExist" => {
                        if !values.is_empty() {
                            return Err(SyncError::InvalidConfig(format!(
                                "selector requirement on {} uses operator {} with values",
                                expr.key, expr.operator
                            )));
                        }
                        if expr.operator == "Exists" {
                            Requirement::Exists(expr.key.clone())
                        } else {
                            Requirement::DoesNotExist(expr.key.clone())
                        }
                    }
                    other => {
                        return Err(SyncError::InvalidConfig(format!(
                            "{:?} is not a valid label selector operator",
                            other
                        )));
                    }
                };
                requirements.push(requirement);
            }
        }

        Ok(Self { requirements })
    }

    /// A selector matching exactly one label value
    pub fn equality(key: &str, value: &str) -> Self {
        let mut selector = Self::default();
        selector.require_equality(key, value);
        selector
    }

    /// Add an equality requirement to an existing selector
    pub fn require_equality(&mut self, key: &str, value: &str) {
        self.requirements
            .push(Requirement::In(key.to_string(), vec![value.to_string()]));
    }

    /// True when the selector has no requirements and would match everything
    #[must_use]
    pub fn selects_all(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Test a label set against every requirement
    #[must_use]
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_match_labels_equality() {
        let selector = Selector::from_label_selector(&LabelSelector {
            match_labels: Some([("app".to_string(), "nginx".to_string())].into()),
            match_expressions: None,
        })
        .unwrap();

        assert!(selector.matches(&labels(&[("app", "nginx"), ("tier", "web")])));
        assert!(!selector.matches(&labels(&[("app", "redis")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let selector = Selector::from_label_selector(&LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "env".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["prod".to_string(), "staging".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
        })
        .unwrap();

        assert!(selector.matches(&labels(&[("env", "prod")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("canary", "true")])));
    }

    #[test]
    fn test_not_in_matches_missing_label() {
        let selector = Selector::from_label_selector(&LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["prod".to_string()]),
            }]),
        })
        .unwrap();

        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_invalid_operator_rejected() {
        let result = Selector::from_label_selector(&LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_in_requires_values() {
        let result = Selector::from_label_selector(&LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "In".to_string(),
                values: None,
            }]),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_selector_selects_all() {
        let selector = Selector::from_label_selector(&LabelSelector::default()).unwrap();
        assert!(selector.selects_all());
        assert!(selector.matches(&labels(&[("anything", "goes")])));

        let pinned = Selector::equality("controller-uid", "u1");
        assert!(!pinned.selects_all());
        assert!(pinned.matches(&labels(&[("controller-uid", "u1")])));
        assert!(!pinned.matches(&labels(&[("controller-uid", "u2")])));
    }
}
