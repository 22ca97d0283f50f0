//! Predicates evaluated by Choice steps.
//!
//! Paths are JSON pointers into the working payload (`/classification/intent`).
//! A missing path or a value of the wrong type never matches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed predicate over the working payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// String at `path` equals `value`.
    StringEquals {
        /// JSON pointer.
        path: String,
        /// Expected value.
        value: String,
    },
    /// Number at `path` equals `value`.
    NumericEquals {
        /// JSON pointer.
        path: String,
        /// Expected value.
        value: f64,
    },
    /// Number at `path` is greater than `value`.
    NumericGreaterThan {
        /// JSON pointer.
        path: String,
        /// Bound.
        value: f64,
    },
    /// Number at `path` is at least `value`.
    NumericGreaterThanEquals {
        /// JSON pointer.
        path: String,
        /// Bound.
        value: f64,
    },
    /// Number at `path` is less than `value`.
    NumericLessThan {
        /// JSON pointer.
        path: String,
        /// Bound.
        value: f64,
    },
    /// Number at `path` is at most `value`.
    NumericLessThanEquals {
        /// JSON pointer.
        path: String,
        /// Bound.
        value: f64,
    },
    /// Boolean at `path` equals `value`.
    BooleanEquals {
        /// JSON pointer.
        path: String,
        /// Expected value.
        value: bool,
    },
    /// Something non-null exists at `path`.
    IsPresent {
        /// JSON pointer.
        path: String,
    },
    /// Every nested condition matches.
    And {
        /// Conditions.
        all: Vec<Condition>,
    },
    /// At least one nested condition matches.
    Or {
        /// Conditions.
        any: Vec<Condition>,
    },
    /// The nested condition does not match.
    Not {
        /// Condition.
        condition: Box<Condition>,
    },
}

impl Condition {
    /// `StringEquals` shorthand.
    #[must_use]
    pub fn string_equals(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self::StringEquals {
            path: path.into(),
            value: value.into(),
        }
    }

    /// `NumericGreaterThanEquals` shorthand.
    #[must_use]
    pub fn numeric_at_least(path: impl Into<String>, value: f64) -> Self {
        Self::NumericGreaterThanEquals {
            path: path.into(),
            value,
        }
    }

    /// `IsPresent` shorthand.
    #[must_use]
    pub fn is_present(path: impl Into<String>) -> Self {
        Self::IsPresent { path: path.into() }
    }

    /// `And` shorthand.
    #[must_use]
    pub fn and(all: Vec<Self>) -> Self {
        Self::And { all }
    }

    /// Evaluates the condition against a payload.
    #[must_use]
    pub fn evaluate(&self, payload: &Value) -> bool {
        match self {
            Self::StringEquals { path, value } => {
                lookup(payload, path).and_then(Value::as_str) == Some(value.as_str())
            }
            Self::NumericEquals { path, value } => {
                number(payload, path).is_some_and(|n| (n - value).abs() < f64::EPSILON)
            }
            Self::NumericGreaterThan { path, value } => number(payload, path).is_some_and(|n| n > *value),
            Self::NumericGreaterThanEquals { path, value } => {
                number(payload, path).is_some_and(|n| n >= *value)
            }
            Self::NumericLessThan { path, value } => number(payload, path).is_some_and(|n| n < *value),
            Self::NumericLessThanEquals { path, value } => {
                number(payload, path).is_some_and(|n| n <= *value)
            }
            Self::BooleanEquals { path, value } => {
                lookup(payload, path).and_then(Value::as_bool) == Some(*value)
            }
            Self::IsPresent { path } => lookup(payload, path).is_some_and(|v| !v.is_null()),
            Self::And { all } => all.iter().all(|c| c.evaluate(payload)),
            Self::Or { any } => any.iter().any(|c| c.evaluate(payload)),
            Self::Not { condition } => !condition.evaluate(payload),
        }
    }

    /// Checks paths are JSON pointers and combinators are non-empty.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::StringEquals { path, .. }
            | Self::NumericEquals { path, .. }
            | Self::NumericGreaterThan { path, .. }
            | Self::NumericGreaterThanEquals { path, .. }
            | Self::NumericLessThan { path, .. }
            | Self::NumericLessThanEquals { path, .. }
            | Self::BooleanEquals { path, .. }
            | Self::IsPresent { path } => {
                if path.is_empty() || path.starts_with('/') {
                    Ok(())
                } else {
                    Err(format!("path '{path}' is not a JSON pointer"))
                }
            }
            Self::And { all: list } | Self::Or { any: list } => {
                if list.is_empty() {
                    return Err("combinator has no conditions".to_string());
                }
                list.iter().try_for_each(Self::validate)
            }
            Self::Not { condition } => condition.validate(),
        }
    }
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    payload.pointer(path)
}

fn number(payload: &Value, path: &str) -> Option<f64> {
    lookup(payload, path).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "classification": {"intent": "music", "confidence": 0.72, "slots": {}},
            "audio_ref": null,
            "urgent": true
        })
    }

    #[test]
    fn test_string_equals() {
        assert!(Condition::string_equals("/classification/intent", "music").evaluate(&payload()));
        assert!(!Condition::string_equals("/classification/intent", "weather").evaluate(&payload()));
        assert!(!Condition::string_equals("/missing", "music").evaluate(&payload()));
    }

    #[test]
    fn test_numeric_comparisons() {
        let p = payload();
        assert!(Condition::numeric_at_least("/classification/confidence", 0.4).evaluate(&p));
        assert!(Condition::numeric_at_least("/classification/confidence", 0.72).evaluate(&p));
        assert!(!Condition::NumericGreaterThan { path: "/classification/confidence".into(), value: 0.72 }.evaluate(&p));
        assert!(Condition::NumericLessThan { path: "/classification/confidence".into(), value: 1.0 }.evaluate(&p));
        // Type mismatch never matches.
        assert!(!Condition::numeric_at_least("/classification/intent", 0.0).evaluate(&p));
    }

    #[test]
    fn test_is_present_treats_null_as_absent() {
        assert!(!Condition::is_present("/audio_ref").evaluate(&payload()));
        assert!(Condition::is_present("/urgent").evaluate(&payload()));
    }

    #[test]
    fn test_combinators() {
        let p = payload();
        let music_confident = Condition::and(vec![
            Condition::string_equals("/classification/intent", "music"),
            Condition::numeric_at_least("/classification/confidence", 0.4),
        ]);
        assert!(music_confident.evaluate(&p));

        let not_urgent = Condition::Not {
            condition: Box::new(Condition::BooleanEquals { path: "/urgent".into(), value: true }),
        };
        assert!(!not_urgent.evaluate(&p));

        let either = Condition::Or {
            any: vec![Condition::is_present("/nope"), Condition::is_present("/urgent")],
        };
        assert!(either.evaluate(&p));
    }

    #[test]
    fn test_validate() {
        assert!(Condition::is_present("/a").validate().is_ok());
        assert!(Condition::is_present("a").validate().is_err());
        assert!(Condition::And { all: vec![] }.validate().is_err());
    }

    #[test]
    fn test_deserialize_tagged() {
        let condition: Condition = serde_json::from_value(json!({
            "op": "numeric_greater_than_equals",
            "path": "/classification/confidence",
            "value": 0.4
        }))
        .unwrap();
        assert_eq!(condition, Condition::numeric_at_least("/classification/confidence", 0.4));
    }
}
