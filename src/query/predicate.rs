// ============================================================================
// Predicates
// ============================================================================
//
// Tagged predicate tree evaluated against an entity's attribute accessor.
// Replaces format-string predicates: the tree is built with typed values
// and validated once, when a query is constructed.
//
// ============================================================================

use super::pattern::{eval_like, validate_like};
use crate::core::{Entity, ID_FIELD, Result, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Less => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Greater => ordering == Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches every entity.
    True,
    Equals(String, Value),
    NotEquals(String, Value),
    In(String, Vec<Value>),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    Like {
        field: String,
        pattern: String,
        case_sensitive: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::NotEquals(field.into(), value.into())
    }

    pub fn in_set<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self::Equals(ID_FIELD.to_string(), Value::Text(id.into()))
    }

    pub fn ids<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        Self::in_set(ID_FIELD, ids.into_iter().map(|id| Value::Text(id.into())))
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
            case_sensitive: true,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::True, other) | (other, Self::True) => other,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Rejects predicates that could only fail at evaluation time.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Like {
                pattern,
                case_sensitive,
                ..
            } => validate_like(pattern, *case_sensitive),
            Self::And(parts) | Self::Or(parts) => parts.iter().try_for_each(Predicate::validate),
            Self::Not(inner) => inner.validate(),
            _ => Ok(()),
        }
    }

    pub fn evaluate(&self, entity: &Entity) -> bool {
        match self {
            Self::True => true,
            Self::Equals(field, value) => entity.attribute(field) == *value,
            Self::NotEquals(field, value) => entity.attribute(field) != *value,
            Self::In(field, values) => {
                let actual = entity.attribute(field);
                values.iter().any(|value| *value == actual)
            }
            Self::Compare { field, op, value } => {
                let actual = entity.attribute(field);
                if actual.is_null() || value.is_null() {
                    return false;
                }
                actual
                    .compare(value)
                    .map(|ordering| op.accepts(ordering))
                    .unwrap_or(false)
            }
            Self::IsNull(field) => entity.attribute(field).is_null(),
            Self::Like {
                field,
                pattern,
                case_sensitive,
            } => match entity.attribute(field) {
                Value::Text(text) => eval_like(&text, pattern, *case_sensitive).unwrap_or(false),
                _ => false,
            },
            Self::And(parts) => parts.iter().all(|part| part.evaluate(entity)),
            Self::Or(parts) => parts.iter().any(|part| part.evaluate(entity)),
            Self::Not(inner) => !inner.evaluate(entity),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self::True
    }
}
