//! Payload filters.
//!
//! A filter scopes a view to the subset of a collection it cares about
//! (messages of one conversation, unread notifications, bids on one task).
//! Filters are data rather than closures so the same value can be handed to
//! the remote bulk read and evaluated locally against change events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A predicate over a record payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Filter {
    /// Matches every record
    #[default]
    All,
    /// Field equals value
    Eq { field: String, value: Value },
    /// Field is absent or differs from value
    Neq { field: String, value: Value },
    /// Field equals one of the values
    In { field: String, values: Vec<Value> },
    /// Every inner filter matches
    And { filters: Vec<Filter> },
    /// At least one inner filter matches
    Or { filters: Vec<Filter> },
    /// Inner filter does not match
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Neq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    /// Combine with another filter, flattening nested conjunctions.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And { mut filters }, Filter::And { filters: more }) => {
                filters.extend(more);
                Filter::And { filters }
            }
            (Filter::And { mut filters }, f) => {
                filters.push(f);
                Filter::And { filters }
            }
            (a, b) => Filter::And {
                filters: vec![a, b],
            },
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not {
            filter: Box::new(self),
        }
    }

    /// Check whether this filter matches everything.
    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }

    /// Evaluate the filter against a payload.
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => payload.get(field) == Some(value),
            Filter::Neq { field, value } => payload.get(field) != Some(value),
            Filter::In { field, values } => payload
                .get(field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Filter::And { filters } => filters.iter().all(|f| f.matches(payload)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(payload)),
            Filter::Not { filter } => !filter.matches(payload),
        }
    }
}
