//! Query vocabulary for the object store contract.
//!
//! Filters are plain data: the store decides how to execute them. The same
//! [`Filter`] type is carried (never evaluated by the cache) as profile
//! constraints and selector filters on role records.

use std::cmp::Ordering as CmpOrdering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Object classes the correlation cache queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Role,
    Application,
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectClass::Role => write!(f, "Bundle"),
            ObjectClass::Application => write!(f, "Application"),
        }
    }
}

/// Boolean filter over object properties (dotted paths allowed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Eq { property: String, value: Value },
    In { property: String, values: Vec<Value> },
    ContainsAll { property: String, values: Vec<Value> },
    IsNull { property: String },
    NotNull { property: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(property: &str, value: impl Into<Value>) -> Self {
        Filter::Eq {
            property: property.to_string(),
            value: value.into(),
        }
    }

    pub fn in_list(property: &str, values: Vec<Value>) -> Self {
        Filter::In {
            property: property.to_string(),
            values,
        }
    }

    pub fn contains_all(property: &str, values: Vec<Value>) -> Self {
        Filter::ContainsAll {
            property: property.to_string(),
            values,
        }
    }

    pub fn is_null(property: &str) -> Self {
        Filter::IsNull {
            property: property.to_string(),
        }
    }

    pub fn not_null(property: &str) -> Self {
        Filter::NotNull {
            property: property.to_string(),
        }
    }

    /// Evaluate against a JSON projection of an object.
    pub fn matches(&self, object: &Value) -> bool {
        match self {
            Filter::Eq { property, value } => match lookup(object, property) {
                Some(found) => found == value,
                None => value.is_null(),
            },
            Filter::In { property, values } => {
                lookup(object, property).is_some_and(|found| values.contains(found))
            }
            Filter::ContainsAll { property, values } => match lookup(object, property) {
                Some(Value::Array(items)) => values.iter().all(|v| items.contains(v)),
                Some(scalar) => values.iter().all(|v| v == scalar),
                None => values.is_empty(),
            },
            Filter::IsNull { property } => lookup(object, property).is_none(),
            Filter::NotNull { property } => lookup(object, property).is_some(),
            Filter::And(filters) => filters.iter().all(|f| f.matches(object)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(object)),
            Filter::Not(inner) => !inner.matches(object),
        }
    }
}

/// Resolve a dotted property path. JSON `null` counts as absent.
fn lookup<'a>(object: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = object;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    pub property: String,
    pub ascending: bool,
}

/// Filter + ordering + result limit, all filters ANDed.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Vec<Filter>,
    pub orderings: Vec<Ordering>,
    pub result_limit: Option<usize>,
}

/// One projected result row.
pub type Row = Vec<Value>;

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, property: &str, ascending: bool) -> Self {
        self.orderings.push(Ordering {
            property: property.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.result_limit = Some(limit);
        self
    }

    /// Run the query over JSON projections and return projected rows.
    pub fn execute(&self, objects: Vec<Value>, projection: &[&str]) -> Vec<Row> {
        let mut matched: Vec<Value> = objects
            .into_iter()
            .filter(|obj| self.filters.iter().all(|f| f.matches(obj)))
            .collect();

        if !self.orderings.is_empty() {
            matched.sort_by(|a, b| {
                for ordering in &self.orderings {
                    let ord = compare(
                        lookup(a, &ordering.property),
                        lookup(b, &ordering.property),
                    );
                    let ord = if ordering.ascending { ord } else { ord.reverse() };
                    if ord != CmpOrdering::Equal {
                        return ord;
                    }
                }
                CmpOrdering::Equal
            });
        }

        let limit = self.result_limit.unwrap_or(usize::MAX);
        matched
            .iter()
            .take(limit)
            .map(|obj| {
                projection
                    .iter()
                    .map(|p| lookup(obj, p).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }
}

/// Total order over optional JSON scalars: absent < bool < number < string.
fn compare(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
