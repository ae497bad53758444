//! Pluggable query execution.
//!
//! The core does not parse or plan queries. A [`Matcher`] receives a
//! [`Snapshot`] and returns result rows; everything it reads goes through
//! the snapshot, so its results are consistent with the snapshot's bounds.

use crate::error::CoreResult;
use crate::snapshot::Snapshot;
use chronodb_codec::Value;

/// Executes queries of one shape against a snapshot.
pub trait Matcher {
    /// The query representation this matcher understands.
    type Query;

    /// Runs `query`, returning one row per match.
    ///
    /// # Errors
    ///
    /// Implementation-defined; snapshot read errors should be propagated.
    fn execute(&self, query: &Self::Query, snapshot: &Snapshot) -> CoreResult<Vec<Vec<Value>>>;
}

/// Conjunction of field equalities.
///
/// Rows are the entity id value followed by the requested fields, `Null`
/// where a field is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EqualityQuery {
    /// `(field, value)` pairs that must all hold.
    pub filters: Vec<(String, Value)>,
    /// Fields returned after the id.
    pub fields: Vec<String>,
}

impl EqualityQuery {
    /// Matches every visible entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `field == value`.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Adds a returned field.
    #[must_use]
    pub fn select(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }
}

/// Scans the snapshot's visible entities in id order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualityMatcher;

impl Matcher for EqualityMatcher {
    type Query = EqualityQuery;

    fn execute(&self, query: &EqualityQuery, snapshot: &Snapshot) -> CoreResult<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        for entity_id in snapshot.entities() {
            let Some(doc) = snapshot.entity(&entity_id)? else {
                continue;
            };
            if !query
                .filters
                .iter()
                .all(|(field, value)| doc.get(field) == Some(value))
            {
                continue;
            }
            let mut row = Vec::with_capacity(query.fields.len() + 1);
            row.push(entity_id.to_value());
            row.extend(
                query
                    .fields
                    .iter()
                    .map(|field| doc.get(field).cloned().unwrap_or(Value::Null)),
            );
            rows.push(row);
        }
        Ok(rows)
    }
}
