//! Filters, find options, and update intents — one semantics for every
//! backend.
//!
//! Filters are conjunctions of conditions on dotted JSON paths. Updates are
//! merge intents with `set`/`inc`/`push` sections. The pure functions
//! [`matches`] and [`apply_update`] define what those mean; the in-memory
//! backend evaluates them directly and the Postgres backend reuses
//! [`apply_update`] inside its read-modify-write transactions, so the two
//! backends cannot drift apart.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use driftwood_core::DocumentId;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use crate::error::StoreError;

/// Comparison operator for a single filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Membership in a set of values (the condition value is an array).
    Within,
    /// Field presence (the condition value is a boolean).
    Exists,
}

/// One condition on a dotted JSON path.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub comparator: Comparator,
    pub value: Value,
}

/// A conjunction of conditions. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// The empty filter (matches everything).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Filter on the document identifier.
    #[must_use]
    pub fn by_id(id: DocumentId) -> Self {
        Self::new().eq("id", id.to_string())
    }

    #[must_use]
    pub fn eq(self, path: &str, value: impl Into<Value>) -> Self {
        self.push_cond(path, Comparator::Eq, value.into())
    }

    #[must_use]
    pub fn ne(self, path: &str, value: impl Into<Value>) -> Self {
        self.push_cond(path, Comparator::Ne, value.into())
    }

    #[must_use]
    pub fn gt(self, path: &str, value: impl Into<Value>) -> Self {
        self.push_cond(path, Comparator::Gt, value.into())
    }

    #[must_use]
    pub fn gte(self, path: &str, value: impl Into<Value>) -> Self {
        self.push_cond(path, Comparator::Gte, value.into())
    }

    #[must_use]
    pub fn lt(self, path: &str, value: impl Into<Value>) -> Self {
        self.push_cond(path, Comparator::Lt, value.into())
    }

    #[must_use]
    pub fn lte(self, path: &str, value: impl Into<Value>) -> Self {
        self.push_cond(path, Comparator::Lte, value.into())
    }

    /// Match documents whose field equals any of the given values.
    #[must_use]
    pub fn within(self, path: &str, values: Vec<Value>) -> Self {
        self.push_cond(path, Comparator::Within, Value::Array(values))
    }

    /// Match documents by field presence.
    #[must_use]
    pub fn exists(self, path: &str, present: bool) -> Self {
        self.push_cond(path, Comparator::Exists, Value::Bool(present))
    }

    fn push_cond(mut self, path: &str, comparator: Comparator, value: Value) -> Self {
        self.conditions.push(Condition {
            path: path.to_owned(),
            comparator,
            value,
        });
        self
    }

    /// The conditions making up this filter.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// True when this filter matches every document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Options shaping a `find` result: sort, skip, limit, projection.
///
/// Absent `limit` means unbounded. A projection keeps the listed paths plus
/// the document identifier.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sort: Vec::new(),
            skip: None,
            limit: None,
            projection: None,
        }
    }

    #[must_use]
    pub fn sort_by(mut self, path: &str, order: SortOrder) -> Self {
        self.sort.push((path.to_owned(), order));
        self
    }

    #[must_use]
    pub const fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    #[must_use]
    pub const fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    #[must_use]
    pub fn project(mut self, paths: &[&str]) -> Self {
        self.projection = Some(paths.iter().map(|p| (*p).to_owned()).collect());
        self
    }
}

/// A merge-style update intent.
///
/// `set` overwrites fields, `inc` adjusts numeric fields by a signed delta,
/// `push` appends to array fields (creating the array if absent). The
/// repository adds a forced `set updatedAt` to every update it sends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: BTreeMap<String, Value>,
    pub inc: BTreeMap<String, Value>,
    pub push: BTreeMap<String, Value>,
}

impl Update {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            set: BTreeMap::new(),
            inc: BTreeMap::new(),
            push: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set.insert(path.to_owned(), value.into());
        self
    }

    /// Increment a numeric field. Integer fields stay integers; decimal
    /// fields (stored as strings) stay decimal strings.
    #[must_use]
    pub fn inc(mut self, path: &str, delta: impl Into<Value>) -> Self {
        self.inc.insert(path.to_owned(), delta.into());
        self
    }

    /// Append a value to an array field.
    #[must_use]
    pub fn push(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.push.insert(path.to_owned(), value.into());
        self
    }

    /// True when the update carries no intent at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty() && self.push.is_empty()
    }
}

/// Options for `update_one`/`update_many`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Insert a document synthesized from the update's `set` section when
    /// nothing matches.
    pub upsert: bool,
}

/// Outcome of a set-style update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<DocumentId>,
}

/// A secondary index over one JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub path: String,
    pub unique: bool,
}

impl IndexSpec {
    #[must_use]
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            unique: false,
        }
    }

    #[must_use]
    pub fn unique(name: &str, path: &str) -> Self {
        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            unique: true,
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Resolve a dotted path inside a JSON body.
#[must_use]
pub fn path_get<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Set a dotted path inside a JSON body, creating intermediate objects.
pub fn path_set(body: &mut Value, path: &str, value: Value) {
    let mut current = body;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            if let Value::Object(map) = current {
                map.insert(segment.to_owned(), value);
            }
            return;
        }
        if !current.get(segment).is_some_and(Value::is_object) {
            if let Value::Object(map) = current {
                map.insert(segment.to_owned(), Value::Object(serde_json::Map::new()));
            } else {
                return;
            }
        }
        // Safe: just inserted an object if it was absent.
        match current.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

/// Interpret a JSON value as an exact decimal, accepting both numbers and
/// numeric strings (how `Money` serializes).
#[must_use]
pub fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(da), Some(db)) = (as_decimal(a), as_decimal(b)) {
        return da == db;
    }
    a == b
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(da), Some(db)) = (as_decimal(a), as_decimal(b)) {
        return Some(da.cmp(&db));
    }
    match (a, b) {
        (Value::String(sa), Value::String(sb)) => Some(sa.cmp(sb)),
        (Value::Bool(ba), Value::Bool(bb)) => Some(ba.cmp(bb)),
        _ => None,
    }
}

fn condition_matches(body: &Value, cond: &Condition) -> bool {
    let field = path_get(body, &cond.path);
    match cond.comparator {
        Comparator::Eq => field.is_some_and(|v| values_equal(v, &cond.value))
            || (field.is_none() && cond.value.is_null()),
        Comparator::Ne => !(field.is_some_and(|v| values_equal(v, &cond.value))
            || (field.is_none() && cond.value.is_null())),
        Comparator::Gt => field
            .and_then(|v| compare(v, &cond.value))
            .is_some_and(Ordering::is_gt),
        Comparator::Gte => field
            .and_then(|v| compare(v, &cond.value))
            .is_some_and(Ordering::is_ge),
        Comparator::Lt => field
            .and_then(|v| compare(v, &cond.value))
            .is_some_and(Ordering::is_lt),
        Comparator::Lte => field
            .and_then(|v| compare(v, &cond.value))
            .is_some_and(Ordering::is_le),
        Comparator::Within => match (&cond.value, field) {
            (Value::Array(options), Some(v)) => options.iter().any(|o| values_equal(o, v)),
            _ => false,
        },
        Comparator::Exists => cond.value.as_bool().unwrap_or(true) == field.is_some(),
    }
}

/// Whether a document body satisfies every condition of a filter.
#[must_use]
pub fn matches(body: &Value, filter: &Filter) -> bool {
    filter.conditions().iter().all(|c| condition_matches(body, c))
}

/// Apply an update intent to a document body in place.
///
/// # Errors
///
/// Returns [`StoreError::Corruption`] when an `inc` targets a non-numeric
/// field or a `push` targets a non-array field.
pub fn apply_update(body: &mut Value, update: &Update) -> Result<(), StoreError> {
    for (path, value) in &update.set {
        path_set(body, path, value.clone());
    }

    for (path, delta) in &update.inc {
        let current = path_get(body, path).cloned();
        if current.as_ref().is_some_and(|v| !v.is_null()) && current.as_ref().and_then(as_decimal).is_none() {
            return Err(StoreError::Corruption(format!(
                "cannot increment non-numeric field {path}"
            )));
        }
        let base = current.as_ref().and_then(as_decimal).unwrap_or(Decimal::ZERO);
        let step = as_decimal(delta).ok_or_else(|| {
            StoreError::Corruption(format!("non-numeric increment for field {path}"))
        })?;
        let sum = base + step;

        // Preserve the field's representation: integer fields stored as JSON
        // numbers stay numbers, decimal fields stored as strings stay strings.
        // The delta's representation decides for absent fields.
        let keep_number = match &current {
            Some(Value::Number(_)) => true,
            Some(_) => false,
            None => delta.is_number(),
        };
        let next = if keep_number && sum.fract().is_zero() {
            sum.to_i64().map_or_else(
                || Value::String(sum.to_string()),
                |n| Value::Number(n.into()),
            )
        } else {
            Value::String(sum.to_string())
        };
        path_set(body, path, next);
    }

    for (path, value) in &update.push {
        match path_get(body, path) {
            None | Some(Value::Null) => {
                path_set(body, path, Value::Array(vec![value.clone()]));
            }
            Some(Value::Array(_)) => {
                let mut items = path_get(body, path)
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                items.push(value.clone());
                path_set(body, path, Value::Array(items));
            }
            Some(_) => {
                return Err(StoreError::Corruption(format!(
                    "cannot push to non-array field {path}"
                )));
            }
        }
    }

    Ok(())
}

/// Project a body down to the given paths (plus `id`).
#[must_use]
pub fn apply_projection(body: &Value, paths: &[String]) -> Value {
    let mut out = Value::Object(serde_json::Map::new());
    if let Some(id) = path_get(body, "id") {
        path_set(&mut out, "id", id.clone());
    }
    for path in paths {
        if let Some(v) = path_get(body, path) {
            path_set(&mut out, path, v.clone());
        }
    }
    out
}

/// Order bodies by the given sort keys; ties keep their relative order.
pub fn sort_bodies(bodies: &mut [crate::document::RawDocument], sort: &[(String, SortOrder)]) {
    if sort.is_empty() {
        return;
    }
    bodies.sort_by(|a, b| {
        for (path, order) in sort {
            let va = path_get(&a.body, path);
            let vb = path_get(&b.body, path);
            let ord = match (va, vb) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ord = match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(matches(&json!({"a": 1}), &Filter::new()));
        assert!(matches(&json!({}), &Filter::new()));
    }

    #[test]
    fn test_eq_and_ne() {
        let body = json!({"status": "pending", "stock": 5});
        assert!(matches(&body, &Filter::new().eq("status", "pending")));
        assert!(!matches(&body, &Filter::new().eq("status", "shipped")));
        assert!(matches(&body, &Filter::new().ne("status", "shipped")));
        assert!(matches(&body, &Filter::new().ne("missing", "x")));
    }

    #[test]
    fn test_ordering_on_numbers_and_decimal_strings() {
        let body = json!({"stock": 5, "balance": "400.00"});
        assert!(matches(&body, &Filter::new().gte("stock", 5)));
        assert!(!matches(&body, &Filter::new().gt("stock", 5)));
        // Money serializes as a string; ordering still compares numerically.
        assert!(matches(&body, &Filter::new().gte("balance", "100")));
        assert!(matches(&body, &Filter::new().lt("balance", "400.01")));
        assert!(!matches(&body, &Filter::new().gt("balance", "400.00")));
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        let body = json!({"balance": "100.00"});
        assert!(matches(&body, &Filter::new().eq("balance", 100)));
        assert!(matches(&body, &Filter::new().eq("balance", "100")));
    }

    #[test]
    fn test_dotted_paths() {
        let body = json!({"cancellation": {"reason": "late"}});
        assert!(matches(
            &body,
            &Filter::new().eq("cancellation.reason", "late")
        ));
        assert!(!matches(&body, &Filter::new().eq("cancellation.other", "x")));
    }

    #[test]
    fn test_within_and_exists() {
        let body = json!({"status": "shipped"});
        assert!(matches(
            &body,
            &Filter::new().within("status", vec![json!("shipped"), json!("delivered")])
        ));
        assert!(!matches(
            &body,
            &Filter::new().within("status", vec![json!("pending")])
        ));
        assert!(matches(&body, &Filter::new().exists("status", true)));
        assert!(matches(&body, &Filter::new().exists("missing", false)));
    }

    #[test]
    fn test_missing_field_ordering_never_matches() {
        let body = json!({});
        assert!(!matches(&body, &Filter::new().gt("stock", 0)));
        assert!(!matches(&body, &Filter::new().lte("stock", 0)));
    }

    #[test]
    fn test_apply_set_and_dotted_set() {
        let mut body = json!({"status": "pending"});
        apply_update(
            &mut body,
            &Update::new()
                .set("status", "cancelled")
                .set("cancellation.reason", "customer request"),
        )
        .unwrap();
        assert_eq!(body["status"], "cancelled");
        assert_eq!(body["cancellation"]["reason"], "customer request");
    }

    #[test]
    fn test_apply_inc_integer_stays_integer() {
        let mut body = json!({"stock": 5});
        apply_update(&mut body, &Update::new().inc("stock", -2)).unwrap();
        assert_eq!(body["stock"], json!(3));
    }

    #[test]
    fn test_apply_inc_decimal_string_stays_string() {
        let mut body = json!({"balance": "500.00"});
        apply_update(&mut body, &Update::new().inc("balance", "-100")).unwrap();
        assert_eq!(body["balance"], json!("400.00"));
    }

    #[test]
    fn test_apply_inc_missing_field_starts_at_zero() {
        let mut body = json!({});
        apply_update(&mut body, &Update::new().inc("totalOrders", 1)).unwrap();
        assert_eq!(body["totalOrders"], json!(1));
    }

    #[test]
    fn test_apply_inc_non_numeric_fails() {
        let mut body = json!({"name": "ada"});
        assert!(apply_update(&mut body, &Update::new().inc("name", 1)).is_err());
    }

    #[test]
    fn test_apply_push() {
        let mut body = json!({"orderHistory": ["a"]});
        apply_update(&mut body, &Update::new().push("orderHistory", "b")).unwrap();
        assert_eq!(body["orderHistory"], json!(["a", "b"]));

        let mut empty = json!({});
        apply_update(&mut empty, &Update::new().push("stockHistory", json!({"change": 1})))
            .unwrap();
        assert_eq!(empty["stockHistory"], json!([{"change": 1}]));
    }

    #[test]
    fn test_apply_push_non_array_fails() {
        let mut body = json!({"orderHistory": "oops"});
        assert!(apply_update(&mut body, &Update::new().push("orderHistory", "b")).is_err());
    }

    #[test]
    fn test_projection_keeps_id_and_paths() {
        let body = json!({"id": "x", "name": "ada", "balance": "10", "secret": true});
        let projected = apply_projection(&body, &["name".to_owned(), "balance".to_owned()]);
        assert_eq!(projected, json!({"id": "x", "name": "ada", "balance": "10"}));
    }
}
