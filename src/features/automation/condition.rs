//! Conditions for automation rules.
//!
//! A rule's conditions form a tree of `all`/`any` groups whose leaves compare
//! one record field against a value. Evaluation is three-valued: comparing a
//! null field yields [`Truth::Unknown`], and a rule only matches when the
//! whole tree evaluates to [`Truth::True`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rule::RuleContext;
use crate::crm::normalize_field;
use crate::error::CrmError;

/// Deepest group nesting accepted by [`ConditionGroup::validate`].
pub const MAX_DEPTH: usize = 8;

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Result of evaluating a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    #[must_use]
    pub const fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }

    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    /// Negation. Unknown stays unknown.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }
}

/// How the children of a group are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every child must be true (AND)
    #[default]
    All,
    /// At least one child must be true (OR)
    Any,
}

/// A group of condition nodes.
///
/// Unknown keys are rejected so a malformed leaf cannot fall back to an
/// empty group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionGroup {
    #[serde(rename = "match", default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub rules: Vec<ConditionNode>,
}

/// Either a leaf comparison or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Leaf(Condition),
    Group(ConditionGroup),
}

impl ConditionGroup {
    /// An `all` group.
    #[must_use]
    pub fn all(rules: Vec<ConditionNode>) -> Self {
        Self {
            match_mode: MatchMode::All,
            rules,
        }
    }

    /// An `any` group.
    #[must_use]
    pub fn any(rules: Vec<ConditionNode>) -> Self {
        Self {
            match_mode: MatchMode::Any,
            rules,
        }
    }

    /// Append a child node.
    #[must_use]
    pub fn with(mut self, node: impl Into<ConditionNode>) -> Self {
        self.rules.push(node.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the group, short-circuiting on the first deciding child.
    ///
    /// An empty group is true regardless of its mode.
    #[must_use]
    pub fn evaluate(&self, context: &RuleContext) -> Truth {
        if self.rules.is_empty() {
            return Truth::True;
        }

        let mut unknown = false;
        for node in &self.rules {
            match (self.match_mode, node.evaluate(context)) {
                (MatchMode::All, Truth::False) => return Truth::False,
                (MatchMode::Any, Truth::True) => return Truth::True,
                (_, Truth::Unknown) => unknown = true,
                _ => {}
            }
        }

        if unknown {
            Truth::Unknown
        } else {
            match self.match_mode {
                MatchMode::All => Truth::True,
                MatchMode::Any => Truth::False,
            }
        }
    }

    /// True only when the tree evaluates to [`Truth::True`].
    #[must_use]
    pub fn matches(&self, context: &RuleContext) -> bool {
        self.evaluate(context).is_true()
    }

    /// Check the tree for structural problems.
    ///
    /// # Errors
    ///
    /// Returns a validation error for groups nested deeper than
    /// [`MAX_DEPTH`], leaves without a field, or comparisons missing an
    /// operand.
    pub fn validate(&self) -> Result<(), CrmError> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<(), CrmError> {
        if depth > MAX_DEPTH {
            return Err(CrmError::Validation(format!(
                "Conditions are nested deeper than {MAX_DEPTH} levels"
            )));
        }
        for node in &self.rules {
            match node {
                ConditionNode::Leaf(condition) => condition.validate()?,
                ConditionNode::Group(group) => group.validate_at(depth + 1)?,
            }
        }
        Ok(())
    }

    /// Number of leaf comparisons in the tree.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.rules
            .iter()
            .map(|node| match node {
                ConditionNode::Leaf(_) => 1,
                ConditionNode::Group(group) => group.leaf_count(),
            })
            .sum()
    }
}

impl ConditionNode {
    #[must_use]
    pub fn evaluate(&self, context: &RuleContext) -> Truth {
        match self {
            Self::Leaf(condition) => condition.evaluate(context),
            Self::Group(group) => group.evaluate(context),
        }
    }
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        Self::Leaf(condition)
    }
}

impl From<ConditionGroup> for ConditionNode {
    fn from(group: ConditionGroup) -> Self {
        Self::Group(group)
    }
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// Field path (`status`, `data.email`, `email`, ...)
    pub field: String,
    /// Comparison operator
    pub operator: ConditionOperator,
    /// Value to compare against
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl Condition {
    /// Create a new condition.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    #[must_use]
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Contains, value)
    }

    #[must_use]
    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, value)
    }

    #[must_use]
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, ConditionOperator::IsNull, Value::Null)
    }

    #[must_use]
    pub fn changed(field: impl Into<String>) -> Self {
        Self::new(field, ConditionOperator::Changed, Value::Null)
    }

    /// Evaluate the condition against a context.
    ///
    /// String operands may use the same `{placeholder}` syntax as action
    /// templates, e.g. `{today}`.
    #[must_use]
    pub fn evaluate(&self, context: &RuleContext) -> Truth {
        let field = normalize_field(&self.field);

        if self.operator == ConditionOperator::Changed {
            let changed = context.changed_fields.iter().any(|f| {
                let f = normalize_field(f);
                f == field || field.starts_with(&format!("{f}."))
            });
            return Truth::from_bool(changed);
        }

        let actual = context.record.field(&field);
        let operand = match &self.value {
            Value::String(s) if s.contains('{') => Value::String(context.substitute(s)),
            other => other.clone(),
        };
        self.operator.apply(&actual, &operand)
    }

    /// Check the leaf for structural problems.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty field or a missing operand.
    pub fn validate(&self) -> Result<(), CrmError> {
        if self.field.trim().is_empty() {
            return Err(CrmError::Validation("Condition field is empty".to_string()));
        }
        if self.operator.requires_value() && self.value.is_null() {
            return Err(CrmError::Validation(format!(
                "Condition on {} needs a value for {}",
                self.field,
                self.operator.as_str()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operator.requires_value() {
            write!(f, "{} {} {}", self.field, self.operator.as_str(), self.value)
        } else {
            write!(f, "{} {}", self.field, self.operator.as_str())
        }
    }
}

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    /// Substring for strings, membership for lists
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    /// Field value is one of the listed values
    In,
    NotIn,
    IsNull,
    IsNotNull,
    /// Null, blank string, empty list or empty object
    IsEmpty,
    IsNotEmpty,
    /// Field is in the event's changed set
    Changed,
    /// Regex match
    Matches,
}

impl ConditionOperator {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::LessThan => "less_than",
            Self::LessOrEqual => "less_or_equal",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::Changed => "changed",
            Self::Matches => "matches",
        }
    }

    /// Whether the operator compares against an operand.
    #[must_use]
    pub const fn requires_value(&self) -> bool {
        !matches!(
            self,
            Self::IsNull | Self::IsNotNull | Self::IsEmpty | Self::IsNotEmpty | Self::Changed
        )
    }

    /// Apply the operator to a resolved field value.
    ///
    /// `Changed` needs the event context and is handled by
    /// [`Condition::evaluate`]; here it is always false.
    #[must_use]
    pub fn apply(&self, actual: &Value, operand: &Value) -> Truth {
        match self {
            Self::IsNull => return Truth::from_bool(actual.is_null()),
            Self::IsNotNull => return Truth::from_bool(!actual.is_null()),
            Self::IsEmpty => return Truth::from_bool(is_empty(actual)),
            Self::IsNotEmpty => return Truth::from_bool(!is_empty(actual)),
            Self::Changed => return Truth::False,
            _ => {}
        }

        if actual.is_null() || operand.is_null() {
            return Truth::Unknown;
        }

        match self {
            Self::Equals => Truth::from_bool(loosely_equal(actual, operand)),
            Self::NotEquals => Truth::from_bool(!loosely_equal(actual, operand)),
            Self::Contains => Truth::from_bool(contains(actual, operand)),
            Self::NotContains => Truth::from_bool(!contains(actual, operand)),
            Self::StartsWith => text_pair(actual, operand)
                .map_or(Truth::False, |(a, b)| Truth::from_bool(a.starts_with(&b))),
            Self::EndsWith => text_pair(actual, operand)
                .map_or(Truth::False, |(a, b)| Truth::from_bool(a.ends_with(&b))),
            Self::GreaterThan => ordering_is(actual, operand, |o| o == Ordering::Greater),
            Self::GreaterOrEqual => ordering_is(actual, operand, |o| o != Ordering::Less),
            Self::LessThan => ordering_is(actual, operand, |o| o == Ordering::Less),
            Self::LessOrEqual => ordering_is(actual, operand, |o| o != Ordering::Greater),
            Self::In => Truth::from_bool(is_in(actual, operand)),
            Self::NotIn => Truth::from_bool(!is_in(actual, operand)),
            Self::Matches => match (scalar_text(actual), operand.as_str()) {
                (Some(text), Some(pattern)) => Truth::from_bool(regex_matches(pattern, &text)),
                _ => Truth::False,
            },
            Self::IsNull | Self::IsNotNull | Self::IsEmpty | Self::IsNotEmpty | Self::Changed => {
                Truth::False
            }
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Numbers, and strings that parse as numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_pair(actual: &Value, operand: &Value) -> Option<(String, String)> {
    Some((
        scalar_text(actual)?.to_lowercase(),
        scalar_text(operand)?.to_lowercase(),
    ))
}

/// Equality with numeric coercion and case-insensitive strings.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loosely_equal(x, y))
        }
        (Value::Object(_), _) | (_, Value::Object(_)) | (Value::Array(_), _) | (_, Value::Array(_)) => {
            a == b
        }
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
        _ => match (scalar_text(a), scalar_text(b)) {
            (Some(x), Some(y)) => x.to_lowercase() == y.to_lowercase(),
            _ => false,
        },
    }
}

fn contains(actual: &Value, operand: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, operand)),
        _ => text_pair(actual, operand).is_some_and(|(a, b)| a.contains(&b)),
    }
}

fn is_in(actual: &Value, operand: &Value) -> bool {
    let candidates: &[Value] = match operand {
        Value::Array(items) => items,
        single => std::slice::from_ref(single),
    };
    match actual {
        Value::Array(items) => items
            .iter()
            .any(|item| candidates.iter().any(|c| loosely_equal(item, c))),
        _ => candidates.iter().any(|c| loosely_equal(actual, c)),
    }
}

/// Numeric ordering when both sides are numeric, otherwise lexicographic
/// ordering between strings. Anything else is incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}

fn ordering_is(a: &Value, b: &Value, accept: impl Fn(Ordering) -> bool) -> Truth {
    compare(a, b).map_or(Truth::False, |o| Truth::from_bool(accept(o)))
}

fn regex_matches(pattern: &str, text: &str) -> bool {
    let compile = || match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid regex in condition");
            None
        }
    };

    match REGEX_CACHE.lock() {
        Ok(mut cache) => cache
            .entry(pattern.to_string())
            .or_insert_with(compile)
            .as_ref()
            .is_some_and(|re| re.is_match(text)),
        Err(_) => compile().is_some_and(|re| re.is_match(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::Record;
    use crate::features::automation::rule::RecordEvent;
    use serde_json::json;

    fn lead() -> Record {
        Record::new("acme", "lead")
            .with_status("New")
            .with_owner("agent-1")
            .with_tags(vec!["vip".to_string(), "medicare".to_string()])
            .with_data(json!({
                "email": "ann@example.com",
                "age": "67",
                "premium": 120.5,
                "address": { "state": "FL" },
                "notes": ""
            }))
    }

    fn ctx() -> RuleContext {
        RuleContext::new(lead(), RecordEvent::Created)
    }

    #[test]
    fn test_equals_is_case_insensitive() {
        let ctx = ctx();
        assert_eq!(Condition::equals("status", "new").evaluate(&ctx), Truth::True);
        assert_eq!(Condition::equals("status", "won").evaluate(&ctx), Truth::False);
        assert_eq!(
            Condition::equals("data.address.state", "fl").evaluate(&ctx),
            Truth::True
        );
    }

    #[test]
    fn test_numeric_coercion() {
        let ctx = ctx();
        assert!(Condition::greater_than("age", 64).evaluate(&ctx).is_true());
        assert!(Condition::greater_than("age", "9").evaluate(&ctx).is_true());
        assert!(Condition::equals("age", 67).evaluate(&ctx).is_true());
        assert!(Condition::new("premium", ConditionOperator::LessOrEqual, 120.5)
            .evaluate(&ctx)
            .is_true());
    }

    #[test]
    fn test_strings_compare_lexicographically() {
        let ctx = ctx();
        let cond = Condition::new("created_at", ConditionOperator::GreaterThan, "2000-01-01");
        assert!(cond.evaluate(&ctx).is_true());
    }

    #[test]
    fn test_null_fields_are_unknown() {
        let ctx = ctx();
        assert_eq!(Condition::equals("stage", "won").evaluate(&ctx), Truth::Unknown);
        assert_eq!(
            Condition::new("missing", ConditionOperator::NotEquals, "x").evaluate(&ctx),
            Truth::Unknown
        );
        assert_eq!(Condition::is_null("stage").evaluate(&ctx), Truth::True);
        assert_eq!(Condition::is_null("missing").evaluate(&ctx), Truth::True);
        assert_eq!(
            Condition::new("stage", ConditionOperator::IsEmpty, Value::Null).evaluate(&ctx),
            Truth::True
        );
    }

    #[test]
    fn test_contains_list_and_string() {
        let ctx = ctx();
        assert!(Condition::contains("tags", "VIP").evaluate(&ctx).is_true());
        assert!(!Condition::contains("tags", "lapsed").evaluate(&ctx).is_true());
        assert!(Condition::contains("email", "@EXAMPLE").evaluate(&ctx).is_true());
        assert!(Condition::new("email", ConditionOperator::EndsWith, ".com")
            .evaluate(&ctx)
            .is_true());
    }

    #[test]
    fn test_in_and_not_in() {
        let ctx = ctx();
        let states = json!(["FL", "GA"]);
        assert!(Condition::new("address.state", ConditionOperator::In, states.clone())
            .evaluate(&ctx)
            .is_true());
        assert_eq!(
            Condition::new("address.state", ConditionOperator::NotIn, states).evaluate(&ctx),
            Truth::False
        );
        assert!(Condition::new("tags", ConditionOperator::In, json!(["medicare"]))
            .evaluate(&ctx)
            .is_true());
    }

    #[test]
    fn test_is_empty() {
        let ctx = ctx();
        assert!(Condition::new("notes", ConditionOperator::IsEmpty, Value::Null)
            .evaluate(&ctx)
            .is_true());
        assert!(Condition::new("tags", ConditionOperator::IsNotEmpty, Value::Null)
            .evaluate(&ctx)
            .is_true());
    }

    #[test]
    fn test_matches_and_invalid_regex() {
        let ctx = ctx();
        assert!(Condition::new("email", ConditionOperator::Matches, r"^[a-z]+@")
            .evaluate(&ctx)
            .is_true());
        assert_eq!(
            Condition::new("email", ConditionOperator::Matches, "([unclosed").evaluate(&ctx),
            Truth::False
        );
    }

    #[test]
    fn test_changed() {
        let ctx = ctx().with_changed_fields(vec!["status".to_string(), "data.address".to_string()]);
        assert!(Condition::changed("status").evaluate(&ctx).is_true());
        assert!(Condition::changed("address.state").evaluate(&ctx).is_true());
        assert!(!Condition::changed("owner_id").evaluate(&ctx).is_true());
    }

    #[test]
    fn test_group_three_valued_logic() {
        let ctx = ctx();
        let t = Condition::equals("status", "new");
        let f = Condition::equals("status", "won");
        let u = Condition::equals("stage", "won");

        let all = ConditionGroup::all(vec![t.clone().into(), u.clone().into()]);
        assert_eq!(all.evaluate(&ctx), Truth::Unknown);
        assert!(!all.matches(&ctx));

        let all = ConditionGroup::all(vec![u.clone().into(), f.clone().into()]);
        assert_eq!(all.evaluate(&ctx), Truth::False);

        let any = ConditionGroup::any(vec![u.clone().into(), t.into()]);
        assert_eq!(any.evaluate(&ctx), Truth::True);

        let any = ConditionGroup::any(vec![u.into(), f.into()]);
        assert_eq!(any.evaluate(&ctx), Truth::Unknown);
    }

    #[test]
    fn test_empty_group_matches() {
        let ctx = ctx();
        assert!(ConditionGroup::all(Vec::new()).matches(&ctx));
        assert!(ConditionGroup::any(Vec::new()).matches(&ctx));
    }

    #[test]
    fn test_nested_groups() {
        let ctx = ctx();
        let tree = ConditionGroup::all(vec![Condition::equals("entity_type", "lead").into()]).with(
            ConditionGroup::any(vec![
                Condition::equals("address.state", "TX").into(),
                Condition::contains("tags", "vip").into(),
            ]),
        );
        assert!(tree.matches(&ctx));
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn test_deserialize_tree() {
        let tree: ConditionGroup = serde_json::from_value(json!({
            "match": "any",
            "rules": [
                { "field": "status", "operator": "equals", "value": "new" },
                { "match": "all", "rules": [
                    { "field": "email", "operator": "is_not_null" }
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(tree.match_mode, MatchMode::Any);
        assert!(matches!(tree.rules[0], ConditionNode::Leaf(_)));
        assert!(matches!(tree.rules[1], ConditionNode::Group(_)));
        assert!(tree.matches(&ctx()));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let result = serde_json::from_value::<ConditionGroup>(json!({
            "rules": [{ "field": "status", "operator": "equal", "value": "won" }]
        }));
        assert!(result.is_err());

        let result = serde_json::from_value::<ConditionGroup>(json!({
            "match": "all",
            "rules": [{ "match": "any", "rules": [{ "field": "status", "op": "equals" }] }]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(serde_json::from_value::<Condition>(json!({
            "field": "status", "operator": "equals", "value": "new", "values": ["won"]
        }))
        .is_err());
        assert!(serde_json::from_value::<ConditionGroup>(json!({
            "mode": "any", "rules": []
        }))
        .is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ConditionGroup::all(vec![Condition::equals("status", "new").into()])
            .validate()
            .is_ok());
        assert!(ConditionGroup::all(vec![Condition::new(
            "status",
            ConditionOperator::Equals,
            Value::Null
        )
        .into()])
        .validate()
        .is_err());

        let mut deep = ConditionGroup::all(Vec::new());
        for _ in 0..MAX_DEPTH {
            deep = ConditionGroup::all(vec![deep.into()]);
        }
        assert!(deep.validate().is_err());
    }

    #[test]
    fn test_operand_templates() {
        let ctx = ctx();
        let cond = Condition::new("created_at", ConditionOperator::LessOrEqual, "{now}");
        assert!(cond.evaluate(&ctx).is_true());
    }
}
