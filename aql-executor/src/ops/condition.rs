//! The index condition model: a disjunction of conjunctions of
//! per-attribute bounds, and its specialization against an input row.
//!
//! Plan nodes carry [`RangeSpec`]s whose bounds may be constant or
//! expressions over incoming registers. Before an index is driven, the
//! condition is specialized into fully-constant [`AttributeRange`]s:
//! variable bounds are evaluated against the current row, scalar results
//! intersect into the clause, array results expand the clause into one
//! equality clause per element (cartesian with the other variable bounds of
//! the same conjunction), contradictory clauses are dropped, and subsumed
//! clauses are deduplicated.

use std::cmp::Ordering;
use std::sync::Arc;

use aql_data::compare_json;
use aql_errors::AqlResult;
use aql_expression::{EvalContext, Expression};
use serde_json::Value as JsonValue;

/// A constant bound: a value and whether the bound itself is included.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundValue {
    /// The bound value.
    pub value: JsonValue,
    /// Whether the bound is part of the range.
    pub inclusive: bool,
}

impl BoundValue {
    /// An inclusive bound.
    pub fn inclusive(value: JsonValue) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    /// An exclusive bound.
    pub fn exclusive(value: JsonValue) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }
}

/// One attribute's bounds within a planned conjunction; bounds may be
/// constant, expressions, or both (the constant part intersects with the
/// evaluated expressions).
#[derive(Clone)]
pub struct RangeSpec {
    /// The attribute path this range constrains.
    pub attr: String,
    /// Constant lower bound, if any.
    pub low_const: Option<BoundValue>,
    /// Constant upper bound, if any.
    pub high_const: Option<BoundValue>,
    /// Variable lower bounds: expression and inclusivity.
    pub lows: Vec<(Arc<dyn Expression>, bool)>,
    /// Variable upper bounds: expression and inclusivity.
    pub highs: Vec<(Arc<dyn Expression>, bool)>,
}

impl RangeSpec {
    /// A constant equality `attr == value`.
    pub fn eq(attr: impl Into<String>, value: JsonValue) -> Self {
        let bound = BoundValue::inclusive(value);
        Self {
            attr: attr.into(),
            low_const: Some(bound.clone()),
            high_const: Some(bound),
            lows: Vec::new(),
            highs: Vec::new(),
        }
    }

    /// A constant range with optional bounds.
    pub fn range(
        attr: impl Into<String>,
        low: Option<BoundValue>,
        high: Option<BoundValue>,
    ) -> Self {
        Self {
            attr: attr.into(),
            low_const: low,
            high_const: high,
            lows: Vec::new(),
            highs: Vec::new(),
        }
    }

    /// An equality whose value comes from an expression; if the expression
    /// yields an array, the clause expands into one equality per element.
    pub fn eq_expr(attr: impl Into<String>, expression: Arc<dyn Expression>) -> Self {
        Self {
            attr: attr.into(),
            low_const: None,
            high_const: None,
            lows: vec![(expression, true)],
            highs: Vec::new(),
        }
    }

    /// Whether all bounds of this spec are constant.
    pub fn is_constant(&self) -> bool {
        self.lows.is_empty() && self.highs.is_empty()
    }

    /// Whether any bound expression needs the scripting runtime.
    pub fn needs_script_runtime(&self) -> bool {
        self.lows
            .iter()
            .chain(self.highs.iter())
            .any(|(e, _)| e.needs_script_runtime())
    }

    fn constant_part(&self) -> AttributeRange {
        AttributeRange {
            attr: self.attr.clone(),
            low: self.low_const.clone(),
            high: self.high_const.clone(),
        }
    }
}

/// A fully-constant range over one attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeRange {
    /// The attribute path.
    pub attr: String,
    /// Lower bound, if any.
    pub low: Option<BoundValue>,
    /// Upper bound, if any.
    pub high: Option<BoundValue>,
}

/// One conjunction of attribute ranges.
pub type AndClause = Vec<AttributeRange>;

impl AttributeRange {
    /// An unconstrained range over an attribute.
    pub fn unbounded(attr: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            low: None,
            high: None,
        }
    }

    /// An equality range.
    pub fn equality(attr: impl Into<String>, value: JsonValue) -> Self {
        let bound = BoundValue::inclusive(value);
        Self {
            attr: attr.into(),
            low: Some(bound.clone()),
            high: Some(bound),
        }
    }

    /// Whether this range pins the attribute to a single value.
    pub fn is_equality(&self) -> bool {
        match (&self.low, &self.high) {
            (Some(l), Some(h)) => {
                l.inclusive
                    && h.inclusive
                    && compare_json(&l.value, &h.value) == Ordering::Equal
            }
            _ => false,
        }
    }

    /// The pinned value of an equality range.
    pub fn equality_value(&self) -> Option<&JsonValue> {
        if self.is_equality() {
            self.low.as_ref().map(|b| &b.value)
        } else {
            None
        }
    }

    /// Whether the range can match anything at all.
    pub fn is_valid(&self) -> bool {
        match (&self.low, &self.high) {
            (Some(l), Some(h)) => match compare_json(&l.value, &h.value) {
                Ordering::Less => true,
                Ordering::Equal => l.inclusive && h.inclusive,
                Ordering::Greater => false,
            },
            _ => true,
        }
    }

    /// Intersect another range over the same attribute into this one.
    pub fn fuse(&mut self, other: &AttributeRange) {
        debug_assert_eq!(self.attr, other.attr);
        self.low = tighter_low(self.low.take(), other.low.clone());
        self.high = tighter_high(self.high.take(), other.high.clone());
    }

    /// Whether every value matched by `other` is matched by this range.
    pub fn contains(&self, other: &AttributeRange) -> bool {
        let low_ok = match (&self.low, &other.low) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => match compare_json(&a.value, &b.value) {
                Ordering::Less => true,
                Ordering::Equal => a.inclusive || !b.inclusive,
                Ordering::Greater => false,
            },
        };
        let high_ok = match (&self.high, &other.high) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => match compare_json(&a.value, &b.value) {
                Ordering::Greater => true,
                Ordering::Equal => a.inclusive || !b.inclusive,
                Ordering::Less => false,
            },
        };
        low_ok && high_ok
    }
}

fn tighter_low(a: Option<BoundValue>, b: Option<BoundValue>) -> Option<BoundValue> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) => Some(match compare_json(&a.value, &b.value) {
            Ordering::Greater => a,
            Ordering::Less => b,
            Ordering::Equal => BoundValue {
                value: a.value,
                inclusive: a.inclusive && b.inclusive,
            },
        }),
    }
}

fn tighter_high(a: Option<BoundValue>, b: Option<BoundValue>) -> Option<BoundValue> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) => Some(match compare_json(&a.value, &b.value) {
            Ordering::Less => a,
            Ordering::Greater => b,
            Ordering::Equal => BoundValue {
                value: a.value,
                inclusive: a.inclusive && b.inclusive,
            },
        }),
    }
}

/// Intersect every pair from the two alternative lists, keeping the valid
/// intersections.
fn and_combine(left: &[AttributeRange], right: &[AttributeRange]) -> Vec<AttributeRange> {
    let mut out = Vec::new();
    for a in left {
        for b in right {
            let mut fused = a.clone();
            fused.fuse(b);
            if fused.is_valid() {
                out.push(fused);
            }
        }
    }
    out
}

/// Form the cartesian product of per-attribute alternatives into
/// conjunctions.
fn cartesian(collector: &[Vec<AttributeRange>]) -> Vec<AndClause> {
    let mut out = Vec::new();
    let mut indexes = vec![0usize; collector.len()];
    loop {
        out.push(
            collector
                .iter()
                .zip(indexes.iter())
                .map(|(alts, &i)| alts[i].clone())
                .collect::<AndClause>(),
        );
        let mut j = collector.len() - 1;
        loop {
            indexes[j] += 1;
            if indexes[j] < collector[j].len() {
                break;
            }
            indexes[j] = 0;
            if j == 0 {
                return out;
            }
            j -= 1;
        }
    }
}

/// Remove clauses subsumed by another clause of the disjunction.
pub fn remove_overlaps(clauses: &mut Vec<AndClause>) {
    let mut keep = vec![true; clauses.len()];
    for i in 0..clauses.len() {
        if !keep[i] {
            continue;
        }
        for j in 0..clauses.len() {
            if i == j || !keep[j] {
                continue;
            }
            if clause_contains(&clauses[i], &clauses[j]) && (i < j || !clause_contains(&clauses[j], &clauses[i])) {
                keep[j] = false;
            }
        }
    }
    let mut it = keep.iter();
    clauses.retain(|_| *it.next().expect("keep is clause-sized"));
}

// a contains b: every constraint of a is at least as loose on b's side
fn clause_contains(a: &AndClause, b: &AndClause) -> bool {
    a.iter().all(|ra| {
        match b.iter().find(|rb| rb.attr == ra.attr) {
            Some(rb) => ra.contains(rb),
            // a constrains an attribute b leaves free
            None => ra.low.is_none() && ra.high.is_none(),
        }
    })
}

/// Specialize a planned disjunction against one input row, producing
/// fully-constant conjunctions. `row` must be provided when any bound is
/// variable.
pub fn specialize(
    ranges: &[Vec<RangeSpec>],
    row: Option<&EvalContext<'_>>,
) -> AqlResult<Vec<AndClause>> {
    let mut condition: Vec<AndClause> = Vec::new();

    for and_specs in ranges {
        // per attribute: the alternatives this conjunction may take
        let mut collector: Vec<Vec<AttributeRange>> = Vec::with_capacity(and_specs.len());
        let mut clause_empty = false;

        for spec in and_specs {
            let mut alternatives = vec![spec.constant_part()];

            for (bounds, is_low) in [(&spec.lows, true), (&spec.highs, false)] {
                for (expression, inclusive) in bounds.iter() {
                    let Some(ctx) = row else {
                        return Err(aql_errors::internal_err!(
                            "variable index bound without an input row"
                        ));
                    };
                    let (value, tag) = expression.execute(ctx)?;
                    let evaluated = value.materialize(tag.as_ref());
                    if let JsonValue::Array(elements) = evaluated {
                        // IN-style expansion: one equality per element
                        let expansion: Vec<AttributeRange> = elements
                            .into_iter()
                            .map(|e| AttributeRange::equality(&spec.attr, e))
                            .collect();
                        alternatives = and_combine(&alternatives, &expansion);
                    } else {
                        let bound = BoundValue {
                            value: evaluated,
                            inclusive: *inclusive,
                        };
                        let fused = AttributeRange {
                            attr: spec.attr.clone(),
                            low: is_low.then(|| bound.clone()),
                            high: (!is_low).then_some(bound),
                        };
                        for alt in &mut alternatives {
                            alt.fuse(&fused);
                        }
                        alternatives.retain(AttributeRange::is_valid);
                    }
                }
            }

            if alternatives.is_empty() {
                clause_empty = true;
                break;
            }
            collector.push(alternatives);
        }

        if clause_empty || collector.iter().any(Vec::is_empty) {
            continue;
        }
        condition.extend(cartesian(&collector));
    }

    condition.retain(|clause| clause.iter().all(AttributeRange::is_valid));
    remove_overlaps(&mut condition);
    Ok(condition)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fuse_intersects_bounds() {
        let mut r = AttributeRange {
            attr: "v".into(),
            low: Some(BoundValue::inclusive(json!(1))),
            high: None,
        };
        r.fuse(&AttributeRange {
            attr: "v".into(),
            low: Some(BoundValue::exclusive(json!(3))),
            high: Some(BoundValue::inclusive(json!(10))),
        });
        assert_eq!(r.low, Some(BoundValue::exclusive(json!(3))));
        assert_eq!(r.high, Some(BoundValue::inclusive(json!(10))));
        assert!(r.is_valid());

        r.fuse(&AttributeRange::equality("v", json!(2)));
        assert!(!r.is_valid());
    }

    #[test]
    fn equality_detection() {
        let eq = AttributeRange::equality("v", json!(5));
        assert!(eq.is_equality());
        assert_eq!(eq.equality_value(), Some(&json!(5)));

        let range = AttributeRange {
            attr: "v".into(),
            low: Some(BoundValue::inclusive(json!(5))),
            high: Some(BoundValue::exclusive(json!(5))),
        };
        assert!(!range.is_equality());
        assert!(!range.is_valid());
    }

    #[test]
    fn constant_specialization_drops_contradictions() {
        let ranges = vec![
            vec![RangeSpec::range(
                "v",
                Some(BoundValue::inclusive(json!(10))),
                Some(BoundValue::exclusive(json!(5))),
            )],
            vec![RangeSpec::eq("v", json!(7))],
        ];
        let clauses = specialize(&ranges, None).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0][0].equality_value(), Some(&json!(7)));
    }

    #[test]
    fn overlap_removal_keeps_broader_clause() {
        let mut clauses = vec![
            vec![AttributeRange {
                attr: "v".into(),
                low: Some(BoundValue::inclusive(json!(0))),
                high: Some(BoundValue::inclusive(json!(10))),
            }],
            vec![AttributeRange::equality("v", json!(5))],
            vec![AttributeRange::equality("v", json!(20))],
        ];
        remove_overlaps(&mut clauses);
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0][0].high, Some(BoundValue::inclusive(json!(10))));
        assert_eq!(clauses[1][0].equality_value(), Some(&json!(20)));
    }

    #[test]
    fn duplicate_clauses_deduplicate() {
        let mut clauses = vec![
            vec![AttributeRange::equality("v", json!(1))],
            vec![AttributeRange::equality("v", json!(1))],
        ];
        remove_overlaps(&mut clauses);
        assert_eq!(clauses.len(), 1);
    }
}
