//! A small expression evaluator over register values.

use std::cmp::Ordering;

use aql_data::{compare_json, CollectionTag, NumericRange, RegisterId, Value};
use aql_errors::{AqlError, AqlResult};
use serde_json::Value as JsonValue;

use crate::{EvalContext, Expression};

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    fn matches(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// An expression tree over register values.
#[derive(Clone, Debug)]
pub enum Expr {
    /// A constant.
    Literal(JsonValue),
    /// The value of a register.
    Register(RegisterId),
    /// Attribute access `base.path` (dotted paths allowed).
    Attribute {
        /// The value whose attribute is accessed.
        base: Box<Expr>,
        /// The (possibly dotted) attribute path.
        path: String,
    },
    /// A binary comparison.
    Compare {
        /// The operator.
        op: CmpOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Membership test; the right operand must evaluate to an array or
    /// range.
    In {
        /// The needle.
        left: Box<Expr>,
        /// The haystack.
        right: Box<Expr>,
    },
    /// Logical negation of truthiness.
    Not(Box<Expr>),
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// The integer interval `low..high`, both ends inclusive.
    Range {
        /// Lower end.
        low: Box<Expr>,
        /// Upper end.
        high: Box<Expr>,
    },
    /// Array construction.
    Array(Vec<Expr>),
    /// Object construction.
    Object(Vec<(String, Expr)>),
}

impl Expr {
    /// Shorthand for a register reference.
    pub fn reg(r: RegisterId) -> Expr {
        Expr::Register(r)
    }

    /// Shorthand for attribute access on a register.
    pub fn attr(r: RegisterId, path: impl Into<String>) -> Expr {
        Expr::Attribute {
            base: Box::new(Expr::Register(r)),
            path: path.into(),
        }
    }

    /// Shorthand for a literal.
    pub fn lit(v: JsonValue) -> Expr {
        Expr::Literal(v)
    }

    /// Shorthand for a comparison.
    pub fn cmp(op: CmpOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn eval_json(&self, ctx: &EvalContext<'_>) -> AqlResult<JsonValue> {
        Ok(match self {
            Expr::Literal(v) => v.clone(),
            Expr::Register(r) => {
                let tag = ctx.block.collection(*r);
                ctx.block.value(ctx.row, *r).materialize(tag)
            }
            Expr::Attribute { base, path } => {
                // documents resolve attributes without full materialization
                if let Expr::Register(r) = base.as_ref() {
                    let value = ctx.block.value(ctx.row, *r);
                    if let Some(doc) = value.as_document() {
                        if path == "_id" {
                            let tag = ctx.block.collection(*r);
                            return Ok(tag
                                .map(|t| JsonValue::String(doc.id(&t.name)))
                                .unwrap_or(JsonValue::Null));
                        }
                        return Ok(doc.attribute(path).unwrap_or(JsonValue::Null));
                    }
                }
                let base = base.eval_json(ctx)?;
                aql_data::lookup_path(&base, path)
                    .cloned()
                    .unwrap_or(JsonValue::Null)
            }
            Expr::Compare { op, left, right } => {
                let (l, r) = (left.eval_json(ctx)?, right.eval_json(ctx)?);
                JsonValue::Bool(op.matches(compare_json(&l, &r)))
            }
            Expr::In { left, right } => {
                let needle = left.eval_json(ctx)?;
                let haystack = right.eval_json(ctx)?;
                let JsonValue::Array(items) = haystack else {
                    return Err(AqlError::ArrayExpected {
                        context: "as right-hand operand to IN".into(),
                    });
                };
                JsonValue::Bool(
                    items
                        .iter()
                        .any(|i| compare_json(i, &needle) == Ordering::Equal),
                )
            }
            Expr::Not(inner) => JsonValue::Bool(!truthy(&inner.eval_json(ctx)?)),
            Expr::And(l, r) => {
                let lv = l.eval_json(ctx)?;
                if !truthy(&lv) {
                    lv
                } else {
                    r.eval_json(ctx)?
                }
            }
            Expr::Or(l, r) => {
                let lv = l.eval_json(ctx)?;
                if truthy(&lv) {
                    lv
                } else {
                    r.eval_json(ctx)?
                }
            }
            Expr::Range { .. } => {
                let Value::Range(range) = self.eval_value(ctx)?.0 else {
                    unreachable!("Range expressions evaluate to Range values");
                };
                range.to_json()
            }
            Expr::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|e| e.eval_json(ctx))
                    .collect::<AqlResult<_>>()?,
            ),
            Expr::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (k, e) in entries {
                    map.insert(k.clone(), e.eval_json(ctx)?);
                }
                JsonValue::Object(map)
            }
        })
    }

    fn eval_value(&self, ctx: &EvalContext<'_>) -> AqlResult<(Value, Option<CollectionTag>)> {
        match self {
            Expr::Register(r) => Ok((
                ctx.block.value(ctx.row, *r).clone(),
                ctx.block.collection(*r).cloned(),
            )),
            Expr::Range { low, high } => {
                let low = as_int(&low.eval_json(ctx)?)?;
                let high = as_int(&high.eval_json(ctx)?)?;
                Ok((Value::Range(NumericRange::new(low, high)), None))
            }
            _ => Ok((Value::json(self.eval_json(ctx)?), None)),
        }
    }
}

fn truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn as_int(v: &JsonValue) -> AqlResult<i64> {
    v.as_i64().ok_or_else(|| AqlError::Internal {
        message: format!("expected an integer range bound, got {v}"),
    })
}

impl Expression for Expr {
    fn execute(&self, ctx: &EvalContext<'_>) -> AqlResult<(Value, Option<CollectionTag>)> {
        self.eval_value(ctx)
    }

    fn reference_register(&self) -> Option<RegisterId> {
        match self {
            Expr::Register(r) => Some(*r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aql_data::{Document, ItemBlock};
    use aql_storage::mem::MemoryEngine;
    use serde_json::json;

    use super::*;

    fn block_with_doc() -> ItemBlock {
        let mut block = ItemBlock::new(1, 2);
        block.set_value(
            0,
            0,
            Value::Shaped(Arc::new(Document::new("k1", json!({"v": 12, "n": {"x": 5}})))),
        );
        block.set_collection(0, Some(CollectionTag::new(3, "c")));
        block.set_value(0, 1, Value::json(json!([1, 3, 5])));
        block
    }

    fn eval(expr: &Expr, block: &ItemBlock) -> Value {
        let engine = MemoryEngine::new();
        let ctx = EvalContext {
            trx: engine.as_ref(),
            block,
            row: 0,
        };
        expr.execute(&ctx).unwrap().0
    }

    #[test]
    fn attribute_access_on_documents() {
        let block = block_with_doc();
        assert_eq!(eval(&Expr::attr(0, "v"), &block), Value::json(json!(12)));
        assert_eq!(
            eval(&Expr::attr(0, "n.x"), &block),
            Value::json(json!(5))
        );
        assert_eq!(
            eval(&Expr::attr(0, "_id"), &block),
            Value::json(json!("c/k1"))
        );
        assert_eq!(
            eval(&Expr::attr(0, "missing"), &block),
            Value::json(json!(null))
        );
    }

    #[test]
    fn comparisons_and_in() {
        let block = block_with_doc();
        let ge = Expr::cmp(CmpOp::Ge, Expr::attr(0, "v"), Expr::lit(json!(10)));
        assert_eq!(eval(&ge, &block), Value::json(json!(true)));

        let within = Expr::In {
            left: Box::new(Expr::lit(json!(3))),
            right: Box::new(Expr::reg(1)),
        };
        assert_eq!(eval(&within, &block), Value::json(json!(true)));

        let not_array = Expr::In {
            left: Box::new(Expr::lit(json!(3))),
            right: Box::new(Expr::lit(json!(7))),
        };
        let engine = MemoryEngine::new();
        let ctx = EvalContext {
            trx: engine.as_ref(),
            block: &block,
            row: 0,
        };
        assert!(matches!(
            not_array.execute(&ctx),
            Err(AqlError::ArrayExpected { .. })
        ));
    }

    #[test]
    fn range_evaluates_lazily() {
        let block = block_with_doc();
        let range = Expr::Range {
            low: Box::new(Expr::lit(json!(1))),
            high: Box::new(Expr::attr(0, "v")),
        };
        assert_eq!(eval(&range, &block), Value::Range(NumericRange::new(1, 12)));
    }

    #[test]
    fn reference_detection() {
        assert_eq!(Expr::reg(4).reference_register(), Some(4));
        assert_eq!(Expr::attr(4, "a").reference_register(), None);
    }
}
