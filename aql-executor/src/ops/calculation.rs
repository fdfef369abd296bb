//! Evaluate an expression per row into an output register.

use std::sync::Arc;

use aql_data::{ItemBlock, RegisterId, Value};
use aql_errors::AqlResult;
use aql_expression::{EvalContext, Expression, ScriptScope};

use super::Core;

/// Per-row expression evaluation. Two modes, decided once at construction:
/// a pure register reference copies the column (and its collection tag)
/// without evaluating; everything else evaluates, optionally guarded by a
/// condition register that short-circuits to `null`.
pub struct CalculationState {
    expression: Arc<dyn Expression>,
    out_reg: RegisterId,
    condition_reg: Option<RegisterId>,
    /// Set when the expression is a bare reference to another register.
    reference_reg: Option<RegisterId>,
}

impl CalculationState {
    pub(crate) fn new(
        expression: Arc<dyn Expression>,
        out_reg: RegisterId,
        condition_reg: Option<RegisterId>,
    ) -> Self {
        let reference_reg = expression.reference_register();
        Self {
            expression,
            out_reg,
            condition_reg,
            reference_reg,
        }
    }

    fn fill_with_reference(&self, block: &mut ItemBlock, in_reg: RegisterId) {
        block.set_collection(self.out_reg, block.collection(in_reg).cloned());
        for row in 0..block.len() {
            let value = block.value(row, in_reg).clone();
            block.set_value(row, self.out_reg, value);
        }
    }

    fn execute_rows(&self, core: &Core, block: &mut ItemBlock) -> AqlResult<()> {
        block.set_collection(self.out_reg, None);
        for row in 0..block.len() {
            if let Some(condition_reg) = self.condition_reg {
                if !block.value(row, condition_reg).is_true() {
                    block.set_value(row, self.out_reg, Value::null());
                    continue;
                }
            }
            let (value, _collection) = {
                let ctx = EvalContext {
                    trx: core.ctx.trx.as_ref(),
                    block,
                    row,
                };
                self.expression.execute(&ctx)?
            };
            block.set_value(row, self.out_reg, value);
            core.throw_if_killed()?;
        }
        Ok(())
    }

    pub(crate) fn evaluate(&mut self, core: &mut Core, block: &mut ItemBlock) -> AqlResult<()> {
        if let Some(in_reg) = self.reference_reg {
            // a pure variable reference never evaluates
            self.fill_with_reference(block, in_reg);
            return core.throw_if_killed();
        }

        if self.expression.needs_script_runtime() {
            let mut scope =
                ScriptScope::enter(core.ctx.script_runtime.as_ref(), core.ctx.cluster_mode);
            scope.invalidate_on_exit(self.expression.as_ref());
            self.execute_rows(core, block)
        } else {
            self.execute_rows(core, block)
        }
    }
}
