//! Run a subquery once per outer row.

use std::sync::Arc;

use aql_data::{ItemBlock, RegisterId, Value};
use aql_errors::AqlResult;

use super::{Operator, DEFAULT_BATCH_SIZE};

/// For each outer row, resets the owned subquery tree to that row, drains
/// it, and writes the accumulated blocks into the outer row's output
/// register as a single nested value.
///
/// Subqueries the planner asserts to be constant are evaluated for the
/// first row only and the (shared, reference-counted) result is reused.
/// The flag is opt-in; the default is to re-evaluate per row.
pub struct SubqueryState {
    pub(crate) subquery: Box<Operator>,
    out_reg: RegisterId,
    is_const: bool,
    cached: Option<Value>,
}

impl SubqueryState {
    pub(crate) fn new(subquery: Box<Operator>, out_reg: RegisterId, is_const: bool) -> Self {
        Self {
            subquery,
            out_reg,
            is_const,
            cached: None,
        }
    }

    fn execute_subquery(&mut self) -> AqlResult<Vec<ItemBlock>> {
        let mut results = Vec::new();
        while let Some(block) = self
            .subquery
            .get_some(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)?
        {
            results.push(block);
        }
        Ok(results)
    }

    pub(crate) fn fill(
        &mut self,
        _core: &mut super::Core,
        block: &mut ItemBlock,
    ) -> AqlResult<()> {
        for row in 0..block.len() {
            self.subquery.initialize_cursor(Some(block), row)?;

            if row > 0 && self.is_const {
                let cached = self.cached.clone().expect("filled on the first row");
                block.set_value(row, self.out_reg, cached);
                continue;
            }

            let results = self.execute_subquery()?;
            let value = Value::DocVec(Arc::new(results));
            self.cached = Some(value.clone());
            block.set_value(row, self.out_reg, value);
        }
        Ok(())
    }
}
