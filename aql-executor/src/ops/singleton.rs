//! The plan leaf: produces at most one row.

use aql_data::ItemBlock;
use aql_errors::AqlResult;

use super::Core;

/// Emits one row carrying the register values supplied to
/// `initialize_cursor`, then is exhausted. Values are moved out of the
/// stored snapshot rather than cloned, so large subquery bindings are not
/// duplicated.
pub struct SingletonState {
    input_values: Option<ItemBlock>,
}

impl SingletonState {
    pub(crate) fn new() -> Self {
        Self { input_values: None }
    }

    /// Store a one-row snapshot of the caller-supplied input registers.
    pub(crate) fn set_input(&mut self, items: Option<&ItemBlock>, pos: usize) {
        self.input_values = items.map(|block| block.slice(pos, pos + 1));
    }

    pub(crate) fn clear_input(&mut self) {
        self.input_values = None;
    }

    pub(crate) fn get_or_skip_some(
        &mut self,
        core: &mut Core,
        skipping: bool,
    ) -> AqlResult<(Option<ItemBlock>, usize)> {
        if core.done {
            return Ok((None, 0));
        }
        core.done = true;

        if skipping {
            return Ok((None, usize::from(self.input_values.is_some())));
        }

        let mut result = ItemBlock::new(1, core.nr_regs);
        let mut skipped = 0;
        if let Some(input) = &mut self.input_values {
            skipped = 1;
            for reg in 0..input.nr_regs() {
                let value = input.steal_value(0, reg);
                result.set_value(0, reg, value);
                result.set_collection(reg, input.collection(reg).cloned());
            }
        }
        Ok((Some(result), skipped))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use aql_data::Value;
    use aql_storage::mem::MemoryEngine;
    use serde_json::json;

    use super::*;
    use crate::context::QueryContext;
    use crate::ops::{Operator, OperatorKind};

    fn singleton() -> Operator {
        let ctx = QueryContext::new(MemoryEngine::new());
        Operator::new(
            0,
            1,
            HashSet::new(),
            ctx,
            vec![],
            OperatorKind::Singleton(SingletonState::new()),
        )
    }

    #[test]
    fn produces_exactly_one_row() {
        let mut op = singleton();
        op.initialize().unwrap();
        op.initialize_cursor(None, 0).unwrap();
        let block = op.get_some(1, 10).unwrap();
        // no input registers: one empty row
        assert_eq!(block.unwrap().len(), 1);
        assert!(op.get_some(1, 10).unwrap().is_none());
    }

    #[test]
    fn steals_input_registers() {
        let mut op = singleton();
        op.initialize().unwrap();
        let mut input = ItemBlock::new(2, 1);
        input.set_value(0, 0, Value::json(json!("zero")));
        input.set_value(1, 0, Value::json(json!("one")));
        op.initialize_cursor(Some(&input), 1).unwrap();
        let block = op.get_some(1, 10).unwrap().unwrap();
        assert_eq!(block.len(), 1);
        assert_eq!(block.value(0, 0), &Value::json(json!("one")));
        // caller's block is untouched; the singleton stole from its own copy
        assert_eq!(input.value(1, 0), &Value::json(json!("one")));
    }

    #[test]
    fn cursor_reset_rearms_the_row() {
        let mut op = singleton();
        op.initialize().unwrap();
        op.initialize_cursor(None, 0).unwrap();
        assert!(op.get_some(1, 10).unwrap().is_some());
        assert!(op.get_some(1, 10).unwrap().is_none());
        op.initialize_cursor(None, 0).unwrap();
        assert!(op.get_some(1, 10).unwrap().is_some());
    }
}
