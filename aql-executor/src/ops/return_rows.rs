//! Strip all columns but the result column.

use aql_data::{ItemBlock, RegisterId};

/// Moves the designated result column into a fresh single-column block,
/// dropping every other register. The column's collection tag travels
/// along.
pub struct ReturnState {
    in_reg: RegisterId,
}

impl ReturnState {
    pub(crate) fn new(in_reg: RegisterId) -> Self {
        Self { in_reg }
    }

    pub(crate) fn strip(&self, mut block: ItemBlock) -> ItemBlock {
        let rows = block.len();
        let mut stripped = ItemBlock::new(rows, 1);
        for row in 0..rows {
            let value = block.steal_value(row, self.in_reg);
            stripped.set_value(row, 0, value);
        }
        stripped.set_collection(0, block.collection(self.in_reg).cloned());
        stripped
    }
}
