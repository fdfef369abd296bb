//! The rectangular batch container operators exchange.

use std::collections::HashSet;

use aql_errors::{internal, internal_err, AqlError, AqlResult};
use serde::{Deserialize, Serialize};

use crate::value::{CollectionTag, Value};
use crate::RegisterId;

/// A rectangular `rows × nr_regs` container of [`Value`]s, plus one optional
/// collection tag per column.
///
/// A block is uniquely owned by whichever operator currently holds it.
/// [`slice`](ItemBlock::slice) produces a block whose heap payloads are
/// shared with the source (reference-counted), while
/// [`steal_chosen`](ItemBlock::steal_chosen) moves payloads out and leaves
/// the source slots [`Value::Empty`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemBlock {
    rows: usize,
    nr_regs: usize,
    /// Row-major storage, `rows * nr_regs` entries.
    data: Vec<Value>,
    /// Per-column collection tags for shaped values.
    collections: Vec<Option<CollectionTag>>,
}

impl ItemBlock {
    /// Create a block of the given dimensions with all slots empty.
    pub fn new(rows: usize, nr_regs: usize) -> Self {
        Self {
            rows,
            nr_regs,
            data: vec![Value::Empty; rows * nr_regs],
            collections: vec![None; nr_regs],
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether the block has zero rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of register columns.
    pub fn nr_regs(&self) -> usize {
        self.nr_regs
    }

    #[inline]
    fn index(&self, row: usize, reg: RegisterId) -> usize {
        debug_assert!(row < self.rows && reg < self.nr_regs);
        row * self.nr_regs + reg
    }

    /// Borrow the value at `(row, reg)`.
    pub fn value(&self, row: usize, reg: RegisterId) -> &Value {
        &self.data[self.index(row, reg)]
    }

    /// Store a value, taking ownership.
    pub fn set_value(&mut self, row: usize, reg: RegisterId, value: Value) {
        let idx = self.index(row, reg);
        self.data[idx] = value;
    }

    /// Destroy the value at `(row, reg)`, leaving the slot empty.
    pub fn erase_value(&mut self, row: usize, reg: RegisterId) {
        let idx = self.index(row, reg);
        self.data[idx] = Value::Empty;
    }

    /// Move the value out of `(row, reg)`, leaving the slot empty.
    pub fn steal_value(&mut self, row: usize, reg: RegisterId) -> Value {
        let idx = self.index(row, reg);
        std::mem::take(&mut self.data[idx])
    }

    /// Borrow one row as a contiguous slice of register values.
    pub fn row_values(&self, row: usize) -> &[Value] {
        let start = row * self.nr_regs;
        &self.data[start..start + self.nr_regs]
    }

    /// The collection tag of a column, if any.
    pub fn collection(&self, reg: RegisterId) -> Option<&CollectionTag> {
        self.collections[reg].as_ref()
    }

    /// Set the collection tag of a column.
    pub fn set_collection(&mut self, reg: RegisterId, tag: Option<CollectionTag>) {
        self.collections[reg] = tag;
    }

    /// All column tags, in register order.
    pub fn collections(&self) -> &[Option<CollectionTag>] {
        &self.collections
    }

    /// Destroy all values in the given columns, for every row.
    pub fn clear_registers(&mut self, regs: &HashSet<RegisterId>) {
        if regs.is_empty() {
            return;
        }
        for row in 0..self.rows {
            for &reg in regs {
                let idx = row * self.nr_regs + reg;
                self.data[idx] = Value::Empty;
            }
        }
    }

    /// A new block containing rows `from..to`, sharing heap payloads with
    /// this block.
    pub fn slice(&self, from: usize, to: usize) -> ItemBlock {
        debug_assert!(from < to && to <= self.rows);
        ItemBlock {
            rows: to - from,
            nr_regs: self.nr_regs,
            data: self.data[from * self.nr_regs..to * self.nr_regs].to_vec(),
            collections: self.collections.clone(),
        }
    }

    /// A new block containing the rows `chosen[from..to]`, sharing heap
    /// payloads with this block.
    pub fn slice_chosen(&self, chosen: &[usize], from: usize, to: usize) -> ItemBlock {
        let mut out = ItemBlock::new(to - from, self.nr_regs);
        out.collections = self.collections.clone();
        for (i, &row) in chosen[from..to].iter().enumerate() {
            let src = row * self.nr_regs;
            let dst = i * self.nr_regs;
            out.data[dst..dst + self.nr_regs].clone_from_slice(&self.data[src..src + self.nr_regs]);
        }
        out
    }

    /// A new block containing the rows `chosen[from..to]`, moving values out
    /// of this block (the source slots become empty).
    pub fn steal_chosen(&mut self, chosen: &[usize], from: usize, to: usize) -> ItemBlock {
        let mut out = ItemBlock::new(to - from, self.nr_regs);
        out.collections = self.collections.clone();
        for (i, &row) in chosen[from..to].iter().enumerate() {
            for reg in 0..self.nr_regs {
                let v = self.steal_value(row, reg);
                out.set_value(i, reg, v);
            }
        }
        out
    }

    /// Concatenate blocks into one. All inputs must have the same register
    /// count; column tags are taken from the first block that has one for
    /// each column.
    pub fn concatenate(blocks: Vec<ItemBlock>) -> AqlResult<ItemBlock> {
        let Some(first) = blocks.first() else {
            internal!("concatenate called without blocks");
        };
        let nr_regs = first.nr_regs;
        let rows = blocks.iter().map(|b| b.rows).sum();
        let mut out = ItemBlock::new(rows, nr_regs);
        for block in &blocks {
            if block.nr_regs != nr_regs {
                return Err(internal_err!(
                    "cannot concatenate blocks of width {} and {}",
                    nr_regs,
                    block.nr_regs
                ));
            }
            for (reg, tag) in block.collections.iter().enumerate() {
                if out.collections[reg].is_none() {
                    out.collections[reg] = tag.clone();
                }
            }
        }
        let mut row = 0;
        for block in blocks {
            let n = block.rows;
            out.data[row * nr_regs..(row + n) * nr_regs].clone_from_slice(&block.data);
            row += n;
        }
        Ok(out)
    }

    /// Truncate the block to `n` rows in place.
    pub fn shrink(&mut self, n: usize) -> AqlResult<()> {
        if n > self.rows {
            return Err(AqlError::Internal {
                message: format!("cannot shrink block of {} rows to {}", self.rows, n),
            });
        }
        self.rows = n;
        self.data.truncate(n * self.nr_regs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn numbered_block(rows: usize, regs: usize) -> ItemBlock {
        let mut b = ItemBlock::new(rows, regs);
        for r in 0..rows {
            for c in 0..regs {
                b.set_value(r, c, Value::json(json!(r * 100 + c)));
            }
        }
        b
    }

    #[test]
    fn slice_shares_and_preserves_tags() {
        let mut b = numbered_block(4, 2);
        b.set_collection(1, Some(CollectionTag::new(1, "c")));
        let s = b.slice(1, 3);
        assert_eq!(s.len(), 2);
        assert_eq!(s.value(0, 0), &Value::json(json!(100)));
        assert_eq!(s.value(1, 1), &Value::json(json!(201)));
        assert_eq!(s.collection(1).unwrap().name.as_ref(), "c");
        // source untouched
        assert_eq!(b.value(1, 0), &Value::json(json!(100)));
    }

    #[test]
    fn steal_chosen_empties_source() {
        let mut b = numbered_block(4, 2);
        let chosen = vec![0, 2, 3];
        let s = b.steal_chosen(&chosen, 1, 3);
        assert_eq!(s.len(), 2);
        assert_eq!(s.value(0, 0), &Value::json(json!(200)));
        assert_eq!(s.value(1, 1), &Value::json(json!(301)));
        assert!(b.value(2, 0).is_empty());
        assert!(b.value(3, 1).is_empty());
        // unchosen rows keep their values
        assert_eq!(b.value(1, 0), &Value::json(json!(100)));
    }

    #[test]
    fn concatenate_sums_rows() {
        let a = numbered_block(2, 3);
        let b = numbered_block(3, 3);
        let c = ItemBlock::concatenate(vec![a, b]).unwrap();
        assert_eq!(c.len(), 5);
        assert_eq!(c.nr_regs(), 3);
        assert_eq!(c.value(2, 0), &Value::json(json!(0)));
    }

    #[test]
    fn concatenate_rejects_width_mismatch() {
        let a = numbered_block(1, 2);
        let b = numbered_block(1, 3);
        assert!(ItemBlock::concatenate(vec![a, b]).is_err());
    }

    #[test]
    fn clear_registers_erases_columns() {
        let mut b = numbered_block(3, 3);
        let regs: HashSet<RegisterId> = [0, 2].into_iter().collect();
        b.clear_registers(&regs);
        for row in 0..3 {
            assert!(b.value(row, 0).is_empty());
            assert!(!b.value(row, 1).is_empty());
            assert!(b.value(row, 2).is_empty());
        }
    }

    #[test]
    fn shrink_truncates() {
        let mut b = numbered_block(5, 2);
        b.shrink(2).unwrap();
        assert_eq!(b.len(), 2);
        assert!(b.shrink(3).is_err());
    }
}
