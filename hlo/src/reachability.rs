//! Transitive dataflow reachability between the instructions of a computation.
//!
//! Every instruction carries a bit set of its ancestors (itself included),
//! computed in one pass over the post order.

use crate::computation::HloComputation;
use crate::instruction::HloId;

#[derive(Debug, Clone)]
pub struct HloReachabilityMap {
    words_per_row: usize,
    bits: Vec<u64>,
}

impl HloReachabilityMap {
    pub fn build(computation: &HloComputation) -> Self {
        let count = computation.instruction_count();
        let words_per_row = count.div_ceil(64).max(1);
        let mut bits = vec![0u64; words_per_row * count];

        for instruction in computation.instructions() {
            let row = instruction.id.index() * words_per_row;
            bits[row + instruction.id.index() / 64] |= 1 << (instruction.id.index() % 64);
            for operand in &instruction.operands {
                let operand_row = operand.index() * words_per_row;
                // Operands precede users, so their rows are final.
                for word in 0..words_per_row {
                    bits[row + word] |= bits[operand_row + word];
                }
            }
        }

        Self { words_per_row, bits }
    }

    /// Whether there is a dataflow path from `a` to `b` (or they are equal).
    pub fn is_reachable(&self, a: HloId, b: HloId) -> bool {
        if a.index() / 64 >= self.words_per_row {
            return false;
        }
        let row = b.index() * self.words_per_row;
        self.bits.get(row + a.index() / 64).is_some_and(|word| word & (1 << (a.index() % 64)) != 0)
    }

    /// Whether either instruction is reachable from the other.
    pub fn is_connected(&self, a: HloId, b: HloId) -> bool {
        self.is_reachable(a, b) || self.is_reachable(b, a)
    }
}
