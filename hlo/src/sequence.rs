use crate::computation::HloComputation;
use crate::instruction::HloId;

/// A deterministic linear order of instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HloInstructionSequence {
    ids: Vec<HloId>,
}

impl HloInstructionSequence {
    pub fn new(ids: Vec<HloId>) -> Self {
        Self { ids }
    }

    /// The computation's own post order.
    pub fn from_computation(computation: &HloComputation) -> Self {
        Self { ids: computation.instructions().iter().map(|instruction| instruction.id).collect() }
    }

    pub fn push(&mut self, id: HloId) {
        self.ids.push(id);
    }

    pub fn ids(&self) -> &[HloId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: HloId) -> bool {
        self.ids.contains(&id)
    }
}
