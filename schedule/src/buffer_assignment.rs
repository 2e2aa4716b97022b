//! Assignment of program values to allocation slices.
//!
//! A value is identified by its defining [`HloPosition`]. Buffer-forwarding
//! instructions (bitcasts, tuples, tuple element reads) define no storage of
//! their own: their positions are aliases that may hold one or more values.
//! [`BufferAssignment::get_unique_slice`] resolves a position to the single
//! slice all of its values live in, or fails if they disagree.

use std::collections::HashMap;
use std::fmt::{self, Write};

use bon::bon;
use kiln_hlo::{HloComputation, HloId, HloOpcode};
use kiln_shape::ShapeIndex;
use smallvec::SmallVec;
use snafu::{OptionExt, ResultExt, ensure};

use crate::error::*;

pub type AllocationIndex = usize;

/// A position inside an instruction's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HloPosition {
    pub instruction: HloId,
    pub index: ShapeIndex,
}

impl HloPosition {
    pub fn new(instruction: HloId, index: impl Into<ShapeIndex>) -> Self {
        Self { instruction, index: index.into() }
    }

    pub fn top_level(instruction: HloId) -> Self {
        Self { instruction, index: ShapeIndex::root() }
    }
}

impl fmt::Display for HloPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.instruction, self.index)
    }
}

/// Byte range `[offset, offset + size)` of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slice {
    pub allocation: AllocationIndex,
    pub offset: usize,
    pub size: usize,
}

impl Slice {
    pub const fn new(allocation: AllocationIndex, offset: usize, size: usize) -> Self {
        Self { allocation, offset, size }
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{index:{}, offset:{}, size:{}}}", self.allocation, self.offset, self.size)
    }
}

/// A contiguous device buffer that one or more values are assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferAllocation {
    index: AllocationIndex,
    size: usize,
    parameter: Option<(usize, ShapeIndex)>,
    is_constant: bool,
    is_thread_local: bool,
    maybe_live_out: bool,
    assigned: Vec<(HloPosition, Slice)>,
}

impl BufferAllocation {
    pub fn index(&self) -> AllocationIndex {
        self.index
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_entry_computation_parameter(&self) -> bool {
        self.parameter.is_some()
    }

    pub fn parameter_number(&self) -> Option<usize> {
        self.parameter.as_ref().map(|(number, _)| *number)
    }

    /// Position inside the parameter's shape this allocation holds.
    pub fn param_shape_index(&self) -> Option<&ShapeIndex> {
        self.parameter.as_ref().map(|(_, index)| index)
    }

    pub fn is_constant(&self) -> bool {
        self.is_constant
    }

    pub fn is_thread_local(&self) -> bool {
        self.is_thread_local
    }

    pub fn maybe_live_out(&self) -> bool {
        self.maybe_live_out
    }

    /// Scratch memory owned by a single execution.
    pub fn is_preallocated_temp_buffer(&self) -> bool {
        !self.is_entry_computation_parameter() && !self.is_constant && !self.is_thread_local && !self.maybe_live_out
    }

    pub fn assigned_values(&self) -> &[(HloPosition, Slice)] {
        &self.assigned
    }

    /// Slice covering the whole allocation.
    pub fn whole(&self) -> Slice {
        Slice::new(self.index, 0, self.size)
    }
}

impl fmt::Display for BufferAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocation {}: size {}", self.index, self.size)?;
        if let Some((number, index)) = &self.parameter {
            write!(f, ", parameter {number}, shape {index}")?;
        }
        if self.is_constant {
            f.write_str(", constant")?;
        }
        if self.is_thread_local {
            f.write_str(", thread-local")?;
        }
        if self.maybe_live_out {
            f.write_str(", maybe-live-out")?;
        }
        if self.is_preallocated_temp_buffer() {
            f.write_str(", preallocated-temp")?;
        }
        f.write_str(":")?;
        for (position, slice) in &self.assigned {
            write!(f, "\n value: {position} offset {} size {}", slice.offset, slice.size)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BufferAssignment {
    allocations: Vec<BufferAllocation>,
    value_slices: HashMap<HloPosition, Slice>,
    /// Positions of buffer-forwarding instructions and the values they may hold.
    aliases: HashMap<HloPosition, SmallVec<[HloPosition; 2]>>,
}

impl BufferAssignment {
    pub fn builder() -> BufferAssignmentBuilder {
        BufferAssignmentBuilder::default()
    }

    pub fn allocations(&self) -> &[BufferAllocation] {
        &self.allocations
    }

    pub fn allocation(&self, index: AllocationIndex) -> Result<&BufferAllocation> {
        self.allocations.get(index).context(UnknownAllocationSnafu { index })
    }

    /// Values the position may hold at run time.
    pub fn values_at(&self, position: &HloPosition) -> SmallVec<[HloPosition; 2]> {
        let mut values = SmallVec::new();
        if self.value_slices.contains_key(position) {
            values.push(position.clone());
        }
        if let Some(aliased) = self.aliases.get(position) {
            for value in aliased {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        values
    }

    pub fn has_slice(&self, instruction: HloId, index: &ShapeIndex) -> bool {
        self.get_unique_slice(instruction, index).is_ok()
    }

    /// The one slice every value at the position lives in.
    pub fn get_unique_slice(&self, instruction: HloId, index: &ShapeIndex) -> Result<Slice> {
        let position = HloPosition { instruction, index: index.clone() };
        let values = self.values_at(&position);
        let mut slices: Vec<Slice> = values.iter().filter_map(|value| self.value_slices.get(value).copied()).collect();
        slices.sort();
        slices.dedup();
        match slices.as_slice() {
            [] => NoSliceSnafu { position }.fail(),
            [slice] => Ok(*slice),
            _ => AmbiguousSliceSnafu { position, slices }.fail(),
        }
    }

    pub fn get_unique_top_level_slice(&self, instruction: HloId) -> Result<Slice> {
        self.get_unique_slice(instruction, &ShapeIndex::root())
    }

    /// Allocations in entry-signature order.
    ///
    /// Parameters come first, ordered by parameter number and then by the
    /// position inside the parameter; the remaining allocations keep their
    /// index order. Thread-local allocations are not part of the signature.
    pub fn ordered_allocations(&self) -> Vec<&BufferAllocation> {
        let mut ordered: Vec<&BufferAllocation> =
            self.allocations.iter().filter(|allocation| !allocation.is_thread_local()).collect();
        ordered.sort_by(|a, b| match (&a.parameter, &b.parameter) {
            (Some(lhs), Some(rhs)) => lhs.cmp(rhs),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        ordered
    }

    /// Checks that constants and constant allocations pair up one to one.
    ///
    /// [`BufferAssignmentBuilder::assign`] sees positions only, so it cannot
    /// tell a constant from any other value. Every [`HloOpcode::Constant`] in
    /// `computation` must live in a constant allocation, and every constant
    /// allocation must hold exactly one value, defined by a constant.
    pub fn verify_constants(&self, computation: &HloComputation) -> Result<()> {
        for instruction in computation.instructions() {
            if instruction.opcode != HloOpcode::Constant {
                continue;
            }
            let position = HloPosition::top_level(instruction.id);
            let slice = *self.value_slices.get(&position).context(NoSliceSnafu { position: position.clone() })?;
            let allocation = self.allocation(slice.allocation)?;
            ensure!(
                allocation.is_constant,
                ConstantOutsideConstantAllocationSnafu { position, allocation: allocation.index }
            );
        }

        for allocation in self.allocations.iter().filter(|allocation| allocation.is_constant) {
            let [(position, _)] = allocation.assigned.as_slice() else {
                let count = allocation.assigned.len();
                return ConstantAllocationValueCountSnafu { allocation: allocation.index, count }.fail();
            };
            let defining = computation.instruction(position.instruction).context(HloSnafu)?;
            ensure!(
                defining.opcode == HloOpcode::Constant,
                NonConstantInConstantAllocationSnafu { allocation: allocation.index, position: position.clone() }
            );
        }
        Ok(())
    }

    pub fn total_allocation_bytes(&self) -> usize {
        self.allocations.iter().map(BufferAllocation::size).sum()
    }

    /// Human-readable dump of every allocation and the values it holds.
    pub fn to_verbose_string(&self) -> String {
        let mut out = String::new();
        let (count, bytes) = (self.allocations.len(), self.total_allocation_bytes());
        let _ = writeln!(out, "BufferAssignment: {count} allocations, {bytes} bytes");
        for allocation in &self.allocations {
            let _ = writeln!(out, "{allocation}");
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct BufferAssignmentBuilder {
    allocations: Vec<BufferAllocation>,
    value_slices: HashMap<HloPosition, Slice>,
    aliases: HashMap<HloPosition, SmallVec<[HloPosition; 2]>>,
}

#[bon]
impl BufferAssignmentBuilder {
    /// Creates a new allocation and returns its index.
    #[builder]
    pub fn allocation(
        &mut self,
        size: usize,
        /// `(parameter_number, param_shape_index)` for entry parameters.
        parameter: Option<(usize, ShapeIndex)>,
        #[builder(default)] is_constant: bool,
        #[builder(default)] is_thread_local: bool,
        #[builder(default)] maybe_live_out: bool,
    ) -> AllocationIndex {
        let index = self.allocations.len();
        self.allocations.push(BufferAllocation {
            index,
            size,
            parameter,
            is_constant,
            is_thread_local,
            maybe_live_out,
            assigned: Vec::new(),
        });
        index
    }
}

impl BufferAssignmentBuilder {
    /// Assigns the value defined at `position` to `slice`.
    pub fn assign(&mut self, position: HloPosition, slice: Slice) -> Result<()> {
        let allocation =
            self.allocations.get_mut(slice.allocation).context(UnknownAllocationSnafu { index: slice.allocation })?;
        ensure!(
            slice.offset.checked_add(slice.size).is_some_and(|end| end <= allocation.size),
            InvalidSliceSnafu { slice, allocation_size: allocation.size }
        );
        if let Some(existing) = self.value_slices.get(&position) {
            return ValueAlreadyAssignedSnafu { position, slice: *existing }.fail();
        }
        if allocation.is_constant {
            if let Some((existing, _)) = allocation.assigned.first() {
                return ConstantAllocationSharedSnafu {
                    allocation: allocation.index,
                    existing: existing.clone(),
                    position,
                }
                .fail();
            }
            ensure!(
                slice.offset == 0 && slice.size == allocation.size,
                ConstantSliceMismatchSnafu { slice, allocation_size: allocation.size }
            );
        }

        allocation.assigned.push((position.clone(), slice));
        self.value_slices.insert(position, slice);
        Ok(())
    }

    /// Records that `position` (of a buffer-forwarding instruction) may hold `value`.
    pub fn add_alias(&mut self, position: HloPosition, value: HloPosition) {
        let entry = self.aliases.entry(position).or_default();
        if !entry.contains(&value) {
            entry.push(value);
        }
    }

    pub fn build(self) -> BufferAssignment {
        BufferAssignment { allocations: self.allocations, value_slices: self.value_slices, aliases: self.aliases }
    }
}
