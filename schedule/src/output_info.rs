//! Per-position description of where an executable's result lives.

use std::collections::BTreeMap;

use kiln_hlo::{AliasedParameter, HloModule, HloOpcode};
use kiln_shape::{ShapeIndex, for_each_subshape};
use snafu::{OptionExt, ResultExt, ensure};

use crate::buffer_assignment::{AllocationIndex, BufferAssignment};
use crate::error::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// Allocation holding this output position.
    pub allocation_index: AllocationIndex,
    /// The output is an entry parameter returned unchanged.
    pub passthrough: bool,
    /// Parameter this output may or must reuse.
    pub alias_config: Option<AliasedParameter>,
}

/// Derives the output description of every position of the root's shape.
///
/// Each position must hold exactly one value, and that value must start its
/// allocation.
pub fn get_output_info(module: &HloModule, assignment: &BufferAssignment) -> Result<BTreeMap<ShapeIndex, OutputInfo>> {
    let computation = module.entry_computation();
    let root = computation.root_instruction();

    let mut positions = Vec::new();
    for_each_subshape(&root.shape, |index, _| positions.push(index.clone()));

    let mut output = BTreeMap::new();
    for index in positions {
        let position = crate::HloPosition::new(root.id, index.clone());
        let values = assignment.values_at(&position);
        ensure!(values.len() <= 1, AmbiguousRootSnafu { index: index.clone() });
        let value = values.into_iter().next().context(NoSliceSnafu { position })?;

        let source = computation.instruction(value.instruction).context(HloSnafu)?;
        let slice = assignment.get_unique_slice(value.instruction, &value.index)?;
        ensure!(slice.offset == 0, OutputSliceOffsetSnafu { index: index.clone(), slice });

        let info = OutputInfo {
            allocation_index: slice.allocation,
            passthrough: source.opcode == HloOpcode::Parameter,
            alias_config: module.input_output_alias_config().get_aliased_parameter(&index).cloned(),
        };
        output.insert(index, info);
    }
    Ok(output)
}
