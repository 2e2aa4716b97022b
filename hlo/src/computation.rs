//! Append-only computations.
//!
//! An instruction can only name operands that were added before it, so the
//! insertion order of a computation is always a valid post order.

use std::fmt;

use kiln_shape::Shape;
use smallvec::SmallVec;
use snafu::{OptionExt, ResultExt, ensure};

use crate::error::*;
use crate::instruction::{HloId, HloInstruction, HloOpcode};

#[derive(Debug, Clone)]
pub struct HloComputation {
    name: String,
    instructions: Vec<HloInstruction>,
    parameters: Vec<HloId>,
    root: HloId,
}

impl HloComputation {
    pub fn builder(name: impl Into<String>) -> HloComputationBuilder {
        HloComputationBuilder { name: name.into(), instructions: Vec::new(), parameters: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instruction(&self, id: HloId) -> Result<&HloInstruction> {
        self.instructions.get(id.index()).context(UnknownInstructionSnafu { id })
    }

    /// Instructions in insertion order (a post order of the dataflow graph).
    pub fn instructions(&self) -> &[HloInstruction] {
        &self.instructions
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn root(&self) -> HloId {
        self.root
    }

    pub fn root_instruction(&self) -> &HloInstruction {
        &self.instructions[self.root.index()]
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameter_instruction(&self, parameter_number: usize) -> Option<&HloInstruction> {
        self.parameters.get(parameter_number).map(|id| &self.instructions[id.index()])
    }

    pub fn parameter_instructions(&self) -> impl Iterator<Item = &HloInstruction> {
        self.parameters.iter().map(|id| &self.instructions[id.index()])
    }

    /// Users of every instruction, indexed by [`HloId::index`].
    pub fn users(&self) -> Vec<SmallVec<[HloId; 2]>> {
        let mut users = vec![SmallVec::new(); self.instructions.len()];
        for instruction in &self.instructions {
            for &operand in &instruction.operands {
                let entry: &mut SmallVec<[HloId; 2]> = &mut users[operand.index()];
                if !entry.contains(&instruction.id) {
                    entry.push(instruction.id);
                }
            }
        }
        users
    }
}

impl fmt::Display for HloComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {{", self.name)?;
        for instruction in &self.instructions {
            let marker = if instruction.id == self.root { "ROOT " } else { "" };
            writeln!(f, "  {marker}{instruction}")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug)]
pub struct HloComputationBuilder {
    name: String,
    instructions: Vec<HloInstruction>,
    parameters: Vec<(usize, HloId)>,
}

impl HloComputationBuilder {
    fn push(
        &mut self,
        name: impl Into<String>,
        opcode: HloOpcode,
        shape: Shape,
        operands: &[HloId],
        configure: impl FnOnce(&mut HloInstruction),
    ) -> Result<HloId> {
        let name = name.into();
        for &operand in operands {
            ensure!(operand.index() < self.instructions.len(), UnknownOperandSnafu { name: name.clone(), operand });
        }
        let id = HloId(self.instructions.len() as u32);
        let mut instruction = HloInstruction {
            id,
            name,
            opcode,
            shape,
            operands: SmallVec::from_slice(operands),
            parameter_number: None,
            tuple_index: None,
            custom_call_target: None,
        };
        configure(&mut instruction);
        self.instructions.push(instruction);
        Ok(id)
    }

    pub fn add_instruction(
        &mut self,
        name: impl Into<String>,
        opcode: HloOpcode,
        shape: Shape,
        operands: &[HloId],
    ) -> Result<HloId> {
        self.push(name, opcode, shape, operands, |_| ())
    }

    pub fn add_parameter(&mut self, parameter_number: usize, name: impl Into<String>, shape: Shape) -> Result<HloId> {
        ensure!(
            self.parameters.iter().all(|(number, _)| *number != parameter_number),
            DuplicateParameterSnafu { parameter_number }
        );
        let id = self.push(name, HloOpcode::Parameter, shape, &[], |instruction| {
            instruction.parameter_number = Some(parameter_number);
        })?;
        self.parameters.push((parameter_number, id));
        Ok(id)
    }

    pub fn add_constant(&mut self, name: impl Into<String>, shape: Shape) -> Result<HloId> {
        self.push(name, HloOpcode::Constant, shape, &[], |_| ())
    }

    pub fn add_get_tuple_element(&mut self, name: impl Into<String>, operand: HloId, index: usize) -> Result<HloId> {
        let operand_shape = self
            .instructions
            .get(operand.index())
            .map(|instruction| instruction.shape.clone())
            .context(UnknownInstructionSnafu { id: operand })?;
        let shape = operand_shape
            .subshape(&kiln_shape::ShapeIndex::from([index]))
            .context(ShapeSnafu)?
            .clone();
        self.push(name, HloOpcode::GetTupleElement, shape, &[operand], |instruction| {
            instruction.tuple_index = Some(index);
        })
    }

    pub fn add_tuple(&mut self, name: impl Into<String>, elements: &[HloId]) -> Result<HloId> {
        let mut shapes = Vec::with_capacity(elements.len());
        for &element in elements {
            let instruction = self.instructions.get(element.index()).context(UnknownInstructionSnafu { id: element })?;
            shapes.push(instruction.shape.clone());
        }
        self.push(name, HloOpcode::Tuple, Shape::Tuple(shapes), elements, |_| ())
    }

    pub fn add_custom_call(
        &mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        shape: Shape,
        operands: &[HloId],
    ) -> Result<HloId> {
        let target = target.into();
        self.push(name, HloOpcode::CustomCall, shape, operands, |instruction| {
            instruction.custom_call_target = Some(target);
        })
    }

    /// Finishes the computation with the last added instruction as root.
    pub fn build(self) -> Result<HloComputation> {
        let root = self.instructions.last().map(|instruction| instruction.id);
        let root = root.context(EmptyComputationSnafu { name: self.name.clone() })?;
        self.build_with_root(root)
    }

    pub fn build_with_root(self, root: HloId) -> Result<HloComputation> {
        ensure!(!self.instructions.is_empty(), EmptyComputationSnafu { name: self.name.clone() });
        ensure!(root.index() < self.instructions.len(), UnknownInstructionSnafu { id: root });

        let mut parameters = self.parameters;
        parameters.sort_by_key(|(number, _)| *number);
        for (expected, (number, _)) in parameters.iter().enumerate() {
            ensure!(*number == expected, MissingParameterSnafu { parameter_number: expected });
        }

        Ok(HloComputation {
            name: self.name,
            instructions: self.instructions,
            parameters: parameters.into_iter().map(|(_, id)| id).collect(),
            root,
        })
    }
}
