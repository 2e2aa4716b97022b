use std::fmt;

use kiln_shape::Shape;
use smallvec::SmallVec;

/// Identity of an instruction inside its computation.
///
/// Ids are assigned densely in insertion order, so they also index the
/// computation's instruction table and compare in topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HloId(pub u32);

impl HloId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HloId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumIter, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum HloOpcode {
    Parameter,
    Constant,
    Bitcast,
    Tuple,
    GetTupleElement,
    Copy,
    Broadcast,
    Transpose,
    Reshape,
    Add,
    Subtract,
    Multiply,
    Negate,
    Exp,
    Reduce,
    Dot,
    Convolution,
    Fusion,
    CustomCall,
    Rng,
    RngGetAndUpdateState,
    AllReduce,
    AllReduceStart,
    AllReduceDone,
}

impl HloOpcode {
    pub const fn is_rng(&self) -> bool {
        matches!(self, Self::Rng | Self::RngGetAndUpdateState)
    }

    /// Ops that only rename or regroup existing buffers.
    pub const fn is_buffer_forwarding(&self) -> bool {
        matches!(self, Self::Bitcast | Self::Tuple | Self::GetTupleElement)
    }
}

/// Custom-call target implemented as a library matrix multiplication.
pub const GEMM_CUSTOM_CALL_TARGET: &str = "__kiln$gemm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HloInstruction {
    pub id: HloId,
    pub name: String,
    pub opcode: HloOpcode,
    pub shape: Shape,
    pub operands: SmallVec<[HloId; 2]>,
    /// Set for [`HloOpcode::Parameter`].
    pub parameter_number: Option<usize>,
    /// Set for [`HloOpcode::GetTupleElement`].
    pub tuple_index: Option<usize>,
    /// Set for [`HloOpcode::CustomCall`].
    pub custom_call_target: Option<String>,
}

impl HloInstruction {
    /// Matrix multiplications are candidates for running on a side stream.
    pub fn is_gemm(&self) -> bool {
        match self.opcode {
            HloOpcode::Dot | HloOpcode::Convolution => true,
            HloOpcode::CustomCall => self.custom_call_target.as_deref() == Some(GEMM_CUSTOM_CALL_TARGET),
            _ => false,
        }
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }
}

impl fmt::Display for HloInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{} = {} {}(", self.name, self.shape, self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{operand}")?;
        }
        f.write_str(")")?;
        if let Some(number) = self.parameter_number {
            write!(f, ", parameter_number={number}")?;
        }
        if let Some(index) = self.tuple_index {
            write!(f, ", index={index}")?;
        }
        if let Some(target) = &self.custom_call_target {
            write!(f, ", custom_call_target=\"{target}\"")?;
        }
        Ok(())
    }
}
