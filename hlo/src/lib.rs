//! Dataflow program representation for the kiln backend.
//!
//! The backend consumes an already optimized, already scheduled module: a
//! single entry [`HloComputation`] whose instructions are typed tensor
//! operations with explicit [`Shape`]s, plus the module-level
//! input/output aliasing contract.
//!
//! # Module Organization
//!
//! - [`instruction`] - Instruction identity, opcodes and operands
//! - [`computation`] - Append-only computations (insertion order is topological)
//! - [`module`] - Modules and unique ids
//! - [`alias`] - Output-to-parameter aliasing contract
//! - [`sequence`] - Externally supplied instruction orders
//! - [`reachability`] - Transitive dataflow reachability

pub mod alias;
pub mod computation;
pub mod error;
pub mod instruction;
pub mod module;
pub mod reachability;
pub mod sequence;


pub use alias::{AliasKind, AliasedParameter, HloInputOutputAliasConfig};
pub use computation::{HloComputation, HloComputationBuilder};
pub use error::{Error, Result};
pub use instruction::{GEMM_CUSTOM_CALL_TARGET, HloId, HloInstruction, HloOpcode};
pub use kiln_shape::{PrimitiveType, Shape, ShapeIndex};
pub use module::HloModule;
pub use reachability::HloReachabilityMap;
pub use sequence::HloInstructionSequence;
