use kiln_shape::ShapeIndex;
use snafu::Snafu;

use crate::HloId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Operand must be added to the computation before its users.
    #[snafu(display("instruction '{name}' uses unknown operand {operand}"))]
    UnknownOperand { name: String, operand: HloId },

    #[snafu(display("instruction {id} does not exist"))]
    UnknownInstruction { id: HloId },

    #[snafu(display("parameter {parameter_number} is defined twice"))]
    DuplicateParameter { parameter_number: usize },

    #[snafu(display("parameters must be numbered densely, missing parameter {parameter_number}"))]
    MissingParameter { parameter_number: usize },

    #[snafu(display("computation '{name}' has no instructions"))]
    EmptyComputation { name: String },

    #[snafu(display("output index {output_index} is already aliased"))]
    AlreadyAliased { output_index: ShapeIndex },

    #[snafu(display("alias refers to missing position {index} of {what}"))]
    InvalidAliasIndex { what: String, index: ShapeIndex },

    #[snafu(display("{source}"))]
    Shape { source: kiln_shape::Error },
}
