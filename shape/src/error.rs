use snafu::Snafu;

use crate::ShapeIndex;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Index does not name a position inside the shape.
    #[snafu(display("invalid shape index {index} for shape {shape}"))]
    InvalidShapeIndex { index: ShapeIndex, shape: String },
}
