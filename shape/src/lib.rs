//! Element types, array/tuple shapes and trees keyed by shape index.
//!
//! A [`Shape`] is either a dense array of a [`PrimitiveType`] or a tuple of
//! nested shapes. Positions inside a nested tuple are addressed by a
//! [`ShapeIndex`] (the path of tuple element numbers from the root), and
//! [`ShapeTree`] stores one value per such position.

pub mod error;
pub mod index;
pub mod tree;


use std::fmt;

use smallvec::SmallVec;
use snafu::OptionExt;

pub use error::{Error, Result};
pub use index::ShapeIndex;
pub use tree::{ShapeTree, for_each_subshape};

/// Size in bytes of one entry of a tuple's top-level pointer table.
pub const POINTER_SIZE: usize = 8;

/// Element types of array shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveType {
    Pred,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F16,
    Bf16,
    F32,
    F64,
    C64,
    C128,
    /// Opaque handle used to order side effects; has no storage.
    Token,
}

impl PrimitiveType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Pred | Self::S8 | Self::U8 => 1,
            Self::S16 | Self::U16 | Self::F16 | Self::Bf16 => 2,
            Self::S32 | Self::U32 | Self::F32 => 4,
            Self::S64 | Self::U64 | Self::F64 | Self::C64 => 8,
            Self::C128 => 16,
            Self::Token => 0,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F16 | Self::Bf16 | Self::F32 | Self::F64)
    }

    pub const fn is_integral(&self) -> bool {
        matches!(self, Self::S8 | Self::S16 | Self::S32 | Self::S64 | Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }
}

/// Array or (possibly nested) tuple shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Array { element_type: PrimitiveType, dimensions: SmallVec<[usize; 4]> },
    Tuple(Vec<Shape>),
}

impl Shape {
    pub fn array(element_type: PrimitiveType, dimensions: &[usize]) -> Self {
        Self::Array { element_type, dimensions: SmallVec::from_slice(dimensions) }
    }

    pub fn scalar(element_type: PrimitiveType) -> Self {
        Self::Array { element_type, dimensions: SmallVec::new() }
    }

    pub fn tuple(elements: impl IntoIterator<Item = Shape>) -> Self {
        Self::Tuple(elements.into_iter().collect())
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Self::Tuple(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    pub fn element_type(&self) -> Option<PrimitiveType> {
        match self {
            Self::Array { element_type, .. } => Some(*element_type),
            Self::Tuple(_) => None,
        }
    }

    pub fn dimensions(&self) -> &[usize] {
        match self {
            Self::Array { dimensions, .. } => dimensions,
            Self::Tuple(_) => &[],
        }
    }

    pub fn tuple_shapes(&self) -> &[Shape] {
        match self {
            Self::Tuple(elements) => elements,
            Self::Array { .. } => &[],
        }
    }

    /// Number of elements of an array shape; zero for tuples.
    pub fn element_count(&self) -> usize {
        match self {
            Self::Array { dimensions, .. } => dimensions.iter().product(),
            Self::Tuple(_) => 0,
        }
    }

    /// Bytes needed to hold the top level of this shape.
    ///
    /// Arrays are dense; tuples hold one pointer per element.
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Array { element_type, .. } => self.element_count() * element_type.bytes(),
            Self::Tuple(elements) => elements.len() * POINTER_SIZE,
        }
    }

    /// Shape at `index`, descending through tuple elements.
    pub fn subshape(&self, index: &ShapeIndex) -> Result<&Shape> {
        let mut current = self;
        for &i in index.iter() {
            current = current
                .tuple_shapes()
                .get(i)
                .context(error::InvalidShapeIndexSnafu { index: index.clone(), shape: self.to_string() })?;
        }
        Ok(current)
    }

    pub fn is_valid_index(&self, index: &ShapeIndex) -> bool {
        self.subshape(index).is_ok()
    }

    /// Number of non-tuple positions in this shape.
    pub fn leaf_count(&self) -> usize {
        let mut stack = vec![self];
        let mut count = 0;
        while let Some(shape) = stack.pop() {
            match shape {
                Self::Array { .. } => count += 1,
                Self::Tuple(elements) => stack.extend(elements.iter()),
            }
        }
        count
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array { element_type, dimensions } => {
                write!(f, "{element_type}[")?;
                for (i, d) in dimensions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{d}")?;
                }
                f.write_str("]")
            }
            Self::Tuple(elements) => {
                f.write_str("(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str(")")
            }
        }
    }
}
