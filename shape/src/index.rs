use std::fmt;
use std::ops::Deref;

use smallvec::SmallVec;

/// Path of tuple element numbers from the root of a shape.
///
/// The empty index names the root. Ordering is lexicographic, so sorting a
/// set of indices yields the pre-order of the positions they name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeIndex(SmallVec<[usize; 4]>);

impl ShapeIndex {
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, element: usize) {
        self.0.push(element);
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.0.pop()
    }

    /// Index of the `element`-th child of this position.
    pub fn child(&self, element: usize) -> Self {
        let mut child = self.clone();
        child.push(element);
        child
    }

    pub fn starts_with(&self, prefix: &ShapeIndex) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Deref for ShapeIndex {
    type Target = [usize];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&[usize]> for ShapeIndex {
    fn from(value: &[usize]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[usize; N]> for ShapeIndex {
    fn from(value: [usize; N]) -> Self {
        Self(SmallVec::from_slice(&value))
    }
}

impl FromIterator<usize> for ShapeIndex {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ShapeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{element}")?;
        }
        f.write_str("}")
    }
}
