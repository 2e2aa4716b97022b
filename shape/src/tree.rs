//! One value per position of a shape.
//!
//! Nodes are stored flat in pre-order, which coincides with the lexicographic
//! order of their [`ShapeIndex`], so lookups are a binary search. Trees are
//! built with an explicit worklist: nesting depth never grows the call stack.

use snafu::OptionExt;

use crate::error::{InvalidShapeIndexSnafu, Result};
use crate::{Shape, ShapeIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node<T> {
    index: ShapeIndex,
    is_leaf: bool,
    value: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeTree<T> {
    shape: Shape,
    nodes: Vec<Node<T>>,
}

/// Visits every position of `shape` in pre-order.
pub fn for_each_subshape(shape: &Shape, mut f: impl FnMut(&ShapeIndex, &Shape)) {
    let mut stack = vec![(ShapeIndex::root(), shape)];
    while let Some((index, subshape)) = stack.pop() {
        f(&index, subshape);
        // Reverse push keeps element 0 on top of the stack.
        for (i, element) in subshape.tuple_shapes().iter().enumerate().rev() {
            stack.push((index.child(i), element));
        }
    }
}

impl<T> ShapeTree<T> {
    /// Builds a tree whose value at each position is computed by `init`.
    pub fn from_fn(shape: &Shape, mut init: impl FnMut(&ShapeIndex, &Shape) -> T) -> Self {
        let mut nodes = Vec::new();
        for_each_subshape(shape, |index, subshape| {
            nodes.push(Node { index: index.clone(), is_leaf: !subshape.is_tuple(), value: init(index, subshape) });
        });
        Self { shape: shape.clone(), nodes }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    fn position(&self, index: &ShapeIndex) -> Result<usize> {
        self.nodes
            .binary_search_by(|node| node.index.cmp(index))
            .ok()
            .context(InvalidShapeIndexSnafu { index: index.clone(), shape: self.shape.to_string() })
    }

    pub fn element(&self, index: &ShapeIndex) -> Result<&T> {
        let position = self.position(index)?;
        Ok(&self.nodes[position].value)
    }

    pub fn element_mut(&mut self, index: &ShapeIndex) -> Result<&mut T> {
        let position = self.position(index)?;
        Ok(&mut self.nodes[position].value)
    }

    /// Replaces the value at `index`, returning the previous one.
    pub fn replace(&mut self, index: &ShapeIndex, value: T) -> Result<T> {
        Ok(std::mem::replace(self.element_mut(index)?, value))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All positions in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = (&ShapeIndex, &T)> {
        self.nodes.iter().map(|node| (&node.index, &node.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ShapeIndex, &mut T)> {
        self.nodes.iter_mut().map(|node| (&node.index, &mut node.value))
    }

    /// Non-tuple positions in pre-order.
    pub fn leaves(&self) -> impl Iterator<Item = (&ShapeIndex, &T)> {
        self.nodes.iter().filter(|node| node.is_leaf).map(|node| (&node.index, &node.value))
    }

    pub fn leaves_mut(&mut self) -> impl Iterator<Item = (&ShapeIndex, &mut T)> {
        self.nodes.iter_mut().filter(|node| node.is_leaf).map(|node| (&node.index, &mut node.value))
    }

    pub fn into_elements(self) -> impl Iterator<Item = (ShapeIndex, T)> {
        self.nodes.into_iter().map(|node| (node.index, node.value))
    }

    pub fn map<U>(self, mut f: impl FnMut(&ShapeIndex, T) -> U) -> ShapeTree<U> {
        let nodes = self
            .nodes
            .into_iter()
            .map(|node| {
                let value = f(&node.index, node.value);
                Node { index: node.index, is_leaf: node.is_leaf, value }
            })
            .collect();
        ShapeTree { shape: self.shape, nodes }
    }
}

impl<T: Default> ShapeTree<T> {
    pub fn new(shape: &Shape) -> Self {
        Self::from_fn(shape, |_, _| T::default())
    }
}

impl<T: Clone> ShapeTree<T> {
    pub fn filled(shape: &Shape, value: T) -> Self {
        Self::from_fn(shape, |_, _| value.clone())
    }
}
