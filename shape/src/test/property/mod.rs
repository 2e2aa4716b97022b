//! Property-based tests for shapes and shape trees.


#[cfg(test)]
mod tree_props;
