//! Property-based tests for releasing per-execution buffers.

#[cfg(test)]
mod teardown_props;
