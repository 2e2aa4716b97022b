pub mod dependency;
pub mod stream_assignment;
