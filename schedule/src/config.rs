//! Scheduling configuration.
//!
//! Typed configuration with bon builders and environment variable fallbacks.

use bon::bon;

/// Configuration for stream assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamAssignmentConfig {
    /// Put every instruction on the main stream.
    pub disable_multi_streaming: bool,
}

#[bon]
impl StreamAssignmentConfig {
    #[builder]
    pub fn builder(#[builder(default = false)] disable_multi_streaming: bool) -> Self {
        Self { disable_multi_streaming }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_DISABLE_MULTI_STREAMING=1` - Schedule everything on stream 0
    pub fn from_env() -> Self {
        let disable_multi_streaming = std::env::var("KILN_DISABLE_MULTI_STREAMING")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(false);
        Self { disable_multi_streaming }
    }
}
