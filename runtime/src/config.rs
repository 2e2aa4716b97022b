//! Execution configuration.
//!
//! Typed configuration with bon builders and environment variable fallbacks.

use bon::bon;

fn env_flag(name: &str) -> bool {
    std::env::var(name).ok().is_some_and(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes"))
}

/// Configuration for running an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Block the host until the main stream drains, even when the allocator
    /// could defer deallocation.
    pub force_synchronous: bool,
    /// Verify every resolved buffer against its category's alignment.
    pub check_alignment: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { force_synchronous: false, check_alignment: true }
    }
}

#[bon]
impl ExecutionConfig {
    #[builder]
    pub fn builder(
        #[builder(default = false)] force_synchronous: bool,
        #[builder(default = true)] check_alignment: bool,
    ) -> Self {
        Self { force_synchronous, check_alignment }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_SYNC_EXECUTION=1` - Always block until execution completes
    /// * `KILN_SKIP_ALIGNMENT_CHECK=1` - Do not verify buffer alignment
    pub fn from_env() -> Self {
        Self {
            force_synchronous: env_flag("KILN_SYNC_EXECUTION"),
            check_alignment: !env_flag("KILN_SKIP_ALIGNMENT_CHECK"),
        }
    }
}
