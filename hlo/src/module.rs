use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::alias::HloInputOutputAliasConfig;
use crate::computation::HloComputation;
use crate::sequence::HloInstructionSequence;

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct HloModule {
    name: String,
    unique_id: u64,
    entry: HloComputation,
    input_output_alias_config: HloInputOutputAliasConfig,
    schedule: Option<HloInstructionSequence>,
}

impl HloModule {
    pub fn new(name: impl Into<String>, entry: HloComputation) -> Self {
        Self {
            name: name.into(),
            unique_id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
            entry,
            input_output_alias_config: HloInputOutputAliasConfig::default(),
            schedule: None,
        }
    }

    pub fn with_alias_config(mut self, config: HloInputOutputAliasConfig) -> Self {
        self.input_output_alias_config = config;
        self
    }

    pub fn with_schedule(mut self, schedule: HloInstructionSequence) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn entry_computation(&self) -> &HloComputation {
        &self.entry
    }

    pub fn input_output_alias_config(&self) -> &HloInputOutputAliasConfig {
        &self.input_output_alias_config
    }

    /// The externally supplied instruction order, if the module was scheduled.
    pub fn schedule(&self) -> Option<&HloInstructionSequence> {
        self.schedule.as_ref()
    }

    pub fn result_shape(&self) -> &kiln_shape::Shape {
        &self.entry.root_instruction().shape
    }
}

impl fmt::Display for HloModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HloModule {}, input_output_alias={}", self.name, self.input_output_alias_config)?;
        write!(f, "ENTRY {}", self.entry)
    }
}
