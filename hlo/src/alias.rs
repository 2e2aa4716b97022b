//! Output-to-parameter aliasing contract of a module.
//!
//! An entry says that the output position `output_index` may (or must) reuse
//! the storage of parameter `parameter_number` at `parameter_index`.

use std::collections::BTreeMap;
use std::fmt;

use kiln_shape::{Shape, ShapeIndex};
use snafu::ensure;

use crate::error::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasKind {
    /// The output may reuse the parameter buffer if the caller donates it.
    MayAlias,
    /// The caller must donate the parameter buffer.
    MustAlias,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasedParameter {
    pub parameter_number: usize,
    pub parameter_index: ShapeIndex,
    pub kind: AliasKind,
}

impl AliasedParameter {
    pub fn must_alias(&self) -> bool {
        self.kind == AliasKind::MustAlias
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HloInputOutputAliasConfig {
    aliases: BTreeMap<ShapeIndex, AliasedParameter>,
}

impl HloInputOutputAliasConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers that `output_index` aliases `(parameter_number, parameter_index)`.
    ///
    /// Both positions are validated against the shapes they refer to.
    pub fn set_up_alias(
        &mut self,
        output_shape: &Shape,
        output_index: ShapeIndex,
        parameter_shape: &Shape,
        parameter_number: usize,
        parameter_index: ShapeIndex,
        kind: AliasKind,
    ) -> Result<()> {
        ensure!(
            output_shape.is_valid_index(&output_index),
            InvalidAliasIndexSnafu { what: format!("output {output_shape}"), index: output_index }
        );
        ensure!(
            parameter_shape.is_valid_index(&parameter_index),
            InvalidAliasIndexSnafu { what: format!("parameter {parameter_number}"), index: parameter_index }
        );
        ensure!(!self.aliases.contains_key(&output_index), AlreadyAliasedSnafu { output_index });
        self.aliases.insert(output_index, AliasedParameter { parameter_number, parameter_index, kind });
        Ok(())
    }

    pub fn get_aliased_parameter(&self, output_index: &ShapeIndex) -> Option<&AliasedParameter> {
        self.aliases.get(output_index)
    }

    pub fn output_has_alias(&self, output_index: &ShapeIndex) -> bool {
        self.aliases.contains_key(output_index)
    }

    /// Whether the given parameter position is the source of a must-alias entry.
    pub fn parameter_must_alias(&self, parameter_number: usize, parameter_index: &ShapeIndex) -> bool {
        self.aliases.values().any(|alias| {
            alias.must_alias()
                && alias.parameter_number == parameter_number
                && &alias.parameter_index == parameter_index
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ShapeIndex, &AliasedParameter)> {
        self.aliases.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl fmt::Display for HloInputOutputAliasConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (output, alias)) in self.aliases.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let kind = match alias.kind {
                AliasKind::MayAlias => "may-alias",
                AliasKind::MustAlias => "must-alias",
            };
            write!(f, "{output}: ({}, {}, {kind})", alias.parameter_number, alias.parameter_index)?;
        }
        f.write_str("}")
    }
}
