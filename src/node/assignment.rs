// src/node/assignment.rs

//! Assignment overrides.

use crate::errors::PlanError;
use crate::node::{NodeKind, NodeRef};

/// "Wherever `target` would be used, substitute `value` instead."
///
/// Targets are parameters or executables; values are literal values or
/// executables. The value of one assignment may itself be the target of
/// another, in which case resolution follows the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    target: NodeRef,
    value: NodeRef,
}

impl Assignment {
    pub fn new(target: NodeRef, value: NodeRef) -> Result<Self, PlanError> {
        if !matches!(target.kind(), NodeKind::Parameter | NodeKind::Executable) {
            return Err(PlanError::InvalidAssignment(format!(
                "target '{}' is a {}; only parameters and executables can be assigned",
                target.label(),
                target.kind()
            )));
        }

        if !matches!(value.kind(), NodeKind::Value | NodeKind::Executable) {
            return Err(PlanError::InvalidAssignment(format!(
                "value '{}' is a {}; only values and executables can be assigned",
                value.label(),
                value.kind()
            )));
        }

        Ok(Self { target, value })
    }

    pub fn target(&self) -> &NodeRef {
        &self.target
    }

    pub fn value(&self) -> &NodeRef {
        &self.value
    }
}
