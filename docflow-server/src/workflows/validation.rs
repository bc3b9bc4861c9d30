//! # Type-Flow Validation
//!
//! A step list is valid when the document type flowing through it stays
//! consistent: grouping steps by sequence number, every member of the
//! group at position `k` must accept the expected input type `T_{k-1}`,
//! where `T_0` is the workflow's document type.
//!
//! The expected type advances through a singleton group to that plugin's
//! declared output type. A parallel group (or a plugin with no declared
//! output) leaves the expected type unchanged: chaining past a fan-out
//! falls back to the previous type, and steps that cannot accept it are
//! rejected.

use std::collections::BTreeMap;

use docflow_sdk::workflow::WorkflowStep;

use crate::plugins::registry::PluginRegistry;

/// A step whose plugin cannot accept the type flowing into its position.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowError {
    pub sequence_number: u32,
    pub plugin_name: String,
    pub expected_input: String,
    pub accepts: Vec<String>,
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "step {} ({}) expects one of [{}], but the flow at that position carries '{}'",
            self.sequence_number,
            self.plugin_name,
            self.accepts.join(", "),
            self.expected_input
        )
    }
}

/// Validate a whole step list against the root document type. Steps whose
/// plugin is unknown to the registry are skipped (the resolver drops them
/// at read time); known plugins must fit the flow.
pub fn validate_flow(
    steps: &[WorkflowStep],
    root_type: &str,
    registry: &PluginRegistry,
) -> Result<(), FlowError> {
    let mut expected = root_type.to_string();

    for (_, group) in group_by_sequence(steps) {
        let mut outputs: Vec<Option<String>> = Vec::new();

        for step in &group {
            let Some(metadata) = registry.metadata(&step.plugin_name) else {
                continue;
            };

            if !metadata.accepts(&expected) {
                return Err(FlowError {
                    sequence_number: step.sequence_number,
                    plugin_name: step.plugin_name.clone(),
                    expected_input: expected,
                    accepts: metadata.input_types,
                });
            }
            outputs.push(metadata.output_type);
        }

        // Only a singleton group with a declared output advances the type.
        if outputs.len() == 1 {
            if let Some(output) = outputs.into_iter().next().flatten() {
                expected = output;
            }
        }
    }

    Ok(())
}

/// The input type a step inserted at `sequence_number` would have to
/// accept, given the existing steps.
pub fn expected_input_at(
    steps: &[WorkflowStep],
    root_type: &str,
    sequence_number: u32,
    registry: &PluginRegistry,
) -> String {
    let mut expected = root_type.to_string();

    for (seq, group) in group_by_sequence(steps) {
        if seq >= sequence_number {
            break;
        }

        let outputs: Vec<Option<String>> = group
            .iter()
            .filter_map(|step| registry.metadata(&step.plugin_name))
            .filter(|m| m.accepts(&expected))
            .map(|m| m.output_type)
            .collect();

        if outputs.len() == 1 {
            if let Some(output) = outputs.into_iter().next().flatten() {
                expected = output;
            }
        }
    }

    expected
}

fn group_by_sequence(steps: &[WorkflowStep]) -> BTreeMap<u32, Vec<&WorkflowStep>> {
    let mut groups: BTreeMap<u32, Vec<&WorkflowStep>> = BTreeMap::new();
    for step in steps {
        groups.entry(step.sequence_number).or_default().push(step);
    }
    groups
}
