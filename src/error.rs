//! Simulation error types.

use thiserror::Error;

/// Errors surfaced by the simulation core.
///
/// Curve exhaustion is deliberately absent: a module whose age reaches the end
/// of its curve is dead, which is expected terminal behavior rather than a
/// failure path.
#[derive(Debug, Error)]
pub enum SimError {
    /// No buildable or compatible module exists for a request at the given
    /// date. The caller records the unresolved compliance failure and moves
    /// on; this never aborts a run.
    #[error(
        "no buildable module for server model \"{server_model}\" at month {month} \
         (power >= {power_needed:.1}, energy >= {energy_needed:.1})"
    )]
    AllocationExhausted {
        server_model: String,
        month: usize,
        power_needed: f64,
        energy_needed: f64,
    },

    /// Malformed or missing contract limits / catalog rows, detected before a
    /// run starts. A run never begins with an inconsistent configuration.
    #[error("configuration error: {field}: {message}")]
    Configuration { field: String, message: String },
}

impl SimError {
    /// Shorthand for a configuration error with a dotted field path.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }
}
