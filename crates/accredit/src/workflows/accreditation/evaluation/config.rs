use serde::{Deserialize, Serialize};

const DEFAULT_MISMATCH_TOLERANCE: f64 = 0.05;

/// Tuning for the compliance evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Relative deviation between a declared and a documented quantity that is
    /// still treated as agreement (0.05 = 5%).
    pub mismatch_tolerance: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            mismatch_tolerance: DEFAULT_MISMATCH_TOLERANCE,
        }
    }
}
