//! Verification claims and digest matching.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::RunnerError;

/// How claimed input digests are matched against materialized inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputOrder {
    /// Same digests with the same multiplicity, any order.
    #[default]
    Unordered,
    /// Claimed digest `i` must be the digest of argument file `i`.
    Positional,
}

/// Digests the requester committed to before asking for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationClaim {
    /// Expected SHA-256 hex digest of the algorithm.
    pub algorithm: String,
    /// Expected SHA-256 hex digests of the inputs.
    pub inputs: Vec<String>,
    /// Matching mode for `inputs`.
    #[serde(default)]
    pub order: InputOrder,
}

impl VerificationClaim {
    /// Claim matched without regard to input order.
    pub fn new(algorithm: impl Into<String>, inputs: Vec<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            inputs,
            order: InputOrder::Unordered,
        }
    }

    /// Same claim with a different matching mode.
    pub fn with_order(mut self, order: InputOrder) -> Self {
        self.order = order;
        self
    }

    /// Check materialized digests against this claim.
    ///
    /// Claimed digests are compared case-insensitively; materialized digests
    /// are always lowercase.
    pub(crate) fn check(
        &self,
        algorithm_digest: &str,
        input_digests: &[String],
    ) -> Result<(), RunnerError> {
        if !self.algorithm.eq_ignore_ascii_case(algorithm_digest) {
            return Err(RunnerError::AlgorithmMismatch {
                expected: self.algorithm.clone(),
                actual: algorithm_digest.to_owned(),
            });
        }

        if self.inputs.len() != input_digests.len() {
            return Err(RunnerError::InputCountMismatch {
                expected: self.inputs.len(),
                actual: input_digests.len(),
            });
        }

        match self.order {
            InputOrder::Positional => {
                for (index, (expected, actual)) in self.inputs.iter().zip(input_digests).enumerate()
                {
                    if !expected.eq_ignore_ascii_case(actual) {
                        return Err(RunnerError::InputOrderMismatch {
                            index,
                            expected: expected.clone(),
                            actual: actual.clone(),
                        });
                    }
                }
            }
            InputOrder::Unordered => {
                let mut remaining: HashMap<&str, usize> = HashMap::new();
                for digest in input_digests {
                    let count = remaining.entry(digest.as_str()).or_default();
                    *count = count.saturating_add(1);
                }
                for expected in &self.inputs {
                    let key = expected.to_ascii_lowercase();
                    match remaining.get_mut(key.as_str()) {
                        Some(count) if *count > 0 => *count = count.saturating_sub(1),
                        _ => {
                            return Err(RunnerError::InputSetMismatch {
                                digest: expected.clone(),
                            })
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
