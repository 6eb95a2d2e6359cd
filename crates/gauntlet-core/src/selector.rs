//! Weighted random choice of workload operations.
//!
//! A scenario declares the mix it wants ("80% put, rest get") once at
//! construction time; every workload thread then draws one operation per
//! iteration from the shared, immutable selector with its own rng.

use std::fmt::Debug;

use rand::Rng;

use crate::error::{HarnessError, HarnessResult};

/// Tolerance for cumulative probability sums.
const PROBABILITY_EPSILON: f64 = 1e-9;

/// Builder for an [`OperationSelector`].
///
/// Declared probabilities must sum to at most 1. The default operation
/// absorbs whatever mass is left; without one the declared probabilities
/// must account for (within epsilon of) the full mass.
#[derive(Debug, Clone)]
pub struct OperationSelectorBuilder<O> {
    weighted: Vec<(O, f64)>,
    default: Option<O>,
}

impl<O: Clone + PartialEq + Debug> OperationSelectorBuilder<O> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            weighted: Vec::new(),
            default: None,
        }
    }

    fn declared_sum(&self) -> f64 {
        self.weighted.iter().map(|(_, p)| p).sum()
    }

    /// Adds an operation with a fixed probability.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the operation was already
    /// added, the probability is outside `(0, 1]`, or the cumulative
    /// declared probability would exceed 1.
    pub fn operation(mut self, operation: O, probability: f64) -> HarnessResult<Self> {
        if self.weighted.iter().any(|(op, _)| *op == operation)
            || self.default.as_ref() == Some(&operation)
        {
            return Err(HarnessError::configuration(format!(
                "operation {operation:?} is already registered"
            )));
        }
        if !(probability > 0.0 && probability <= 1.0) {
            return Err(HarnessError::configuration(format!(
                "probability for {operation:?} must be in (0, 1], got {probability}"
            )));
        }
        if self.declared_sum() + probability > 1.0 + PROBABILITY_EPSILON {
            return Err(HarnessError::configuration(format!(
                "total probability exceeds 1 after adding {operation:?} with {probability}"
            )));
        }
        self.weighted.push((operation, probability));
        Ok(self)
    }

    /// Designates the operation that absorbs the undeclared probability
    /// mass.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a default was already set or
    /// the operation carries a declared weight.
    pub fn default_operation(mut self, operation: O) -> HarnessResult<Self> {
        if self.default.is_some() {
            return Err(HarnessError::configuration(
                "default operation is already set",
            ));
        }
        if self.weighted.iter().any(|(op, _)| *op == operation) {
            return Err(HarnessError::configuration(format!(
                "default operation {operation:?} already has a declared weight"
            )));
        }
        self.default = Some(operation);
        Ok(self)
    }

    /// Builds the immutable selector.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the builder is empty, or when
    /// no default is set and the declared probabilities leave
    /// unreachable mass below 1.
    pub fn build(self) -> HarnessResult<OperationSelector<O>> {
        if self.weighted.is_empty() && self.default.is_none() {
            return Err(HarnessError::configuration("no operations registered"));
        }

        let sum = self.declared_sum();
        let default = match self.default {
            Some(default) => default,
            None => {
                if sum < 1.0 - PROBABILITY_EPSILON {
                    return Err(HarnessError::configuration(format!(
                        "declared probabilities sum to {sum} and no default operation absorbs the rest"
                    )));
                }
                // Weights cover the full mass; the last weighted
                // operation doubles as the float-edge fallback.
                match self.weighted.last() {
                    Some((op, _)) => op.clone(),
                    None => unreachable!("sum close to 1 implies at least one weighted operation"),
                }
            }
        };

        let mut cumulative = 0.0;
        let thresholds = self
            .weighted
            .into_iter()
            .map(|(op, probability)| {
                cumulative += probability;
                (op, cumulative)
            })
            .collect();

        Ok(OperationSelector {
            thresholds,
            default,
        })
    }
}

impl<O: Clone + PartialEq + Debug> Default for OperationSelectorBuilder<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable weighted chooser over a finite operation set.
///
/// Safe to share across threads; callers bring their own rng.
#[derive(Debug, Clone)]
pub struct OperationSelector<O> {
    thresholds: Vec<(O, f64)>,
    default: O,
}

impl<O> OperationSelector<O> {
    /// Draws one operation according to the declared distribution.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &O {
        let draw = rng.gen::<f64>();
        for (operation, threshold) in &self.thresholds {
            if draw < *threshold {
                return operation;
            }
        }
        &self.default
    }
}
