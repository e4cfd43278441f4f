use thiserror::Error;

use crate::shape::Shape;


/// Errors raised by the training engine.
///
/// All four kinds abort the current training step and are surfaced to
/// the [Trainer](crate::Trainer), which logs them and halts any active
/// auto-run. None of them are retried; they indicate configuration
/// mistakes or structural bugs, not transient conditions.

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
  /// An operation was invoked with incompatible tensor shapes.
  #[error("{op}: incompatible shapes {lhs} and {rhs}")]
  Shape {
    op: &'static str,
    lhs: Shape,
    rhs: Shape,
  },

  /// An operation reachable from a trainable parameter has no
  /// derivative rule. Gradients are never silently zeroed.
  #[error("'{op}' has no derivative rule but is reachable from a trainable parameter")]
  Ungradable {
    op: &'static str,
  },

  /// An unrecognized architecture tag. No fallback is substituted.
  #[error("unrecognized architecture tag '{tag}'")]
  Configuration {
    tag: String,
  },

  /// Optimizer state was applied to a parameter it was not created for.
  #[error("optimizer state was not created for parameter {param}")]
  StateMismatch {
    param: usize,
  },
}


pub type Result<T> = std::result::Result<T, Error>;
