//! Gradient sculpting: training small image-to-image networks with a
//! composite loss whose terms shape the output instead of merely
//! reproducing the target. CPU only, cooperative, deterministic.
//!
//! # Features
//!
//! - **Tape-based auto-grad** — Eager tensor operations record onto a
//! tape; [Variable::backward] replays it in reverse to accumulate
//! gradients into every trainable parameter. Operations without a
//! derivative, like [argsort](Variable::argsort), fail the backward
//! pass with a typed error instead of producing silent nonsense.
//!
//! - **Zero-copy views** — Slicing, reshaping and transposition
//! restride the underlying buffer without copying, so neighbor
//! differencing for the smoothness term costs no pixel data.
//!
//! - **Composite losses** — Reconstruction, smoothness, directional
//! and distribution terms, mixed by per-architecture weight tables.
//! A zero weight disables its term entirely.
//!
//! - **Cooperative training** — [Trainer] performs exactly one step
//! per call, so a render loop can interleave frames with training
//! without threads. Allocation scopes account for every tensor buffer;
//! a completed step leaves only parameters and optimizer moments
//! behind.
//!
//! - **Determinism** — All randomness flows from an explicit seed.
//! Two equally seeded sessions train identically.
//!
//! # Example
//!
//! ```
//! use sculpt::{ Geometry, Trainer, TrainingSession };
//!
//! let session = TrainingSession::<f32>::seeded(Geometry::new(8, 8), "compression", 0.01, 42)
//!   .unwrap();
//! let mut trainer = Trainer::new(session, ());
//!
//! let report = trainer.step().unwrap();
//! assert_eq!(report.step, 1);
//! ```

mod internal;
mod shape;
mod tensor;
mod variable;
mod error;
mod scope;

pub mod scalar;
pub mod model;
pub mod loss;
pub mod optimize;
pub mod trainer;

pub use error::{ Error, Result };
pub use shape::Shape;
pub use tensor::Tensor;
pub use variable::{ Variable, UnaryOp, BinaryOp };
pub use scope::{ with_scope, live_buffers };
pub use model::{ Architecture, Geometry, Model };
pub use loss::{ CompositeLoss, TermWeights };
pub use optimize::{ Optimizer, Strategy, Adam, SGD };
pub use trainer::{ Trainer, TrainingSession, TrainerState, StepReport, Presenter };
