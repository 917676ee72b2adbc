//! Error taxonomy and invocation types shared across `pg-rotator` crates.

pub mod error;
pub mod protocol;

pub use error::RotationError;
pub use protocol::{RotationEvent, Stage, Step, StepOutcome};
