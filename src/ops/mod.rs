//! Periodic maintenance units

pub mod repair;
pub mod verify;

pub use repair::{Reconciler, RepairReport};
pub use verify::{Verifier, VerifyReport};
