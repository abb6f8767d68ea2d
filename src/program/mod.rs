// src/program/mod.rs

//! Program data model.
//!
//! - [`op`] holds the immutable operation tree.
//! - [`effect`] holds effects and the structural predicates over them.
//! - [`state`] holds the program definition and its persisted progress.
//! - [`validate`] checks operation trees and persisted effects.

pub mod effect;
pub mod op;
pub mod state;
pub mod validate;

pub use effect::{is_complete_when_effective, is_terminal, ActionEffect};
pub use op::{ActionOp, AmountFor};
pub use state::{ActionProgram, CompleteMessage, ProgramState, NEVER};
pub use validate::{validate_effect, validate_op};
