//! Execution engine and context policy for Colloquy.
//!
//! This crate holds the engine-side logic: the token-budgeted context
//! compiler, the tool-calling execution loop with interrupt/resume, the
//! checkpoint and session store traits, and the event bus. Persistence
//! implementations live in colloquy-infra.

pub mod checkpoint;
pub mod context;
pub mod engine;
pub mod errors;
pub mod event;
pub mod model;
pub mod repository;
pub mod tool;
