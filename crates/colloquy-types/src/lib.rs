//! Shared domain types for Colloquy.
//!
//! This crate contains the core domain types used across the Colloquy engine:
//! Session, Message, ContextBlock, Checkpoint, and their associated error types.
//!
//! Zero infrastructure dependencies: only serde, serde_json, uuid, chrono,
//! and thiserror.

pub mod checkpoint;
pub mod context;
pub mod error;
pub mod event;
pub mod interrupt;
pub mod message;
pub mod session;
