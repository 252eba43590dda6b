//! Infrastructure layer for Colloquy.
//!
//! Contains SQLite-backed implementations of the storage traits defined in
//! `colloquy-core`: the session repository and the checkpoint store.

pub mod sqlite;
