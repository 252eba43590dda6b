//! Event distribution for engine observers.

pub mod bus;

pub use bus::EventBus;
