//! The execution engine: tool-calling loop, interrupts, delegation.

pub mod delegation;
pub mod dispatch;
pub mod executor;
pub mod interrupt;
pub mod locks;
pub mod registry;

pub use delegation::DelegateTool;
pub use executor::{Executor, ExecutorConfig, ResumeRequest, TurnOutcome, TurnRequest};
pub use interrupt::AskUserTool;
pub use locks::{SessionGuard, SessionLocks};
pub use registry::{AgentDefinition, AgentRegistry};
