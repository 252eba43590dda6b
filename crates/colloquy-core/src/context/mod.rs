//! Context policy engine: token-budgeted prompt assembly.
//!
//! The compiler takes typed context blocks, allocates the policy's token
//! budget across block kinds, resolves overflow per the configured
//! strategy, and hands the surviving blocks to a renderer.

pub mod compiler;
pub mod estimator;
pub mod policy;
pub mod renderer;
pub mod summarizer;

pub use compiler::{CompiledContext, ContextCompiler};
pub use estimator::{CharEstimator, NoopEstimator, TokenEstimator};
pub use policy::{CompactionConfig, ContextPolicy, KindPriority, OverflowStrategy};
pub use renderer::{PlainRenderer, Prompt, Renderer};
pub use summarizer::HistorySummarizer;
