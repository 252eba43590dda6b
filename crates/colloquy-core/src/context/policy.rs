//! Context policy: the validated token-budget configuration.
//!
//! A policy is built once, validated at construction, and never mutated.
//! The compiler reads it on every turn.

use colloquy_types::context::BlockKind;

use crate::errors::PolicyError;

/// What the compiler does when demand exceeds the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Fail the turn with `PolicyError::BudgetExceeded`.
    Error,
    /// Drop truncatable blocks, lowest-priority kind first, oldest first.
    Truncate,
    /// Prune stale tool outputs and summarize old history, then truncate
    /// whatever still does not fit.
    Compact,
}

/// Budget rules for one block kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPriority {
    pub kind: BlockKind,
    /// Tokens reserved for this kind before lower-priority kinds are
    /// granted anything.
    pub min_tokens: u32,
    /// Ceiling on tokens granted to this kind.
    pub max_tokens: u32,
    /// Whether overflow handling may drop blocks of this kind. Must be
    /// false for protected kinds.
    pub truncatable: bool,
}

impl KindPriority {
    pub fn new(kind: BlockKind, min_tokens: u32, max_tokens: u32) -> Self {
        Self {
            kind,
            min_tokens,
            max_tokens,
            truncatable: !kind.is_protected(),
        }
    }
}

/// Knobs for the `Compact` overflow strategy.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    /// Drop tool-output blocks beyond `max_tool_outputs` or older than
    /// `max_tool_output_age` before anything else.
    pub prune_tool_outputs: bool,
    pub max_tool_outputs: usize,
    pub max_tool_output_age: chrono::Duration,
    /// Replace the oldest history blocks beyond `max_history_messages`
    /// with a single model-generated summary block.
    pub summarize_history: bool,
    pub max_history_messages: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            prune_tool_outputs: true,
            max_tool_outputs: 10,
            max_tool_output_age: chrono::Duration::minutes(30),
            summarize_history: true,
            max_history_messages: 20,
        }
    }
}

/// Validated, immutable context budget configuration.
///
/// `kind_priorities` is ordered by descending priority: earlier entries
/// are reserved budget first and evicted last.
#[derive(Debug, Clone)]
pub struct ContextPolicy {
    context_window: u32,
    completion_reserve: u32,
    overflow_strategy: OverflowStrategy,
    kind_priorities: Vec<KindPriority>,
    compaction: Option<CompactionConfig>,
}

impl ContextPolicy {
    pub fn new(
        context_window: u32,
        completion_reserve: u32,
        overflow_strategy: OverflowStrategy,
        kind_priorities: Vec<KindPriority>,
        compaction: Option<CompactionConfig>,
    ) -> Result<Self, PolicyError> {
        if context_window == 0 {
            return Err(PolicyError::Invalid("context window must be positive".into()));
        }
        if completion_reserve >= context_window {
            return Err(PolicyError::Invalid(format!(
                "completion reserve {completion_reserve} must be below the context window {context_window}"
            )));
        }
        let budget = context_window - completion_reserve;

        let mut seen = Vec::with_capacity(kind_priorities.len());
        let mut total_min: u64 = 0;
        for priority in &kind_priorities {
            if seen.contains(&priority.kind) {
                return Err(PolicyError::Invalid(format!(
                    "duplicate priority entry for kind '{}'",
                    priority.kind
                )));
            }
            seen.push(priority.kind);

            if priority.max_tokens < priority.min_tokens {
                return Err(PolicyError::Invalid(format!(
                    "kind '{}' has max_tokens below min_tokens",
                    priority.kind
                )));
            }
            if priority.kind.is_protected() && priority.truncatable {
                return Err(PolicyError::Invalid(format!(
                    "protected kind '{}' cannot be truncatable",
                    priority.kind
                )));
            }
            // Truncatable floors can legally be evicted below min_tokens,
            // so only non-truncatable reservations are hard demand.
            if !priority.truncatable {
                total_min += u64::from(priority.min_tokens);
            }
        }
        if total_min > u64::from(budget) {
            return Err(PolicyError::Invalid(format!(
                "non-truncatable minimums ({total_min} tokens) exceed the budget ({budget})"
            )));
        }

        if overflow_strategy == OverflowStrategy::Compact && compaction.is_none() {
            return Err(PolicyError::Invalid(
                "compact overflow strategy requires a compaction config".into(),
            ));
        }

        Ok(Self {
            context_window,
            completion_reserve,
            overflow_strategy,
            kind_priorities,
            compaction,
        })
    }

    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    pub fn completion_reserve(&self) -> u32 {
        self.completion_reserve
    }

    /// Tokens available for prompt content.
    pub fn budget(&self) -> u32 {
        self.context_window - self.completion_reserve
    }

    pub fn overflow_strategy(&self) -> OverflowStrategy {
        self.overflow_strategy
    }

    pub fn kind_priorities(&self) -> &[KindPriority] {
        &self.kind_priorities
    }

    pub fn compaction(&self) -> Option<&CompactionConfig> {
        self.compaction.as_ref()
    }

    pub fn priority_for(&self, kind: BlockKind) -> Option<&KindPriority> {
        self.kind_priorities.iter().find(|p| p.kind == kind)
    }

    /// Whether the policy allows dropping blocks of this kind. Kinds
    /// without a priority entry are truncatable unless protected.
    pub fn kind_truncatable(&self, kind: BlockKind) -> bool {
        if kind.is_protected() {
            return false;
        }
        self.priority_for(kind).map_or(true, |p| p.truncatable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priorities() -> Vec<KindPriority> {
        vec![
            KindPriority::new(BlockKind::Pinned, 100, 500),
            KindPriority::new(BlockKind::State, 50, 200),
            KindPriority::new(BlockKind::Turn, 50, 1000),
            KindPriority::new(BlockKind::History, 0, 2000),
            KindPriority::new(BlockKind::ToolOutput, 0, 1000),
        ]
    }

    #[test]
    fn test_valid_policy() {
        let policy = ContextPolicy::new(
            4000,
            1000,
            OverflowStrategy::Truncate,
            priorities(),
            None,
        )
        .unwrap();
        assert_eq!(policy.budget(), 3000);
        assert!(!policy.kind_truncatable(BlockKind::Pinned));
        assert!(policy.kind_truncatable(BlockKind::History));
        // Unlisted kinds default to truncatable.
        assert!(policy.kind_truncatable(BlockKind::Memory));
    }

    #[test]
    fn test_reserve_must_be_below_window() {
        let err = ContextPolicy::new(1000, 1000, OverflowStrategy::Error, vec![], None)
            .unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
    }

    #[test]
    fn test_protected_kind_cannot_be_truncatable() {
        let mut bad = KindPriority::new(BlockKind::Pinned, 0, 100);
        bad.truncatable = true;
        let err =
            ContextPolicy::new(4000, 1000, OverflowStrategy::Error, vec![bad], None)
                .unwrap_err();
        assert!(err.to_string().contains("pinned"));
    }

    #[test]
    fn test_non_truncatable_minimums_must_fit_budget() {
        let err = ContextPolicy::new(
            1000,
            500,
            OverflowStrategy::Error,
            vec![KindPriority::new(BlockKind::Pinned, 600, 600)],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("minimums"));
    }

    #[test]
    fn test_truncatable_floors_may_exceed_budget() {
        // The compiler may evict below a truncatable floor, so a large
        // floor is reserved demand, not hard demand.
        let policy = ContextPolicy::new(
            1000,
            500,
            OverflowStrategy::Truncate,
            vec![
                KindPriority::new(BlockKind::Pinned, 200, 400),
                KindPriority::new(BlockKind::History, 600, 1000),
            ],
            None,
        )
        .unwrap();
        assert_eq!(policy.budget(), 500);
    }

    #[test]
    fn test_compact_requires_config() {
        let err = ContextPolicy::new(4000, 1000, OverflowStrategy::Compact, priorities(), None)
            .unwrap_err();
        assert!(err.to_string().contains("compaction"));

        ContextPolicy::new(
            4000,
            1000,
            OverflowStrategy::Compact,
            priorities(),
            Some(CompactionConfig::default()),
        )
        .unwrap();
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let err = ContextPolicy::new(
            4000,
            1000,
            OverflowStrategy::Error,
            vec![
                KindPriority::new(BlockKind::History, 0, 100),
                KindPriority::new(BlockKind::History, 0, 200),
            ],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_max_below_min_rejected() {
        let err = ContextPolicy::new(
            4000,
            1000,
            OverflowStrategy::Error,
            vec![KindPriority {
                kind: BlockKind::History,
                min_tokens: 200,
                max_tokens: 100,
                truncatable: true,
            }],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }
}
