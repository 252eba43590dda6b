//! The context compiler: budget allocation and overflow resolution.
//!
//! Compilation walks the policy's kind priorities, caps each kind at its
//! `max_tokens` ceiling, and resolves any remaining overflow per the
//! configured strategy. Protected blocks (Pinned, State) survive every
//! strategy;
//! compilation fails hard only when protected content alone exceeds the
//! model's context window.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use colloquy_types::context::{BlockKind, ContextBlock};
use tracing::{debug, warn};

use super::estimator::TokenEstimator;
use super::policy::{ContextPolicy, OverflowStrategy};
use super::summarizer::{HistorySummarizer, SUMMARY_PREFIX};
use crate::errors::{ConfigError, PolicyError};

/// Result of a compile pass.
#[derive(Debug, Clone, Default)]
pub struct CompiledContext {
    /// Surviving blocks in original order (with a summary block spliced in
    /// where compaction replaced history).
    pub blocks: Vec<ContextBlock>,
    pub total_tokens: u32,
    pub tokens_by_kind: HashMap<BlockKind, u32>,
    /// Whether any block was dropped to fit the budget or a kind ceiling.
    pub truncated: bool,
    /// Number of blocks removed or replaced by compaction.
    pub compacted_blocks: usize,
}

impl CompiledContext {
    pub fn compacted(&self) -> bool {
        self.compacted_blocks > 0
    }
}

/// Compiles context blocks against a [`ContextPolicy`].
pub struct ContextCompiler {
    policy: ContextPolicy,
    estimator: Arc<dyn TokenEstimator>,
}

impl std::fmt::Debug for ContextCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCompiler")
            .field("policy", &self.policy)
            .finish()
    }
}

impl ContextCompiler {
    pub fn new(
        policy: ContextPolicy,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Result<Self, ConfigError> {
        if policy.overflow_strategy() == OverflowStrategy::Compact && estimator.is_noop() {
            return Err(ConfigError::NoopEstimatorWithCompact);
        }
        Ok(Self { policy, estimator })
    }

    pub fn policy(&self) -> &ContextPolicy {
        &self.policy
    }

    /// Compile blocks into a budget-respecting context.
    ///
    /// `summarizer` is consulted only under the `Compact` strategy; when
    /// absent (or when the summary call fails) compaction degrades to
    /// pruning plus truncation.
    pub async fn compile(
        &self,
        blocks: Vec<ContextBlock>,
        summarizer: Option<&HistorySummarizer>,
    ) -> Result<CompiledContext, PolicyError> {
        let budget = self.policy.budget();
        let (mut blocks, mut truncated) = self.enforce_ceilings(blocks);
        let mut compacted_blocks = 0;

        let demand = self.total_cost(&blocks);
        if demand > budget {
            match self.policy.overflow_strategy() {
                OverflowStrategy::Error => {
                    return Err(PolicyError::BudgetExceeded { demand, budget });
                }
                OverflowStrategy::Truncate => {
                    blocks = self.truncate(blocks)?;
                    truncated = true;
                }
                OverflowStrategy::Compact => {
                    let (remaining, removed) = self.compact(blocks, summarizer).await;
                    blocks = remaining;
                    compacted_blocks = removed;
                    if self.total_cost(&blocks) > budget {
                        blocks = self.truncate(blocks)?;
                        truncated = true;
                    }
                }
            }
            debug!(
                demand,
                budget,
                kept = blocks.len(),
                truncated,
                compacted_blocks,
                "context overflow resolved"
            );
        }

        let mut tokens_by_kind: HashMap<BlockKind, u32> = HashMap::new();
        let mut total_tokens = 0u32;
        for block in &blocks {
            let cost = self.cost(block);
            *tokens_by_kind.entry(block.kind).or_insert(0) += cost;
            total_tokens = total_tokens.saturating_add(cost);
        }

        Ok(CompiledContext {
            blocks,
            total_tokens,
            tokens_by_kind,
            truncated,
            compacted_blocks,
        })
    }

    fn cost(&self, block: &ContextBlock) -> u32 {
        self.estimator.estimate(&block.content)
    }

    fn total_cost(&self, blocks: &[ContextBlock]) -> u32 {
        blocks.iter().map(|b| self.cost(b)).sum()
    }

    /// Cap every kind at its policy `max_tokens`, dropping the oldest
    /// truncatable blocks of an over-ceiling kind. Runs before the budget
    /// check for every strategy. Non-truncatable blocks are kept whole
    /// even when their kind exceeds its ceiling.
    fn enforce_ceilings(&self, blocks: Vec<ContextBlock>) -> (Vec<ContextBlock>, bool) {
        let mut kept = vec![true; blocks.len()];
        let mut dropped = false;

        for priority in self.policy.kind_priorities() {
            let members: Vec<usize> = (0..blocks.len())
                .filter(|&i| blocks[i].kind == priority.kind)
                .collect();
            let mut kind_total: u32 = members.iter().map(|&i| self.cost(&blocks[i])).sum();
            if kind_total <= priority.max_tokens {
                continue;
            }

            let mut candidates: Vec<usize> = members
                .into_iter()
                .filter(|&i| blocks[i].truncatable)
                .collect();
            candidates.sort_by_key(|&i| blocks[i].created_at);
            for i in candidates {
                if kind_total <= priority.max_tokens {
                    break;
                }
                kept[i] = false;
                kind_total -= self.cost(&blocks[i]);
                dropped = true;
            }
            if kind_total > priority.max_tokens {
                warn!(
                    kind = %priority.kind,
                    tokens = kind_total,
                    max_tokens = priority.max_tokens,
                    "non-truncatable content exceeds kind ceiling"
                );
            }
        }

        if !dropped {
            return (blocks, false);
        }
        let survivors = blocks
            .into_iter()
            .zip(kept)
            .filter_map(|(block, keep)| keep.then_some(block))
            .collect();
        (survivors, true)
    }

    /// Kinds present in the blocks, in eviction order: kinds without a
    /// priority entry first, then listed kinds from lowest to highest
    /// priority. Protected kinds are never candidates.
    fn eviction_order(&self, blocks: &[ContextBlock]) -> Vec<BlockKind> {
        let mut present: Vec<BlockKind> = Vec::new();
        for block in blocks {
            if !present.contains(&block.kind) {
                present.push(block.kind);
            }
        }

        let listed: Vec<BlockKind> = self
            .policy
            .kind_priorities()
            .iter()
            .map(|p| p.kind)
            .collect();

        let mut order: Vec<BlockKind> = present
            .iter()
            .copied()
            .filter(|k| !k.is_protected() && !listed.contains(k))
            .collect();
        for kind in listed.iter().rev() {
            if present.contains(kind) && !kind.is_protected() {
                order.push(*kind);
            }
        }
        order
    }

    /// Drop truncatable blocks until the total fits the budget.
    ///
    /// Two passes: the first honors each kind's `min_tokens` floor, the
    /// second drops past the floors when the budget still is not met.
    /// Within a kind, oldest blocks go first.
    fn truncate(&self, blocks: Vec<ContextBlock>) -> Result<Vec<ContextBlock>, PolicyError> {
        let budget = self.policy.budget();
        let costs: Vec<u32> = blocks.iter().map(|b| self.cost(b)).collect();
        let mut kept = vec![true; blocks.len()];
        let mut total: u32 = costs.iter().sum();

        for honor_minimums in [true, false] {
            if total <= budget {
                break;
            }
            for kind in self.eviction_order(&blocks) {
                if total <= budget {
                    break;
                }
                if !self.policy.kind_truncatable(kind) {
                    continue;
                }
                let floor = if honor_minimums {
                    self.policy.priority_for(kind).map_or(0, |p| p.min_tokens)
                } else {
                    0
                };

                let mut candidates: Vec<usize> = (0..blocks.len())
                    .filter(|&i| kept[i] && blocks[i].kind == kind && blocks[i].truncatable)
                    .collect();
                candidates.sort_by_key(|&i| blocks[i].created_at);

                let mut kind_total: u32 = candidates.iter().map(|&i| costs[i]).sum();
                for i in candidates {
                    if total <= budget {
                        break;
                    }
                    if kind_total.saturating_sub(costs[i]) < floor {
                        continue;
                    }
                    kept[i] = false;
                    total -= costs[i];
                    kind_total -= costs[i];
                }
            }
        }

        // Whatever is left is non-truncatable. Overflowing into the
        // completion reserve is tolerated; overflowing the window is not.
        if total > budget && total > self.policy.context_window() {
            return Err(PolicyError::WindowExceeded {
                protected: total,
                window: self.policy.context_window(),
            });
        }

        Ok(blocks
            .into_iter()
            .zip(kept)
            .filter_map(|(block, keep)| keep.then_some(block))
            .collect())
    }

    /// Prune stale tool outputs and summarize old history.
    ///
    /// Returns the surviving blocks and the number of blocks removed. A
    /// failed summary call is logged and skipped; the truncation fallback
    /// in `compile` then enforces the budget.
    async fn compact(
        &self,
        blocks: Vec<ContextBlock>,
        summarizer: Option<&HistorySummarizer>,
    ) -> (Vec<ContextBlock>, usize) {
        let Some(cfg) = self.policy.compaction().copied() else {
            return (blocks, 0);
        };

        let mut kept = vec![true; blocks.len()];
        let mut removed = 0usize;

        if cfg.prune_tool_outputs {
            let cutoff = Utc::now() - cfg.max_tool_output_age;
            let mut outputs: Vec<usize> = (0..blocks.len())
                .filter(|&i| blocks[i].kind == BlockKind::ToolOutput && blocks[i].truncatable)
                .collect();
            // Newest first, so rank doubles as the retention count.
            outputs.sort_by(|&a, &b| blocks[b].created_at.cmp(&blocks[a].created_at));
            for (rank, &i) in outputs.iter().enumerate() {
                if rank >= cfg.max_tool_outputs || blocks[i].created_at < cutoff {
                    kept[i] = false;
                    removed += 1;
                }
            }
        }

        let mut summary_insert: Option<(usize, ContextBlock)> = None;
        if cfg.summarize_history {
            let mut history: Vec<usize> = (0..blocks.len())
                .filter(|&i| kept[i] && blocks[i].kind == BlockKind::History && blocks[i].truncatable)
                .collect();
            history.sort_by_key(|&i| blocks[i].created_at);

            if history.len() > cfg.max_history_messages {
                let excess = history.len() - cfg.max_history_messages;
                if let Some(summarizer) = summarizer {
                    let oldest: Vec<ContextBlock> = history[..excess]
                        .iter()
                        .map(|&i| blocks[i].clone())
                        .collect();
                    match summarizer.summarize(&oldest).await {
                        Ok(text) if !text.is_empty() => {
                            let insert_at = history[0];
                            let stamp = blocks[history[excess - 1]].created_at;
                            for &i in &history[..excess] {
                                kept[i] = false;
                            }
                            removed += excess;
                            summary_insert = Some((
                                insert_at,
                                ContextBlock::text(
                                    BlockKind::History,
                                    format!("{SUMMARY_PREFIX}\n{text}"),
                                )
                                .with_created_at(stamp),
                            ));
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "history summarization failed, falling back to truncation");
                        }
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(blocks.len() + 1);
        for (i, block) in blocks.into_iter().enumerate() {
            if matches!(&summary_insert, Some((at, _)) if *at == i) {
                if let Some((_, summary)) = summary_insert.take() {
                    out.push(summary);
                }
            }
            if kept[i] {
                out.push(block);
            }
        }
        if let Some((_, summary)) = summary_insert.take() {
            out.push(summary);
        }

        (out, removed)
    }
}
