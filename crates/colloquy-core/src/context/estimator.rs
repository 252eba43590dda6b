//! Token cost estimation for context blocks.
//!
//! Exact tokenization is provider-specific; the compiler only needs a
//! consistent upper-ish bound to allocate budget against.

/// Estimates the token cost of a piece of text.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u32;

    /// True when this estimator always returns zero. The compiler rejects
    /// noop estimation combined with the `Compact` strategy, since
    /// compaction decisions would never trigger.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Character-based heuristic: roughly 4 characters per token.
///
/// Matches the rule of thumb used by most chat model tokenizers closely
/// enough for budget allocation. Non-empty text always costs at least
/// one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> u32 {
        let chars = text.chars().count() as u32;
        if chars == 0 {
            0
        } else {
            chars.div_ceil(4)
        }
    }
}

/// Estimator that counts nothing. Disables budget enforcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEstimator;

impl TokenEstimator for NoopEstimator {
    fn estimate(&self, _text: &str) -> u32 {
        0
    }

    fn is_noop(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_estimator_rounds_up() {
        let est = CharEstimator;
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("a"), 1);
        assert_eq!(est.estimate("abcd"), 1);
        assert_eq!(est.estimate("abcde"), 2);
        assert_eq!(est.estimate(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_char_estimator_counts_chars_not_bytes() {
        let est = CharEstimator;
        // Four multibyte characters still estimate as one token.
        assert_eq!(est.estimate("日本語字"), 1);
    }

    #[test]
    fn test_noop_estimator() {
        let est = NoopEstimator;
        assert_eq!(est.estimate("anything at all"), 0);
        assert!(est.is_noop());
        assert!(!CharEstimator.is_noop());
    }
}
