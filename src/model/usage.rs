//! Token usage counters and their aggregation

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Provider-reported token counters for one or more calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total: u64,
}

impl TokenUsage {
    /// Build a usage record; `total` is always prompt + completion
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total: prompt_tokens + completion_tokens,
        }
    }

    /// Field-wise sum of any number of usage records.
    ///
    /// Absent records contribute zero. No state survives the call; the
    /// pipeline decides which records belong to a run.
    pub fn sum<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a TokenUsage>>,
    {
        records
            .into_iter()
            .flatten()
            .fold(Self::default(), |acc, usage| Self {
                prompt_tokens: acc.prompt_tokens + usage.prompt_tokens,
                completion_tokens: acc.completion_tokens + usage.completion_tokens,
                total: acc.total + usage.total,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_computes_total() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total, 150);
    }

    #[test]
    fn test_sum_of_nothing_is_zero() {
        let total = TokenUsage::sum(std::iter::empty());
        assert_eq!(total, TokenUsage::default());
    }

    #[test]
    fn test_sum_treats_absent_as_zero() {
        let a = TokenUsage::new(100, 50);
        let b = TokenUsage::new(7, 3);
        let total = TokenUsage::sum([Some(&a), None, Some(&b), None]);

        assert_eq!(total.prompt_tokens, 107);
        assert_eq!(total.completion_tokens, 53);
        assert_eq!(total.total, 160);
        assert_eq!(total.total, total.prompt_tokens + total.completion_tokens);
    }

    #[test]
    fn test_sum_all_absent() {
        let total = TokenUsage::sum([None, None, None]);
        assert_eq!(total, TokenUsage::default());
    }
}
