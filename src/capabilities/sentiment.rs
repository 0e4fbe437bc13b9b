//! sentiment：新闻标题情绪计数
//!
//! 基于词根表的轻量打分：每条标题正面词多于负面词记为 positive，反之 negative，相等为 neutral。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::capabilities::{Capability, CapabilityId, RequestContext};
use crate::core::CapabilityError;
use crate::planning::{CapabilityOutput, CapabilityResult};

const CONFIDENCE: f64 = 0.6;

const POSITIVE_STEMS: [&str; 16] = [
    "surge", "boost", "gain", "rise", "rose", "grow", "growth", "beat", "record", "strong",
    "profit", "rally", "soar", "upgrade", "jump", "improv",
];

const NEGATIVE_STEMS: [&str; 16] = [
    "downturn", "fall", "fell", "drop", "loss", "decline", "weak", "miss", "cut", "slump",
    "plunge", "downgrade", "crash", "layoff", "lawsuit", "recession",
];

/// 情绪计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentCounts {
    pub positive: u32,
    pub negative: u32,
    pub neutral: u32,
}

impl SentimentCounts {
    pub fn total(&self) -> u32 {
        self.positive + self.negative + self.neutral
    }
}

fn stem_hits(headline: &str, stems: &[&str]) -> usize {
    headline
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| stems.iter().any(|s| w.starts_with(s)))
        .count()
}

/// 把 details 拆成标题（按行或分号）
pub fn split_headlines(details: &str) -> Vec<&str> {
    details
        .split(['\n', ';'])
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect()
}

pub fn score_headlines(headlines: &[&str]) -> SentimentCounts {
    let mut counts = SentimentCounts::default();
    for headline in headlines {
        let pos = stem_hits(headline, &POSITIVE_STEMS);
        let neg = stem_hits(headline, &NEGATIVE_STEMS);
        match pos.cmp(&neg) {
            std::cmp::Ordering::Greater => counts.positive += 1,
            std::cmp::Ordering::Less => counts.negative += 1,
            std::cmp::Ordering::Equal => counts.neutral += 1,
        }
    }
    counts
}

/// 标题情绪能力
#[derive(Debug, Default)]
pub struct Sentiment;

#[async_trait]
impl Capability for Sentiment {
    fn id(&self) -> CapabilityId {
        CapabilityId::Sentiment
    }

    async fn execute(
        &self,
        details: &str,
        _ctx: &RequestContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let headlines = split_headlines(details);
        let counts = score_headlines(&headlines);
        let answer = serde_json::to_value(counts).unwrap_or(Value::Null);
        let result = if counts.total() == 0 {
            CapabilityResult::failed(answer, "No headlines to score.")
        } else {
            CapabilityResult::new(
                answer,
                format!(
                    "Scored {} headline(s) with a keyword lexicon: {} positive, {} negative, {} neutral.",
                    counts.total(),
                    counts.positive,
                    counts.negative,
                    counts.neutral
                ),
                CONFIDENCE,
            )
        };
        Ok(result.into())
    }
}
