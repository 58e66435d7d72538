//! Headline sentiment provider
//!
//! Scores recent news per ticker and turns the score into short-term and
//! long-term verdicts:
//! - Vendor tone (-100..100) blended with a keyword lexicon
//! - Confidence from article count and tone consistency
//! - Top themes by frequency
//!
//! Future enhancements:
//! - Weight articles by recency inside each horizon

use crate::collaborators::SentimentProvider;
use async_trait::async_trait;
use chrono::Duration;
use common::{ErrorInfo, NewsArticle, ServiceError};
use data_ingestion::MarketDataSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const NEGATIVE_WORDS: &[&str] = &[
    "downgrade", "miss", "lawsuit", "recall", "probe", "investigation", "decline", "drop",
    "fall", "loss", "layoff", "bankruptcy", "default", "fraud", "weak", "slump", "plunge",
    "warning", "bearish", "underperform", "halt", "penalty",
];

const POSITIVE_WORDS: &[&str] = &[
    "upgrade", "beat", "record", "growth", "rise", "gain", "profit", "surge", "rally",
    "bullish", "outperform", "raise", "expand", "win", "approval", "dividend", "buyback",
    "strong", "breakthrough", "partnership",
];

/// Sentiment provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub min_articles_threshold: u32,
    pub tone_weight: f64,
    pub keyword_weight: f64,
    /// Articles newer than this many days (relative to the latest) form the short-term horizon
    pub short_term_days: i64,
    pub max_themes: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            min_articles_threshold: 3,
            tone_weight: 0.4,
            keyword_weight: 0.6,
            short_term_days: 7,
            max_themes: 5,
        }
    }
}

/// Sentiment score with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub score: f64,      // -1.0 (very negative) to 1.0 (very positive)
    pub magnitude: f64,  // 0.0 (neutral) to 1.0 (strong)
    pub confidence: f64, // 0.0 to 1.0
    pub article_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "STRONG BUY")]
    StrongBuy,
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "STRONG SELL")]
    StrongSell,
}

impl Verdict {
    pub fn from_score(score: &SentimentScore) -> Self {
        if score.article_count == 0 {
            return Verdict::Hold;
        }
        match score.score {
            s if s >= 0.5 => Verdict::StrongBuy,
            s if s >= 0.15 => Verdict::Buy,
            s if s > -0.15 => Verdict::Hold,
            s if s > -0.5 => Verdict::Sell,
            _ => Verdict::StrongSell,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonView {
    pub verdict: Verdict,
    pub sentiment: SentimentScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerSentiment {
    pub ticker: String,
    pub short_term: HorizonView,
    pub long_term: HorizonView,
    pub top_themes: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum TickerEntry {
    Scored(TickerSentiment),
    Failed { ticker: String, error: ErrorInfo },
}

/// Deterministic sentiment from news headlines
pub struct HeadlineSentimentProvider {
    source: Arc<dyn MarketDataSource>,
    config: SentimentConfig,
}

impl HeadlineSentimentProvider {
    pub fn new(source: Arc<dyn MarketDataSource>, config: SentimentConfig) -> Self {
        Self { source, config }
    }

    /// Calculate sentiment from articles
    pub fn calculate_sentiment(&self, articles: &[NewsArticle]) -> SentimentScore {
        if articles.is_empty() {
            return SentimentScore {
                score: 0.0,
                magnitude: 0.0,
                confidence: 0.0,
                article_count: 0,
            };
        }

        let article_count = articles.len() as u32;

        let avg_tone = articles.iter().map(|a| a.tone).sum::<f64>() / articles.len() as f64;
        let tone_sentiment = (avg_tone / 100.0).clamp(-1.0, 1.0);
        let keyword_sentiment = keyword_sentiment(articles);

        let score = tone_sentiment * self.config.tone_weight
            + keyword_sentiment * self.config.keyword_weight;

        let threshold = self.config.min_articles_threshold.max(1);
        let confidence = if article_count >= threshold {
            let count_factor = (article_count as f64 / threshold as f64).min(2.0) / 2.0;
            let tone_jumps: f64 = articles
                .windows(2)
                .map(|w| (w[0].tone - w[1].tone).abs() / 100.0)
                .sum();
            let consistency_factor =
                1.0 - tone_jumps / articles.len().saturating_sub(1).max(1) as f64;
            (count_factor + consistency_factor) / 2.0
        } else {
            (article_count as f64 / threshold as f64).max(0.1)
        };

        SentimentScore {
            score: score.clamp(-1.0, 1.0),
            magnitude: score.abs().clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            article_count,
        }
    }

    /// Most frequent themes across articles
    pub fn extract_themes(&self, articles: &[NewsArticle]) -> Vec<String> {
        let mut theme_counts: HashMap<String, u32> = HashMap::new();

        for article in articles {
            for theme in article.themes.split(';') {
                let theme = theme.trim().to_lowercase();
                if !theme.is_empty() {
                    *theme_counts.entry(theme).or_insert(0) += 1;
                }
            }
        }

        let mut themes: Vec<(String, u32)> = theme_counts.into_iter().collect();
        themes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        themes
            .into_iter()
            .take(self.config.max_themes)
            .map(|(t, _)| t)
            .collect()
    }

    /// Score one ticker's articles over both horizons
    pub fn score_ticker(&self, ticker: &str, mut articles: Vec<NewsArticle>) -> TickerSentiment {
        articles.sort_by_key(|a| a.published);

        let recent: Vec<NewsArticle> = match articles.last().map(|a| a.published) {
            Some(latest) => {
                let cutoff = Duration::try_days(self.config.short_term_days)
                    .and_then(|window| latest.checked_sub_signed(window));
                articles
                    .iter()
                    .filter(|a| cutoff.map_or(true, |c| a.published >= c))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        let short = self.calculate_sentiment(&recent);
        let long = self.calculate_sentiment(&articles);

        TickerSentiment {
            ticker: ticker.to_string(),
            short_term: HorizonView {
                verdict: Verdict::from_score(&short),
                sentiment: short,
            },
            long_term: HorizonView {
                verdict: Verdict::from_score(&long),
                sentiment: long,
            },
            top_themes: self.extract_themes(&articles),
            sources: articles.iter().rev().take(10).map(|a| a.id.clone()).collect(),
        }
    }
}

/// Lexicon score in [-1, 1] over titles and themes
fn keyword_sentiment(articles: &[NewsArticle]) -> f64 {
    let mut total_score = 0.0;
    let mut total_words = 0.0;

    for article in articles {
        let text = format!("{} {}", article.title, article.themes).to_lowercase();

        for word in NEGATIVE_WORDS {
            if text.contains(word) {
                total_score -= 1.0;
                total_words += 1.0;
            }
        }

        for word in POSITIVE_WORDS {
            if text.contains(word) {
                total_score += 1.0;
                total_words += 1.0;
            }
        }
    }

    if total_words > 0.0 {
        let result: f64 = total_score / total_words;
        result.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[async_trait]
impl SentimentProvider for HeadlineSentimentProvider {
    fn name(&self) -> &str {
        "headline-sentiment"
    }

    async fn analyze(&self, tickers: &[String]) -> Result<serde_json::Value, ServiceError> {
        let mut entries = Vec::with_capacity(tickers.len());

        for ticker in tickers {
            match self.source.fetch_news(ticker).await {
                Ok(articles) => {
                    debug!(ticker = %ticker, articles = articles.len(), "Scoring headlines");
                    entries.push(TickerEntry::Scored(self.score_ticker(ticker, articles)));
                }
                Err(err) => {
                    warn!(ticker = %ticker, error = %err, "News unavailable");
                    entries.push(TickerEntry::Failed {
                        ticker: ticker.clone(),
                        error: ErrorInfo::from_service(format!("news for {}", ticker), &err),
                    });
                }
            }
        }

        let tickers =
            serde_json::to_value(&entries).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        Ok(serde_json::json!({
            "provider": self.name(),
            "tickers": tickers,
        }))
    }
}
