// ABOUTME: Interaction engine configuration types
// ABOUTME: Generation deadline, context window trimming, per-token pricing and automatic titles
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use super::{env_flag, env_or};
use crate::constants::streaming;
use crate::errors::{AppError, AppResult};
use crate::llm::TokenUsage;
use std::time::Duration;

/// Price per thousand tokens used to compute generation cost
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelPricing {
    /// Cost per 1000 prompt tokens
    pub prompt_per_1k: f64,
    /// Cost per 1000 completion tokens
    pub completion_per_1k: f64,
}

impl ModelPricing {
    /// Cost of a generation with the given usage
    #[must_use]
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        f64::from(usage.prompt_tokens) / 1000.0 * self.prompt_per_1k
            + f64::from(usage.completion_tokens) / 1000.0 * self.completion_per_1k
    }

    /// Check that both prices are finite and not negative
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending price
    pub fn validate(&self) -> AppResult<()> {
        for (name, price) in [
            ("PRICE_PROMPT_PER_1K", self.prompt_per_1k),
            ("PRICE_COMPLETION_PER_1K", self.completion_per_1k),
        ] {
            if !price.is_finite() || price < 0.0 {
                return Err(AppError::config(format!(
                    "{name} must be a non-negative number, got {price}"
                )));
            }
        }
        Ok(())
    }
}

/// Interaction engine configuration
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Default wall-clock limit for one generation; `None` disables it
    pub default_deadline: Option<Duration>,
    /// Keep at most this many path messages in the model context (0 = unlimited)
    pub context_message_limit: usize,
    /// Pricing for cost computation
    pub pricing: ModelPricing,
    /// Name untitled discussions after their first completed reply
    pub auto_title: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            default_deadline: None,
            context_message_limit: streaming::DEFAULT_CONTEXT_MESSAGE_LIMIT,
            pricing: ModelPricing::default(),
            auto_title: true,
        }
    }
}

impl StreamingConfig {
    /// Load engine configuration from environment
    ///
    /// The deadline is off unless `STREAM_DEADLINE_SECS` is set above 0.
    ///
    /// # Errors
    ///
    /// Returns an error if a price is negative or not finite, or if
    /// `STREAM_AUTO_TITLE` is not a boolean
    pub fn from_env() -> AppResult<Self> {
        let deadline_secs: u64 = env_or("STREAM_DEADLINE_SECS", streaming::DEFAULT_DEADLINE_SECS);
        let config = Self {
            default_deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            context_message_limit: env_or(
                "STREAM_CONTEXT_LIMIT",
                streaming::DEFAULT_CONTEXT_MESSAGE_LIMIT,
            ),
            pricing: ModelPricing {
                prompt_per_1k: env_or("PRICE_PROMPT_PER_1K", 0.0),
                completion_per_1k: env_or("PRICE_COMPLETION_PER_1K", 0.0),
            },
            auto_title: env_flag("STREAM_AUTO_TITLE", true)?,
        };
        config.pricing.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_per_thousand_tokens() {
        let pricing = ModelPricing {
            prompt_per_1k: 0.5,
            completion_per_1k: 1.5,
        };
        let usage = TokenUsage {
            prompt_tokens: 2000,
            completion_tokens: 1000,
            total_tokens: 3000,
        };
        assert!((pricing.cost(&usage) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_or_nan_prices_are_rejected() {
        let negative = ModelPricing {
            prompt_per_1k: -1.0,
            completion_per_1k: 0.0,
        };
        assert!(negative.validate().is_err());
        let nan = ModelPricing {
            prompt_per_1k: 0.0,
            completion_per_1k: f64::NAN,
        };
        assert!(nan.validate().is_err());
        assert!(ModelPricing::default().validate().is_ok());
    }
}
