//! Validated, immutable chunking configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Rejected chunking configuration. Nothing is chunked with an invalid configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Target size must be positive.
    #[error("target chunk size must be greater than zero")]
    ZeroTargetSize,
    /// Minimum size must be positive.
    #[error("minimum chunk size must be greater than zero")]
    ZeroMinChunkSize,
    /// Overlap must leave room for new content in every chunk.
    #[error("chunk overlap ({overlap}) must be smaller than the target size ({target})")]
    OverlapTooLarge {
        /// Requested overlap.
        overlap: usize,
        /// Requested target size.
        target: usize,
    },
    /// Minimum size cannot exceed the target.
    #[error("minimum chunk size ({min}) must not exceed the target size ({target})")]
    MinAboveTarget {
        /// Requested minimum size.
        min: usize,
        /// Requested target size.
        target: usize,
    },
    /// Breakpoint amount is outside the range accepted by the breakpoint type.
    #[error("breakpoint amount {amount} is out of range for {kind}")]
    InvalidBreakpointAmount {
        /// Breakpoint type the amount was supplied for.
        kind: BreakpointType,
        /// Rejected amount.
        amount: f64,
    },
    /// Unrecognized strategy or breakpoint name.
    #[error("unknown {field} '{value}'")]
    UnknownName {
        /// Which setting carried the value.
        field: &'static str,
        /// Rejected value.
        value: String,
    },
}

/// Segmentation strategy applied to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// Prioritized separators measured in characters.
    Recursive,
    /// Adjacent-sentence similarity breakpoints.
    Semantic,
    /// Prioritized separators measured in tokens.
    Token,
    /// Greedy sentence packing measured in characters.
    Sentence,
}

impl ChunkingStrategy {
    /// Stable lowercase label stored in chunk metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recursive => "recursive",
            Self::Semantic => "semantic",
            Self::Token => "token",
            Self::Sentence => "sentence",
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkingStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "semantic" => Ok(Self::Semantic),
            "token" => Ok(Self::Token),
            "sentence" => Ok(Self::Sentence),
            other => Err(ConfigurationError::UnknownName {
                field: "chunking strategy",
                value: other.to_string(),
            }),
        }
    }
}

/// How the semantic strategy derives its cut threshold from the distance distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    /// Cut above the given percentile of distances.
    Percentile,
    /// Cut above mean plus the given number of standard deviations.
    StandardDeviation,
    /// Cut above mean plus the given multiple of the interquartile range.
    Interquartile,
    /// Cut above the given percentile of the distance gradient.
    Gradient,
}

impl BreakpointType {
    /// Amount used when the configuration does not supply one.
    pub fn default_amount(self) -> f64 {
        match self {
            Self::Percentile | Self::Gradient => 95.0,
            Self::StandardDeviation => 3.0,
            Self::Interquartile => 1.5,
        }
    }

    fn accepts(self, amount: f64) -> bool {
        if !amount.is_finite() {
            return false;
        }
        match self {
            Self::Percentile | Self::Gradient => amount > 0.0 && amount <= 100.0,
            Self::StandardDeviation | Self::Interquartile => amount > 0.0,
        }
    }
}

impl fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Percentile => "percentile",
            Self::StandardDeviation => "standard_deviation",
            Self::Interquartile => "interquartile",
            Self::Gradient => "gradient",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for BreakpointType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "percentile" => Ok(Self::Percentile),
            "standard_deviation" | "std" => Ok(Self::StandardDeviation),
            "interquartile" | "iqr" => Ok(Self::Interquartile),
            "gradient" => Ok(Self::Gradient),
            other => Err(ConfigurationError::UnknownName {
                field: "breakpoint type",
                value: other.to_string(),
            }),
        }
    }
}

/// Immutable chunking configuration. Obtain one through [`ChunkingConfig::builder`] or
/// [`ChunkingConfig::new`]; both reject invalid combinations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkingConfig {
    strategy: ChunkingStrategy,
    target_size: usize,
    overlap: usize,
    min_chunk_size: usize,
    breakpoint_type: BreakpointType,
    breakpoint_amount: f64,
}

impl ChunkingConfig {
    /// Validate and build a configuration with the default breakpoint settings.
    pub fn new(
        strategy: ChunkingStrategy,
        target_size: usize,
        overlap: usize,
        min_chunk_size: usize,
    ) -> Result<Self, ConfigurationError> {
        Self::builder(strategy)
            .target_size(target_size)
            .overlap(overlap)
            .min_chunk_size(min_chunk_size)
            .build()
    }

    /// Start a builder seeded with the system defaults (1000 / 200 / 100, percentile).
    pub fn builder(strategy: ChunkingStrategy) -> ChunkingConfigBuilder {
        ChunkingConfigBuilder {
            settings: ChunkingSettings {
                strategy,
                ..ChunkingSettings::default()
            },
        }
    }

    /// Strategy applied to documents.
    pub fn strategy(&self) -> ChunkingStrategy {
        self.strategy
    }

    /// Upper bound on chunk size, in the strategy's unit.
    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// Requested overlap between adjacent chunks.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Smallest acceptable chunk, except for the final chunk of a document.
    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    /// Breakpoint type used by the semantic strategy.
    pub fn breakpoint_type(&self) -> BreakpointType {
        self.breakpoint_type
    }

    /// Breakpoint amount (percentile, deviations, or IQR multiple).
    pub fn breakpoint_amount(&self) -> f64 {
        self.breakpoint_amount
    }

    /// Plain settings that rebuild this configuration.
    pub fn settings(&self) -> ChunkingSettings {
        ChunkingSettings {
            strategy: self.strategy,
            chunk_size: self.target_size,
            chunk_overlap: self.overlap,
            min_chunk_size: self.min_chunk_size,
            breakpoint_type: self.breakpoint_type,
            breakpoint_amount: Some(self.breakpoint_amount),
        }
    }

    /// Same sizes with another strategy; used for the semantic fallback.
    pub(crate) fn with_strategy(&self, strategy: ChunkingStrategy) -> Self {
        Self {
            strategy,
            ..self.clone()
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Recursive,
            target_size: 1000,
            overlap: 200,
            min_chunk_size: 100,
            breakpoint_type: BreakpointType::Percentile,
            breakpoint_amount: BreakpointType::Percentile.default_amount(),
        }
    }
}

/// Plain, unvalidated chunking settings as they arrive from JSON or the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Requested strategy.
    pub strategy: ChunkingStrategy,
    /// Requested target size.
    pub chunk_size: usize,
    /// Requested overlap.
    pub chunk_overlap: usize,
    /// Requested minimum chunk size.
    pub min_chunk_size: usize,
    /// Requested breakpoint type.
    pub breakpoint_type: BreakpointType,
    /// Optional breakpoint amount override.
    pub breakpoint_amount: Option<f64>,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Recursive,
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            breakpoint_type: BreakpointType::Percentile,
            breakpoint_amount: None,
        }
    }
}

impl TryFrom<ChunkingSettings> for ChunkingConfig {
    type Error = ConfigurationError;

    fn try_from(settings: ChunkingSettings) -> Result<Self, Self::Error> {
        ChunkingConfigBuilder { settings }.build()
    }
}

/// Builder for [`ChunkingConfig`].
#[derive(Debug, Clone)]
pub struct ChunkingConfigBuilder {
    settings: ChunkingSettings,
}

impl ChunkingConfigBuilder {
    /// Set the target chunk size.
    pub fn target_size(mut self, size: usize) -> Self {
        self.settings.chunk_size = size;
        self
    }

    /// Set the overlap between adjacent chunks.
    pub fn overlap(mut self, overlap: usize) -> Self {
        self.settings.chunk_overlap = overlap;
        self
    }

    /// Set the minimum chunk size.
    pub fn min_chunk_size(mut self, size: usize) -> Self {
        self.settings.min_chunk_size = size;
        self
    }

    /// Set the semantic breakpoint type.
    pub fn breakpoint_type(mut self, kind: BreakpointType) -> Self {
        self.settings.breakpoint_type = kind;
        self
    }

    /// Override the semantic breakpoint amount.
    pub fn breakpoint_amount(mut self, amount: f64) -> Self {
        self.settings.breakpoint_amount = Some(amount);
        self
    }

    /// Validate the settings.
    pub fn build(self) -> Result<ChunkingConfig, ConfigurationError> {
        let ChunkingSettings {
            strategy,
            chunk_size,
            chunk_overlap,
            min_chunk_size,
            breakpoint_type,
            breakpoint_amount,
        } = self.settings;

        if chunk_size == 0 {
            return Err(ConfigurationError::ZeroTargetSize);
        }
        if min_chunk_size == 0 {
            return Err(ConfigurationError::ZeroMinChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigurationError::OverlapTooLarge {
                overlap: chunk_overlap,
                target: chunk_size,
            });
        }
        if min_chunk_size > chunk_size {
            return Err(ConfigurationError::MinAboveTarget {
                min: min_chunk_size,
                target: chunk_size,
            });
        }
        let amount = breakpoint_amount.unwrap_or_else(|| breakpoint_type.default_amount());
        if !breakpoint_type.accepts(amount) {
            return Err(ConfigurationError::InvalidBreakpointAmount {
                kind: breakpoint_type,
                amount,
            });
        }

        Ok(ChunkingConfig {
            strategy,
            target_size: chunk_size,
            overlap: chunk_overlap,
            min_chunk_size,
            breakpoint_type,
            breakpoint_amount: amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_not_smaller_than_target() {
        let error = ChunkingConfig::new(ChunkingStrategy::Recursive, 20, 20, 5).unwrap_err();
        assert_eq!(
            error,
            ConfigurationError::OverlapTooLarge {
                overlap: 20,
                target: 20
            }
        );
    }

    #[test]
    fn rejects_non_positive_sizes() {
        assert_eq!(
            ChunkingConfig::new(ChunkingStrategy::Token, 0, 0, 1).unwrap_err(),
            ConfigurationError::ZeroTargetSize
        );
        assert_eq!(
            ChunkingConfig::new(ChunkingStrategy::Token, 10, 0, 0).unwrap_err(),
            ConfigurationError::ZeroMinChunkSize
        );
    }

    #[test]
    fn rejects_min_above_target() {
        let error = ChunkingConfig::new(ChunkingStrategy::Sentence, 10, 2, 11).unwrap_err();
        assert!(matches!(error, ConfigurationError::MinAboveTarget { .. }));
    }

    #[test]
    fn breakpoint_amount_defaults_per_type() {
        let config = ChunkingConfig::builder(ChunkingStrategy::Semantic)
            .breakpoint_type(BreakpointType::Interquartile)
            .build()
            .expect("valid config");
        assert_eq!(config.breakpoint_amount(), 1.5);

        let error = ChunkingConfig::builder(ChunkingStrategy::Semantic)
            .breakpoint_type(BreakpointType::Percentile)
            .breakpoint_amount(120.0)
            .build()
            .unwrap_err();
        assert!(matches!(
            error,
            ConfigurationError::InvalidBreakpointAmount { .. }
        ));
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: ChunkingSettings =
            serde_json::from_str(r#"{"strategy":"sentence","chunk_size":300}"#).expect("json");
        let config = ChunkingConfig::try_from(settings).expect("valid");
        assert_eq!(config.strategy(), ChunkingStrategy::Sentence);
        assert_eq!(config.target_size(), 300);
        assert_eq!(config.overlap(), 200);
    }

    #[test]
    fn names_parse() {
        assert_eq!(
            "Semantic".parse::<ChunkingStrategy>(),
            Ok(ChunkingStrategy::Semantic)
        );
        assert_eq!(
            "standard_deviation".parse::<BreakpointType>(),
            Ok(BreakpointType::StandardDeviation)
        );
        assert!("fixed".parse::<ChunkingStrategy>().is_err());
    }
}
