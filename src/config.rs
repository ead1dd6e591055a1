//! Serializable layer hyperparameters.
//!
//! Each layer exposes `config()` / `from_config()`; [`LayerConfig`] tags the
//! configs so a list of layers can be stored as JSON and rebuilt later.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::nn::{Reduction, SliceSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceConfig {
    pub slice: SliceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceConfig {
    pub reduction: Reduction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    #[serde(default)]
    pub mask_zero: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum LayerConfig {
    Slice(SliceConfig),
    Gather(GatherConfig),
    Reduce(ReduceConfig),
    Embedding(EmbeddingConfig),
}

impl LayerConfig {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<SliceConfig> for LayerConfig {
    fn from(config: SliceConfig) -> Self {
        LayerConfig::Slice(config)
    }
}

impl From<GatherConfig> for LayerConfig {
    fn from(config: GatherConfig) -> Self {
        LayerConfig::Gather(config)
    }
}

impl From<ReduceConfig> for LayerConfig {
    fn from(config: ReduceConfig) -> Self {
        LayerConfig::Reduce(config)
    }
}

impl From<EmbeddingConfig> for LayerConfig {
    fn from(config: EmbeddingConfig) -> Self {
        LayerConfig::Embedding(config)
    }
}
