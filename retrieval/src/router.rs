//! Per-facet channel weighting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::planner::FacetKind;

/// A retrieval channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// k-NN over chunk vectors.
    Dense,
    /// Lexical scoring over chunk texts.
    Sparse,
    /// Block search expanded to the blocks' chunks.
    Parent,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Dense, Channel::Sparse, Channel::Parent];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
            Self::Parent => "parent",
        }
    }
}

/// Weights of the three channels for one facet kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelWeights {
    pub dense: f32,
    pub sparse: f32,
    pub parent: f32,
}

impl ChannelWeights {
    pub fn new(dense: f32, sparse: f32, parent: f32) -> Self {
        Self {
            dense,
            sparse,
            parent,
        }
    }

    pub fn get(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Dense => self.dense,
            Channel::Sparse => self.sparse,
            Channel::Parent => self.parent,
        }
    }

    fn is_valid(&self) -> bool {
        Channel::ALL
            .iter()
            .all(|&c| self.get(c).is_finite() && self.get(c) >= 0.0)
    }
}

/// Channel weights by facet kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Exact points: lexical evidence counts as much as semantic.
    pub must_include: ChannelWeights,
    /// Broad topic: mostly semantic.
    pub general_topic: ChannelWeights,
    /// Outline context: favour whole sections.
    pub navigation: ChannelWeights,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            must_include: ChannelWeights::new(0.4, 0.4, 0.2),
            general_topic: ChannelWeights::new(0.7, 0.15, 0.15),
            navigation: ChannelWeights::new(0.3, 0.2, 0.5),
        }
    }
}

impl RouterConfig {
    /// Whether every weight is finite and non-negative.
    pub fn is_valid(&self) -> bool {
        self.must_include.is_valid() && self.general_topic.is_valid() && self.navigation.is_valid()
    }
}

/// Maps facet kinds to channel weights and fuses channel scores.
#[derive(Debug, Clone, Default)]
pub struct FacetRouter {
    config: RouterConfig,
}

impl FacetRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn weights(&self, kind: FacetKind) -> ChannelWeights {
        match kind {
            FacetKind::MustInclude => self.config.must_include,
            FacetKind::GeneralTopic => self.config.general_topic,
            FacetKind::Navigation => self.config.navigation,
        }
    }

    /// Weighted sum of per-channel scores for a facet of `kind`.
    pub fn fuse(&self, kind: FacetKind, scores: &BTreeMap<Channel, f32>) -> f32 {
        let weights = self.weights(kind);
        scores
            .iter()
            .map(|(&channel, &score)| weights.get(channel) * score)
            .sum()
    }
}
