//! Facet query planning.
//!
//! A [`TopicDirective`] is decomposed into [`Facet`]s: one per required
//! point, one for the topic as a whole, and one for its place in the outline.
//! Each facet is retrieved and covered independently, so a topic with five
//! required points cannot be satisfied by five chunks about the same point.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use evidence_embeddings::{Embedding, EmbeddingProvider, EmbeddingRequest};

use crate::directive::{NarrativeOverride, TopicDirective};

/// What a facet asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetKind {
    MustInclude,
    GeneralTopic,
    Navigation,
}

impl FacetKind {
    /// Selection priority; lower goes first.
    pub fn priority(self) -> u8 {
        match self {
            Self::MustInclude => 0,
            Self::GeneralTopic => 1,
            Self::Navigation => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MustInclude => "must_include",
            Self::GeneralTopic => "general_topic",
            Self::Navigation => "navigation",
        }
    }
}

/// The directive entry a facet came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetOrigin {
    pub topic_id: String,

    /// Index into `must_include` for must-include facets.
    pub must_include_index: Option<usize>,
}

/// One independently retrievable aspect of a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub id: String,
    pub kind: FacetKind,
    pub description: String,
    pub origin: FacetOrigin,
    pub query_text: String,

    #[serde(skip)]
    pub vector: Option<Embedding>,

    /// Ordering requested through the navigation context.
    pub narrative: Option<NarrativeOverride>,
}

/// Text the evidence should avoid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub text: String,

    #[serde(skip)]
    pub vector: Option<Embedding>,
}

/// Estimated breadth of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Score required points, key concepts and the length of the topic name.
    pub fn estimate(required: usize, concepts: usize, name_words: usize) -> Self {
        let mut score = 0;
        score += match required {
            5.. => 2,
            3..=4 => 1,
            _ => 0,
        };
        score += match concepts {
            6.. => 2,
            3..=5 => 1,
            _ => 0,
        };
        if name_words >= 5 {
            score += 1;
        }

        match score {
            4.. => Self::High,
            2..=3 => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Result counts per facet for this complexity.
    pub fn recommended_k(self) -> RecommendedK {
        match self {
            Self::Low => RecommendedK { chunks: 8, blocks: 2 },
            Self::Medium => RecommendedK {
                chunks: 15,
                blocks: 4,
            },
            Self::High => RecommendedK {
                chunks: 25,
                blocks: 6,
            },
        }
    }
}

/// Results to request per facet from each collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedK {
    pub chunks: usize,
    pub blocks: usize,
}

/// The facets of one directive, ready for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub topic_id: String,
    pub topic_name: String,
    pub facets: Vec<Facet>,
    pub exclusions: Vec<Exclusion>,
    pub complexity: Complexity,
    pub recommended: RecommendedK,
}

impl QueryPlan {
    /// Look up a facet by id.
    pub fn facet(&self, id: &str) -> Option<&Facet> {
        self.facets.iter().find(|f| f.id == id)
    }

    /// The general-topic facet. Every plan has exactly one.
    pub fn general_facet(&self) -> Option<&Facet> {
        self.facets.iter().find(|f| f.kind == FacetKind::GeneralTopic)
    }

    /// The narrative override carried by the navigation facet, if any.
    pub fn narrative(&self) -> Option<&NarrativeOverride> {
        self.facets.iter().find_map(|f| f.narrative.as_ref())
    }
}

/// Configuration for the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Skip query embedding entirely (lexical retrieval only).
    pub disable_query_vectors: bool,

    /// Fixed result counts instead of the complexity estimate.
    pub recommended_k: Option<RecommendedK>,
}

/// Turns directives into [`QueryPlan`]s.
pub struct FacetPlanner {
    provider: Arc<dyn EmbeddingProvider>,
    config: PlannerConfig,
}

impl FacetPlanner {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: PlannerConfig) -> Self {
        Self { provider, config }
    }

    /// Build the plan for `directive`. Never fails: facets whose query cannot
    /// be embedded are planned without a vector.
    pub async fn plan(&self, directive: &TopicDirective) -> QueryPlan {
        let mut facets = Vec::new();
        let origin = |index: Option<usize>| FacetOrigin {
            topic_id: directive.topic_id.clone(),
            must_include_index: index,
        };

        for (index, point) in directive.must_include.iter().enumerate() {
            let point = point.trim();
            if point.is_empty() {
                continue;
            }
            facets.push(Facet {
                id: facet_id(facets.len()),
                kind: FacetKind::MustInclude,
                description: point.to_string(),
                origin: origin(Some(index)),
                query_text: point.to_string(),
                vector: None,
                narrative: None,
            });
        }

        let general_query = join_nonblank(
            [directive.name.as_str(), directive.description.as_str()]
                .into_iter()
                .chain(directive.key_concepts.iter().map(String::as_str)),
        );
        facets.push(Facet {
            id: facet_id(facets.len()),
            kind: FacetKind::GeneralTopic,
            description: if directive.name.trim().is_empty() {
                directive.topic_id.clone()
            } else {
                directive.name.trim().to_string()
            },
            origin: origin(None),
            query_text: general_query.clone(),
            vector: None,
            narrative: None,
        });

        let navigation = &directive.navigation;
        if !navigation.is_empty() {
            let texts = join_nonblank(navigation.texts());
            facets.push(Facet {
                id: facet_id(facets.len()),
                kind: FacetKind::Navigation,
                description: navigation_description(directive),
                origin: origin(None),
                query_text: if texts.is_empty() { general_query } else { texts },
                vector: None,
                narrative: navigation.ordering.clone(),
            });
        }

        let mut exclusions: Vec<Exclusion> = directive
            .must_exclude
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .map(|text| Exclusion {
                text: text.to_string(),
                vector: None,
            })
            .collect();

        if !self.config.disable_query_vectors {
            let texts: Vec<&str> = facets
                .iter()
                .map(|f| f.query_text.as_str())
                .chain(exclusions.iter().map(|e| e.text.as_str()))
                .collect();
            let mut vectors = self.embed_all(&texts).await.into_iter();
            for facet in &mut facets {
                facet.vector = vectors.next().flatten();
            }
            for exclusion in &mut exclusions {
                exclusion.vector = vectors.next().flatten();
            }
        }

        let complexity = Complexity::estimate(
            directive.must_include.len(),
            directive.key_concepts.len(),
            directive.name.split_whitespace().count(),
        );
        let recommended = self
            .config
            .recommended_k
            .unwrap_or_else(|| complexity.recommended_k());

        debug!(
            "Planned {} facets for topic {} ({complexity:?})",
            facets.len(),
            directive.topic_id
        );

        QueryPlan {
            topic_id: directive.topic_id.clone(),
            topic_name: directive.name.clone(),
            facets,
            exclusions,
            complexity,
            recommended,
        }
    }

    /// One vector per text, `None` where the text is blank or embedding failed.
    async fn embed_all(&self, texts: &[&str]) -> Vec<Option<Embedding>> {
        let wanted: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();
        let mut vectors: Vec<Option<Embedding>> = vec![None; texts.len()];
        if wanted.is_empty() {
            return vectors;
        }

        let requests = wanted
            .iter()
            .map(|&i| EmbeddingRequest::new(texts[i]))
            .collect();
        match self.provider.embed_batch(requests).await {
            Ok(responses) if responses.len() == wanted.len() => {
                for (&i, response) in wanted.iter().zip(responses) {
                    vectors[i] = Some(response.embedding);
                }
            }
            outcome => {
                if let Err(err) = outcome {
                    warn!("Query embedding batch failed ({err}), retrying individually");
                }
                for &i in &wanted {
                    match self.provider.embed(EmbeddingRequest::new(texts[i])).await {
                        Ok(response) => vectors[i] = Some(response.embedding),
                        Err(err) => warn!("No query vector for {:?}: {err}", texts[i]),
                    }
                }
            }
        }

        vectors
    }
}

fn facet_id(index: usize) -> String {
    format!("facet-{index:03}")
}

fn join_nonblank<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn navigation_description(directive: &TopicDirective) -> String {
    let navigation = &directive.navigation;
    let topic = directive.name.trim();
    match (
        navigation.previous_topic.as_deref(),
        navigation.next_topic.as_deref(),
    ) {
        (Some(previous), Some(next)) => format!("transition from {previous} to {next}"),
        (Some(previous), None) => format!("continuation of {previous}"),
        (None, Some(next)) => format!("lead-in to {next}"),
        (None, None) => format!("narrative context for {topic}"),
    }
}
