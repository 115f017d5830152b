//! Topic directives: what a caller wants evidence for.

use serde::{Deserialize, Serialize};

use evidence_hierarchy::ChunkId;

/// Caller-imposed ordering of the evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NarrativeOverride {
    /// Chunks mentioning any of `terms` come first, each group in
    /// document order.
    PrerequisitesFirst { terms: Vec<String> },
    /// Listed chunks come first in the listed order, then the rest in
    /// document order.
    Explicit { chunk_ids: Vec<ChunkId> },
}

/// Where a topic sits in the surrounding outline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationContext {
    pub previous_topic: Option<String>,
    pub previous_summary: Option<String>,
    pub next_topic: Option<String>,
    pub next_summary: Option<String>,
    pub ordering: Option<NarrativeOverride>,
}

impl NavigationContext {
    /// Whether the context carries nothing to plan for.
    pub fn is_empty(&self) -> bool {
        let blank = |field: &Option<String>| field.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.previous_topic)
            && blank(&self.previous_summary)
            && blank(&self.next_topic)
            && blank(&self.next_summary)
            && self.ordering.is_none()
    }

    /// Non-blank text fields, previous before next.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        [
            &self.previous_topic,
            &self.previous_summary,
            &self.next_topic,
            &self.next_summary,
        ]
        .into_iter()
        .filter_map(|field| field.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    }
}

/// A request for evidence on one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicDirective {
    pub topic_id: String,
    pub name: String,
    pub description: String,

    /// Points the evidence has to cover.
    pub must_include: Vec<String>,

    /// Material the evidence should stay away from.
    pub must_exclude: Vec<String>,

    pub key_concepts: Vec<String>,
    pub navigation: NavigationContext,
}

impl TopicDirective {
    /// Create a directive with only an id and a name.
    pub fn new(topic_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            topic_id: topic_id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_must_include<I, S>(mut self, points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.must_include = points.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_must_exclude<I, S>(mut self, points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.must_exclude = points.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_key_concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_concepts = concepts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_navigation(mut self, navigation: NavigationContext) -> Self {
        self.navigation = navigation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_navigation_emptiness_ignores_blank_fields() {
        let mut navigation = NavigationContext {
            previous_topic: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(navigation.is_empty());

        navigation.next_topic = Some("Lifetimes".to_string());
        assert!(!navigation.is_empty());
        assert_eq!(navigation.texts().collect::<Vec<_>>(), vec!["Lifetimes"]);
    }

    #[test]
    fn test_directive_deserializes_with_defaults() {
        let directive: TopicDirective = serde_json::from_str(
            r#"{
                "topic_id": "t1",
                "name": "Borrowing",
                "must_include": ["shared references"],
                "navigation": {
                    "ordering": { "mode": "explicit", "chunk_ids": ["c1", "c2"] }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(directive.description, "");
        assert_eq!(directive.must_include, vec!["shared references"]);
        assert_eq!(
            directive.navigation.ordering,
            Some(NarrativeOverride::Explicit {
                chunk_ids: vec![ChunkId::from("c1"), ChunkId::from("c2")]
            })
        );
    }
}
