use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::services::ai::EmbeddingProvider;

const SERVICE: &str = "qdrant";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Only matches at least this similar steer the reply.
pub const SIMILARITY_FLOOR: f32 = 0.75;
pub const TOP_K: usize = 3;

/// The two logical collections behind retrieval-augmented replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExampleCollection {
    Conversations,
    Pricing,
}

/// A raw nearest-neighbor match: similarity score plus stored payload.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub score: f32,
    pub payload: Value,
}

/// A past exchange used to steer the current reply.
#[derive(Debug, Clone)]
pub struct RetrievedExample {
    pub query: String,
    pub response: String,
    pub similarity: f32,
    pub intent: Option<String>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        collection: ExampleCollection,
        vector: &[f32],
        top_k: usize,
        intent_filter: Option<&str>,
    ) -> Result<Vec<ScoredMatch>, ServiceError>;
}

/// Fetch examples similar to `text`. Pure read-through: embeds the text,
/// queries the index with an intent filter, and widens to an unfiltered
/// query when fewer than two matches clear the floor. Any failure degrades
/// to "no retrieved context": retrieval must never block the reply path.
pub async fn retrieve_similar(
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    text: &str,
    collection: ExampleCollection,
    intent: Option<&str>,
) -> Vec<RetrievedExample> {
    let vector = match embedder.embed(text).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "embedding failed, replying without retrieved context");
            return vec![];
        }
    };

    let mut examples = match index.query(collection, &vector, TOP_K, intent).await {
        Ok(matches) => filter_matches(&matches),
        Err(e) => {
            tracing::warn!(error = %e, "vector query failed, replying without retrieved context");
            return vec![];
        }
    };

    // The intent filter can be too strict; widen once without it.
    if examples.len() < 2 && intent.is_some() {
        match index.query(collection, &vector, TOP_K, None).await {
            Ok(matches) => {
                for example in filter_matches(&matches) {
                    if examples.len() >= TOP_K {
                        break;
                    }
                    if !examples.iter().any(|e| e.query == example.query) {
                        examples.push(example);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "unfiltered vector query failed");
            }
        }
    }

    examples
}

fn filter_matches(matches: &[ScoredMatch]) -> Vec<RetrievedExample> {
    matches
        .iter()
        .filter(|m| m.score > SIMILARITY_FLOOR)
        .filter_map(|m| {
            let query = m.payload.get("query")?.as_str()?.to_string();
            let response = m.payload.get("response")?.as_str()?.to_string();
            let intent = m
                .payload
                .get("intent")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Some(RetrievedExample {
                query,
                response,
                similarity: m.score,
                intent,
            })
        })
        .collect()
}

/// Qdrant REST client over the two studio collections.
pub struct QdrantIndex {
    base_url: String,
    conversations_collection: String,
    pricing_collection: String,
    client: reqwest::Client,
}

impl QdrantIndex {
    pub fn new(
        base_url: String,
        conversations_collection: String,
        pricing_collection: String,
    ) -> Self {
        Self {
            base_url,
            conversations_collection,
            pricing_collection,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.qdrant_url.clone(),
            config.conversations_collection.clone(),
            config.pricing_collection.clone(),
        )
    }

    fn collection_name(&self, collection: ExampleCollection) -> &str {
        match collection {
            ExampleCollection::Conversations => &self.conversations_collection,
            ExampleCollection::Pricing => &self.pricing_collection,
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn query(
        &self,
        collection: ExampleCollection,
        vector: &[f32],
        top_k: usize,
        intent_filter: Option<&str>,
    ) -> Result<Vec<ScoredMatch>, ServiceError> {
        let url = format!(
            "{}/collections/{}/points/query",
            self.base_url.trim_end_matches('/'),
            self.collection_name(collection)
        );

        let mut body = json!({
            "query": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(intent) = intent_filter {
            body["filter"] = json!({
                "must": [{"key": "intent", "match": {"value": intent}}]
            });
        }

        let resp = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;
        if !status.is_success() {
            return Err(ServiceError::from_status(SERVICE, status, &text));
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ServiceError::permanent(SERVICE, format!("invalid JSON response: {e}")))?;

        let points = data["result"]["points"]
            .as_array()
            .or_else(|| data["result"].as_array())
            .cloned()
            .unwrap_or_default();

        Ok(points
            .iter()
            .map(|point| ScoredMatch {
                score: point["score"].as_f64().unwrap_or(0.0) as f32,
                payload: point["payload"].clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StaticEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            Err(ServiceError::transient("openai", "down"))
        }
    }

    /// Returns a scripted response per call; records the filters it saw.
    struct ScriptedIndex {
        responses: Mutex<Vec<Result<Vec<ScoredMatch>, ServiceError>>>,
        filters_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedIndex {
        fn new(responses: Vec<Result<Vec<ScoredMatch>, ServiceError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                filters_seen: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for ScriptedIndex {
        async fn query(
            &self,
            _collection: ExampleCollection,
            _vector: &[f32],
            _top_k: usize,
            intent_filter: Option<&str>,
        ) -> Result<Vec<ScoredMatch>, ServiceError> {
            self.filters_seen
                .lock()
                .unwrap()
                .push(intent_filter.map(|s| s.to_string()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(vec![])
            } else {
                responses.remove(0)
            }
        }
    }

    fn example_match(query: &str, score: f32) -> ScoredMatch {
        ScoredMatch {
            score,
            payload: json!({
                "query": query,
                "response": format!("reply to {query}"),
                "intent": "pricing",
            }),
        }
    }

    #[tokio::test]
    async fn test_floor_filters_weak_matches() {
        let index = ScriptedIndex::new(vec![Ok(vec![
            example_match("strong", 0.9),
            example_match("weak", 0.5),
        ])]);
        // two calls happen because only one match clears the floor
        let examples = retrieve_similar(
            &StaticEmbedder,
            &index,
            "how much is a small rose?",
            ExampleCollection::Pricing,
            Some("pricing"),
        )
        .await;

        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].query, "strong");
    }

    #[tokio::test]
    async fn test_widens_without_filter_and_dedupes() {
        let index = ScriptedIndex::new(vec![
            Ok(vec![example_match("a", 0.9)]),
            Ok(vec![example_match("a", 0.9), example_match("b", 0.85)]),
        ]);
        let examples = retrieve_similar(
            &StaticEmbedder,
            &index,
            "question",
            ExampleCollection::Conversations,
            Some("pricing"),
        )
        .await;

        assert_eq!(examples.len(), 2);
        let filters = index.filters_seen.lock().unwrap();
        assert_eq!(filters.as_slice(), &[Some("pricing".to_string()), None]);
    }

    #[tokio::test]
    async fn test_degrades_on_embedding_failure() {
        let index = ScriptedIndex::new(vec![]);
        let examples = retrieve_similar(
            &FailingEmbedder,
            &index,
            "question",
            ExampleCollection::Conversations,
            None,
        )
        .await;
        assert!(examples.is_empty());
        assert!(index.filters_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_degrades_on_index_failure() {
        let index = ScriptedIndex::new(vec![Err(ServiceError::transient("qdrant", "down"))]);
        let examples = retrieve_similar(
            &StaticEmbedder,
            &index,
            "question",
            ExampleCollection::Conversations,
            Some("pricing"),
        )
        .await;
        assert!(examples.is_empty());
    }
}
