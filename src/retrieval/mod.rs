//! Similarity retrieval over historical loan cases
//!
//! The vector store is an external collaborator. The pipeline only embeds a
//! summary of the application, asks for the top-K neighbours and consumes
//! what comes back. Every failure here degrades to an empty result set.

use crate::error::PipelineError;
use crate::models::{LoanApplication, SimilarCase};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

/// Text to vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Nearest-neighbour search over stored case embeddings.
#[async_trait]
pub trait SimilarityRetriever: Send + Sync {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SimilarCase>>;
}

/// Text embedded for the similarity query.
pub fn application_summary(application: &LoanApplication) -> String {
    format!(
        "Loan of {:.0} over {} months for {}. Applicant: {} ({} years), home {}, \
         annual income {:.0}, monthly debt {:.0}, credit score {}, {} accounts, \
         delinquencies {}, bankruptcy {}.",
        application.loan_amount,
        application.loan_term,
        application.loan_purpose.as_str(),
        application.job_title,
        application
            .job_tenure
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        application.home_status.as_str(),
        application.annual_income,
        application.monthly_debt,
        application.credit_score,
        application.accounts,
        if application.delinquencies { "yes" } else { "no" },
        if application.bankruptcy { "yes" } else { "no" },
    )
}

/// Embed the application and fetch its neighbours.
///
/// Never fails: a timeout or any embedder/store error is logged and yields
/// an empty list.
pub async fn retrieve_similar_cases(
    embedder: &dyn Embedder,
    retriever: &dyn SimilarityRetriever,
    application: &LoanApplication,
    top_k: usize,
    timeout: Duration,
) -> Vec<SimilarCase> {
    let query = async {
        let embedding = embedder.embed(&application_summary(application)).await?;
        retriever.search(&embedding, top_k).await
    };

    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(cases)) => {
            debug!(count = cases.len(), "Similar cases retrieved");
            cases
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Similarity retrieval failed; continuing without similar cases");
            Vec::new()
        }
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Similarity retrieval timed out; continuing without similar cases"
            );
            Vec::new()
        }
    }
}

//
// ================= Qdrant =================
//

/// REST client for a Qdrant collection.
pub struct QdrantRetriever {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantRetriever {
    pub fn new(base_url: &str, collection: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    #[serde(default)]
    result: Vec<QdrantPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl From<QdrantPoint> for SimilarCase {
    fn from(point: QdrantPoint) -> Self {
        let case_id = match point.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        SimilarCase {
            case_id,
            score: point.score,
            payload: point.payload.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SimilarityRetriever for QdrantRetriever {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SimilarCase>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let body = json!({
            "vector": embedding,
            "limit": top_k,
            "with_payload": true,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("Qdrant request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Retrieval(format!(
                "Qdrant returned {}: {}",
                status, text
            )));
        }

        let parsed: QdrantSearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("Invalid Qdrant response: {}", e)))?;

        Ok(parsed.result.into_iter().map(SimilarCase::from).collect())
    }
}

//
// ================= In-Memory =================
//

struct StoredCase {
    case_id: String,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

/// Brute-force cosine search for development and tests.
#[derive(Default)]
pub struct InMemoryRetriever {
    cases: Vec<StoredCase>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, case_id: &str, vector: Vec<f32>, payload: Map<String, Value>) {
        self.cases.push(StoredCase {
            case_id: case_id.to_string(),
            vector,
            payload,
        });
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[async_trait]
impl SimilarityRetriever for InMemoryRetriever {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SimilarCase>> {
        let mut scored: Vec<SimilarCase> = self
            .cases
            .iter()
            .map(|case| SimilarCase {
                case_id: case.case_id.clone(),
                score: cosine_similarity(embedding, &case.vector),
                payload: case.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.case_id.cmp(&b.case_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

//
// ================= Hashing Embedder =================
//

/// Deterministic bag-of-words feature hashing. No model download, no
/// network; good enough to rank near-duplicate summaries together.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}
