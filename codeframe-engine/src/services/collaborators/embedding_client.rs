//! Embedding service client

use async_trait::async_trait;
use codeframe_common::{Error, Result};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::{
    EmbeddingInput, EmbeddingOutput, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse,
    HttpCollaborator,
};

/// `POST {base_url}/embeddings`
pub struct EmbeddingClient {
    http: HttpCollaborator,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpCollaborator::new("embedding", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    async fn embed(&self, model: &str, texts: &[EmbeddingInput]) -> Result<Vec<EmbeddingOutput>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(service = self.http.service(), model, count = texts.len(), "Requesting embeddings");

        let response: EmbeddingResponse = self
            .http
            .post_json("/embeddings", &EmbeddingRequest { model, texts })
            .await?;

        check_complete(texts, &response.embeddings)?;
        Ok(response.embeddings)
    }
}

/// Every requested id must come back with a non-empty vector
fn check_complete(requested: &[EmbeddingInput], returned: &[EmbeddingOutput]) -> Result<()> {
    let returned_ids: HashSet<&str> = returned
        .iter()
        .filter(|e| !e.embedding.is_empty())
        .map(|e| e.id.as_str())
        .collect();

    let missing = requested
        .iter()
        .filter(|t| !returned_ids.contains(t.id.as_str()))
        .count();

    if missing > 0 {
        return Err(Error::Upstream {
            service: "embedding".to_string(),
            message: format!("{} of {} embeddings missing from response", missing, requested.len()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: &str) -> EmbeddingInput {
        EmbeddingInput {
            id: id.to_string(),
            text: format!("text {}", id),
        }
    }

    fn output(id: &str, embedding: Vec<f32>) -> EmbeddingOutput {
        EmbeddingOutput {
            id: id.to_string(),
            embedding,
        }
    }

    #[test]
    fn test_complete_response_accepted() {
        let requested = vec![input("1"), input("2")];
        let returned = vec![output("2", vec![0.1]), output("1", vec![0.2])];
        assert!(check_complete(&requested, &returned).is_ok());
    }

    #[test]
    fn test_missing_or_empty_vectors_rejected() {
        let requested = vec![input("1"), input("2")];
        let returned = vec![output("1", vec![0.2]), output("2", Vec::new())];
        let err = check_complete(&requested, &returned).unwrap_err();
        assert!(err.to_string().contains("1 of 2 embeddings missing"));
    }

    #[tokio::test]
    async fn test_empty_request_skips_call() {
        let client = EmbeddingClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        assert!(client.embed("model", &[]).await.unwrap().is_empty());
    }
}
