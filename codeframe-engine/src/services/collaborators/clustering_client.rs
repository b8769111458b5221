//! Clustering service client

use async_trait::async_trait;
use codeframe_common::Result;
use std::time::Duration;
use tracing::debug;

use super::{ClusteringProvider, ClusteringRequest, ClusteringResponse, HttpCollaborator};

/// `POST {base_url}/cluster`
pub struct ClusteringClient {
    http: HttpCollaborator,
}

impl ClusteringClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpCollaborator::new("clustering", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ClusteringProvider for ClusteringClient {
    async fn cluster(&self, request: &ClusteringRequest) -> Result<ClusteringResponse> {
        debug!(
            service = self.http.service(),
            answers = request.answers.len(),
            min_cluster_size = request.config.min_cluster_size,
            min_samples = request.config.min_samples,
            "Requesting clustering"
        );

        let response: ClusteringResponse = self.http.post_json("/cluster", request).await?;

        debug!(
            n_clusters = response.n_clusters,
            noise_count = response.noise_count,
            "Clustering response received"
        );
        Ok(response)
    }
}
