//! Hierarchy proposal service client
//!
//! Proposal calls are the expensive ones (one LLM round-trip per cluster),
//! so the client is rate limited across every generation in the process.

use async_trait::async_trait;
use codeframe_common::{Error, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use super::{HierarchyProposer, HttpCollaborator, ProposalRequest, ProposalResponse};

/// `POST {base_url}/propose`
pub struct HierarchyClient {
    http: HttpCollaborator,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HierarchyClient {
    pub fn new(base_url: &str, timeout: Duration, requests_per_second: u32) -> Result<Self> {
        let per_second = NonZeroU32::new(requests_per_second).ok_or_else(|| {
            Error::Config("proposal_rate_per_second must be greater than zero".to_string())
        })?;

        Ok(Self {
            http: HttpCollaborator::new("hierarchy", base_url, timeout)?,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl HierarchyProposer for HierarchyClient {
    async fn propose(&self, request: &ProposalRequest) -> Result<ProposalResponse> {
        self.rate_limiter.until_ready().await;

        debug!(
            service = self.http.service(),
            generation_id = %request.generation_id,
            cluster_id = request.cluster_id,
            texts = request.texts.len(),
            "Requesting hierarchy proposal"
        );

        self.http.post_json("/propose", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_rejected() {
        let result = HierarchyClient::new("http://localhost:8003", Duration::from_secs(60), 0);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
