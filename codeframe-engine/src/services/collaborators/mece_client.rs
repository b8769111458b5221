//! MECE validator client

use async_trait::async_trait;
use codeframe_common::Result;
use std::time::Duration;
use tracing::debug;

use super::{HttpCollaborator, MeceReport, MeceRequest, MeceValidator};

/// `POST {base_url}/validate`
pub struct MeceClient {
    http: HttpCollaborator,
}

impl MeceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpCollaborator::new("mece", base_url, timeout)?,
        })
    }
}

#[async_trait]
impl MeceValidator for MeceClient {
    async fn validate(&self, request: &MeceRequest) -> Result<MeceReport> {
        debug!(
            service = self.http.service(),
            nodes = request.nodes.len(),
            overlap_threshold = request.overlap_threshold,
            gap_threshold = request.gap_threshold,
            "Requesting MECE validation"
        );

        self.http.post_json("/validate", request).await
    }
}
