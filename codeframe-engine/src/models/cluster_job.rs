//! Per-cluster unit of work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{AnswerText, Category, GenerationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// One cluster's worth of answers awaiting a hierarchy proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterJob {
    pub id: Uuid,
    pub generation_id: Uuid,
    pub cluster_id: i64,
    /// Cluster members in clustering order
    pub answers: Vec<AnswerText>,
    pub category: Category,
    pub config: GenerationConfig,
    pub cluster_size: usize,
    pub confidence: f64,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ClusterJob {
    pub fn new(
        generation_id: Uuid,
        cluster_id: i64,
        answers: Vec<AnswerText>,
        category: Category,
        config: GenerationConfig,
        cluster_size: usize,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation_id,
            cluster_id,
            answers,
            category,
            config,
            cluster_size,
            confidence,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}
