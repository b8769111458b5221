//! Data models for the codeframe engine
//!
//! - Generation lifecycle and configuration
//! - Per-cluster jobs
//! - Hierarchy nodes, tree view and edit commands
//! - MECE validation issues

pub mod answer;
pub mod cluster_job;
pub mod generation;
pub mod hierarchy;
pub mod mece;

pub use answer::{AnswerText, Category};
pub use cluster_job::{ClusterJob, JobStatus};
pub use generation::{
    ClusteringParameters, CodingMode, Generation, GenerationConfig, GenerationHandle,
    GenerationStatus, GenerationStatusReport, GenerationSummary, HierarchyPreference,
};
pub use hierarchy::{
    ConfidenceBand, EditAction, EditOutcome, HierarchyEdit, HierarchyEditRecord, HierarchyNode,
    NodeType, TreeNode,
};
pub use mece::{IssueKind, IssueSeverity, MeceIssue};
