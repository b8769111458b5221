//! Engine services
//!
//! - `collaborators`: external embedding, clustering, proposal and MECE contracts
//! - `embedding_cache`: hash-validated answer/node embeddings
//! - `job_orchestrator`: per-cluster proposal jobs and finalization
//! - `hierarchy_store`: tree assembly and reviewer edits
//! - `apply_engine`: nearest-code assignment onto answers
//! - `generation_orchestrator`: composes the above
//! - `vector_codec`: legacy embedding storage formats

pub mod apply_engine;
pub mod collaborators;
pub mod embedding_cache;
pub mod generation_orchestrator;
pub mod hierarchy_store;
pub mod job_orchestrator;
pub mod vector_codec;

pub use apply_engine::{ApplyEngine, ApplyReport};
pub use embedding_cache::{EmbeddingCache, EmbeddingReport};
pub use generation_orchestrator::{
    Collaborators, GenerationOrchestrator, OrchestratorSettings, StartRequest,
};
pub use hierarchy_store::HierarchyStore;
pub use job_orchestrator::{JobOrchestrator, JobSettings};
