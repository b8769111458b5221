//! Answer corpus records read by the engine

use serde::{Deserialize, Serialize};

/// Survey question category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// One free-text answer as sent to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerText {
    pub id: i64,
    pub text: String,
    /// Detected language (ISO code), if known
    pub language: Option<String>,
}
