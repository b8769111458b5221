//! MECE (mutually exclusive, collectively exhaustive) validation issues

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    /// Two codes are semantically near-duplicates
    Overlap,
    /// Cluster members don't cohere with any assigned code
    Gap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// Advisory issue reported by the MECE validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeceIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_wire_format() {
        let json = r#"{"type":"overlap","severity":"warning","message":"Nike and Nike Inc overlap","details":{"similarity":0.93}}"#;
        let issue: MeceIssue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.kind, IssueKind::Overlap);
        assert_eq!(issue.severity, IssueSeverity::Warning);
        assert_eq!(issue.details["similarity"], 0.93);
    }

    #[test]
    fn test_issue_without_details() {
        let json = r#"{"type":"gap","severity":"info","message":"cluster 3 uncovered"}"#;
        let issue: MeceIssue = serde_json::from_str(json).unwrap();
        assert!(issue.details.is_null());
    }
}
