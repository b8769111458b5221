//! Taxonomy nodes, tree view and reviewer edit commands

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Root-level grouping
    Theme,
    /// Leaf, one codeable concept
    Code,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Theme => "theme",
            NodeType::Code => "code",
        }
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "theme" => Ok(NodeType::Theme),
            "code" => Ok(NodeType::Code),
            other => Err(format!("Unknown node type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    #[default]
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::Low => "low",
        }
    }

    /// Band a 0.0-1.0 cluster confidence
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceBand::High
        } else if score >= 0.5 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

impl FromStr for ConfidenceBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(ConfidenceBand::High),
            "medium" => Ok(ConfidenceBand::Medium),
            "low" => Ok(ConfidenceBand::Low),
            other => Err(format!("Unknown confidence band: {}", other)),
        }
    }
}

/// Persisted taxonomy node
///
/// Invariant: nodes of one generation form a forest; a `code` is a leaf
/// under exactly one `theme`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: Uuid,
    pub generation_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub level: i64,
    pub node_type: NodeType,
    pub name: String,
    pub description: Option<String>,
    pub confidence: ConfidenceBand,
    pub cluster_id: Option<i64>,
    pub cluster_size: Option<i64>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Spelling variant → frequency (brand mode)
    pub brand_variants: Option<BTreeMap<String, u32>>,
    pub example_texts: Option<Vec<String>>,
    pub is_edited: bool,
    /// Bumped by every structural edit
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HierarchyNode {
    pub fn new_theme(generation_id: Uuid, name: String) -> Self {
        Self::new(generation_id, None, 0, NodeType::Theme, name)
    }

    pub fn new_code(generation_id: Uuid, parent_id: Uuid, name: String) -> Self {
        Self::new(generation_id, Some(parent_id), 1, NodeType::Code, name)
    }

    fn new(
        generation_id: Uuid,
        parent_id: Option<Uuid>,
        level: i64,
        node_type: NodeType,
        name: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            generation_id,
            parent_id,
            level,
            node_type,
            name,
            description: None,
            confidence: ConfidenceBand::default(),
            cluster_id: None,
            cluster_size: None,
            embedding: None,
            brand_variants: None,
            example_texts: None,
            is_edited: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Text embedded to place this node in answer space
    pub fn embedding_text(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => {
                format!("{}: {}", self.name, description)
            }
            _ => self.name.clone(),
        }
    }
}

/// Node with its children, as returned by fetch hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: HierarchyNode,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn leaf(node: HierarchyNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Nodes in this subtree including self
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Rename,
    Merge,
    Move,
    Delete,
}

impl EditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditAction::Rename => "rename",
            EditAction::Merge => "merge",
            EditAction::Move => "move",
            EditAction::Delete => "delete",
        }
    }
}

impl FromStr for EditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rename" => Ok(EditAction::Rename),
            "merge" => Ok(EditAction::Merge),
            "move" => Ok(EditAction::Move),
            "delete" => Ok(EditAction::Delete),
            other => Err(format!("Unknown edit action: {}", other)),
        }
    }
}

/// Reviewer edit command (PATCH hierarchy body)
///
/// `expected_version`, when present, must equal the node's current version
/// or the edit is rejected without effect. Merge carries one version per
/// entry of `node_ids`, in the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum HierarchyEdit {
    Rename {
        node_id: Uuid,
        new_name: String,
        #[serde(default)]
        expected_version: Option<i64>,
    },
    Merge {
        node_ids: Vec<Uuid>,
        target_name: String,
        #[serde(default)]
        expected_versions: Option<Vec<i64>>,
    },
    Move {
        node_id: Uuid,
        new_parent_id: Option<Uuid>,
        #[serde(default)]
        expected_version: Option<i64>,
    },
    Delete {
        node_id: Uuid,
        #[serde(default)]
        expected_version: Option<i64>,
    },
}

impl HierarchyEdit {
    pub fn action(&self) -> EditAction {
        match self {
            HierarchyEdit::Rename { .. } => EditAction::Rename,
            HierarchyEdit::Merge { .. } => EditAction::Merge,
            HierarchyEdit::Move { .. } => EditAction::Move,
            HierarchyEdit::Delete { .. } => EditAction::Delete,
        }
    }
}

/// Result of an applied edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub action: EditAction,
    /// Edited node, or the node created by a merge
    pub node_id: Uuid,
    /// Version of `node_id` after the edit
    pub version: i64,
    /// Nodes no longer present
    pub removed: Vec<Uuid>,
}

/// Append-only audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEditRecord {
    pub id: i64,
    pub generation_id: Uuid,
    pub node_id: Uuid,
    pub action: EditAction,
    pub payload: serde_json::Value,
    pub node_version: i64,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_parses_tagged_action() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"action":"rename","node_id":"{}","new_name":"Price"}}"#, id);
        let edit: HierarchyEdit = serde_json::from_str(&json).unwrap();
        assert_eq!(
            edit,
            HierarchyEdit::Rename {
                node_id: id,
                new_name: "Price".to_string(),
                expected_version: None
            }
        );
        assert_eq!(edit.action(), EditAction::Rename);
    }

    #[test]
    fn test_edit_rejects_unknown_action() {
        let json = r#"{"action":"split","node_id":"00000000-0000-0000-0000-000000000000"}"#;
        assert!(serde_json::from_str::<HierarchyEdit>(json).is_err());
    }

    #[test]
    fn test_edit_rejects_missing_payload_field() {
        let json = r#"{"action":"merge","node_ids":[]}"#;
        assert!(serde_json::from_str::<HierarchyEdit>(json).is_err());
    }

    #[test]
    fn test_confidence_band_from_score() {
        assert_eq!(ConfidenceBand::from_score(1.0), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(0.6), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(0.1), ConfidenceBand::Low);
    }

    #[test]
    fn test_embedding_text_includes_description() {
        let mut node = HierarchyNode::new_theme(Uuid::new_v4(), "Price".to_string());
        assert_eq!(node.embedding_text(), "Price");
        node.description = Some("Cost and value for money".to_string());
        assert_eq!(node.embedding_text(), "Price: Cost and value for money");
    }

    #[test]
    fn test_tree_node_serializes_flat_fields() {
        let theme = HierarchyNode::new_theme(Uuid::new_v4(), "Service".to_string());
        let code = HierarchyNode::new_code(theme.generation_id, theme.id, "Friendly staff".to_string());
        let tree = TreeNode {
            node: theme,
            children: vec![TreeNode::leaf(code)],
        };

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["name"], "Service");
        assert_eq!(json["node_type"], "theme");
        assert_eq!(json["children"][0]["name"], "Friendly staff");
        assert!(json.get("embedding").is_none());
        assert_eq!(tree.size(), 2);
    }
}
