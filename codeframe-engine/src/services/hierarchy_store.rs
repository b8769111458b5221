//! Hierarchy store
//!
//! Nodes are persisted flat (one row per node, `parent_id` links) and
//! assembled into a forest on read. Reviewer edits run in a single
//! transaction each, check the node's version when the caller supplies
//! one, and append to the `hierarchy_edits` audit log.

use codeframe_common::{Error, Result};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::{
    EditAction, EditOutcome, HierarchyEdit, HierarchyEditRecord, HierarchyNode, NodeType, TreeNode,
};
use crate::utils::db_retry::retry_on_lock;

/// Build a forest from flat nodes
///
/// Roots and every child list are sorted by name. A node whose parent is
/// not in `nodes` is treated as a root.
pub fn assemble_tree(nodes: Vec<HierarchyNode>) -> Vec<TreeNode> {
    let total = nodes.len();
    let ids: HashSet<Uuid> = nodes.iter().map(|n| n.id).collect();

    let mut roots = Vec::new();
    let mut children_of: HashMap<Uuid, Vec<HierarchyNode>> = HashMap::new();

    for node in nodes {
        match node.parent_id {
            Some(parent_id) if ids.contains(&parent_id) => {
                children_of.entry(parent_id).or_default().push(node);
            }
            Some(parent_id) => {
                warn!(node_id = %node.id, parent_id = %parent_id, "Parent missing, treating node as root");
                roots.push(node);
            }
            None => roots.push(node),
        }
    }

    sort_by_name(&mut roots);
    let forest: Vec<TreeNode> = roots
        .into_iter()
        .map(|root| build_subtree(root, &mut children_of))
        .collect();

    let assembled: usize = forest.iter().map(TreeNode::size).sum();
    if assembled != total {
        warn!(
            total,
            assembled,
            "Hierarchy contains unreachable nodes (parent cycle), omitted from tree"
        );
    }

    forest
}

fn build_subtree(node: HierarchyNode, children_of: &mut HashMap<Uuid, Vec<HierarchyNode>>) -> TreeNode {
    let mut children = children_of.remove(&node.id).unwrap_or_default();
    sort_by_name(&mut children);

    TreeNode {
        children: children
            .into_iter()
            .map(|child| build_subtree(child, children_of))
            .collect(),
        node,
    }
}

fn sort_by_name(nodes: &mut [HierarchyNode]) {
    nodes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}

/// Depth-first (pre-order) flattening; inverse of [`assemble_tree`]
pub fn flatten(forest: &[TreeNode]) -> Vec<HierarchyNode> {
    let mut nodes = Vec::new();
    for tree in forest {
        push_subtree(tree, &mut nodes);
    }
    nodes
}

fn push_subtree(tree: &TreeNode, out: &mut Vec<HierarchyNode>) {
    out.push(tree.node.clone());
    for child in &tree.children {
        push_subtree(child, out);
    }
}

pub struct HierarchyStore {
    db: SqlitePool,
}

impl HierarchyStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Assembled forest for a generation
    pub async fn load_tree(&self, generation_id: Uuid) -> Result<Vec<TreeNode>> {
        let nodes = db::hierarchy::load_nodes(&self.db, generation_id).await?;
        Ok(assemble_tree(nodes))
    }

    /// Audit entries for one node, oldest first
    pub async fn history(&self, generation_id: Uuid, node_id: Uuid) -> Result<Vec<HierarchyEditRecord>> {
        db::hierarchy::load_edits(&self.db, generation_id, node_id).await
    }

    /// Apply one reviewer edit atomically
    pub async fn apply_edit(
        &self,
        generation_id: Uuid,
        edit: &HierarchyEdit,
        actor: Option<&str>,
    ) -> Result<EditOutcome> {
        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db).await?;

        let outcome = retry_on_lock("hierarchy edit", max_wait_ms, || {
            self.apply_edit_once(generation_id, edit, actor)
        })
        .await?;

        info!(
            generation_id = %generation_id,
            node_id = %outcome.node_id,
            action = outcome.action.as_str(),
            version = outcome.version,
            "Hierarchy edited"
        );

        Ok(outcome)
    }

    async fn apply_edit_once(
        &self,
        generation_id: Uuid,
        edit: &HierarchyEdit,
        actor: Option<&str>,
    ) -> Result<EditOutcome> {
        let mut tx = self.db.begin().await?;

        // Any error returns before commit; dropping the transaction rolls back
        let outcome = match edit {
            HierarchyEdit::Rename {
                node_id,
                new_name,
                expected_version,
            } => rename(&mut tx, generation_id, *node_id, new_name, *expected_version, actor).await?,
            HierarchyEdit::Merge {
                node_ids,
                target_name,
                expected_versions,
            } => {
                merge(
                    &mut tx,
                    generation_id,
                    node_ids,
                    target_name,
                    expected_versions.as_deref(),
                    actor,
                )
                .await?
            }
            HierarchyEdit::Move {
                node_id,
                new_parent_id,
                expected_version,
            } => move_node(&mut tx, generation_id, *node_id, *new_parent_id, *expected_version, actor).await?,
            HierarchyEdit::Delete {
                node_id,
                expected_version,
            } => delete(&mut tx, generation_id, *node_id, *expected_version, actor).await?,
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

async fn rename(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    node_id: Uuid,
    new_name: &str,
    expected_version: Option<i64>,
    actor: Option<&str>,
) -> Result<EditOutcome> {
    let new_name = require_name(new_name, "new_name")?;
    let node = load_in_generation(conn, generation_id, node_id).await?;
    check_version(&node, expected_version)?;

    let version = db::hierarchy::rename_node(conn, node_id, new_name).await?;
    db::hierarchy::append_edit(
        conn,
        generation_id,
        node_id,
        EditAction::Rename,
        &json!({ "old_name": node.name, "new_name": new_name }),
        version,
        actor,
    )
    .await?;

    Ok(EditOutcome {
        action: EditAction::Rename,
        node_id,
        version,
        removed: Vec::new(),
    })
}

async fn merge(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    node_ids: &[Uuid],
    target_name: &str,
    expected_versions: Option<&[i64]>,
    actor: Option<&str>,
) -> Result<EditOutcome> {
    let target_name = require_name(target_name, "target_name")?;

    if node_ids.len() < 2 {
        return Err(Error::InvalidInput("Merge requires at least 2 nodes".to_string()));
    }
    if let Some(versions) = expected_versions {
        if versions.len() != node_ids.len() {
            return Err(Error::InvalidInput(format!(
                "expected_versions has {} entries for {} nodes",
                versions.len(),
                node_ids.len()
            )));
        }
    }
    let unique: HashSet<&Uuid> = node_ids.iter().collect();
    if unique.len() != node_ids.len() {
        return Err(Error::InvalidInput("Merge node ids must be distinct".to_string()));
    }

    let mut nodes = Vec::with_capacity(node_ids.len());
    for (i, id) in node_ids.iter().enumerate() {
        let node = load_in_generation(conn, generation_id, *id).await?;
        check_version(&node, expected_versions.map(|v| v[i]))?;
        nodes.push(node);
    }

    let first = &nodes[0];
    if nodes.iter().any(|n| n.node_type != first.node_type) {
        return Err(Error::InvalidInput(
            "Merged nodes must all be of the same type".to_string(),
        ));
    }

    for node in &nodes {
        let descendants = db::hierarchy::descendant_ids(conn, node.id).await?;
        if descendants.iter().any(|d| unique.contains(d)) {
            return Err(Error::InvalidInput(format!(
                "Cannot merge node {} with one of its descendants",
                node.id
            )));
        }
    }

    let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    let mut merged = HierarchyNode::new_theme(generation_id, target_name.to_string());
    merged.parent_id = first.parent_id;
    merged.level = first.level;
    merged.node_type = first.node_type;
    merged.confidence = first.confidence;
    merged.description = Some(format!("Merged from: {}", names.join(", ")));
    merged.is_edited = true;
    merged.cluster_size = nodes
        .iter()
        .filter_map(|n| n.cluster_size)
        .reduce(|a, b| a + b);
    merged.brand_variants = merge_brand_variants(&nodes);
    merged.example_texts = merge_example_texts(&nodes);

    db::hierarchy::insert_node(conn, &merged).await?;

    for node in &nodes {
        db::hierarchy::reparent_children(conn, node.id, merged.id).await?;
    }
    for node in &nodes {
        db::hierarchy::append_edit(
            conn,
            generation_id,
            node.id,
            EditAction::Merge,
            &json!({ "merged_into": merged.id, "target_name": target_name }),
            node.version,
            actor,
        )
        .await?;
        db::hierarchy::delete_node(conn, node.id).await?;
    }

    db::hierarchy::append_edit(
        conn,
        generation_id,
        merged.id,
        EditAction::Merge,
        &json!({ "merged_ids": node_ids, "merged_names": names, "target_name": target_name }),
        merged.version,
        actor,
    )
    .await?;

    Ok(EditOutcome {
        action: EditAction::Merge,
        node_id: merged.id,
        version: merged.version,
        removed: node_ids.to_vec(),
    })
}

async fn move_node(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    node_id: Uuid,
    new_parent_id: Option<Uuid>,
    expected_version: Option<i64>,
    actor: Option<&str>,
) -> Result<EditOutcome> {
    let node = load_in_generation(conn, generation_id, node_id).await?;
    check_version(&node, expected_version)?;

    let level = match new_parent_id {
        None => {
            if node.node_type == NodeType::Code {
                return Err(Error::InvalidInput(
                    "A code must be placed under a theme".to_string(),
                ));
            }
            0
        }
        Some(_) if node.node_type == NodeType::Theme => {
            return Err(Error::InvalidInput(
                "A theme must stay a root; only codes can be moved under a theme".to_string(),
            ));
        }
        Some(parent_id) => {
            if parent_id == node_id {
                return Err(Error::InvalidInput("A node cannot be its own parent".to_string()));
            }
            let parent = load_in_generation(conn, generation_id, parent_id).await?;

            let descendants = db::hierarchy::descendant_ids(conn, node_id).await?;
            if descendants.contains(&parent_id) {
                return Err(Error::InvalidInput(format!(
                    "Moving node {} under its descendant {} would create a cycle",
                    node_id, parent_id
                )));
            }
            if parent.node_type != NodeType::Theme {
                return Err(Error::InvalidInput(
                    "Nodes can only be placed under a theme".to_string(),
                ));
            }
            parent.level + 1
        }
    };

    let version = db::hierarchy::set_parent(conn, node_id, new_parent_id, level).await?;
    db::hierarchy::append_edit(
        conn,
        generation_id,
        node_id,
        EditAction::Move,
        &json!({ "old_parent_id": node.parent_id, "new_parent_id": new_parent_id }),
        version,
        actor,
    )
    .await?;

    Ok(EditOutcome {
        action: EditAction::Move,
        node_id,
        version,
        removed: Vec::new(),
    })
}

async fn delete(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    node_id: Uuid,
    expected_version: Option<i64>,
    actor: Option<&str>,
) -> Result<EditOutcome> {
    let node = load_in_generation(conn, generation_id, node_id).await?;
    check_version(&node, expected_version)?;

    let mut removed = vec![node_id];
    removed.extend(db::hierarchy::descendant_ids(conn, node_id).await?);

    db::hierarchy::delete_node(conn, node_id).await?;
    db::hierarchy::append_edit(
        conn,
        generation_id,
        node_id,
        EditAction::Delete,
        &json!({ "name": node.name, "removed_ids": removed }),
        node.version,
        actor,
    )
    .await?;

    Ok(EditOutcome {
        action: EditAction::Delete,
        node_id,
        version: node.version,
        removed,
    })
}

async fn load_in_generation(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    node_id: Uuid,
) -> Result<HierarchyNode> {
    db::hierarchy::load_node(conn, node_id)
        .await?
        .filter(|node| node.generation_id == generation_id)
        .ok_or_else(|| Error::NotFound(format!("Node {} not found in generation {}", node_id, generation_id)))
}

fn check_version(node: &HierarchyNode, expected_version: Option<i64>) -> Result<()> {
    match expected_version {
        Some(expected) if expected != node.version => Err(Error::Conflict(format!(
            "Node {} is at version {}, expected {}",
            node.id, node.version, expected
        ))),
        _ => Ok(()),
    }
}

fn require_name<'a>(name: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}

fn merge_brand_variants(nodes: &[HierarchyNode]) -> Option<BTreeMap<String, u32>> {
    let mut merged: Option<BTreeMap<String, u32>> = None;
    for variants in nodes.iter().filter_map(|n| n.brand_variants.as_ref()) {
        let target = merged.get_or_insert_with(BTreeMap::new);
        for (variant, count) in variants {
            *target.entry(variant.clone()).or_insert(0) += count;
        }
    }
    merged
}

fn merge_example_texts(nodes: &[HierarchyNode]) -> Option<Vec<String>> {
    let texts: Vec<String> = nodes
        .iter()
        .filter_map(|n| n.example_texts.as_ref())
        .flatten()
        .cloned()
        .collect();
    (!texts.is_empty()).then_some(texts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme(generation_id: Uuid, name: &str) -> HierarchyNode {
        HierarchyNode::new_theme(generation_id, name.to_string())
    }

    fn code(parent: &HierarchyNode, name: &str) -> HierarchyNode {
        HierarchyNode::new_code(parent.generation_id, parent.id, name.to_string())
    }

    fn names(forest: &[TreeNode]) -> Vec<&str> {
        forest.iter().map(|t| t.node.name.as_str()).collect()
    }

    #[test]
    fn test_assemble_sorts_roots_and_children() {
        let generation_id = Uuid::new_v4();
        let service = theme(generation_id, "Service");
        let price = theme(generation_id, "Price");
        let nodes = vec![
            code(&service, "Slow"),
            service.clone(),
            code(&price, "Too expensive"),
            code(&service, "Friendly"),
            price.clone(),
        ];

        let forest = assemble_tree(nodes);
        assert_eq!(names(&forest), vec!["Price", "Service"]);
        assert_eq!(names(&forest[1].children), vec!["Friendly", "Slow"]);
        assert_eq!(forest.iter().map(TreeNode::size).sum::<usize>(), 5);
    }

    #[test]
    fn test_orphan_becomes_root() {
        let generation_id = Uuid::new_v4();
        let ghost = theme(generation_id, "Ghost");
        let orphan = code(&ghost, "Orphan");

        let forest = assemble_tree(vec![orphan.clone()]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].node, orphan);
    }

    #[test]
    fn test_flatten_assemble_round_trip() {
        let generation_id = Uuid::new_v4();
        let a = theme(generation_id, "A");
        let b = theme(generation_id, "B");
        let ghost = theme(generation_id, "Ghost");
        let nodes = vec![
            code(&b, "b2"),
            code(&a, "a1"),
            b.clone(),
            code(&b, "b1"),
            a.clone(),
            code(&ghost, "orphan"),
        ];

        let once = assemble_tree(nodes);
        let twice = assemble_tree(flatten(&once));
        assert_eq!(once, twice);
        assert_eq!(flatten(&once).len(), 6);
    }

    #[test]
    fn test_flatten_is_preorder() {
        let generation_id = Uuid::new_v4();
        let a = theme(generation_id, "A");
        let forest = assemble_tree(vec![code(&a, "x"), a.clone()]);
        let flat = flatten(&forest);
        assert_eq!(flat[0].id, a.id);
        assert_eq!(flat[1].parent_id, Some(a.id));
    }

    #[test]
    fn test_cycle_nodes_are_omitted_not_looped() {
        let generation_id = Uuid::new_v4();
        let mut x = theme(generation_id, "X");
        let mut y = theme(generation_id, "Y");
        x.parent_id = Some(y.id);
        y.parent_id = Some(x.id);
        let root = theme(generation_id, "Root");

        let forest = assemble_tree(vec![x, y, root]);
        assert_eq!(names(&forest), vec!["Root"]);
    }

    #[test]
    fn test_check_version() {
        let node = theme(Uuid::new_v4(), "A");
        assert!(check_version(&node, None).is_ok());
        assert!(check_version(&node, Some(1)).is_ok());
        assert!(matches!(check_version(&node, Some(2)), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_merge_brand_variants_sums_counts() {
        let generation_id = Uuid::new_v4();
        let mut a = theme(generation_id, "Nike");
        let mut b = theme(generation_id, "Nike Inc");
        a.brand_variants = Some(BTreeMap::from([("Nike".to_string(), 3), ("nike".to_string(), 1)]));
        b.brand_variants = Some(BTreeMap::from([("Nike".to_string(), 2)]));

        let merged = merge_brand_variants(&[a, b]).unwrap();
        assert_eq!(merged["Nike"], 5);
        assert_eq!(merged["nike"], 1);
        assert!(merge_brand_variants(&[theme(generation_id, "None")]).is_none());
    }
}
