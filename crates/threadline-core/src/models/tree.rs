// ABOUTME: Discussion tree assembled from flat message records
// ABOUTME: Arena of nodes linked by child ids with root-to-leaf path queries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use super::{Discussion, GenerationDetail, Message};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// One message with its generation detail and ordered child ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// The message
    pub message: Message,
    /// Present exactly when the message is an assistant reply
    pub detail: Option<GenerationDetail>,
    /// Child message ids ordered by creation time, then insertion order
    pub children: Vec<String>,
}

/// A discussion with every reachable message
///
/// Nodes live in a flat list in (`created_at`, `seq`) order and refer to each
/// other by id. Serialized payloads stay shallow however deep the branch runs.
/// The id index is not serialized; it is rebuilt on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TreeParts")]
pub struct DiscussionTree {
    /// Discussion row at the time of the read
    pub discussion: Discussion,
    /// Root ids in creation order
    pub roots: Vec<String>,
    /// All reachable nodes in creation order
    pub nodes: Vec<TreeNode>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

/// Serialized shape of [`DiscussionTree`]
#[derive(Deserialize)]
struct TreeParts {
    discussion: Discussion,
    roots: Vec<String>,
    nodes: Vec<TreeNode>,
}

impl From<TreeParts> for DiscussionTree {
    fn from(parts: TreeParts) -> Self {
        Self::from_parts(parts.discussion, parts.roots, parts.nodes)
    }
}

impl DiscussionTree {
    /// Assemble a tree from flat records
    ///
    /// Records may arrive in any order. Messages whose parent is absent from the
    /// set are treated as roots only when they have no parent at all; anything
    /// else that cannot be reached from a root is left out.
    #[must_use]
    pub fn assemble(
        discussion: Discussion,
        mut records: Vec<(Message, Option<GenerationDetail>)>,
    ) -> Self {
        records.sort_by(|(a, _), (b, _)| a.order_key().cmp(&b.order_key()));

        let mut children: HashMap<&str, Vec<String>> = HashMap::new();
        let mut roots = Vec::new();
        for (message, _) in &records {
            match &message.parent_id {
                Some(parent) => children
                    .entry(parent.as_str())
                    .or_default()
                    .push(message.id.clone()),
                None => roots.push(message.id.clone()),
            }
        }

        // Breadth-first walk from the roots; the visited set guards against cycles
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = roots.iter().map(String::as_str).collect();
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id.to_owned()) {
                continue;
            }
            if let Some(kids) = children.get(id) {
                queue.extend(kids.iter().map(String::as_str));
            }
        }

        let mut child_lists: HashMap<String, Vec<String>> = children
            .into_iter()
            .map(|(parent, kids)| (parent.to_owned(), kids))
            .collect();

        let nodes = records
            .into_iter()
            .filter(|(message, _)| reachable.contains(&message.id))
            .map(|(message, detail)| {
                let children = child_lists.remove(&message.id).unwrap_or_default();
                TreeNode {
                    message,
                    detail,
                    children,
                }
            })
            .collect();

        Self::from_parts(discussion, roots, nodes)
    }

    fn from_parts(discussion: Discussion, roots: Vec<String>, nodes: Vec<TreeNode>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.message.id.clone(), position))
            .collect();
        Self {
            discussion,
            roots,
            nodes,
            index,
        }
    }

    /// Number of messages in the tree
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by message id
    #[must_use]
    pub fn get(&self, message_id: &str) -> Option<&TreeNode> {
        self.index
            .get(message_id)
            .and_then(|&position| self.nodes.get(position))
    }

    /// Whether the tree contains the message
    #[must_use]
    pub fn contains(&self, message_id: &str) -> bool {
        self.get(message_id).is_some()
    }

    /// Root nodes in creation order
    pub fn root_nodes(&self) -> impl DoubleEndedIterator<Item = &TreeNode> {
        self.roots.iter().filter_map(|id| self.get(id))
    }

    /// Children of a message in sibling order
    #[must_use]
    pub fn children_of(&self, message_id: &str) -> Vec<&TreeNode> {
        self.get(message_id)
            .map(|node| node.children.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Messages with no replies
    #[must_use]
    pub fn leaves(&self) -> Vec<&TreeNode> {
        self.nodes
            .iter()
            .filter(|node| node.children.is_empty())
            .collect()
    }

    /// Most recently created message
    #[must_use]
    pub fn latest(&self) -> Option<&TreeNode> {
        self.nodes.iter().max_by_key(|node| node.message.order_key())
    }

    /// Messages from the root down to `message_id`, inclusive
    ///
    /// Returns `None` when the message is not part of the tree.
    #[must_use]
    pub fn path_to(&self, message_id: &str) -> Option<Vec<&TreeNode>> {
        let mut path = Vec::new();
        let mut cursor = self.get(message_id);
        while let Some(node) = cursor {
            if path.len() > self.nodes.len() {
                return None;
            }
            path.push(node);
            cursor = node
                .message
                .parent_id
                .as_deref()
                .and_then(|parent| self.get(parent));
        }
        if path.is_empty() {
            return None;
        }
        path.reverse();
        Some(path)
    }

    /// Depth-first walk yielding each node with its depth, siblings in order
    #[must_use]
    pub fn depth_first(&self) -> Vec<(usize, &TreeNode)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, &TreeNode)> =
            self.root_nodes().rev().map(|node| (0, node)).collect();
        while let Some((depth, node)) = stack.pop() {
            out.push((depth, node));
            for child in node.children.iter().rev().filter_map(|id| self.get(id)) {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use chrono::{Duration, TimeZone, Utc};

    fn discussion() -> Discussion {
        let at = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();
        Discussion {
            id: "d1".to_owned(),
            owner_id: "o1".to_owned(),
            title: None,
            system_prompt: None,
            root_message_id: "m1".to_owned(),
            message_count: 0,
            total_tokens: 0,
            created_at: at,
            updated_at: at,
        }
    }

    fn message(id: &str, parent: Option<&str>, seq: i64, offset_ms: i64) -> Message {
        let base = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();
        Message {
            id: id.to_owned(),
            discussion_id: "d1".to_owned(),
            parent_id: parent.map(str::to_owned),
            role: MessageRole::User,
            content: id.to_owned(),
            seq,
            created_at: base + Duration::milliseconds(offset_ms),
        }
    }

    #[test]
    fn siblings_with_equal_timestamps_follow_insertion_order() {
        let records = vec![
            (message("c", Some("m1"), 3, 5), None),
            (message("m1", None, 1, 0), None),
            (message("b", Some("m1"), 2, 5), None),
        ];
        let tree = DiscussionTree::assemble(discussion(), records);
        let ids: Vec<_> = tree
            .children_of("m1")
            .iter()
            .map(|n| n.message.id.clone())
            .collect();
        assert_eq!(ids, vec!["b".to_owned(), "c".to_owned()]);
        assert_eq!(tree.latest().map(|n| n.message.id.as_str()), Some("c"));
    }

    #[test]
    fn unreachable_records_are_dropped() {
        let records = vec![
            (message("m1", None, 1, 0), None),
            (message("x", Some("ghost"), 2, 1), None),
        ];
        let tree = DiscussionTree::assemble(discussion(), records);
        assert_eq!(tree.len(), 1);
        assert!(!tree.contains("x"));
    }

    #[test]
    fn path_runs_root_to_leaf() {
        let records = vec![
            (message("m1", None, 1, 0), None),
            (message("m2", Some("m1"), 2, 1), None),
            (message("m3", Some("m2"), 3, 2), None),
            (message("alt", Some("m1"), 4, 3), None),
        ];
        let tree = DiscussionTree::assemble(discussion(), records);
        let path: Vec<_> = tree
            .path_to("m3")
            .unwrap_or_default()
            .iter()
            .map(|n| n.message.id.as_str())
            .collect();
        assert_eq!(path, vec!["m1", "m2", "m3"]);
        assert!(tree.path_to("nope").is_none());

        let walk: Vec<_> = tree
            .depth_first()
            .iter()
            .map(|(d, n)| (*d, n.message.id.as_str()))
            .collect();
        assert_eq!(walk, vec![(0, "m1"), (1, "m2"), (2, "m3"), (1, "alt")]);
    }

    #[test]
    fn lookups_work_after_a_json_round_trip() {
        let records = vec![
            (message("m1", None, 1, 0), None),
            (message("m2", Some("m1"), 2, 1), None),
        ];
        let tree = DiscussionTree::assemble(discussion(), records);
        let restored: Option<DiscussionTree> = serde_json::to_vec(&tree)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());
        let restored = restored.unwrap_or_else(|| DiscussionTree::assemble(discussion(), vec![]));

        assert_eq!(restored, tree);
        assert!(restored.contains("m2"));
        assert_eq!(restored.children_of("m1").len(), 1);
    }
}
