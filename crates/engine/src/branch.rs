//! The branch arena — branch definitions indexed by id with explicit
//! parent links.
//!
//! Representing the tree as an arena (instead of parent-pointer recursion)
//! makes traversal, the depth limit, and subtree removal checkable
//! operations. The root branch `"base"` always exists, has no parent, and
//! cannot be removed or renamed.

use std::collections::HashMap;

use datascope_core::error::RegistryError;
use serde::{Deserialize, Serialize};

/// The permanent root branch id.
pub const BASE_BRANCH: &str = "base";

/// Maximum nesting depth of the branch tree (root is depth 0).
pub const MAX_BRANCH_DEPTH: usize = 16;

/// One branch of specialized behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchDefinition {
    /// Unique id within the conversation's tree.
    pub id: String,
    /// Instruction given to this branch's decision node.
    pub instruction: String,
    /// Parent branch id; `None` only for the root.
    pub parent: Option<String>,
}

/// The branch tree for one conversation.
#[derive(Debug, Clone)]
pub struct BranchArena {
    branches: HashMap<String, BranchDefinition>,
}

impl BranchArena {
    /// Create an arena holding only the root branch.
    pub fn new(base_instruction: &str) -> Self {
        let mut branches = HashMap::new();
        branches.insert(
            BASE_BRANCH.to_string(),
            BranchDefinition {
                id: BASE_BRANCH.to_string(),
                instruction: base_instruction.to_string(),
                parent: None,
            },
        );
        Self { branches }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.branches.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&BranchDefinition> {
        self.branches.get(id)
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Depth of a branch (root = 0). Walks parent links with a bound so a
    /// corrupted arena cannot loop forever.
    pub fn depth(&self, id: &str) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.branches.get(id)?;
        while let Some(parent_id) = &current.parent {
            current = self.branches.get(parent_id)?;
            depth += 1;
            if depth > MAX_BRANCH_DEPTH {
                return None;
            }
        }
        Some(depth)
    }

    /// Insert a new branch under `parent`. Fails fast on the reserved root
    /// id, duplicate ids, unknown parents, and depth overflow.
    pub fn insert(
        &mut self,
        id: &str,
        instruction: &str,
        parent: &str,
    ) -> Result<(), RegistryError> {
        if id == BASE_BRANCH {
            return Err(RegistryError::ReservedRoot("recreated"));
        }
        if self.branches.contains_key(id) {
            return Err(RegistryError::DuplicateBranch(id.to_string()));
        }
        let parent_depth = self
            .depth(parent)
            .ok_or_else(|| RegistryError::UnknownBranch(parent.to_string()))?;
        if parent_depth + 1 > MAX_BRANCH_DEPTH {
            return Err(RegistryError::DepthExceeded {
                parent: parent.to_string(),
                limit: MAX_BRANCH_DEPTH,
            });
        }

        self.branches.insert(
            id.to_string(),
            BranchDefinition {
                id: id.to_string(),
                instruction: instruction.to_string(),
                parent: Some(parent.to_string()),
            },
        );
        Ok(())
    }

    /// Direct children of a branch.
    pub fn children(&self, id: &str) -> Vec<String> {
        self.branches
            .values()
            .filter(|b| b.parent.as_deref() == Some(id))
            .map(|b| b.id.clone())
            .collect()
    }

    /// Remove a branch and its entire subtree, returning the removed ids
    /// (the named branch first, descendants after, breadth-first).
    pub fn remove_subtree(&mut self, id: &str) -> Result<Vec<String>, RegistryError> {
        if id == BASE_BRANCH {
            return Err(RegistryError::ReservedRoot("removed"));
        }
        if !self.branches.contains_key(id) {
            return Err(RegistryError::UnknownBranch(id.to_string()));
        }

        let mut removed = vec![id.to_string()];
        let mut cursor = 0;
        while cursor < removed.len() {
            let current = removed[cursor].clone();
            removed.extend(self.children(&current));
            cursor += 1;
        }
        for branch_id in &removed {
            self.branches.remove(branch_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_starts_with_root_only() {
        let arena = BranchArena::new("choose");
        assert_eq!(arena.len(), 1);
        assert!(arena.contains(BASE_BRANCH));
        assert_eq!(arena.depth(BASE_BRANCH), Some(0));
    }

    #[test]
    fn insert_rejects_reserved_root() {
        let mut arena = BranchArena::new("choose");
        let err = arena.insert(BASE_BRANCH, "again", BASE_BRANCH).unwrap_err();
        assert!(matches!(err, RegistryError::ReservedRoot(_)));
    }

    #[test]
    fn insert_rejects_duplicates_and_unknown_parents() {
        let mut arena = BranchArena::new("choose");
        arena.insert("reporting", "reports", BASE_BRANCH).unwrap();
        assert!(matches!(
            arena.insert("reporting", "again", BASE_BRANCH),
            Err(RegistryError::DuplicateBranch(_))
        ));
        assert!(matches!(
            arena.insert("orphan", "x", "nowhere"),
            Err(RegistryError::UnknownBranch(_))
        ));
    }

    #[test]
    fn depth_tracks_nesting() {
        let mut arena = BranchArena::new("choose");
        arena.insert("a", "", BASE_BRANCH).unwrap();
        arena.insert("b", "", "a").unwrap();
        assert_eq!(arena.depth("b"), Some(2));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut arena = BranchArena::new("choose");
        let mut parent = BASE_BRANCH.to_string();
        for i in 0..MAX_BRANCH_DEPTH {
            let id = format!("level{i}");
            arena.insert(&id, "", &parent).unwrap();
            parent = id;
        }
        let err = arena.insert("too_deep", "", &parent).unwrap_err();
        assert!(matches!(err, RegistryError::DepthExceeded { .. }));
    }

    #[test]
    fn remove_subtree_takes_descendants() {
        let mut arena = BranchArena::new("choose");
        arena.insert("reporting", "", BASE_BRANCH).unwrap();
        arena.insert("weekly", "", "reporting").unwrap();
        arena.insert("monthly", "", "reporting").unwrap();
        arena.insert("unrelated", "", BASE_BRANCH).unwrap();

        let removed = arena.remove_subtree("reporting").unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!arena.contains("weekly"));
        assert!(!arena.contains("monthly"));
        assert!(arena.contains("unrelated"));
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut arena = BranchArena::new("choose");
        assert!(matches!(
            arena.remove_subtree(BASE_BRANCH),
            Err(RegistryError::ReservedRoot(_))
        ));
    }
}
