//! Branch types - Alternatives recorded at a conversation position

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id carried by the first-seen content of a position.
pub const ORIGINAL_BRANCH_ID: &str = "original";

/// One candidate content value for a conversation position.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageBranch {
    pub id: String,
    pub content: String,
    /// Creation time, for ordering and debugging only.
    pub timestamp: DateTime<Utc>,
}

impl MessageBranch {
    /// The first-seen content of a position.
    pub fn original(content: impl Into<String>) -> Self {
        Self {
            id: ORIGINAL_BRANCH_ID.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// A new alternative with a generated id.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_original(&self) -> bool {
        self.id == ORIGINAL_BRANCH_ID
    }
}

/// The set of alternatives at one position.
///
/// Always holds at least two branches and the active index is always in range;
/// both are upheld by only mutating through [`crate::BranchEngine`], so it is
/// serialized for display but never deserialized.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BranchPoint {
    pub(crate) message_index: usize,
    pub(crate) branches: Vec<MessageBranch>,
    pub(crate) active_branch_index: usize,
    pub(crate) linked_branch_index: Option<usize>,
}

impl BranchPoint {
    /// Two branches, the new one active.
    pub(crate) fn new(
        message_index: usize,
        original_content: impl Into<String>,
        new_content: impl Into<String>,
    ) -> Self {
        Self {
            message_index,
            branches: vec![
                MessageBranch::original(original_content),
                MessageBranch::new(new_content),
            ],
            active_branch_index: 1,
            linked_branch_index: None,
        }
    }

    /// Append an alternative and make it active.
    pub(crate) fn push_branch(&mut self, branch: MessageBranch) {
        self.branches.push(branch);
        self.active_branch_index = self.branches.len() - 1;
    }

    pub fn message_index(&self) -> usize {
        self.message_index
    }

    pub fn branches(&self) -> &[MessageBranch] {
        &self.branches
    }

    pub fn active_branch_index(&self) -> usize {
        self.active_branch_index
    }

    pub fn linked_branch_index(&self) -> Option<usize> {
        self.linked_branch_index
    }

    pub fn active_branch(&self) -> &MessageBranch {
        &self.branches[self.active_branch_index]
    }

    pub fn active_content(&self) -> &str {
        &self.active_branch().content
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// Direction for [`crate::BranchEngine::switch_branch`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchDirection {
    Prev,
    Next,
}

/// Branch navigation data for one position (arrows, "2 / 3" counters).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchInfo {
    pub message_index: usize,
    /// 1-based number of the active branch.
    pub current: usize,
    pub total: usize,
    pub active_branch_id: String,
    pub branch_ids: Vec<String>,
    pub linked_index: Option<usize>,
}

impl BranchInfo {
    pub(crate) fn from_point(point: &BranchPoint) -> Self {
        Self {
            message_index: point.message_index,
            current: point.active_branch_index + 1,
            total: point.branches.len(),
            active_branch_id: point.active_branch().id.clone(),
            branch_ids: point.branches.iter().map(|b| b.id.clone()).collect(),
            linked_index: point.linked_branch_index,
        }
    }

    pub fn can_go_prev(&self) -> bool {
        self.current > 1
    }

    pub fn can_go_next(&self) -> bool {
        self.current < self.total
    }
}

/// Per-message projection handed to the UI next to the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageMetadata {
    pub message_id: String,
    pub message_index: usize,
    pub has_branches: bool,
    pub branch: Option<BranchInfo>,
}
