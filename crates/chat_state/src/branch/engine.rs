//! Branch engine - Trunk plus sparse alternatives, reconstructed into one view
//!
//! The trunk is the conversation as last received from the service. Edits and
//! regenerations are recorded as branch points keyed by position; positions
//! without one pass through verbatim.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chat_core::ChatMessage;
use tracing::debug;

use super::types::{BranchDirection, BranchInfo, BranchPoint, MessageBranch, MessageMetadata};

/// Owned branch state for one conversation session.
#[derive(Debug, Clone, Default)]
pub struct BranchEngine {
    base: Vec<ChatMessage>,
    branch_points: BTreeMap<usize, BranchPoint>,
}

impl BranchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The trunk as last received.
    pub fn base_conversation(&self) -> &[ChatMessage] {
        &self.base
    }

    /// Replace the trunk wholesale. Branch points are kept and re-applied by
    /// position.
    pub fn set_base_conversation(&mut self, messages: Vec<ChatMessage>) {
        debug!(
            "Replacing base conversation: {} -> {} messages, {} branch points",
            self.base.len(),
            messages.len(),
            self.branch_points.len()
        );
        self.base = messages;
    }

    /// Upsert by id: known ids are replaced in place, new ones appended in
    /// order. Returns how many messages were appended.
    pub fn merge_into_base<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let mut appended = 0;
        for message in messages {
            match self.base.iter().position(|m| m.id == message.id) {
                Some(pos) => self.base[pos] = message,
                None => {
                    self.base.push(message);
                    appended += 1;
                }
            }
        }
        appended
    }

    /// Record `new_content` as an alternative at `index` and make it active.
    ///
    /// A missing branch point is created with `original_content` as branch 0.
    /// With `link_to_previous`, an assistant turn directly after a user turn
    /// that already has a branch point gets linked to it.
    pub fn create_branch_at_index(
        &mut self,
        index: usize,
        original_content: impl Into<String>,
        new_content: impl Into<String>,
        link_to_previous: bool,
    ) -> bool {
        if index >= self.base.len() {
            debug!(
                "Ignoring branch at {} (base has {} messages)",
                index,
                self.base.len()
            );
            return false;
        }

        match self.branch_points.entry(index) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push_branch(MessageBranch::new(new_content));
            }
            Entry::Vacant(entry) => {
                entry.insert(BranchPoint::new(index, original_content, new_content));
            }
        }

        if link_to_previous && index > 0 {
            let previous = index - 1;
            if self.base[index].is_assistant()
                && self.base[previous].is_user()
                && self.branch_points.contains_key(&previous)
            {
                self.link(previous, index);
            }
        }

        debug!(
            "Branch created at {} ({} branches)",
            index,
            self.branch_points.get(&index).map_or(0, BranchPoint::len)
        );
        true
    }

    /// Link two existing branch points so they switch together.
    pub fn link_branch_points(&mut self, first: usize, second: usize) -> bool {
        if first == second || !self.has_point_in_bounds(first) || !self.has_point_in_bounds(second)
        {
            return false;
        }
        self.link(first, second);
        true
    }

    /// Move the active branch at `index` one step. The linked point follows to
    /// the same absolute index when it has that many branches, otherwise it
    /// stays where it is.
    pub fn switch_branch(&mut self, index: usize, direction: BranchDirection) -> bool {
        if index >= self.base.len() {
            return false;
        }
        let Some(point) = self.branch_points.get_mut(&index) else {
            return false;
        };

        let target = match direction {
            BranchDirection::Prev => match point.active_branch_index.checked_sub(1) {
                Some(target) => target,
                None => return false,
            },
            BranchDirection::Next => {
                if point.active_branch_index + 1 >= point.branches.len() {
                    return false;
                }
                point.active_branch_index + 1
            }
        };
        point.active_branch_index = target;
        let linked = point.linked_branch_index;

        if let Some(linked_index) = linked {
            if let Some(partner) = self.branch_points.get_mut(&linked_index) {
                if target < partner.branches.len() {
                    partner.active_branch_index = target;
                } else {
                    debug!(
                        "Linked point {} has {} branches, leaving it at {}",
                        linked_index,
                        partner.branches.len(),
                        partner.active_branch_index
                    );
                }
            }
        }

        true
    }

    /// The conversation to display: active branch contents substituted into
    /// the trunk, cut after the earliest position whose selection the trunk
    /// does not reflect yet.
    pub fn current_conversation(&self) -> Vec<ChatMessage> {
        let mut view: Vec<ChatMessage> = self
            .base
            .iter()
            .enumerate()
            .map(|(index, message)| match self.branch_points.get(&index) {
                Some(point) => message.with_content(point.active_content()),
                None => message.clone(),
            })
            .collect();

        if let Some(keep) = self.visible_len() {
            view.truncate(keep);
        }
        view
    }

    /// Number of leading messages to keep, or `None` when nothing is stale.
    fn visible_len(&self) -> Option<usize> {
        let earliest = self
            .branch_points
            .iter()
            .find(|(index, point)| {
                self.base
                    .get(**index)
                    .is_some_and(|message| message.content != point.active_content())
            })
            .map(|(index, _)| *index)?;

        if self.base[earliest].is_user() {
            let answered = self.base.get(earliest + 1).is_some_and(|next| {
                next.is_assistant() && self.branch_points.contains_key(&(earliest + 1))
            });
            if answered {
                return Some(earliest + 2);
            }
        }
        Some(earliest + 1)
    }

    pub fn message_metadata(&self, message: &ChatMessage) -> Option<MessageMetadata> {
        let message_index = self.position_of(&message.id)?;
        let branch = self
            .branch_points
            .get(&message_index)
            .map(BranchInfo::from_point);

        Some(MessageMetadata {
            message_id: message.id.clone(),
            message_index,
            has_branches: branch.as_ref().is_some_and(|info| info.total > 1),
            branch,
        })
    }

    pub fn branch_info(&self, message_id: &str) -> Option<BranchInfo> {
        let index = self.position_of(message_id)?;
        self.branch_points.get(&index).map(BranchInfo::from_point)
    }

    pub fn has_multiple_branches(&self, message_id: &str) -> bool {
        self.branch_info(message_id)
            .is_some_and(|info| info.total > 1)
    }

    pub fn branch_point(&self, index: usize) -> Option<&BranchPoint> {
        self.branch_points.get(&index)
    }

    /// All branch points in position order.
    pub fn branch_points(&self) -> impl Iterator<Item = &BranchPoint> {
        self.branch_points.values()
    }

    /// Trunk position of a message id.
    pub fn position_of(&self, message_id: &str) -> Option<usize> {
        self.base.iter().position(|m| m.id == message_id)
    }

    /// Drop the trunk and every branch point (new chat).
    pub fn clear(&mut self) {
        debug!(
            "Clearing branch engine ({} messages, {} branch points)",
            self.base.len(),
            self.branch_points.len()
        );
        self.base.clear();
        self.branch_points.clear();
    }

    fn has_point_in_bounds(&self, index: usize) -> bool {
        index < self.base.len() && self.branch_points.contains_key(&index)
    }

    fn link(&mut self, first: usize, second: usize) {
        self.unlink(first);
        self.unlink(second);
        if let Some(point) = self.branch_points.get_mut(&first) {
            point.linked_branch_index = Some(second);
        }
        if let Some(point) = self.branch_points.get_mut(&second) {
            point.linked_branch_index = Some(first);
        }
        debug!("Linked branch points {} <-> {}", first, second);
    }

    fn unlink(&mut self, index: usize) {
        let partner = self
            .branch_points
            .get_mut(&index)
            .and_then(|point| point.linked_branch_index.take());
        if let Some(partner) = partner {
            if let Some(point) = self.branch_points.get_mut(&partner) {
                if point.linked_branch_index == Some(index) {
                    point.linked_branch_index = None;
                }
            }
        }
    }
}
