//! Branch module
//!
//! Contains the branch engine and the types it projects to the UI.

mod engine;
mod types;

pub use engine::BranchEngine;
pub use types::{
    BranchDirection, BranchInfo, BranchPoint, MessageBranch, MessageMetadata, ORIGINAL_BRANCH_ID,
};
