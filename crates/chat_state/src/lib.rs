//! chat_state - Conversation branch state for a chat session
//!
//! This crate keeps the linear conversation received from the service (the
//! trunk) together with the alternative contents created by editing or
//! regenerating past turns, and reconstructs the single view the UI renders.

pub mod branch;

// Re-export commonly used types
pub use branch::{
    BranchDirection, BranchEngine, BranchInfo, BranchPoint, MessageBranch, MessageMetadata,
    ORIGINAL_BRANCH_ID,
};
