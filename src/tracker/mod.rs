//! Local version-control operations.

pub mod git;

pub use git::{BranchManager, BranchOrigin, BranchRef, CommitRef};
