//! Ephemeral, quota-bounded workspaces.
//!
//! Each item analysis gets its own working directory, named from the
//! sanitized item identity so no name can escape the workspace root.
//!
//! # Lifecycle
//!
//! 1. **Acquire** (`WorkspaceManager::acquire`): remove any leftover directory
//!    of the same name, materialize under a timeout, then measure the size.
//!    Oversized workspaces are removed and reported as `QuotaExceeded`.
//! 2. **Extract** (`WorkspaceManager::extract`): build a [`ContentDigest`]
//!    bounded by file count, per-file size and a total preview budget.
//! 3. **Release** (`WorkspaceManager::release`): delete the directory. Never
//!    fails. A [`Workspace`] dropped without release is removed on drop.
//! 4. **Sweep** (`WorkspaceManager::sweep`): reclaim leftovers older than a
//!    threshold, at process start and at the end of a run.
//!
//! # Architecture
//!
//! - **Types** (`types`): configuration and digest data structures
//! - **Materialize** (`materialize`): `git clone` and local-copy materializers
//! - **Extract** (`extract`): ignore rules, ranking, previews, directory tree
//! - **Manager** (`manager`): the workspace lifecycle
//!
//! # Example
//!
//! ```ignore
//! use digest_forge::workspace::{WorkspaceConfig, WorkspaceManager};
//!
//! let manager = WorkspaceManager::new(WorkspaceConfig::new("/tmp/digest-forge"))?;
//! let workspace = manager.acquire("https://github.com/owner/repo.git", "owner/repo").await?;
//! let digest = manager.extract(&workspace, 6000).await;
//! manager.release(workspace).await;
//! ```

pub mod extract;
pub mod manager;
pub mod materialize;
pub mod types;

pub use extract::{structural_preview, IgnoreRules};
pub use manager::{Workspace, WorkspaceManager};
pub use materialize::{DirectoryMaterializer, GitMaterializer, Materializer};
pub use types::{ContentDigest, FilePreview, WorkspaceConfig};
