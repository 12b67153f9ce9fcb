//! labsync Core Library
//!
//! Shared types for labsync.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (IdentityId, ProfileId, RequestId, RunId)
//! - [`directory`] - The directory snapshot contract (DirectoryRecord, DirectorySource)
//! - [`error`] - Directory source errors (DirectoryError)
//!
//! # Example
//!
//! ```
//! use labsync_core::{DirectoryRecord, DirectorySource, StaticDirectorySource};
//!
//! # async fn example() -> labsync_core::DirectoryResult<()> {
//! let source = StaticDirectorySource::new(vec![
//!     DirectoryRecord::new("u1").with_home_path("/home/u1"),
//! ]);
//! let snapshot = source.list_all().await?;
//! assert_eq!(snapshot.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod error;
pub mod ids;

pub use directory::{DirectoryRecord, DirectorySource, SnapshotFileSource, StaticDirectorySource};
pub use error::{DirectoryError, DirectoryResult};
pub use ids::{IdentityId, ParseIdError, ProfileId, RequestId, RunId};
