use std::path::Path;

use super::error::MasterlistUpdateError;

/// Information about a loaded masterlist's revision.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MasterlistInfo {
    pub revision_id: String,
    pub revision_date: String,
    pub is_modified: bool,
}

/// A collaborator that knows how to fetch and inspect the version-controlled
/// repository backing a [`Database`][super::Database]'s masterlist.
///
/// The core has no knowledge of the underlying version control system or
/// transport: a host application supplies the real implementation.
pub trait MasterlistUpdater {
    /// Fetches the latest revision on `branch` from `url` into the
    /// repository containing `path`, cloning the repository first if it
    /// does not already exist, and checks out `path`.
    ///
    /// Returns `true` if doing so changed the masterlist file's content.
    fn update(&self, path: &Path, url: &str, branch: &str)
    -> Result<bool, MasterlistUpdateError>;

    /// Rolls the repository containing `path` back to the commit preceding
    /// its current revision, and checks out `path` at that commit.
    fn roll_back(&self, path: &Path) -> Result<(), MasterlistUpdateError>;

    /// Gets revision information for the masterlist at `path`.
    ///
    /// If `short` is true, a shortened revision ID is returned.
    fn get_info(&self, path: &Path, short: bool) -> Result<MasterlistInfo, MasterlistUpdateError>;

    /// Checks whether `path`'s parent directory is a version control
    /// repository.
    fn is_repository(&self, path: &Path) -> bool;
}
