//! Defines [`RepoDataRecord`].

use crate::PackageRecord;
use serde::{Deserialize, Serialize};
use url::Url;

/// A [`PackageRecord`] joined with the information about where it came from:
/// the download url and the channel.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone, Hash)]
pub struct RepoDataRecord {
    /// The record parsed from the repodata.
    #[serde(flatten)]
    pub package_record: PackageRecord,

    /// The filename of the package archive.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The canonical url from which to download the archive.
    pub url: Url,

    /// The canonical name of the channel this record came from. Records that
    /// are only known from the cache of a channel that is no longer
    /// configured carry the reserved name `<unknown>`.
    pub channel: String,
}

impl RepoDataRecord {
    /// The reserved channel name for records restored from a cache whose
    /// channel is no longer configured.
    pub const UNKNOWN_CHANNEL: &'static str = "<unknown>";
}

impl AsRef<PackageRecord> for RepoDataRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.package_record
    }
}
