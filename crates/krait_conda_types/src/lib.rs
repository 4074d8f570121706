//! Data types for the conda ecosystem.
//!
//! This crate contains the value types that every other krait crate builds on:
//! package versions and their ordering, version specs, match specs, platform
//! tags, channels, repodata records, installed-prefix records and the models
//! of the metadata files found in a package's `info/` directory.

pub mod build_spec;
mod channel;
mod generic_virtual_package;
mod history;
mod match_spec;
mod no_arch_type;
pub mod package;
mod package_name;
mod parse_mode;
mod platform;
pub mod prefix_record;
mod repo_data;
mod repo_data_record;
mod utils;
mod version;
pub mod version_spec;

pub use build_spec::{BuildNumber, BuildNumberSpec, OrdOperator, ParseBuildNumberSpecError};
pub use channel::{Channel, ChannelConfig, ParseChannelError};
pub use generic_virtual_package::GenericVirtualPackage;
pub use history::{History, HistoryError, HistoryRevision, ParsedHistory, Revision, UserRequest};
pub use match_spec::{
    matcher::{StringMatcher, StringMatcherParseError},
    parse::ParseMatchSpecError,
    MatchSpec, MatchSpecMergeError, Matches, NamelessMatchSpec,
};
pub use no_arch_type::{NoArchKind, NoArchType, RawNoArchType};
pub use package_name::{InvalidPackageNameError, PackageName};
pub use parse_mode::ParseStrictness;
pub use platform::{Arch, ParseArchError, ParsePlatformError, Platform};
pub use prefix_record::PrefixRecord;
pub use repo_data::{
    compute_package_url, ChannelInfo, ConvertSubdirError, PackageRecord, RepoData,
    ValidatePackageRecordsError,
};
pub use repo_data_record::RepoDataRecord;
pub use version::{
    ParseVersionError, ParseVersionErrorKind, StrictVersion, Version, VersionWithSource,
};
pub use version_spec::{ParseVersionSpecError, VersionSpec};
