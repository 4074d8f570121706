#![deny(missing_docs)]

//! Acquisition and caching of conda repodata.
//!
//! The [`fetch::fetch_repo_data`] function downloads the `repodata.json` of a
//! single channel subdirectory, honoring HTTP cache headers, preferring
//! compressed variants, and caching the result on disk so subsequent (or
//! offline) runs do not have to touch the network. The [`gateway`] module
//! turns cached repodata into [`krait_conda_types::RepoDataRecord`]s.

pub mod fetch;
pub mod gateway;
