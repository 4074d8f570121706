//! Candidate ordering.
//!
//! The lexicographic objective of the solve is realized by ordering the
//! candidates of every match spec and always letting the solver try the
//! first undecided candidate. The order implements, in sequence: absence of
//! tracked features, channel priority (unless disabled), higher version,
//! higher build number, arch-specific over noarch, newer timestamp.

use std::cmp::Ordering;

use crate::{id::SolvableId, pool::Pool, ChannelPriority};

/// Compares two candidates of the same package name; `Less` means `a` is the
/// better candidate.
pub(crate) fn compare_candidates(pool: &Pool<'_>, a: SolvableId, b: SolvableId) -> Ordering {
    let a_solvable = pool.solvables[a].package();
    let b_solvable = pool.solvables[b].package();

    // A candidate that tracks features, or that requires a legacy feature,
    // is always sorted below one that does not: features only exist to
    // select special builds, which must never win by default.
    let a_has_features = a_solvable.record.package_record().map_or(false, |record| {
        !record.track_features.is_empty() || record.features.is_some()
    });
    let b_has_features = b_solvable.record.package_record().map_or(false, |record| {
        !record.track_features.is_empty() || record.features.is_some()
    });
    match a_has_features.cmp(&b_has_features) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Prefer candidates from higher priority channels.
    if pool.channel_priority != ChannelPriority::Disabled {
        match a_solvable.channel_priority.cmp(&b_solvable.channel_priority) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }

    // Higher versions are better.
    match b_solvable.record.version().cmp(a_solvable.record.version()) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Higher build numbers are better.
    let a_build_number = a_solvable
        .record
        .package_record()
        .map_or(0, |record| record.build_number);
    let b_build_number = b_solvable
        .record
        .package_record()
        .map_or(0, |record| record.build_number);
    match b_build_number.cmp(&a_build_number) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Arch-specific builds are presumed faster than noarch builds.
    let a_noarch = a_solvable
        .record
        .package_record()
        .map_or(false, |record| !record.noarch.is_none());
    let b_noarch = b_solvable
        .record
        .package_record()
        .map_or(false, |record| !record.noarch.is_none());
    match a_noarch.cmp(&b_noarch) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Prefer the newer build.
    let a_timestamp = a_solvable
        .record
        .package_record()
        .and_then(|record| record.timestamp);
    let b_timestamp = b_solvable
        .record
        .package_record()
        .and_then(|record| record.timestamp);
    b_timestamp.cmp(&a_timestamp)
}
