//! Index reduction: pruning the candidate set to the transitive closure of
//! what the requested specs can reach, before any clauses are generated.
//! On large channels this is the single most important performance step.

use std::collections::{HashSet, VecDeque};

use fxhash::FxHashMap;
use krait_conda_types::{
    package::ArchiveType, GenericVirtualPackage, MatchSpec, Matches, ParseStrictness,
    RepoDataRecord,
};

use crate::ChannelPriority;

/// A candidate record with the priority of the channel it came from (its
/// index in the configured channel order; lower is better).
#[derive(Copy, Clone)]
pub(crate) struct Candidate<'a> {
    pub(crate) record: &'a RepoDataRecord,
    pub(crate) channel_priority: u32,
}

/// Deduplicates records that exist both as `.conda` and `.tar.bz2` archives,
/// keeping the `.conda` variant.
pub(crate) fn dedup_archives<'a>(candidates: Vec<Candidate<'a>>) -> Vec<Candidate<'a>> {
    let mut by_stem: FxHashMap<&'a str, (ArchiveType, Candidate<'a>)> = FxHashMap::default();
    let mut order: Vec<&'a str> = Vec::new();

    for candidate in candidates {
        let (stem, archive_type) = ArchiveType::split_str(&candidate.record.file_name)
            .unwrap_or((candidate.record.file_name.as_str(), ArchiveType::TarBz2));
        match by_stem.get_mut(stem) {
            None => {
                by_stem.insert(stem, (archive_type, candidate));
                order.push(stem);
            }
            Some((prev_type, prev_candidate)) => {
                // `.conda` orders above `.tar.bz2`.
                if archive_type > *prev_type {
                    *prev_type = archive_type;
                    *prev_candidate = candidate;
                }
            }
        }
    }

    order
        .into_iter()
        .map(|stem| by_stem[stem].1)
        .collect()
}

/// Reduces the candidate set to the packages transitively reachable from the
/// given specs.
///
/// Under strict channel priority, candidates of a name are restricted to the
/// highest-priority channel that carries the name before the closure is
/// computed. Afterwards candidates with a dependency for which no candidate
/// survived (and that no virtual package provides) are dropped, iterating to
/// a fixpoint.
pub(crate) fn reduce_index<'a>(
    candidates: Vec<Candidate<'a>>,
    root_specs: &[MatchSpec],
    virtual_packages: &[GenericVirtualPackage],
    channel_priority: ChannelPriority,
) -> Vec<Candidate<'a>> {
    // Group all candidates by name.
    let mut by_name: FxHashMap<&'a str, Vec<Candidate<'a>>> = FxHashMap::default();
    for candidate in candidates {
        by_name
            .entry(candidate.record.package_record.name.as_normalized())
            .or_default()
            .push(candidate);
    }

    // Under strict priority, a name is only served by its best channel.
    if channel_priority == ChannelPriority::Strict {
        for candidates in by_name.values_mut() {
            let best = candidates
                .iter()
                .map(|c| c.channel_priority)
                .min()
                .expect("groups are never empty");
            candidates.retain(|c| c.channel_priority == best);
        }
    }

    // Expand the closure, name by name.
    let mut included: FxHashMap<&'a str, Vec<Candidate<'a>>> = FxHashMap::default();
    let mut queued_specs = HashSet::new();
    let mut queue: VecDeque<MatchSpec> = root_specs.iter().cloned().collect();

    while let Some(spec) = queue.pop_front() {
        let Some(name) = spec.name.as_ref() else {
            continue;
        };
        let name = name.as_normalized();

        if name.starts_with("__") {
            // Virtual packages have no dependencies to chase.
            continue;
        }

        let Some((&name, name_candidates)) = by_name.get_key_value(name) else {
            continue;
        };

        let mut newly_added = Vec::new();
        {
            let included_for_name = included.entry(name).or_default();
            for &candidate in name_candidates {
                if !spec.matches(candidate.record) {
                    continue;
                }
                if included_for_name
                    .iter()
                    .any(|c| std::ptr::eq(c.record, candidate.record))
                {
                    continue;
                }
                included_for_name.push(candidate);
                newly_added.push(candidate);
            }
        }

        for candidate in newly_added {
            for dep in &candidate.record.package_record.depends {
                if queued_specs.insert(dep.clone()) {
                    if let Ok(spec) = MatchSpec::from_str(dep, ParseStrictness::Lenient) {
                        queue.push_back(spec);
                    }
                }
            }
        }
    }

    // Drop candidates with a dependency that cannot be satisfied at all,
    // iterating because each drop can orphan further candidates. Candidates
    // that match a root spec are exempt: they must reach the solver so that
    // an unsatisfiable chain is reported with its cause instead of the
    // package silently disappearing from the index.
    loop {
        let mut dropped_any = false;

        let names: Vec<&str> = included.keys().copied().collect();
        for name in names {
            let candidates = included[name].clone();
            let viable: Vec<Candidate<'a>> = candidates
                .into_iter()
                .filter(|candidate| {
                    root_specs.iter().any(|spec| spec.matches(candidate.record))
                        || (candidate
                            .record
                            .package_record
                            .depends
                            .iter()
                            .all(|dep| dep_is_satisfiable(dep, &included, virtual_packages))
                            && features_are_satisfiable(candidate.record, &included))
                })
                .collect();

            if viable.len() != included[name].len() {
                dropped_any = true;
                if viable.is_empty() {
                    included.remove(name);
                } else {
                    included.insert(name, viable);
                }
            }
        }

        if !dropped_any {
            break;
        }
    }

    included.into_values().flatten().collect()
}

/// Returns true if every legacy feature the record requires is tracked by
/// some surviving candidate. The `features` mechanism is deprecated; it is
/// honored as a constraint on existing repodata but no feature packages are
/// synthesized.
fn features_are_satisfiable(
    record: &RepoDataRecord,
    included: &FxHashMap<&str, Vec<Candidate<'_>>>,
) -> bool {
    let Some(features) = record.package_record.features.as_deref() else {
        return true;
    };

    features
        .split([',', ' '])
        .map(str::trim)
        .filter(|feature| !feature.is_empty())
        .all(|feature| {
            included.values().flatten().any(|provider| {
                provider
                    .record
                    .package_record
                    .track_features
                    .iter()
                    .any(|tracked| tracked == feature)
            })
        })
}

/// Returns true if some surviving candidate or virtual package satisfies the
/// dependency spec.
fn dep_is_satisfiable(
    dep: &str,
    included: &FxHashMap<&str, Vec<Candidate<'_>>>,
    virtual_packages: &[GenericVirtualPackage],
) -> bool {
    let Ok(spec) = MatchSpec::from_str(dep, ParseStrictness::Lenient) else {
        // An unparsable dependency is reported by the solver, not here.
        return true;
    };
    let Some(name) = spec.name.as_ref() else {
        return true;
    };

    if name.as_normalized().starts_with("__") {
        return virtual_packages.iter().any(|vp| spec.matches(vp));
    }

    included
        .get(name.as_normalized())
        .map_or(false, |candidates| {
            candidates
                .iter()
                .any(|candidate| spec.matches(candidate.record))
        })
}
