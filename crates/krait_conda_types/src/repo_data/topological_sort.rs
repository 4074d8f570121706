//! Deterministic topological sorting of package records.
//!
//! The dependency graph of a conda environment can contain cycles (python and
//! pip depend on each other, for instance). The sort below processes packages
//! whose dependencies are all placed, always choosing the lexically smallest
//! name first, and breaks cycles by picking the lexically smallest remaining
//! name when nothing is free.

use std::collections::{HashMap, HashSet};

use crate::{PackageRecord, ParseStrictness};

/// Sorts the given records so every record appears after its dependencies.
///
/// The output is deterministic regardless of the input order: ties and cycles
/// are broken by the package name.
pub(crate) fn sort_topologically<T: AsRef<PackageRecord> + Clone>(records: Vec<T>) -> Vec<T> {
    let by_name: HashMap<&str, &T> = records
        .iter()
        .map(|record| (record.as_ref().name.as_normalized(), record))
        .collect();

    // Map each package to the names of its dependencies that are part of the
    // record set. Virtual packages and dependencies outside the set are not
    // ordering constraints.
    let mut pending: HashMap<&str, HashSet<&str>> = records
        .iter()
        .map(|record| {
            let record = record.as_ref();
            let deps = record
                .depends
                .iter()
                .filter_map(|dep| {
                    let spec =
                        crate::MatchSpec::from_str(dep, ParseStrictness::Lenient).ok()?;
                    let name = spec.name?;
                    let name = name.as_normalized();
                    (name != record.name.as_normalized())
                        .then(|| by_name.get_key_value(name).map(|(key, _)| *key))
                        .flatten()
                })
                .collect();
            (record.name.as_normalized(), deps)
        })
        .collect();

    let mut sorted_names = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        // All packages whose dependencies have been placed, smallest name
        // first for determinism.
        let mut free: Vec<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(&name, _)| name)
            .collect();
        free.sort_unstable();

        let next = match free.first() {
            Some(&name) => name,
            None => {
                // Only cycles remain; break them on the smallest name.
                let mut remaining: Vec<&str> = pending.keys().copied().collect();
                remaining.sort_unstable();
                remaining[0]
            }
        };

        pending.remove(next);
        for deps in pending.values_mut() {
            deps.remove(next);
        }
        sorted_names.push(next);
    }

    sorted_names
        .into_iter()
        .map(|name| (*by_name[name]).clone())
        .collect()
}

#[cfg(test)]
mod test {
    use super::sort_topologically;
    use crate::{PackageName, PackageRecord, VersionWithSource};
    use std::str::FromStr;

    fn record(name: &str, depends: &[&str]) -> PackageRecord {
        let mut record = PackageRecord::new(
            PackageName::new_unchecked(name),
            VersionWithSource::from_str("1.0").unwrap(),
            "0".to_owned(),
        );
        record.depends = depends.iter().map(|d| (*d).to_string()).collect();
        record
    }

    fn names(records: &[PackageRecord]) -> Vec<&str> {
        records
            .iter()
            .map(|record| record.name.as_normalized())
            .collect()
    }

    #[test]
    fn dependencies_come_first() {
        let records = vec![
            record("scipy", &["numpy 1.7.*", "python 2.7.*"]),
            record("python", &[]),
            record("numpy", &["python 2.7.*"]),
        ];
        let sorted = sort_topologically(records);
        assert_eq!(names(&sorted), vec!["python", "numpy", "scipy"]);
    }

    #[test]
    fn deterministic_regardless_of_input_order(){
        let forward = vec![record("a", &[]), record("b", &[]), record("c", &[])];
        let backward = vec![record("c", &[]), record("b", &[]), record("a", &[])];
        assert_eq!(
            names(&sort_topologically(forward)),
            names(&sort_topologically(backward))
        );
    }

    #[test]
    fn cycles_are_broken_lexically() {
        let records = vec![record("python", &["pip"]), record("pip", &["python"])];
        let sorted = sort_topologically(records);
        // The cycle is broken on the smallest name.
        assert_eq!(names(&sorted), vec!["pip", "python"]);
    }

    #[test]
    fn dependencies_outside_the_set_are_ignored() {
        let records = vec![record("foo", &["__glibc >=2.17", "not-included"])];
        let sorted = sort_topologically(records);
        assert_eq!(names(&sorted), vec!["foo"]);
    }
}
