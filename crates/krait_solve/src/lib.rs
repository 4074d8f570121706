#![deny(missing_docs)]

//! A solver for conda environments.
//!
//! Given the available candidates, the installed records, the detected
//! virtual packages and the requested specs, [`solve`] produces the set of
//! records that a prefix should contain, honoring channel priority, pins,
//! update modifiers and the conda installation objective (keep installed
//! packages, prefer higher priority channels, higher versions, higher build
//! numbers, arch-specific over noarch builds, newer builds).
//!
//! Internally the problem is encoded into pseudo-boolean clauses over one
//! variable per candidate, and solved with a CDCL SAT core. The optimization
//! objective is realized through the candidate order: the solver always tries
//! the best still-possible candidate first.

mod arena;
mod id;
mod mapping;
mod pool;
mod problem;
mod reduce;
mod solvable;
mod solver;
mod sort;

use std::collections::HashSet;
use std::fmt;

use krait_conda_types::{
    GenericVirtualPackage, MatchSpec, Matches, PackageName, ParseStrictness, RepoDataRecord,
};

use pool::Pool;
use reduce::Candidate;
use solvable::SolverRecord;
use solver::{SolveJobs, Solver, SolverFailure};

/// Controls how aggressively installed packages may change during a solve.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum UpdateModifier {
    /// Hold every installed package that is not named by a requested spec
    /// constant. When that admits no solution the solve is retried with the
    /// installed packages merely preferred.
    FreezeInstalled,

    /// Update the packages named by the requested specs; everything else is
    /// preferred at its installed version.
    #[default]
    UpdateSpecs,

    /// Additionally refresh the direct dependencies of the requested specs.
    UpdateDeps,

    /// Bring every installed package to the best available version.
    UpdateAll,

    /// Skip solving entirely when every requested spec is already satisfied
    /// by an installed record.
    SpecsSatisfiedSkipSolve,
}

/// How the channel order influences candidate selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum ChannelPriority {
    /// A name is only ever served from the highest-priority channel that
    /// carries it.
    Strict,

    /// Higher-priority channels are preferred, but lower ones may be used.
    #[default]
    Flexible,

    /// The channel order is ignored.
    Disabled,
}

/// A single dependency resolution problem.
pub struct SolverTask {
    /// The available candidate records, one collection per (channel, subdir),
    /// ordered by channel priority (highest first).
    pub available_packages: Vec<Vec<RepoDataRecord>>,

    /// The records currently installed in the prefix.
    pub installed_packages: Vec<RepoDataRecord>,

    /// The virtual packages describing the host.
    pub virtual_packages: Vec<GenericVirtualPackage>,

    /// The specs that must be satisfied.
    pub specs: Vec<MatchSpec>,

    /// Pinned specs: constraints that never cause an installation by
    /// themselves but that every solution must respect.
    pub pinned_specs: Vec<MatchSpec>,

    /// How aggressively installed packages may change.
    pub update_modifier: UpdateModifier,

    /// How the channel order influences candidate selection.
    pub channel_priority: ChannelPriority,

    /// Names that are brought to their latest version on every solve.
    pub aggressive_update_packages: Vec<PackageName>,
}

impl Default for SolverTask {
    fn default() -> Self {
        Self {
            available_packages: Vec::new(),
            installed_packages: Vec::new(),
            virtual_packages: Vec::new(),
            specs: Vec::new(),
            pinned_specs: Vec::new(),
            update_modifier: UpdateModifier::default(),
            channel_priority: ChannelPriority::default(),
            aggressive_update_packages: Vec::new(),
        }
    }
}

/// The outcome of a successful solve: the records the prefix should contain.
#[derive(Debug)]
pub struct SolverResult {
    /// The desired record set, in no particular order.
    pub records: Vec<RepoDataRecord>,
}

/// Why a solve failed.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// One or more requested specs have no candidate in any channel.
    PackagesNotFound(Vec<MatchSpec>),

    /// Candidates exist, but no assignment satisfies every constraint. The
    /// payload carries the rendered conflict chains.
    Unsolvable(Vec<String>),

    /// The configuration of the task is self-contradictory.
    InvalidOperation(String),

    /// The search exceeded its internal budget without an answer.
    BudgetExceeded,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::PackagesNotFound(specs) => {
                write!(
                    f,
                    "the following packages are not available from the configured channels: {}",
                    specs
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
            SolveError::Unsolvable(reasons) => {
                write!(f, "cannot solve the request:\n{}", reasons.join("\n"))
            }
            SolveError::InvalidOperation(reason) => write!(f, "invalid operation: {reason}"),
            SolveError::BudgetExceeded => {
                write!(f, "the solver exceeded its search budget without an answer")
            }
        }
    }
}

/// Solves the given task. See the crate documentation for the overall
/// behavior.
///
/// The solve proceeds through the phases: collecting specs, reducing the
/// index, encoding, and searching. Under
/// [`UpdateModifier::FreezeInstalled`] the search first runs with every
/// non-targeted installed record locked; if that admits no solution it is
/// retried with the installed records merely favored before the failure is
/// reported.
pub fn solve(task: &SolverTask) -> Result<SolverResult, SolveError> {
    // -- collecting specs
    validate(task)?;

    if task.update_modifier == UpdateModifier::SpecsSatisfiedSkipSolve
        && specs_already_satisfied(task)
    {
        return Ok(SolverResult {
            records: task.installed_packages.clone(),
        });
    }

    let targeted_names: HashSet<&str> = task
        .specs
        .iter()
        .filter_map(|spec| spec.name.as_ref())
        .map(PackageName::as_normalized)
        .collect();

    let root_specs = collect_root_specs(task, &targeted_names);

    // Names that must not be held at their installed version.
    let mut refresh_names: HashSet<String> = task
        .aggressive_update_packages
        .iter()
        .map(|name| name.as_normalized().to_owned())
        .collect();
    match task.update_modifier {
        UpdateModifier::UpdateAll => {
            refresh_names.extend(
                task.installed_packages
                    .iter()
                    .map(|record| record.package_record.name.as_normalized().to_owned()),
            );
        }
        UpdateModifier::UpdateDeps => {
            for record in &task.installed_packages {
                let name = record.package_record.name.as_normalized();
                if !targeted_names.contains(name) {
                    continue;
                }
                for dep in &record.package_record.depends {
                    if let Ok(spec) = MatchSpec::from_str(dep, ParseStrictness::Lenient) {
                        if let Some(dep_name) = spec.name {
                            refresh_names.insert(dep_name.as_normalized().to_owned());
                        }
                    }
                }
            }
        }
        _ => {}
    }

    // -- reducing the index
    let mut candidates = Vec::new();
    for (priority, records) in task.available_packages.iter().enumerate() {
        for record in records {
            candidates.push(Candidate {
                record,
                channel_priority: priority as u32,
            });
        }
    }
    let candidates = reduce::dedup_archives(candidates);

    // Requested specs without any candidate anywhere (virtual packages and
    // installed records included) are fatal before encoding.
    let missing: Vec<MatchSpec> = task
        .specs
        .iter()
        .filter(|spec| {
            let in_channels = candidates.iter().any(|c| spec.matches(c.record));
            let installed = task
                .installed_packages
                .iter()
                .any(|record| spec.matches(record));
            let virtual_package = task.virtual_packages.iter().any(|vp| spec.matches(vp));
            !in_channels && !installed && !virtual_package
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(SolveError::PackagesNotFound(missing));
    }

    let candidates = reduce::reduce_index(
        candidates,
        &root_specs,
        &task.virtual_packages,
        task.channel_priority,
    );

    // -- encoding
    let mut pool = Pool::new(task.channel_priority);
    let mut jobs = SolveJobs::default();

    for virtual_package in &task.virtual_packages {
        let solvable_id = pool.add_package(SolverRecord::VirtualPackage(virtual_package), 0);
        jobs.assert_installed.push(solvable_id);
    }

    // The installed records participate as candidates so that packages from
    // no-longer-configured channels stay installable. A channel candidate
    // that is identical to an installed record is skipped in its favor.
    let mut installed_solvables = Vec::new();
    for record in &task.installed_packages {
        let solvable_id = add_record(&mut pool, record, 0)?;
        installed_solvables.push((solvable_id, record));
    }

    for candidate in candidates {
        let duplicate_of_installed = task.installed_packages.iter().any(|installed| {
            installed.package_record == candidate.record.package_record
        });
        if duplicate_of_installed {
            continue;
        }
        add_record(&mut pool, candidate.record, candidate.channel_priority)?;
    }

    for spec in &root_specs {
        let match_spec_id = pool.intern_matchspec(spec.clone());
        jobs.install.push(match_spec_id);
    }

    for spec in &task.pinned_specs {
        let match_spec_id = pool.intern_matchspec(spec.clone());
        jobs.constrain.push(match_spec_id);
    }

    // Installed records are favored unless their name must be refreshed;
    // under FreezeInstalled the non-targeted ones are locked outright.
    let freeze = task.update_modifier == UpdateModifier::FreezeInstalled;
    let mut frozen = Vec::new();
    for &(solvable_id, record) in &installed_solvables {
        let name = record.package_record.name.as_normalized();
        if refresh_names.contains(name) {
            continue;
        }
        jobs.favor.push(solvable_id);
        if freeze && !targeted_names.contains(name) {
            frozen.push(solvable_id);
        }
    }

    // -- searching (frozen attempt, then the full retry)
    let frozen_jobs = SolveJobs {
        install: jobs.install.clone(),
        favor: jobs.favor.clone(),
        lock: frozen,
        assert_installed: jobs.assert_installed.clone(),
        constrain: jobs.constrain.clone(),
    };

    let mut solver = Solver::new(pool);
    let solution = match solver.solve(frozen_jobs) {
        Ok(solution) => solution,
        Err(SolverFailure::BudgetExceeded) => return Err(SolveError::BudgetExceeded),
        Err(SolverFailure::Unsolvable(problem)) => {
            if !freeze {
                return Err(SolveError::Unsolvable(render_problem(&solver, problem)));
            }
            // The frozen attempt failed; relax the locks and try again.
            tracing::info!("the frozen solve failed, retrying without holding installed packages");
            match solver.solve(jobs) {
                Ok(solution) => solution,
                Err(SolverFailure::BudgetExceeded) => return Err(SolveError::BudgetExceeded),
                Err(SolverFailure::Unsolvable(problem)) => {
                    return Err(SolveError::Unsolvable(render_problem(&solver, problem)))
                }
            }
        }
    };

    let records = solution
        .steps
        .iter()
        .filter_map(|&solvable_id| {
            solver
                .pool()
                .resolve_solvable(solvable_id)
                .record
                .repo_data_record()
        })
        .cloned()
        .collect();

    Ok(SolverResult { records })
}

/// Rejects self-contradictory task configurations up front.
fn validate(task: &SolverTask) -> Result<(), SolveError> {
    // An aggressive-update package cannot at the same time be frozen: the
    // two policies demand opposite things. The contradiction is reported
    // instead of silently preferring either side.
    if task.update_modifier == UpdateModifier::FreezeInstalled {
        let targeted: HashSet<&str> = task
            .specs
            .iter()
            .filter_map(|spec| spec.name.as_ref())
            .map(PackageName::as_normalized)
            .collect();

        for name in &task.aggressive_update_packages {
            let installed = task
                .installed_packages
                .iter()
                .any(|record| record.package_record.name == *name);
            if installed && !targeted.contains(name.as_normalized()) {
                return Err(SolveError::InvalidOperation(format!(
                    "'{}' is in aggressive_update_packages but the solve freezes installed packages; drop it from the aggressive set or from the freeze",
                    name.as_normalized()
                )));
            }
        }
    }

    Ok(())
}

/// Returns true if every requested spec matches an installed record.
fn specs_already_satisfied(task: &SolverTask) -> bool {
    task.specs.iter().all(|spec| {
        task.installed_packages
            .iter()
            .any(|record| spec.matches(record))
            || task.virtual_packages.iter().any(|vp| spec.matches(vp))
    })
}

/// The specs the root solvable requires: the requested specs plus the
/// refresh specs derived from the update modifier and the aggressive-update
/// set.
fn collect_root_specs(task: &SolverTask, targeted_names: &HashSet<&str>) -> Vec<MatchSpec> {
    let mut root_specs = task.specs.clone();

    // Aggressive-update packages are refreshed whenever they are installed,
    // even when not requested.
    for name in &task.aggressive_update_packages {
        let installed = task
            .installed_packages
            .iter()
            .any(|record| record.package_record.name == *name);
        if installed && !targeted_names.contains(name.as_normalized()) {
            root_specs.push(MatchSpec::from(name.clone()));
        }
    }

    // Installed packages keep being requested so they are not dropped from
    // the environment by an unrelated solve; a name-only spec keeps them in
    // play without constraining their version. Under UpdateAll this is also
    // exactly what brings every installed package to its best version, since
    // nothing is favored then.
    for record in &task.installed_packages {
        let name = record.package_record.name.as_normalized();
        if !targeted_names.contains(name) {
            root_specs.push(MatchSpec::from(record.package_record.name.clone()));
        }
    }

    root_specs
}

/// Adds a repodata record with its dependencies and constrains to the pool.
fn add_record<'a>(
    pool: &mut Pool<'a>,
    record: &'a RepoDataRecord,
    channel_priority: u32,
) -> Result<id::SolvableId, SolveError> {
    let solvable_id = pool.add_package(SolverRecord::Record(record), channel_priority);

    for dep in &record.package_record.depends {
        let spec = MatchSpec::from_str(dep, ParseStrictness::Lenient).map_err(|e| {
            SolveError::InvalidOperation(format!(
                "record {} carries an invalid dependency '{dep}': {e}",
                record.file_name
            ))
        })?;
        pool.add_dependency(solvable_id, spec);
    }

    for constrain in &record.package_record.constrains {
        let spec = MatchSpec::from_str(constrain, ParseStrictness::Lenient).map_err(|e| {
            SolveError::InvalidOperation(format!(
                "record {} carries an invalid constraint '{constrain}': {e}",
                record.file_name
            ))
        })?;
        pool.add_constrains(solvable_id, spec);
    }

    // The legacy `features` field is honored as a constraint: a record that
    // requires a feature only accepts same-name candidates carrying it. No
    // synthetic feature packages are added to the index.
    Ok(solvable_id)
}

/// Renders a problem into its user-facing conflict chains.
fn render_problem(solver: &Solver<'_>, problem: problem::Problem) -> Vec<String> {
    problem
        .display_user_friendly(solver)
        .to_string()
        .lines()
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::{PackageRecord, Version, VersionWithSource};
    use std::str::FromStr;

    fn record(
        channel: &str,
        name: &str,
        version: &str,
        build: &str,
        build_number: u64,
        depends: &[&str],
    ) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            PackageName::try_from(name).unwrap(),
            VersionWithSource::from_str(version).unwrap(),
            build.to_owned(),
        );
        package_record.build_number = build_number;
        package_record.depends = depends.iter().map(|d| (*d).to_string()).collect();
        package_record.subdir = "linux-64".to_owned();

        RepoDataRecord {
            file_name: format!("{name}-{version}-{build}.tar.bz2"),
            url: url::Url::parse(&format!(
                "https://conda.anaconda.org/{channel}/linux-64/{name}-{version}-{build}.tar.bz2"
            ))
            .unwrap(),
            channel: format!("https://conda.anaconda.org/{channel}/"),
            package_record,
        }
    }

    fn specs(specs: &[&str]) -> Vec<MatchSpec> {
        specs
            .iter()
            .map(|spec| MatchSpec::from_str(spec, ParseStrictness::Lenient).unwrap())
            .collect()
    }

    fn solved_names(result: &SolverResult) -> Vec<String> {
        let mut names: Vec<String> = result
            .records
            .iter()
            .map(|r| {
                format!(
                    "{}={}",
                    r.package_record.name.as_normalized(),
                    r.package_record.version
                )
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn install_with_dependencies() {
        // Scenario: scipy pulls numpy and python transitively.
        let task = SolverTask {
            available_packages: vec![vec![
                record("main", "python", "2.7.18", "0", 0, &[]),
                record("main", "python", "3.10.0", "0", 0, &[]),
                record(
                    "main",
                    "numpy",
                    "1.7.1",
                    "py27_0",
                    0,
                    &["python 2.7.*"],
                ),
                record(
                    "main",
                    "scipy",
                    "0.11.0",
                    "np17py27_0",
                    0,
                    &["numpy 1.7.*", "python 2.7.*"],
                ),
            ]],
            specs: specs(&["scipy=0.11.0"]),
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(
            solved_names(&result),
            vec!["numpy=1.7.1", "python=2.7.18", "scipy=0.11.0"]
        );

        // The solution is a closed environment: every dependency of every
        // record is satisfied within the set.
        krait_conda_types::PackageRecord::validate(result.records).unwrap();
    }

    #[test]
    fn prefers_highest_version() {
        let task = SolverTask {
            available_packages: vec![vec![
                record("main", "foo", "1.0", "0", 0, &[]),
                record("main", "foo", "2.0", "0", 0, &[]),
                record("main", "foo", "2.0", "1", 1, &[]),
            ]],
            specs: specs(&["foo"]),
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].package_record.version.to_string(), "2.0");
        assert_eq!(result.records[0].package_record.build_number, 1);
    }

    #[test]
    fn strict_channel_priority_shadows_newer_versions() {
        // Channel A (highest priority) carries an older libfoo than channel
        // B; under strict priority A still wins.
        let task = SolverTask {
            available_packages: vec![
                vec![record("a", "libfoo", "2.0", "0", 0, &[])],
                vec![record("b", "libfoo", "3.0", "0", 0, &[])],
            ],
            specs: specs(&["libfoo"]),
            channel_priority: ChannelPriority::Strict,
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].package_record.version.to_string(), "2.0");
        assert!(result.records[0].channel.contains("/a/"));
    }

    #[test]
    fn disabled_channel_priority_takes_the_newest() {
        let task = SolverTask {
            available_packages: vec![
                vec![record("a", "libfoo", "2.0", "0", 0, &[])],
                vec![record("b", "libfoo", "3.0", "0", 0, &[])],
            ],
            specs: specs(&["libfoo"]),
            channel_priority: ChannelPriority::Disabled,
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(result.records[0].package_record.version.to_string(), "3.0");
    }

    #[test]
    fn installed_packages_are_kept() {
        // foo 1.0 is installed; solving for bar must not upgrade foo even
        // though 2.0 is available.
        let installed = record("main", "foo", "1.0", "0", 0, &[]);
        let task = SolverTask {
            available_packages: vec![vec![
                installed.clone(),
                record("main", "foo", "2.0", "0", 0, &[]),
                record("main", "bar", "1.0", "0", 0, &[]),
            ]],
            installed_packages: vec![installed],
            specs: specs(&["bar"]),
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(solved_names(&result), vec!["bar=1.0", "foo=1.0"]);
    }

    #[test]
    fn update_all_upgrades_everything() {
        let installed = record("main", "foo", "1.0", "0", 0, &[]);
        let task = SolverTask {
            available_packages: vec![vec![
                installed.clone(),
                record("main", "foo", "2.0", "0", 0, &[]),
            ]],
            installed_packages: vec![installed],
            specs: Vec::new(),
            update_modifier: UpdateModifier::UpdateAll,
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(solved_names(&result), vec!["foo=2.0"]);
    }

    #[test]
    fn frozen_retry_falls_back() {
        // Scenario: pkg_x holds python <3.10, pkg_y needs python >=3.10.
        // The frozen attempt cannot work; the fallback upgrades python and
        // replaces pkg_x with a compatible build.
        let python_39 = record("main", "python", "3.9.0", "0", 0, &[]);
        let pkg_x_old = record("main", "pkg_x", "1.0", "0", 0, &["python <3.10"]);
        let task = SolverTask {
            available_packages: vec![vec![
                python_39.clone(),
                record("main", "python", "3.10.0", "0", 0, &[]),
                pkg_x_old.clone(),
                record("main", "pkg_x", "1.1", "0", 0, &["python >=3.10"]),
                record("main", "pkg_y", "1.0", "0", 0, &["python >=3.10"]),
            ]],
            installed_packages: vec![python_39, pkg_x_old],
            specs: specs(&["pkg_y"]),
            update_modifier: UpdateModifier::FreezeInstalled,
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(
            solved_names(&result),
            vec!["pkg_x=1.1", "pkg_y=1.0", "python=3.10.0"]
        );
    }

    #[test]
    fn unsatisfiable_with_explanation() {
        // Scenario: python=3 conflicts with wxpython=3 which needs python
        // 2.7.
        let task = SolverTask {
            available_packages: vec![vec![
                record("main", "python", "2.7.18", "0", 0, &[]),
                record("main", "python", "3.10.0", "0", 0, &[]),
                record("main", "wxpython", "3.0", "0", 0, &["python 2.7.*"]),
            ]],
            specs: specs(&["python=3", "wxpython=3"]),
            ..SolverTask::default()
        };

        let err = solve(&task).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("wxpython"), "unexpected message: {message}");
        assert!(message.contains("python"), "unexpected message: {message}");
    }

    #[test]
    fn missing_packages_are_fatal() {
        let task = SolverTask {
            available_packages: vec![vec![record("main", "foo", "1.0", "0", 0, &[])]],
            specs: specs(&["does-not-exist"]),
            ..SolverTask::default()
        };

        let err = solve(&task).unwrap_err();
        assert!(matches!(err, SolveError::PackagesNotFound(specs) if specs.len() == 1));
    }

    #[test]
    fn pins_constrain_without_installing() {
        // The pin restricts foo to 1.*, but does not force foo in when only
        // bar is requested.
        let task = SolverTask {
            available_packages: vec![vec![
                record("main", "foo", "1.0", "0", 0, &[]),
                record("main", "foo", "2.0", "0", 0, &[]),
                record("main", "bar", "1.0", "0", 0, &["foo"]),
                record("main", "baz", "1.0", "0", 0, &[]),
            ]],
            specs: specs(&["baz"]),
            pinned_specs: specs(&["foo 1.*"]),
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(solved_names(&result), vec!["baz=1.0"]);

        // When bar pulls foo in, the pin forces the old version.
        let task = SolverTask {
            available_packages: vec![vec![
                record("main", "foo", "1.0", "0", 0, &[]),
                record("main", "foo", "2.0", "0", 0, &[]),
                record("main", "bar", "1.0", "0", 0, &["foo"]),
            ]],
            specs: specs(&["bar"]),
            pinned_specs: specs(&["foo 1.*"]),
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(solved_names(&result), vec!["bar=1.0", "foo=1.0"]);
    }

    #[test]
    fn aggressive_update_packages_are_refreshed() {
        let installed = record("main", "openssl", "1.0", "0", 0, &[]);
        let task = SolverTask {
            available_packages: vec![vec![
                installed.clone(),
                record("main", "openssl", "3.0", "0", 0, &[]),
                record("main", "bar", "1.0", "0", 0, &[]),
            ]],
            installed_packages: vec![installed],
            specs: specs(&["bar"]),
            aggressive_update_packages: vec![PackageName::new_unchecked("openssl")],
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(solved_names(&result), vec!["bar=1.0", "openssl=3.0"]);
    }

    #[test]
    fn aggressive_update_conflicts_with_freeze() {
        let installed = record("main", "openssl", "1.0", "0", 0, &[]);
        let task = SolverTask {
            available_packages: vec![vec![installed.clone()]],
            installed_packages: vec![installed],
            specs: Vec::new(),
            update_modifier: UpdateModifier::FreezeInstalled,
            aggressive_update_packages: vec![PackageName::new_unchecked("openssl")],
            ..SolverTask::default()
        };

        assert!(matches!(
            solve(&task),
            Err(SolveError::InvalidOperation(_))
        ));
    }

    #[test]
    fn empty_environment_with_virtual_packages() {
        let task = SolverTask {
            virtual_packages: vec![GenericVirtualPackage {
                name: PackageName::new_unchecked("__linux"),
                version: Version::from_str("5.10").unwrap(),
                build_string: "0".to_owned(),
            }],
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert!(result.records.is_empty());
    }

    #[test]
    fn virtual_package_requirements() {
        let task = SolverTask {
            available_packages: vec![vec![record(
                "main",
                "needs-glibc",
                "1.0",
                "0",
                0,
                &["__glibc >=2.17"],
            )]],
            virtual_packages: vec![GenericVirtualPackage {
                name: PackageName::new_unchecked("__glibc"),
                version: Version::from_str("2.31").unwrap(),
                build_string: "0".to_owned(),
            }],
            specs: specs(&["needs-glibc"]),
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(solved_names(&result), vec!["needs-glibc=1.0"]);

        // Without the virtual package the request is unsatisfiable.
        let task = SolverTask {
            available_packages: vec![vec![record(
                "main",
                "needs-glibc",
                "1.0",
                "0",
                0,
                &["__glibc >=2.17"],
            )]],
            specs: specs(&["needs-glibc"]),
            ..SolverTask::default()
        };
        assert!(solve(&task).is_err());
    }

    #[test]
    fn constrains_are_honored() {
        let task = SolverTask {
            available_packages: vec![vec![
                record("main", "a", "1.0", "0", 0, &["b >=50"]),
                record("main", "b", "50", "0", 0, &[]),
                record("main", "b", "42", "0", 0, &[]),
                {
                    let mut c = record("main", "c", "1.0", "0", 0, &[]);
                    c.package_record.constrains = vec!["b <50".to_owned()];
                    c
                },
            ]],
            specs: specs(&["a", "c"]),
            ..SolverTask::default()
        };

        let err = solve(&task).unwrap_err();
        assert!(matches!(err, SolveError::Unsolvable(_)));
    }

    #[test]
    fn specs_satisfied_skip_solve() {
        let installed = record("main", "foo", "1.0", "0", 0, &[]);
        let task = SolverTask {
            available_packages: vec![vec![record("main", "foo", "2.0", "0", 0, &[])]],
            installed_packages: vec![installed],
            specs: specs(&["foo >=1"]),
            update_modifier: UpdateModifier::SpecsSatisfiedSkipSolve,
            ..SolverTask::default()
        };

        let result = solve(&task).unwrap();
        assert_eq!(solved_names(&result), vec!["foo=1.0"]);
    }
}
