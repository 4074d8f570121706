use std::fmt::{Display, Formatter};

use krait_conda_types::{
    GenericVirtualPackage, MatchSpec, Matches, PackageRecord, RepoDataRecord, Version,
};

use crate::id::{MatchSpecId, NameId};

/// The record a solvable stands for: a real candidate from a channel, or a
/// virtual package describing a host capability. Virtual packages always end
/// up assigned true and are never part of the output.
#[derive(Copy, Clone)]
pub(crate) enum SolverRecord<'a> {
    /// A candidate package from a channel.
    Record(&'a RepoDataRecord),

    /// A capability of the host system.
    VirtualPackage(&'a GenericVirtualPackage),
}

impl<'a> SolverRecord<'a> {
    pub(crate) fn name(&self) -> &'a str {
        match self {
            SolverRecord::Record(record) => record.package_record.name.as_normalized(),
            SolverRecord::VirtualPackage(package) => package.name.as_normalized(),
        }
    }

    pub(crate) fn version(&self) -> &'a Version {
        match self {
            SolverRecord::Record(record) => record.package_record.version.version(),
            SolverRecord::VirtualPackage(package) => &package.version,
        }
    }

    pub(crate) fn build(&self) -> &'a str {
        match self {
            SolverRecord::Record(record) => &record.package_record.build,
            SolverRecord::VirtualPackage(package) => &package.build_string,
        }
    }

    pub(crate) fn package_record(&self) -> Option<&'a PackageRecord> {
        match self {
            SolverRecord::Record(record) => Some(&record.package_record),
            SolverRecord::VirtualPackage(_) => None,
        }
    }

    pub(crate) fn repo_data_record(&self) -> Option<&'a RepoDataRecord> {
        match self {
            SolverRecord::Record(record) => Some(record),
            SolverRecord::VirtualPackage(_) => None,
        }
    }

    /// Returns true if the given spec accepts this record.
    pub(crate) fn matches(&self, spec: &MatchSpec) -> bool {
        match self {
            SolverRecord::Record(record) => spec.matches(*record),
            SolverRecord::VirtualPackage(package) => spec.matches(*package),
        }
    }
}

/// A solvable backed by a package record.
pub(crate) struct PackageSolvable<'a> {
    /// The interned name of the package.
    pub(crate) name: NameId,

    /// The record this solvable stands for.
    pub(crate) record: SolverRecord<'a>,

    /// The interned dependency specs of the record.
    pub(crate) dependencies: Vec<MatchSpecId>,

    /// The interned constrains specs of the record.
    pub(crate) constrains: Vec<MatchSpecId>,

    /// The priority of the channel this record came from; lower is better.
    /// Virtual and installed records get the highest priority.
    pub(crate) channel_priority: u32,
}

/// A variable of the SAT problem: either the synthetic root (which holds the
/// requested specs as its dependencies) or a package candidate.
pub(crate) enum Solvable<'a> {
    Root(Vec<MatchSpecId>),
    Package(PackageSolvable<'a>),
}

impl<'a> Solvable<'a> {
    pub(crate) fn new_root() -> Solvable<'static> {
        Solvable::Root(Vec::new())
    }

    pub(crate) fn new_package(
        name: NameId,
        record: SolverRecord<'a>,
        channel_priority: u32,
    ) -> Self {
        Solvable::Package(PackageSolvable {
            name,
            record,
            dependencies: Vec::new(),
            constrains: Vec::new(),
            channel_priority,
        })
    }

    pub(crate) fn root_mut(&mut self) -> &mut Vec<MatchSpecId> {
        match self {
            Solvable::Root(match_specs) => match_specs,
            Solvable::Package(_) => panic!("expected the root solvable"),
        }
    }

    pub(crate) fn get_package(&self) -> Option<&PackageSolvable<'a>> {
        match self {
            Solvable::Root(_) => None,
            Solvable::Package(package) => Some(package),
        }
    }

    pub(crate) fn package(&self) -> &PackageSolvable<'a> {
        self.get_package().expect("unexpected root solvable")
    }

    pub(crate) fn package_mut(&mut self) -> &mut PackageSolvable<'a> {
        match self {
            Solvable::Root(_) => panic!("unexpected root solvable"),
            Solvable::Package(package) => package,
        }
    }

    pub(crate) fn display(&self) -> SolvableDisplay<'_> {
        match self {
            Solvable::Root(_) => SolvableDisplay {
                name: "root",
                version: None,
                build: None,
            },
            Solvable::Package(package) => SolvableDisplay {
                name: package.record.name(),
                version: Some(package.record.version()),
                build: Some(package.record.build()),
            },
        }
    }
}

/// Formats a solvable as `name version build`.
pub(crate) struct SolvableDisplay<'a> {
    name: &'a str,
    version: Option<&'a Version>,
    build: Option<&'a str>,
}

impl Display for SolvableDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = self.version {
            write!(f, " {version}")?;
        }
        if let Some(build) = self.build {
            if !build.is_empty() {
                write!(f, " {build}")?;
            }
        }
        Ok(())
    }
}
