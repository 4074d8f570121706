//! Computing the operations that bring a prefix from its current state to a
//! desired state.

use std::collections::HashMap;

use krait_conda_types::{PackageRecord, Platform, PrefixRecord, RepoDataRecord};

use super::python::{is_python_record, PythonInfo, PythonInfoError};

/// Returned when a transaction cannot be computed.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error(transparent)]
    PythonInfoError(#[from] PythonInfoError),
}

/// A single operation of a transaction.
#[derive(Debug)]
pub enum TransactionOperation {
    /// Install a new package.
    Install(RepoDataRecord),

    /// Replace an installed package with another build or version.
    Change {
        /// The installed record to unlink.
        old: PrefixRecord,
        /// The record to link in its place.
        new: RepoDataRecord,
    },

    /// Unlink and relink the same package. Needed for noarch python packages
    /// when the python minor version changes.
    Reinstall(PrefixRecord),

    /// Remove an installed package.
    Remove(PrefixRecord),
}

impl TransactionOperation {
    /// The record that will be linked by this operation, when any.
    pub fn record_to_install(&self) -> Option<&RepoDataRecord> {
        match self {
            TransactionOperation::Install(record) => Some(record),
            TransactionOperation::Change { new, .. } => Some(new),
            TransactionOperation::Reinstall(old) => Some(&old.repodata_record),
            TransactionOperation::Remove(_) => None,
        }
    }

    /// The record that will be unlinked by this operation, when any.
    pub fn record_to_remove(&self) -> Option<&PrefixRecord> {
        match self {
            TransactionOperation::Install(_) => None,
            TransactionOperation::Change { old, .. } => Some(old),
            TransactionOperation::Reinstall(old) => Some(old),
            TransactionOperation::Remove(old) => Some(old),
        }
    }
}

/// The difference between the current and the desired state of a prefix: an
/// ordered list of unlink and link operations.
#[derive(Debug)]
pub struct Transaction {
    /// The operations to perform.
    pub operations: Vec<TransactionOperation>,

    /// The python interpreter of the desired state, when it contains one.
    pub python_info: Option<PythonInfo>,

    /// The python interpreter of the current state, when it contains one.
    pub current_python_info: Option<PythonInfo>,

    /// The platform the transaction applies to.
    pub platform: Platform,
}

impl Transaction {
    /// Computes the transaction that turns `current` into `desired`.
    ///
    /// Unchanged packages are not part of the result. When the python minor
    /// version changes between the two states, every noarch python package
    /// of the desired state is reinstalled so its files land in the new
    /// `site-packages`.
    pub fn from_current_and_desired(
        current: Vec<PrefixRecord>,
        desired: Vec<RepoDataRecord>,
        platform: Platform,
    ) -> Result<Self, TransactionError> {
        let current_python_info = find_python_info(
            current.iter().map(|r| &r.repodata_record.package_record),
            platform,
        )?;
        let desired_python_info =
            find_python_info(desired.iter().map(|r| &r.package_record), platform)?;
        let needs_python_relink = match (&current_python_info, &desired_python_info) {
            (Some(current), Some(desired)) => desired.is_relink_required(current),
            _ => false,
        };

        let mut desired_by_name: HashMap<String, RepoDataRecord> = desired
            .into_iter()
            .map(|record| {
                (
                    record.package_record.name.as_normalized().to_owned(),
                    record,
                )
            })
            .collect();

        let mut operations = Vec::new();

        for record in current {
            let name = record
                .repodata_record
                .package_record
                .name
                .as_normalized()
                .to_owned();
            match desired_by_name.remove(&name) {
                None => operations.push(TransactionOperation::Remove(record)),
                Some(desired) => {
                    if desired.package_record != record.repodata_record.package_record {
                        operations.push(TransactionOperation::Change {
                            old: record,
                            new: desired,
                        });
                    } else if desired.package_record.noarch.is_python() && needs_python_relink {
                        operations.push(TransactionOperation::Reinstall(record));
                    }
                }
            }
        }

        for record in desired_by_name.into_values() {
            operations.push(TransactionOperation::Install(record));
        }

        Ok(Self {
            operations,
            python_info: desired_python_info,
            current_python_info,
            platform,
        })
    }

    /// True when the transaction contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// All records that will be linked, topologically sorted so every record
    /// comes after its dependencies (cycles broken by name). This is the
    /// order in which links are executed.
    pub fn records_to_install_in_link_order(&self) -> Vec<RepoDataRecord> {
        let records: Vec<RepoDataRecord> = self
            .operations
            .iter()
            .filter_map(TransactionOperation::record_to_install)
            .cloned()
            .collect();
        PackageRecord::sort_topologically(records)
    }

    /// All records that will be unlinked.
    pub fn records_to_remove(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.operations
            .iter()
            .filter_map(TransactionOperation::record_to_remove)
    }
}

/// Finds the python interpreter in a set of records.
fn find_python_info<'a>(
    records: impl IntoIterator<Item = &'a PackageRecord>,
    platform: Platform,
) -> Result<Option<PythonInfo>, PythonInfoError> {
    records
        .into_iter()
        .find(|r| is_python_record(r))
        .map(|record| PythonInfo::from_python_record(record, platform))
        .transpose()
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::{NoArchType, PackageName, VersionWithSource};
    use std::str::FromStr;

    fn repodata_record(name: &str, version: &str) -> RepoDataRecord {
        RepoDataRecord {
            package_record: PackageRecord::new(
                PackageName::new_unchecked(name),
                VersionWithSource::from_str(version).unwrap(),
                "0".to_owned(),
            ),
            file_name: format!("{name}-{version}-0.tar.bz2"),
            url: url::Url::parse(&format!(
                "https://conda.anaconda.org/main/linux-64/{name}-{version}-0.tar.bz2"
            ))
            .unwrap(),
            channel: "https://conda.anaconda.org/main/".to_owned(),
        }
    }

    fn prefix_record(name: &str, version: &str) -> PrefixRecord {
        PrefixRecord::from_repodata_record(
            repodata_record(name, version),
            None,
            None,
            Vec::new(),
            None,
            None,
        )
    }

    fn operation_kinds(transaction: &Transaction) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = transaction
            .operations
            .iter()
            .map(|op| match op {
                TransactionOperation::Install(_) => "install",
                TransactionOperation::Change { .. } => "change",
                TransactionOperation::Reinstall(_) => "reinstall",
                TransactionOperation::Remove(_) => "remove",
            })
            .collect();
        kinds.sort_unstable();
        kinds
    }

    #[test]
    fn diff() {
        let transaction = Transaction::from_current_and_desired(
            vec![prefix_record("keep", "1.0"), prefix_record("old", "1.0"), prefix_record("gone", "1.0")],
            vec![repodata_record("keep", "1.0"), repodata_record("old", "2.0"), repodata_record("new", "1.0")],
            Platform::Linux64,
        )
        .unwrap();

        assert_eq!(operation_kinds(&transaction), vec!["change", "install", "remove"]);
    }

    #[test]
    fn noarch_python_relink_on_python_minor_change() {
        let mut noarch = prefix_record("noarch-pkg", "1.0");
        noarch.repodata_record.package_record.noarch = NoArchType::python();

        let mut desired_noarch = repodata_record("noarch-pkg", "1.0");
        desired_noarch.package_record.noarch = NoArchType::python();

        let transaction = Transaction::from_current_and_desired(
            vec![prefix_record("python", "3.10.0"), noarch],
            vec![repodata_record("python", "3.11.0"), desired_noarch],
            Platform::Linux64,
        )
        .unwrap();

        assert_eq!(operation_kinds(&transaction), vec!["change", "reinstall"]);
    }

    #[test]
    fn link_order_is_topological() {
        let mut scipy = repodata_record("scipy", "0.11.0");
        scipy.package_record.depends =
            vec!["numpy 1.7.*".to_owned(), "python 2.7.*".to_owned()];
        let mut numpy = repodata_record("numpy", "1.7.1");
        numpy.package_record.depends = vec!["python 2.7.*".to_owned()];
        let python = repodata_record("python", "2.7.18");

        let transaction = Transaction::from_current_and_desired(
            Vec::new(),
            vec![scipy, numpy, python],
            Platform::Linux64,
        )
        .unwrap();

        let order: Vec<String> = transaction
            .records_to_install_in_link_order()
            .iter()
            .map(|r| r.package_record.name.as_normalized().to_owned())
            .collect();
        assert_eq!(order, vec!["python", "numpy", "scipy"]);
    }
}
