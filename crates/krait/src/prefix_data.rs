//! The authoritative read/write view of a prefix's `conda-meta` ledger.

use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use krait_conda_types::{
    History, MatchSpec, Matches, PackageName, ParseStrictness, PrefixRecord,
};

/// An error from reading or writing the prefix ledger.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum PrefixDataError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("the prefix {0} does not exist")]
    PrefixDoesNotExist(PathBuf),

    #[error("failed to parse history: {0}")]
    HistoryError(#[from] krait_conda_types::HistoryError),
}

/// The installed-package ledger of one prefix: a map from package name to
/// [`PrefixRecord`], backed by one JSON file per package under
/// `<prefix>/conda-meta/`.
pub struct PrefixData {
    prefix: PathBuf,
    records: HashMap<PackageName, PrefixRecord>,
}

impl PrefixData {
    /// Loads the ledger of the given prefix. Ledger files that fail to parse
    /// are reported as warnings and skipped; repairing an inconsistent
    /// prefix is the solver's job.
    pub fn from_path(prefix: impl Into<PathBuf>) -> Result<Self, PrefixDataError> {
        let prefix = prefix.into();
        let conda_meta = prefix.join("conda-meta");

        let mut records: HashMap<PackageName, PrefixRecord> = HashMap::new();

        if conda_meta.is_dir() {
            for entry in fs_err::read_dir(&conda_meta)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }

                let record = match PrefixRecord::from_path(&path) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!("ignoring corrupt ledger entry {}: {e}", path.display());
                        continue;
                    }
                };

                let name = record.repodata_record.package_record.name.clone();
                if let Some(previous) = records.get(&name) {
                    tracing::warn!(
                        "duplicate ledger entries for '{}' ({} and {}), keeping the newer one",
                        name.as_normalized(),
                        previous.file_name(),
                        record.file_name(),
                    );
                    if previous.repodata_record.package_record.version
                        >= record.repodata_record.package_record.version
                    {
                        continue;
                    }
                }
                records.insert(name, record);
            }
        }

        Ok(Self { prefix, records })
    }

    /// The path of the prefix this ledger belongs to.
    pub fn prefix_path(&self) -> &Path {
        &self.prefix
    }

    /// All installed records.
    pub fn records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.values()
    }

    /// The record of the given package, when installed.
    pub fn get(&self, name: &PackageName) -> Option<&PrefixRecord> {
        self.records.get(name)
    }

    /// The number of installed packages.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The history ledger of this prefix.
    pub fn history(&self) -> History {
        History::new(&self.prefix)
    }

    /// Writes a ledger entry atomically (write to a temporary file in the
    /// same directory, then rename) and updates the in-memory map.
    pub fn write_record(&mut self, record: PrefixRecord) -> Result<(), PrefixDataError> {
        let conda_meta = self.prefix.join("conda-meta");
        fs_err::create_dir_all(&conda_meta)?;

        let final_path = conda_meta.join(record.file_name());
        let mut temp = tempfile::NamedTempFile::new_in(&conda_meta)?;
        record.write_to(&mut temp, true)?;
        temp.flush()?;
        temp.persist(&final_path)
            .map_err(|e| PrefixDataError::IoError(e.error))?;

        self.records.insert(
            record.repodata_record.package_record.name.clone(),
            record,
        );
        Ok(())
    }

    /// Removes the ledger entry of a package and returns it.
    pub fn remove_record(
        &mut self,
        name: &PackageName,
    ) -> Result<Option<PrefixRecord>, PrefixDataError> {
        let Some(record) = self.records.remove(name) else {
            return Ok(None);
        };

        let path = self.prefix.join("conda-meta").join(record.file_name());
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Some(record))
    }

    /// The specs the user asked for over the lifetime of this prefix: the
    /// accumulated update/remove requests from the history, which must stay
    /// satisfiable on every solve.
    pub fn requested_specs(&self) -> Result<Vec<MatchSpec>, PrefixDataError> {
        let history = self.history().parse()?;

        // Accumulate over all revisions: an install request (re)sets the
        // spec of a name, a remove request drops it.
        let mut by_name: Vec<(String, MatchSpec)> = Vec::new();
        for request in history.user_requests() {
            for spec_str in &request.update_specs {
                let Ok(spec) = MatchSpec::from_str(spec_str, ParseStrictness::Lenient) else {
                    tracing::warn!("ignoring invalid historic spec '{spec_str}'");
                    continue;
                };
                let Some(name) = spec.name.as_ref() else {
                    continue;
                };
                let name = name.as_normalized().to_owned();
                by_name.retain(|(existing, _)| existing != &name);
                by_name.push((name, spec));
            }
            for spec_str in &request.remove_specs {
                let Ok(spec) = MatchSpec::from_str(spec_str, ParseStrictness::Lenient) else {
                    continue;
                };
                if let Some(name) = spec.name.as_ref() {
                    let name = name.as_normalized();
                    by_name.retain(|(existing, _)| existing != name);
                }
            }
        }

        Ok(by_name.into_iter().map(|(_, spec)| spec).collect())
    }

    /// The pins of this prefix: one spec per line from
    /// `<prefix>/conda-meta/pinned`, when the file exists.
    pub fn pinned_specs(&self) -> Result<Vec<MatchSpec>, PrefixDataError> {
        let path = self.prefix.join("conda-meta").join("pinned");
        let contents = match fs_err::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut specs = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match MatchSpec::from_str(line, ParseStrictness::Lenient) {
                Ok(spec) => specs.push(spec),
                Err(e) => tracing::warn!("ignoring invalid pin '{line}': {e}"),
            }
        }
        Ok(specs)
    }

    /// Reports ledger inconsistencies (dependencies without a matching
    /// installed record) as warnings and returns them. Repair is the
    /// solver's job.
    pub fn find_inconsistencies(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for record in self.records.values() {
            for dep in &record.repodata_record.package_record.depends {
                if dep.starts_with("__") {
                    continue;
                }
                let Ok(spec) = MatchSpec::from_str(dep, ParseStrictness::Lenient) else {
                    continue;
                };
                let satisfied = self
                    .records
                    .values()
                    .any(|candidate| spec.matches(&candidate.repodata_record));
                if !satisfied {
                    let problem = format!(
                        "'{}' depends on '{dep}' which is not installed",
                        record.repodata_record.package_record.name.as_normalized()
                    );
                    tracing::warn!("{problem}");
                    problems.push(problem);
                }
            }
        }

        problems
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::{PackageRecord, RepoDataRecord, Revision, VersionWithSource};
    use std::collections::BTreeSet;

    fn record(name: &str, version: &str, depends: &[&str]) -> PrefixRecord {
        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked(name),
            VersionWithSource::from_str(version).unwrap(),
            "0".to_owned(),
        );
        package_record.depends = depends.iter().map(|d| (*d).to_string()).collect();

        PrefixRecord::from_repodata_record(
            RepoDataRecord {
                package_record,
                file_name: format!("{name}-{version}-0.tar.bz2"),
                url: url::Url::parse(&format!(
                    "https://conda.anaconda.org/main/linux-64/{name}-{version}-0.tar.bz2"
                ))
                .unwrap(),
                channel: "https://conda.anaconda.org/main/".to_owned(),
            },
            None,
            None,
            Vec::new(),
            None,
            None,
        )
    }

    #[test]
    fn write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefix_data = PrefixData::from_path(dir.path()).unwrap();
        assert!(prefix_data.is_empty());

        prefix_data.write_record(record("foo", "1.0", &[])).unwrap();
        prefix_data.write_record(record("bar", "2.0", &["foo"])).unwrap();

        let reloaded = PrefixData::from_path(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded
            .get(&PackageName::new_unchecked("foo"))
            .is_some());
        assert!(reloaded.find_inconsistencies().is_empty());
    }

    #[test]
    fn remove_record_deletes_ledger_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefix_data = PrefixData::from_path(dir.path()).unwrap();
        prefix_data.write_record(record("foo", "1.0", &[])).unwrap();

        let removed = prefix_data
            .remove_record(&PackageName::new_unchecked("foo"))
            .unwrap();
        assert!(removed.is_some());
        assert!(!dir.path().join("conda-meta/foo-1.0-0.json").exists());
        assert!(PrefixData::from_path(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn inconsistencies_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefix_data = PrefixData::from_path(dir.path()).unwrap();
        prefix_data
            .write_record(record("bar", "2.0", &["foo >=1"]))
            .unwrap();

        let problems = prefix_data.find_inconsistencies();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("bar"));
    }

    #[test]
    fn requested_specs_accumulate_over_history() {
        let dir = tempfile::tempdir().unwrap();
        let prefix_data = PrefixData::from_path(dir.path()).unwrap();

        let history = prefix_data.history();
        history
            .write_revision(&Revision {
                timestamp: "2023-01-01 10:00:00".to_owned(),
                cmd: Some("install python=3.9".to_owned()),
                action: Some(("install".to_owned(), vec!["python=3.9".to_owned()])),
                removed: BTreeSet::new(),
                added: BTreeSet::new(),
            })
            .unwrap();
        history
            .write_revision(&Revision {
                timestamp: "2023-01-02 10:00:00".to_owned(),
                cmd: Some("install numpy".to_owned()),
                action: Some(("install".to_owned(), vec!["numpy".to_owned()])),
                removed: BTreeSet::new(),
                added: BTreeSet::new(),
            })
            .unwrap();
        history
            .write_revision(&Revision {
                timestamp: "2023-01-03 10:00:00".to_owned(),
                cmd: Some("remove numpy".to_owned()),
                action: Some(("remove".to_owned(), vec!["numpy".to_owned()])),
                removed: BTreeSet::new(),
                added: BTreeSet::new(),
            })
            .unwrap();

        let specs = prefix_data.requested_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name.as_ref().unwrap().as_normalized(), "python");
    }

    #[test]
    fn pinned_specs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("conda-meta")).unwrap();
        std::fs::write(
            dir.path().join("conda-meta/pinned"),
            "# a comment\npython 3.9.*\nnumpy >=1.20,<2\n",
        )
        .unwrap();

        let prefix_data = PrefixData::from_path(dir.path()).unwrap();
        let pins = prefix_data.pinned_specs().unwrap();
        assert_eq!(pins.len(), 2);
    }
}
