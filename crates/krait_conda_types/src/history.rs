//! Readers and writers for `conda-meta/history` files.
//!
//! Every prefix keeps an append-only `conda-meta/history` file recording each
//! transaction (revision) that was applied to it. A revision starts with a
//! `==> <datetime> <==` header, followed by comment lines (the command that
//! ran, the requested specs) and package distribution strings. The initial
//! revision lists the full set; later revisions record diffs with `+`
//! (linked) and `-` (unlinked) prefixes.
//!
//! The ledger never loses entries, which makes every historic revision
//! reconstructible by replaying the diffs.

use std::{
    collections::BTreeSet,
    io::{Read, Write},
    path::{Path, PathBuf},
};

/// A single parsed revision of a history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRevision {
    /// The datetime string of the revision header.
    pub timestamp: String,

    /// The package distribution strings of this revision. In the initial
    /// revision these are bare (`python-3.12.0-h1234567_0`), in later
    /// revisions they carry a `+` or `-` prefix.
    pub packages: BTreeSet<String>,

    /// The raw comment lines, including the leading `#`.
    pub comments: Vec<String>,
}

/// The user request recorded in the comments of a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRequest {
    /// The datetime string of the revision header.
    pub date: String,

    /// The command that was run (`# cmd: ...`).
    pub cmd: Option<String>,

    /// The action that was performed (`install`, `remove`, `update`,
    /// `create`).
    pub action: Option<String>,

    /// The specs of install/update/create actions.
    pub update_specs: Vec<String>,

    /// The specs of remove actions.
    pub remove_specs: Vec<String>,
}

/// Errors from reading or writing history files.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The file could not be parsed.
    #[error("failed to parse history: {0}")]
    ParseError(String),
}

/// A revision to append to a history file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Revision {
    /// The timestamp string, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,

    /// The command to record, when any.
    pub cmd: Option<String>,

    /// The action (`install`, `remove`, ...) and its specs.
    pub action: Option<(String, Vec<String>)>,

    /// Distribution strings unlinked in this revision.
    pub removed: BTreeSet<String>,

    /// Distribution strings linked in this revision.
    pub added: BTreeSet<String>,
}

/// The parsed contents of a history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHistory {
    /// All revisions, oldest first.
    pub revisions: Vec<HistoryRevision>,
}

impl ParsedHistory {
    /// The number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// True when the file held no revisions.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// The most recent revision.
    pub fn latest(&self) -> Option<&HistoryRevision> {
        self.revisions.last()
    }

    /// Extracts the structured user requests from the revision comments. A
    /// request is produced for every revision carrying a `# cmd:` comment.
    pub fn user_requests(&self) -> Vec<UserRequest> {
        let cmd_re = lazy_regex::regex!(r"^#\s*cmd:\s*(.+)$");
        let spec_re = lazy_regex::regex!(r"^#\s*(\w+)\s*specs:\s*(.+)?$");

        let mut requests = Vec::new();

        for rev in &self.revisions {
            let mut req = UserRequest {
                date: rev.timestamp.clone(),
                ..Default::default()
            };

            for comment in &rev.comments {
                if let Some(caps) = cmd_re.captures(comment) {
                    req.cmd = Some(caps[1].to_string());
                }
                if let Some(caps) = spec_re.captures(comment) {
                    let action = caps[1].to_string();
                    let specs = parse_specs_string(caps.get(2).map_or("", |m| m.as_str()));

                    match action.as_str() {
                        "install" | "create" | "update" => {
                            req.action = Some(action);
                            req.update_specs = specs;
                        }
                        "remove" | "uninstall" => {
                            req.action = Some(action);
                            req.remove_specs = specs;
                        }
                        _ => {
                            req.action = Some(action);
                        }
                    }
                }
            }

            if req.cmd.is_some() || req.action.is_some() {
                requests.push(req);
            }
        }

        requests
    }

    /// Reconstructs the distribution set of the given revision index by
    /// replaying the diffs from the start.
    pub fn distributions_at(&self, revision: usize) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for rev in self.revisions.iter().take(revision + 1) {
            for package in &rev.packages {
                if let Some(removed) = package.strip_prefix('-') {
                    set.remove(removed);
                } else if let Some(added) = package.strip_prefix('+') {
                    set.insert(added.to_string());
                } else {
                    set.insert(package.clone());
                }
            }
        }
        set
    }
}

/// Read and write access to the `conda-meta/history` file of a prefix.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    /// Creates a handle for `<prefix>/conda-meta/history`.
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self {
            path: prefix.as_ref().join("conda-meta").join("history"),
        }
    }

    /// Creates a handle from an explicit file path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the file. A missing file parses as an empty history.
    pub fn parse(&self) -> Result<ParsedHistory, HistoryError> {
        if !self.path.exists() {
            return Ok(ParsedHistory {
                revisions: Vec::new(),
            });
        }

        let contents = std::fs::read_to_string(&self.path)?;
        Self::parse_str(&contents)
    }

    /// Parses history from a reader.
    pub fn from_reader(mut reader: impl Read) -> Result<ParsedHistory, HistoryError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::parse_str(&contents)
    }

    /// Parses a history string.
    pub fn parse_str(s: &str) -> Result<ParsedHistory, HistoryError> {
        let sep_re = lazy_regex::regex!(r"^==>\s*(.+?)\s*<==$");

        let mut revisions = Vec::new();

        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = sep_re.captures(line) {
                revisions.push(HistoryRevision {
                    timestamp: caps[1].to_string(),
                    packages: BTreeSet::new(),
                    comments: Vec::new(),
                });
            } else if line.starts_with('#') {
                // Comments before the first header are ignored.
                if let Some(rev) = revisions.last_mut() {
                    rev.comments.push(line.to_string());
                }
            } else if let Some(rev) = revisions.last_mut() {
                rev.packages.insert(line.to_string());
            }
        }

        Ok(ParsedHistory { revisions })
    }

    /// Convenience wrapper: parse and extract the user requests.
    pub fn get_user_requests(&self) -> Result<Vec<UserRequest>, HistoryError> {
        Ok(self.parse()?.user_requests())
    }

    /// Appends a revision to the file, creating it (and `conda-meta`) when
    /// needed.
    pub fn write_revision(&self, revision: &Revision) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "==> {} <==", revision.timestamp)?;
        if let Some(cmd) = &revision.cmd {
            writeln!(file, "# cmd: {cmd}")?;
        }
        if let Some((action, specs)) = &revision.action {
            writeln!(file, "# {action} specs: {specs:?}")?;
        }
        for removed in &revision.removed {
            writeln!(file, "-{removed}")?;
        }
        for added in &revision.added {
            writeln!(file, "+{added}")?;
        }

        Ok(())
    }
}

/// Parses a spec list comment of the form `['python >=3', 'numpy']` or a
/// plain comma separated list.
fn parse_specs_string(specs: &str) -> Vec<String> {
    specs
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const HISTORY: &str = r#"
==> 2023-02-14 11:47:41 <==
# cmd: conda create -n test python=3.9
# create specs: ['python=3.9']
python-3.9.16-h2782a2a_0_cpython
tzdata-2022g-h191b570_0

==> 2023-02-15 09:12:00 <==
# cmd: conda install numpy
# install specs: ['numpy']
+numpy-1.24.2-py39h7360e5f_0
-tzdata-2022g-h191b570_0
"#;

    #[test]
    fn parse() {
        let parsed = History::parse_str(HISTORY).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.revisions[0].timestamp, "2023-02-14 11:47:41");
        assert_eq!(parsed.revisions[0].packages.len(), 2);
        assert_eq!(parsed.revisions[1].packages.len(), 2);
    }

    #[test]
    fn user_requests() {
        let parsed = History::parse_str(HISTORY).unwrap();
        let requests = parsed.user_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].action.as_deref(), Some("create"));
        assert_eq!(requests[0].update_specs, vec!["python=3.9".to_string()]);
        assert_eq!(requests[1].update_specs, vec!["numpy".to_string()]);
    }

    #[test]
    fn revisions_are_reconstructible() {
        let parsed = History::parse_str(HISTORY).unwrap();
        let initial = parsed.distributions_at(0);
        assert!(initial.contains("tzdata-2022g-h191b570_0"));

        let current = parsed.distributions_at(1);
        assert!(current.contains("numpy-1.24.2-py39h7360e5f_0"));
        assert!(!current.contains("tzdata-2022g-h191b570_0"));
        assert!(current.contains("python-3.9.16-h2782a2a_0_cpython"));
    }

    #[test]
    fn append_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());

        history
            .write_revision(&Revision {
                timestamp: "2023-03-01 10:00:00".to_string(),
                cmd: Some("install foo".to_string()),
                action: Some(("install".to_string(), vec!["foo".to_string()])),
                removed: BTreeSet::new(),
                added: ["foo-1.0-0".to_string()].into_iter().collect(),
            })
            .unwrap();
        history
            .write_revision(&Revision {
                timestamp: "2023-03-02 10:00:00".to_string(),
                cmd: Some("remove foo".to_string()),
                action: Some(("remove".to_string(), vec!["foo".to_string()])),
                removed: ["foo-1.0-0".to_string()].into_iter().collect(),
                added: BTreeSet::new(),
            })
            .unwrap();

        let parsed = history.parse().unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.distributions_at(1).is_empty());
        assert_eq!(
            parsed.user_requests()[1].remove_specs,
            vec!["foo".to_string()]
        );
    }
}
