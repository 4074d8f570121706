//! The process-wide configuration, threaded explicitly through every
//! operation.

use std::{
    collections::HashMap,
    env,
    path::PathBuf,
    str::FromStr,
};

use krait_cache::ValidationPolicy;
use krait_conda_types::{ChannelConfig, MatchSpec, ParseStrictness, Platform};
use krait_solve::ChannelPriority;
use serde::Deserialize;

/// What to do when two packages want to create the same file, or a file
/// already exists in the prefix.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathConflict {
    /// Overwrite silently.
    Clobber,

    /// Overwrite, but warn.
    #[default]
    Warn,

    /// Refuse the transaction.
    Prevent,
}

impl FromStr for PathConflict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clobber" => Ok(PathConflict::Clobber),
            "warn" => Ok(PathConflict::Warn),
            "prevent" => Ok(PathConflict::Prevent),
            _ => Err(format!("'{s}' is not a valid path_conflict policy")),
        }
    }
}

/// The configuration of every krait operation.
///
/// A `Context` is constructed once at process entry — from the built-in
/// defaults, optionally a parsed configuration file, and the `CONDA_<KEY>`
/// environment variable overrides — and never mutated afterwards. Tests
/// construct alternate contexts instead of touching global state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Context {
    /// The configured channels, highest priority first.
    pub channels: Vec<String>,

    /// How the channel order influences the solver.
    #[serde(skip)]
    pub channel_priority: ChannelPriority,

    /// What the `defaults` meta-channel expands to.
    pub default_channels: Vec<String>,

    /// The package cache directories. The first writable one is the primary
    /// cache.
    pub pkgs_dirs: Vec<PathBuf>,

    /// The directories searched for named environments.
    pub envs_dirs: Vec<PathBuf>,

    /// The target platform.
    #[serde(skip, default = "Platform::current")]
    pub platform: Platform,

    /// Globally pinned specs, applied to every solve.
    pub pinned_packages: Vec<MatchSpec>,

    /// Specs whose packages are brought to their latest version on every
    /// solve.
    pub aggressive_update_packages: Vec<MatchSpec>,

    /// Whether soft links may be used when hard links are impossible.
    pub allow_softlinks: bool,

    /// Always copy files into prefixes instead of linking.
    pub always_copy: bool,

    /// The path conflict policy.
    pub path_conflict: PathConflict,

    /// The per-file checksum policy for cached packages.
    #[serde(skip)]
    pub safety_checks: ValidationPolicy,

    /// How often to retry transient download failures.
    pub remote_max_retries: u32,

    /// The base of the exponential download retry backoff, in seconds.
    pub remote_backoff_factor: f64,

    /// The repodata filenames tried in order; the first one that exists
    /// wins.
    pub repodata_fns: Vec<String>,

    /// How long cached repodata stays fresh: `-1` respects the server's
    /// `max-age`, `0` always revalidates, any other value is a number of
    /// seconds.
    pub local_repodata_ttl: i64,

    /// Never touch the network; work from caches alone.
    pub offline: bool,

    /// Verify TLS certificates.
    pub ssl_verify: bool,

    /// Proxies, keyed by url scheme.
    pub proxy_servers: HashMap<String, String>,

    /// The default size of worker pools.
    pub default_threads: Option<usize>,

    /// The number of concurrent repodata fetches.
    pub repodata_threads: Option<usize>,

    /// The number of concurrent package verifications.
    pub verify_threads: Option<usize>,

    /// The number of concurrent link executions.
    pub execute_threads: Option<usize>,
}

impl Default for Context {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let root = home.join(".krait");

        Self {
            channels: vec!["defaults".to_owned()],
            channel_priority: ChannelPriority::default(),
            default_channels: vec![
                "https://repo.anaconda.com/pkgs/main".to_owned(),
                "https://repo.anaconda.com/pkgs/r".to_owned(),
            ],
            pkgs_dirs: vec![root.join(krait_cache::PACKAGE_CACHE_DIR)],
            envs_dirs: vec![root.join("envs")],
            platform: Platform::current(),
            pinned_packages: Vec::new(),
            aggressive_update_packages: ["ca-certificates", "certifi", "openssl"]
                .iter()
                .map(|name| {
                    MatchSpec::from_str(name, ParseStrictness::Strict)
                        .expect("the default aggressive update specs are valid")
                })
                .collect(),
            allow_softlinks: false,
            always_copy: false,
            path_conflict: PathConflict::default(),
            safety_checks: ValidationPolicy::default(),
            remote_max_retries: 3,
            remote_backoff_factor: 1.0,
            repodata_fns: vec!["repodata.json".to_owned()],
            local_repodata_ttl: -1,
            offline: false,
            ssl_verify: true,
            proxy_servers: HashMap::new(),
            default_threads: None,
            repodata_threads: None,
            verify_threads: None,
            execute_threads: None,
        }
    }
}

impl Context {
    /// Builds a context from the defaults plus the `CONDA_<KEY>` environment
    /// variable overrides.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies the `CONDA_<KEY>` environment variable overrides to this
    /// context.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(channels) = env_list("CONDA_CHANNELS") {
            self.channels = channels;
        }
        if let Some(value) = env_str("CONDA_CHANNEL_PRIORITY") {
            self.channel_priority = match value.as_str() {
                "strict" => ChannelPriority::Strict,
                "flexible" => ChannelPriority::Flexible,
                "disabled" => ChannelPriority::Disabled,
                other => {
                    tracing::warn!("ignoring invalid CONDA_CHANNEL_PRIORITY '{other}'");
                    self.channel_priority
                }
            };
        }
        if let Some(dirs) = env_list("CONDA_PKGS_DIRS") {
            self.pkgs_dirs = dirs.into_iter().map(PathBuf::from).collect();
        }
        if let Some(dirs) = env_list("CONDA_ENVS_DIRS") {
            self.envs_dirs = dirs.into_iter().map(PathBuf::from).collect();
        }
        if let Some(value) = env_str("CONDA_SUBDIR") {
            match value.parse() {
                Ok(platform) => self.platform = platform,
                Err(e) => tracing::warn!("ignoring invalid CONDA_SUBDIR: {e}"),
            }
        }
        if let Some(specs) = env_list("CONDA_PINNED_PACKAGES") {
            self.pinned_packages = parse_specs_or_warn(specs, "CONDA_PINNED_PACKAGES");
        }
        if let Some(specs) = env_list("CONDA_AGGRESSIVE_UPDATE_PACKAGES") {
            self.aggressive_update_packages =
                parse_specs_or_warn(specs, "CONDA_AGGRESSIVE_UPDATE_PACKAGES");
        }
        if let Some(value) = env_bool("CONDA_ALLOW_SOFTLINKS") {
            self.allow_softlinks = value;
        }
        if let Some(value) = env_bool("CONDA_ALWAYS_COPY") {
            self.always_copy = value;
        }
        if let Some(value) = env_str("CONDA_PATH_CONFLICT") {
            match value.parse() {
                Ok(policy) => self.path_conflict = policy,
                Err(e) => tracing::warn!("ignoring invalid CONDA_PATH_CONFLICT: {e}"),
            }
        }
        if let Some(value) = env_str("CONDA_SAFETY_CHECKS") {
            self.safety_checks = match value.as_str() {
                "enabled" => ValidationPolicy::Enabled,
                "warn" => ValidationPolicy::Warn,
                "disabled" => ValidationPolicy::Disabled,
                other => {
                    tracing::warn!("ignoring invalid CONDA_SAFETY_CHECKS '{other}'");
                    self.safety_checks
                }
            };
        }
        if let Some(value) = env_parse("CONDA_REMOTE_MAX_RETRIES") {
            self.remote_max_retries = value;
        }
        if let Some(value) = env_parse("CONDA_REMOTE_BACKOFF_FACTOR") {
            self.remote_backoff_factor = value;
        }
        if let Some(fns) = env_list("CONDA_REPODATA_FNS") {
            self.repodata_fns = fns;
        }
        if let Some(value) = env_parse("CONDA_LOCAL_REPODATA_TTL") {
            self.local_repodata_ttl = value;
        }
        if let Some(value) = env_bool("CONDA_OFFLINE") {
            self.offline = value;
        }
        if let Some(value) = env_bool("CONDA_SSL_VERIFY") {
            self.ssl_verify = value;
        }
        self
    }

    /// The channel configuration used when resolving channel names.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::default_with_root_dir(
            env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        )
    }

    /// Expands the `defaults` meta-channel and resolves all configured
    /// channels.
    pub fn resolved_channel_names(&self) -> Vec<String> {
        let mut resolved = Vec::new();
        for channel in &self.channels {
            if channel == "defaults" {
                resolved.extend(self.default_channels.iter().cloned());
            } else {
                resolved.push(channel.clone());
            }
        }
        resolved
    }

    /// The primary (first) package cache directory.
    pub fn primary_pkgs_dir(&self) -> &PathBuf {
        &self.pkgs_dirs[0]
    }

    /// The names from `aggressive_update_packages`, for the solver.
    pub fn aggressive_update_names(&self) -> Vec<krait_conda_types::PackageName> {
        self.aggressive_update_packages
            .iter()
            .filter_map(|spec| spec.name.clone())
            .collect()
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_str(key).map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    })
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|value| {
        matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|value| match value.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring unparsable value for {key}");
            None
        }
    })
}

fn parse_specs_or_warn(specs: Vec<String>, key: &str) -> Vec<MatchSpec> {
    specs
        .into_iter()
        .filter_map(|spec| match MatchSpec::from_str(&spec, ParseStrictness::Lenient) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!("ignoring invalid spec '{spec}' in {key}: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let context = Context::default();
        assert_eq!(context.remote_max_retries, 3);
        assert_eq!(context.local_repodata_ttl, -1);
        assert!(!context.allow_softlinks);
        assert!(!context.always_copy);
        assert_eq!(context.repodata_fns, vec!["repodata.json".to_owned()]);
        assert_eq!(context.aggressive_update_names().len(), 3);
    }

    #[test]
    fn env_overrides() {
        std::env::set_var("CONDA_REMOTE_MAX_RETRIES", "7");
        std::env::set_var("CONDA_OFFLINE", "true");
        std::env::set_var("CONDA_CHANNELS", "conda-forge, bioconda");
        let context = Context::from_env();
        std::env::remove_var("CONDA_REMOTE_MAX_RETRIES");
        std::env::remove_var("CONDA_OFFLINE");
        std::env::remove_var("CONDA_CHANNELS");

        assert_eq!(context.remote_max_retries, 7);
        assert!(context.offline);
        assert_eq!(
            context.channels,
            vec!["conda-forge".to_owned(), "bioconda".to_owned()]
        );
    }

    #[test]
    fn defaults_meta_channel_expansion() {
        let context = Context::default();
        let resolved = context.resolved_channel_names();
        assert!(resolved[0].contains("repo.anaconda.com"));
    }
}
