//! Channels: named, ordered sources of packages.

use std::{
    borrow::Cow,
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    utils::{path::is_path, url::parse_scheme},
    ParsePlatformError, Platform,
};

const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// Everything needed to resolve a simple channel name (`conda-forge`) to the
/// url where its packages live.
#[derive(Debug, Clone, Serialize, Deserialize, Hash, Eq, PartialEq)]
pub struct ChannelConfig {
    /// The url prefixed to channel names that are not urls themselves. By
    /// default this is `https://conda.anaconda.org`, so the channel name
    /// `conda-forge` refers to `https://conda.anaconda.org/conda-forge`.
    pub channel_alias: Url,

    /// The directory against which relative-path channels are resolved.
    pub root_dir: PathBuf,
}

impl ChannelConfig {
    /// Creates a config with the default channel alias and the given root
    /// directory.
    pub fn default_with_root_dir(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            channel_alias: Url::parse(DEFAULT_CHANNEL_ALIAS)
                .expect("could not parse default channel alias"),
        }
    }
}

/// A channel: a base url under which one directory per subdir holds the
/// packages and the repodata index.
#[derive(Debug, Clone, Serialize, Eq, PartialEq, Hash)]
pub struct Channel {
    /// Platforms explicitly selected for this channel (the `[linux-64]`
    /// suffix syntax), or `None` to use the defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<Platform>>,

    /// The base url of the channel. Always ends in a `/`.
    pub base_url: Url,

    /// The name of the channel, when it has one.
    pub name: Option<String>,
}

impl Channel {
    /// Parses a channel from a string: a url, a filesystem path, or a plain
    /// name resolved against the channel alias. An optional platform list may
    /// be appended in square brackets (`conda-forge[linux-64,noarch]`).
    pub fn from_str(
        str: impl AsRef<str>,
        config: &ChannelConfig,
    ) -> Result<Self, ParseChannelError> {
        let str = str.as_ref();
        let (platforms, channel) = parse_platforms(str)?;

        let channel = if parse_scheme(channel).is_some() {
            let url = Url::parse(channel).map_err(ParseChannelError::ParseUrlError)?;
            Channel {
                platforms,
                ..Channel::from_url(url)
            }
        } else if is_path(channel) {
            let path = Path::new(channel);
            let absolute_path = if path.is_absolute() {
                Cow::Borrowed(path)
            } else {
                Cow::Owned(config.root_dir.join(path))
            };
            let url = Url::from_directory_path(absolute_path.as_ref())
                .map_err(|()| ParseChannelError::InvalidPath(channel.to_owned()))?;
            Self {
                platforms,
                base_url: url,
                name: Some(channel.to_owned()),
            }
        } else {
            Channel {
                platforms,
                ..Channel::from_name(channel, config)
            }
        };

        Ok(channel)
    }

    /// Constructs a channel directly from a base url.
    pub fn from_url(url: Url) -> Self {
        let path = url.path().trim_end_matches('/');

        // The base url must end in a `/` for subdir joining to work.
        let base_url = if url.path().ends_with('/') {
            url.clone()
        } else {
            let mut url = url.clone();
            url.set_path(&format!("{path}/"));
            url
        };

        let name = if base_url.has_host() {
            path.trim_start_matches('/')
        } else {
            path.rsplit_once('/')
                .map_or(path, |(_, path_part)| path_part)
        };

        Self {
            platforms: None,
            name: (!name.is_empty()).then(|| name.to_owned()),
            base_url,
        }
    }

    /// Constructs a channel from a plain name using the alias from the
    /// config.
    pub fn from_name(name: &str, config: &ChannelConfig) -> Self {
        let dir_name = if name.ends_with('/') {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(format!("{name}/"))
        };

        let name = name.trim_end_matches('/');
        Self {
            platforms: None,
            base_url: config
                .channel_alias
                .join(dir_name.as_ref())
                .expect("name is not a valid url fragment"),
            name: (!name.is_empty()).then(|| name.to_owned()),
        }
    }

    /// Constructs a channel from a local directory.
    pub fn from_directory(path: &Path) -> Self {
        let url = Url::from_directory_path(path).expect("path is not absolute");
        Self {
            platforms: None,
            base_url: url,
            name: None,
        }
    }

    /// Returns the name of the channel, falling back to the base url for
    /// channels that do not have one.
    pub fn name(&self) -> &str {
        match self.base_url.scheme() {
            "https" | "http" => self
                .name
                .as_deref()
                .unwrap_or_else(|| self.base_url.as_str()),
            _ => self.base_url.as_str(),
        }
    }

    /// The base url of the channel, without any subdir.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The url of a specific subdir of this channel.
    pub fn platform_url(&self, platform: Platform) -> Url {
        self.base_url
            // The trailing slash is significant, it marks a directory.
            .join(&format!("{}/", platform.as_str()))
            .expect("platform is a valid url fragment")
    }

    /// The urls of all subdirs this channel serves for the given target
    /// platform: the platform itself plus `noarch`.
    pub fn platforms_url(&self, platform: Platform) -> Vec<(Platform, Url)> {
        self.platforms_or_default(platform)
            .iter()
            .map(|&platform| (platform, self.platform_url(platform)))
            .collect()
    }

    /// The platforms explicitly configured for this channel, or the given
    /// platform plus `noarch`.
    pub fn platforms_or_default(&self, platform: Platform) -> Vec<Platform> {
        match &self.platforms {
            Some(platforms) => platforms.clone(),
            None => vec![platform, Platform::NoArch],
        }
    }

    /// The canonical name of this channel: its full base url.
    pub fn canonical_name(&self) -> String {
        self.base_url.to_string()
    }
}

/// Returned when a channel string cannot be parsed.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ParseChannelError {
    #[error("could not parse the platforms")]
    ParsePlatformError(#[source] ParsePlatformError),

    #[error("could not parse url")]
    ParseUrlError(#[source] url::ParseError),

    #[error("invalid path '{0}'")]
    InvalidPath(String),
}

impl From<ParsePlatformError> for ParseChannelError {
    fn from(err: ParsePlatformError) -> Self {
        ParseChannelError::ParsePlatformError(err)
    }
}

/// Splits an optional `[linux-64,noarch]` suffix off a channel string.
fn parse_platforms(channel: &str) -> Result<(Option<Vec<Platform>>, &str), ParsePlatformError> {
    if channel.rfind(']').is_some() {
        if let Some(start_platform_idx) = channel.find('[') {
            let platform_part = &channel[start_platform_idx + 1..channel.len() - 1];
            let platforms = platform_part
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect::<Result<Vec<_>, _>>()?;
            let channel = &channel[..start_platform_idx];
            return Ok(((!platforms.is_empty()).then_some(platforms), channel));
        }
    }

    Ok((None, channel))
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn config() -> ChannelConfig {
        ChannelConfig::default_with_root_dir(PathBuf::from("/tmp"))
    }

    #[test]
    fn from_name() {
        let channel = Channel::from_str("conda-forge", &config()).unwrap();
        assert_eq!(channel.name(), "conda-forge");
        assert_eq!(
            channel.base_url().as_str(),
            "https://conda.anaconda.org/conda-forge/"
        );
    }

    #[test]
    fn from_url() {
        let channel =
            Channel::from_str("https://my.server.org/channels/custom", &config()).unwrap();
        assert_eq!(channel.name.as_deref(), Some("channels/custom"));
        assert_eq!(
            channel.base_url().as_str(),
            "https://my.server.org/channels/custom/"
        );
    }

    #[test]
    fn from_path() {
        let channel = Channel::from_str("/opt/local-channel", &config()).unwrap();
        assert_eq!(channel.base_url().scheme(), "file");
    }

    #[test]
    fn platform_suffix() {
        let channel = Channel::from_str("conda-forge[linux-64,noarch]", &config()).unwrap();
        assert_eq!(
            channel.platforms,
            Some(vec![Platform::Linux64, Platform::NoArch])
        );
        assert_eq!(channel.name(), "conda-forge");
    }

    #[test]
    fn platform_urls() {
        let channel = Channel::from_str("conda-forge", &config()).unwrap();
        let urls = channel.platforms_url(Platform::Linux64);
        assert_eq!(urls.len(), 2);
        assert_eq!(
            urls[0].1.as_str(),
            "https://conda.anaconda.org/conda-forge/linux-64/"
        );
        assert_eq!(
            urls[1].1.as_str(),
            "https://conda.anaconda.org/conda-forge/noarch/"
        );
    }
}
