use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A console script entry point of a noarch python package, parsed from the
/// `command = module:function` syntax used in `info/link.json`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct EntryPoint {
    /// The name of the executable to generate.
    pub command: String,

    /// The python module that holds the function.
    pub module: String,

    /// The function to invoke.
    pub function: String,
}

/// Returned when an entry point string is malformed.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[error("'{0}' is not a valid entry point, expected 'command = module:function'")]
pub struct ParseEntryPointError(pub String);

impl FromStr for EntryPoint {
    type Err = ParseEntryPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, import) = s
            .split_once('=')
            .ok_or_else(|| ParseEntryPointError(s.to_owned()))?;
        let (module, function) = import
            .split_once(':')
            .ok_or_else(|| ParseEntryPointError(s.to_owned()))?;

        let command = command.trim();
        let module = module.trim();
        let function = function.trim();
        if command.is_empty() || module.is_empty() || function.is_empty() {
            return Err(ParseEntryPointError(s.to_owned()));
        }

        Ok(Self {
            command: command.to_owned(),
            module: module.to_owned(),
            function: function.to_owned(),
        })
    }
}

impl Serialize for EntryPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!(
            "{} = {}:{}",
            self.command, self.module, self.function
        ))
    }
}

impl<'de> Deserialize<'de> for EntryPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::EntryPoint;
    use std::str::FromStr;

    #[test]
    fn parse() {
        let entry_point = EntryPoint::from_str("jupyter-lab = jupyterlab.labapp:main").unwrap();
        assert_eq!(entry_point.command, "jupyter-lab");
        assert_eq!(entry_point.module, "jupyterlab.labapp");
        assert_eq!(entry_point.function, "main");

        assert!(EntryPoint::from_str("no-equals-sign").is_err());
        assert!(EntryPoint::from_str("cmd = no-colon").is_err());
    }
}
