use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The exact form in which the `noarch` field of a record was specified.
///
/// Old-style repodata used a boolean, new-style repodata uses the strings
/// `"generic"` and `"python"`. The distinction only matters for byte-faithful
/// round-tripping; use [`NoArchType`] and [`NoArchKind`] for everything else.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RawNoArchType {
    /// Old-format generic noarch (`noarch: true`).
    GenericV1,

    /// New-format generic noarch (`noarch: generic`).
    GenericV2,

    /// A noarch python package.
    Python,
}

/// Describes whether (and how) a package is independent of the target
/// architecture.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct NoArchType(pub Option<RawNoArchType>);

/// The two kinds of noarch packages.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum NoArchKind {
    /// A python package whose `site-packages` payload is remapped at install
    /// time and whose `.pyc` files are compiled on the target machine.
    Python,

    /// An architecture independent payload installed as-is.
    Generic,
}

impl NoArchType {
    /// Returns the kind of noarch or `None` for arch-specific packages.
    pub fn kind(&self) -> Option<NoArchKind> {
        match self.0 {
            None => None,
            Some(RawNoArchType::GenericV1 | RawNoArchType::GenericV2) => Some(NoArchKind::Generic),
            Some(RawNoArchType::Python) => Some(NoArchKind::Python),
        }
    }

    /// True if this is not a noarch package.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// True for noarch python packages.
    pub fn is_python(&self) -> bool {
        self.kind() == Some(NoArchKind::Python)
    }

    /// True for generic noarch packages.
    pub fn is_generic(&self) -> bool {
        self.kind() == Some(NoArchKind::Generic)
    }

    /// A noarch python instance.
    pub fn python() -> Self {
        Self(Some(RawNoArchType::Python))
    }

    /// A generic noarch instance.
    pub fn generic() -> Self {
        Self(Some(RawNoArchType::GenericV2))
    }

    /// An arch-specific instance.
    pub fn none() -> Self {
        Self(None)
    }
}

impl From<Option<NoArchKind>> for NoArchType {
    fn from(kind: Option<NoArchKind>) -> Self {
        NoArchType(kind.map(|kind| match kind {
            NoArchKind::Python => RawNoArchType::Python,
            NoArchKind::Generic => RawNoArchType::GenericV2,
        }))
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Clone, Debug, Deserialize)]
        #[serde(untagged)]
        enum NoArchSerde {
            OldFormat(bool),
            NewFormat(NoArchKindSerde),
        }

        #[derive(Clone, Debug, Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum NoArchKindSerde {
            Python,
            Generic,
        }

        let value = Option::<NoArchSerde>::deserialize(deserializer)?;
        Ok(NoArchType(value.and_then(|value| match value {
            NoArchSerde::OldFormat(true) => Some(RawNoArchType::GenericV1),
            NoArchSerde::OldFormat(false) => None,
            NoArchSerde::NewFormat(NoArchKindSerde::Python) => Some(RawNoArchType::Python),
            NoArchSerde::NewFormat(NoArchKindSerde::Generic) => Some(RawNoArchType::GenericV2),
        })))
    }
}

impl Serialize for NoArchType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            None => false.serialize(serializer),
            Some(RawNoArchType::GenericV1) => true.serialize(serializer),
            Some(RawNoArchType::GenericV2) => "generic".serialize(serializer),
            Some(RawNoArchType::Python) => "python".serialize(serializer),
        }
    }
}
