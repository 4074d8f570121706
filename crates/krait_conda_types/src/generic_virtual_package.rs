use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{PackageName, Version};

/// A virtual package: a capability of the host system (like `__glibc` or
/// `__cuda`) presented to the solver as an installed package. Virtual
/// packages are injected into the index but never linked.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GenericVirtualPackage {
    /// The name of the virtual package, always starting with `__`.
    pub name: PackageName,

    /// The version of the capability.
    pub version: Version,

    /// The build string of the virtual package.
    pub build_string: String,
}

impl Display for GenericVirtualPackage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}={}={}",
            &self.name.as_normalized(),
            &self.version,
            &self.build_string
        )
    }
}
