pub(crate) mod path;
pub(crate) mod serde;
pub(crate) mod url;
