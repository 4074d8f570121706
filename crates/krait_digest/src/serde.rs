//! Serde adapters for digests.
//!
//! Digests appear in JSON as lowercase hex strings. The [`SerializableHash`]
//! type implements `serde_with`'s `SerializeAs`/`DeserializeAs` so record
//! structs can annotate digest fields with
//! `#[serde_as(as = "Option<SerializableHash<Sha256>>")]`.

use digest::{Digest, Output};
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};
use std::{borrow::Cow, fmt::LowerHex, marker::PhantomData};

/// Deserializes the output of a digest from its hex string form.
pub fn deserialize<'de, D, Dig: Digest>(deserializer: D) -> Result<Output<Dig>, D::Error>
where
    D: Deserializer<'de>,
{
    let str = Cow::<'de, str>::deserialize(deserializer)?;
    super::digest_from_hex::<Dig>(str.as_ref())
        .ok_or_else(|| Error::custom("failed to parse hex digest"))
}

/// Serializes the output of a digest as a lowercase hex string.
pub fn serialize<'a, S: Serializer, Dig: Digest>(
    digest: &'a Output<Dig>,
    s: S,
) -> Result<S::Ok, S::Error>
where
    &'a Output<Dig>: LowerHex,
{
    format!("{digest:x}").serialize(s)
}

/// Marker type to (de)serialize a digest output through `serde_with`.
pub struct SerializableHash<T: Digest>(PhantomData<T>);

impl<T: Digest> SerializeAs<Output<T>> for SerializableHash<T>
where
    for<'a> &'a Output<T>: LowerHex,
{
    fn serialize_as<S>(source: &Output<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize::<S, T>(source, serializer)
    }
}

impl<'de, T: Digest + Default> DeserializeAs<'de, Output<T>> for SerializableHash<T> {
    fn deserialize_as<D>(deserializer: D) -> Result<Output<T>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize::<D, T>(deserializer)
    }
}

#[cfg(test)]
mod test {
    use serde_with::serde_as;

    #[serde_as]
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Record {
        #[serde_as(as = "Option<super::SerializableHash<sha2::Sha256>>")]
        sha256: Option<crate::Sha256Hash>,
    }

    #[test]
    fn hex_round_trip() {
        let json = r#"{"sha256":"fe51de6107f9edc7aa4f786a70f4a883943bc9d39b3bb7307c04c41410990726"}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&record).unwrap(), json);
    }
}
