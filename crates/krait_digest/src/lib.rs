#![deny(missing_docs)]

//! Checksum plumbing used throughout the krait crates.
//!
//! Conda metadata identifies packages and files by MD5 and SHA256 digests, and
//! the repodata cache uses a Blake2b content hash. This crate wraps the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) implementations
//! behind a handful of helpers so the rest of the workspace does not need to
//! deal with the `digest` traits directly:
//!
//! - [`digest_file`] / [`digest_bytes`] compute a digest in one call.
//! - [`digest_from_hex`] parses the hex form found in repodata and ledgers.
//! - [`HashingReader`] and [`HashingWriter`] compute a digest as a side effect
//!   of streaming data, which is how downloads and placeholder rewrites keep
//!   track of what they produced.

#[cfg(feature = "serde")]
pub mod serde;

pub use digest;
pub use md5::Md5;
pub use sha2::Sha256;

use blake2::{digest::consts::U32, Blake2b};
use digest::{Digest, Output};
use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

/// The output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// The output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// A Blake2b digest truncated to 256 bits.
pub type Blake2b256 = Blake2b<U32>;

/// The output of a [`Blake2b256`] hash.
pub type Blake2b256Hash = blake2::digest::Output<Blake2b256>;

/// Computes the digest of the file at the given path by streaming its
/// contents through the hasher.
pub fn digest_file<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Computes the digest of a byte slice.
pub fn digest_bytes<D: Digest + Default>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses the hex representation of a digest. Returns `None` if the string is
/// not valid hex or has the wrong length for `D`.
pub fn digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    hex::decode_to_slice(str, &mut hash).ok().map(|()| hash)
}

/// A writer that forwards everything to an inner writer while feeding the same
/// bytes to a hasher. Call [`HashingWriter::finalize`] to get the inner writer
/// back together with the digest of everything written.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Wraps the given writer with an empty hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: D::default(),
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Returns the wrapped writer and the digest of all bytes written.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// The reading counterpart of [`HashingWriter`].
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest + Default> HashingReader<R, D> {
    /// Wraps the given reader with an empty hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: D::default(),
        }
    }
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Returns the wrapped reader and the digest of all bytes read.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.reader.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use std::io::Read;

    #[rstest]
    #[case(
        "1234567890",
        "c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646"
    )]
    #[case(
        "Hello, world!",
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    )]
    fn file_digest(#[case] contents: &str, #[case] expected: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        std::fs::write(&path, contents).unwrap();
        let hash = digest_file::<Sha256>(&path).unwrap();
        assert_eq!(format!("{hash:x}"), expected);
    }

    #[test]
    fn hashing_reader() {
        let input = "Hello, world!";
        let mut reader = HashingReader::<_, Sha256>::new(std::io::Cursor::new(input));
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, input);
        let (_, hash) = reader.finalize();
        assert_eq!(
            format!("{hash:x}"),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }

    #[test]
    fn hex_round_trip() {
        let hex = "c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646";
        let hash = digest_from_hex::<Sha256>(hex).unwrap();
        assert_eq!(format!("{hash:x}"), hex);
        assert!(digest_from_hex::<Sha256>("deadbeef").is_none());
        assert!(digest_from_hex::<Md5>("not-hex").is_none());
    }
}
