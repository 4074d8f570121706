//! Materializing a single file from the package cache into a prefix. See
//! [`link_file`].

use std::{
    borrow::Cow,
    fmt,
    fmt::Formatter,
    io::{ErrorKind, Read, Seek, Write},
    path::{Path, PathBuf},
};

use krait_conda_types::{
    package::{FileMode, PathType, PathsEntry},
    NoArchType, Platform,
};
use krait_digest::{HashingWriter, Sha256, Sha256Hash};
use memmap2::Mmap;

use super::python::PythonInfo;

/// How a file was materialized into the prefix.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LinkMethod {
    /// A hard link to the file in the package cache. Cheap, but shares the
    /// inode with the cache.
    Hardlink,

    /// A symbolic link.
    Softlink,

    /// A full copy.
    Copy,

    /// A copy whose prefix placeholder was rewritten.
    Patched(FileMode),
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinkMethod::Hardlink => write!(f, "hardlink"),
            LinkMethod::Softlink => write!(f, "softlink"),
            LinkMethod::Copy => write!(f, "copy"),
            LinkMethod::Patched(FileMode::Binary) => write!(f, "binary patched"),
            LinkMethod::Patched(FileMode::Text) => write!(f, "text patched"),
        }
    }
}

/// Returned when a file cannot be linked.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum LinkFileError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("failed to create parent directory")]
    FailedToCreateParentDirectory(#[source] std::io::Error),

    #[error("could not open source file for reading")]
    FailedToOpenSourceFile(#[source] std::io::Error),

    #[error("could not read source file metadata")]
    FailedToReadSourceFileMetadata(#[source] std::io::Error),

    #[error("could not open destination file for writing")]
    FailedToOpenDestinationFile(#[source] std::io::Error),

    #[error("could not update destination file permissions")]
    FailedToUpdateDestinationFilePermissions(#[source] std::io::Error),

    #[error("could not read the contents of a symlink")]
    FailedToReadSymlink(#[source] std::io::Error),

    #[error("failed to {0} file to destination")]
    FailedToLink(LinkMethod, #[source] std::io::Error),

    #[error("cannot install a noarch python file without a python interpreter in the prefix")]
    MissingPythonInfo,
}

/// The result of linking one file.
pub struct LinkedFile {
    /// True when an existing file was overwritten.
    pub clobbered: bool,

    /// The SHA256 of the file as it exists in the prefix.
    pub sha256: Sha256Hash,

    /// The size of the file in the prefix.
    pub file_size: u64,

    /// The prefix-relative path of the installed file. Differs from the
    /// entry's path for noarch python payloads.
    pub relative_path: PathBuf,

    /// How the file was materialized.
    pub method: LinkMethod,
}

/// Materializes one file described by a `paths.json` entry from the package
/// directory into the target prefix.
///
/// Files with a prefix placeholder are always copied, with the placeholder
/// rewritten: textually for text files, null-padded within the enclosing C
/// string for binaries. Other files are hard-linked when allowed and
/// possible, then soft-linked, then copied.
#[allow(clippy::too_many_arguments)]
pub fn link_file(
    noarch_type: NoArchType,
    path_json_entry: &PathsEntry,
    package_dir: &Path,
    target_dir: &Path,
    target_prefix: &str,
    allow_symbolic_links: bool,
    allow_hard_links: bool,
    target_platform: Platform,
    target_python: Option<&PythonInfo>,
) -> Result<LinkedFile, LinkFileError> {
    let source_path = package_dir.join(&path_json_entry.relative_path);

    // Noarch python payloads are remapped into the interpreter's directories.
    let destination_relative_path = if noarch_type.is_python() {
        match target_python {
            Some(python_info) => {
                python_info.get_python_noarch_target_path(&path_json_entry.relative_path)
            }
            None => return Err(LinkFileError::MissingPythonInfo),
        }
    } else {
        Cow::Borrowed(path_json_entry.relative_path.as_path())
    };
    let destination_path = target_dir.join(destination_relative_path.as_ref());

    if let Some(parent) = destination_path.parent() {
        std::fs::create_dir_all(parent).map_err(LinkFileError::FailedToCreateParentDirectory)?;
    }

    // An existing file at the destination means the file is clobbered by
    // another package; the caller decides what to do about that.
    let clobbered = destination_path.is_file();

    let mut sha256 = None;
    let mut file_size = path_json_entry.size_in_bytes;

    let link_method = if let Some(placeholder) = path_json_entry.prefix_placeholder.as_deref() {
        let file_mode = path_json_entry.file_mode.unwrap_or(FileMode::Text);
        let source = map_or_read_source_file(&source_path)?;

        let destination = std::fs::File::create(&destination_path)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?;
        let mut destination_writer = HashingWriter::<_, Sha256>::new(destination);

        // Backslashes in the replacement would be interpreted as escape
        // characters in many of the patched files, so the windows prefix is
        // written with forward slashes.
        let target_prefix = if target_platform.is_windows() {
            Cow::Owned(target_prefix.replace('\\', "/"))
        } else {
            Cow::Borrowed(target_prefix)
        };

        match file_mode {
            FileMode::Text => {
                // Text files are patched in memory so an overlong shebang
                // produced by the replacement can still be fixed up.
                let mut patched = Vec::with_capacity(source.as_ref().len());
                copy_and_replace_textual_placeholder(
                    source.as_ref(),
                    &mut patched,
                    placeholder,
                    &target_prefix,
                )?;
                let patched = replace_long_shebang(patched);
                destination_writer.write_all(&patched)?;
            }
            FileMode::Binary => {
                copy_and_replace_cstring_placeholder(
                    source.as_ref(),
                    &mut destination_writer,
                    placeholder,
                    &target_prefix,
                )?;
            }
        }

        let (mut file, current_hash) = destination_writer.finalize();
        sha256 = Some(current_hash);
        file_size = file.stream_position().ok();
        drop(file);

        // The patched copy keeps the permissions of the original.
        let metadata = std::fs::symlink_metadata(&source_path)
            .map_err(LinkFileError::FailedToReadSourceFileMetadata)?;
        std::fs::set_permissions(&destination_path, metadata.permissions())
            .map_err(LinkFileError::FailedToUpdateDestinationFilePermissions)?;

        LinkMethod::Patched(file_mode)
    } else if path_json_entry.path_type == PathType::HardLink && allow_hard_links {
        match materialize(&destination_path, LinkMethod::Hardlink, || {
            std::fs::hard_link(&source_path, &destination_path)
        }) {
            Ok(()) => LinkMethod::Hardlink,
            // Hard links do not work across filesystems; fall through to the
            // configured alternatives, pointing a symlink at the cached file
            // when that is allowed.
            Err(_) if allow_symbolic_links => {
                materialize(&destination_path, LinkMethod::Softlink, || {
                    symlink(&source_path, &destination_path)
                })?;
                LinkMethod::Softlink
            }
            Err(_) => {
                materialize(&destination_path, LinkMethod::Copy, || {
                    std::fs::copy(&source_path, &destination_path).map(|_| ())
                })?;
                LinkMethod::Copy
            }
        }
    } else if path_json_entry.path_type == PathType::SoftLink && allow_symbolic_links {
        // Re-create the packaged symlink: the installed link points at the
        // same target as the one in the cache.
        let link_target = source_path
            .read_link()
            .map_err(LinkFileError::FailedToReadSymlink)?;
        materialize(&destination_path, LinkMethod::Softlink, || {
            symlink(&link_target, &destination_path)
        })?;
        LinkMethod::Softlink
    } else {
        materialize(&destination_path, LinkMethod::Copy, || {
            std::fs::copy(&source_path, &destination_path).map(|_| ())
        })?;
        LinkMethod::Copy
    };

    let sha256 = match (sha256, path_json_entry.sha256) {
        (Some(sha256), _) => sha256,
        (None, Some(sha256)) => sha256,
        (None, None) => krait_digest::digest_file::<Sha256>(&destination_path)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?,
    };

    let file_size = match file_size {
        Some(size) => size,
        None => std::fs::symlink_metadata(&destination_path)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?
            .len(),
    };

    Ok(LinkedFile {
        clobbered,
        sha256,
        file_size,
        relative_path: destination_relative_path.into_owned(),
        method: link_method,
    })
}

/// Either a memory mapped file or its contents read into memory.
enum MmapOrBytes {
    Mmap(Mmap),
    Bytes(Vec<u8>),
}

impl AsRef<[u8]> for MmapOrBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            MmapOrBytes::Mmap(mmap) => mmap.as_ref(),
            MmapOrBytes::Bytes(bytes) => bytes.as_slice(),
        }
    }
}

/// Memory maps the file at the given location, falling back to reading it
/// when mapping fails (some filesystems refuse mmap).
fn map_or_read_source_file(source_path: &Path) -> Result<MmapOrBytes, LinkFileError> {
    let mut file =
        std::fs::File::open(source_path).map_err(LinkFileError::FailedToOpenSourceFile)?;

    let mmap = unsafe { Mmap::map(&file) };

    Ok(match mmap {
        Ok(memory) => MmapOrBytes::Mmap(memory),
        Err(err) => {
            tracing::warn!(
                "failed to memory map {}: {err}, reading the file instead",
                source_path.display()
            );
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)
                .map_err(LinkFileError::FailedToOpenSourceFile)?;
            MmapOrBytes::Bytes(bytes)
        }
    })
}

/// Runs a filesystem operation that creates the destination, clearing a
/// leftover file and retrying once when the operation reports the
/// destination as already existing. All link types share this replace
/// behavior; only the creating operation differs.
fn materialize(
    destination: &Path,
    method: LinkMethod,
    operation: impl Fn() -> std::io::Result<()>,
) -> Result<(), LinkFileError> {
    match operation() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            fs_err::remove_file(destination)?;
            operation().map_err(|e| LinkFileError::FailedToLink(method, e))
        }
        Err(e) => Err(LinkFileError::FailedToLink(method, e)),
    }
}

/// Copies `source_bytes` to `destination`, replacing the placeholder prefix
/// with the target prefix according to the file mode.
pub fn copy_and_replace_placeholders(
    source_bytes: &[u8],
    destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
    file_mode: FileMode,
) -> Result<(), std::io::Error> {
    match file_mode {
        FileMode::Text => copy_and_replace_textual_placeholder(
            source_bytes,
            destination,
            prefix_placeholder,
            target_prefix,
        ),
        FileMode::Binary => copy_and_replace_cstring_placeholder(
            source_bytes,
            destination,
            prefix_placeholder,
            target_prefix,
        ),
    }
}

/// Replaces every occurrence of the placeholder with the target prefix. The
/// length of the file may change; this is only valid for text files.
pub fn copy_and_replace_textual_placeholder(
    source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let placeholder = prefix_placeholder.as_bytes();

    // Walk the occurrences with a cursor over everything not yet written.
    let mut unwritten = 0;
    for occurrence in memchr::memmem::find_iter(source_bytes, placeholder) {
        destination.write_all(&source_bytes[unwritten..occurrence])?;
        destination.write_all(target_prefix.as_bytes())?;
        unwritten = occurrence + placeholder.len();
    }

    destination.write_all(&source_bytes[unwritten..])
}

/// Replaces the placeholder inside null-terminated strings, truncating or
/// null-padding the rewritten string so the byte length of every string (and
/// of the whole file) is preserved. This is the only safe replacement for
/// binaries.
pub fn copy_and_replace_cstring_placeholder(
    source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let placeholder = prefix_placeholder.as_bytes();

    let mut unwritten = 0;
    let mut rewritten = Vec::new();
    for occurrence in memchr::memmem::find_iter(source_bytes, placeholder) {
        // Hits within a string that was already rewritten are consumed with
        // it.
        if occurrence < unwritten {
            continue;
        }

        // The rewrite is confined to the enclosing null-terminated string so
        // that the layout of the binary stays intact.
        let string_end = memchr::memchr(b'\0', &source_bytes[occurrence..])
            .map_or(source_bytes.len(), |nul| occurrence + nul);

        // Assemble the whole rewritten string in one buffer: the new prefix
        // followed by the original tail, then force it back to the original
        // byte length. `resize` both truncates an overlong result and
        // null-pads a short one.
        rewritten.clear();
        rewritten.extend_from_slice(target_prefix.as_bytes());
        rewritten.extend_from_slice(&source_bytes[occurrence + placeholder.len()..string_end]);
        rewritten.resize(string_end - occurrence, b'\0');

        destination.write_all(&source_bytes[unwritten..occurrence])?;
        destination.write_all(&rewritten)?;
        unwritten = string_end;
    }

    destination.write_all(&source_bytes[unwritten..])
}

/// The kernel only honors the first 127 bytes of a shebang line. When a
/// rewritten prefix pushes an interpreter shebang past that limit, the
/// interpreter is resolved through `/usr/bin/env` by its file name instead.
pub fn replace_long_shebang(contents: Vec<u8>) -> Vec<u8> {
    const SHEBANG_LIMIT: usize = 127;

    if !contents.starts_with(b"#!") {
        return contents;
    }

    let line_end = memchr::memchr(b'\n', &contents).unwrap_or(contents.len());
    if line_end <= SHEBANG_LIMIT {
        return contents;
    }

    let Ok(line) = std::str::from_utf8(&contents[..line_end]) else {
        return contents;
    };

    // The interpreter is the first token; anything after it are arguments
    // which `/usr/bin/env` cannot forward portably, so those lines are left
    // alone.
    let interpreter_path = line[2..].trim();
    if interpreter_path.contains(char::is_whitespace) {
        return contents;
    }
    let Some(interpreter) = interpreter_path.rsplit('/').next() else {
        return contents;
    };

    let mut result = format!("#!/usr/bin/env {interpreter}").into_bytes();
    result.extend_from_slice(&contents[line_end..]);
    result
}

fn symlink(source_path: &Path, destination_path: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    return std::os::windows::fs::symlink_file(source_path, destination_path);
    #[cfg(unix)]
    return std::os::unix::fs::symlink(source_path, destination_path);
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case(
        "/opt/anaconda1anaconda2anaconda3/bin/python",
        "/opt/anaconda1anaconda2anaconda3",
        "/home/u/envs/x",
        "/home/u/envs/x/bin/python"
    )]
    #[case("no placeholder here", "/opt/placeholder", "/target", "no placeholder here")]
    #[case(
        "twice /p/x and /p/y",
        "/p",
        "/q",
        "twice /q/x and /q/y"
    )]
    fn textual_replacement(
        #[case] input: &str,
        #[case] placeholder: &str,
        #[case] target_prefix: &str,
        #[case] expected: &str,
    ) {
        let mut output = Cursor::new(Vec::new());
        super::copy_and_replace_textual_placeholder(
            input.as_bytes(),
            &mut output,
            placeholder,
            target_prefix,
        )
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.into_inner()), expected);
    }

    #[test]
    fn long_shebangs_are_rewritten() {
        let short = b"#!/opt/env/bin/python\nprint()\n".to_vec();
        assert_eq!(super::replace_long_shebang(short.clone()), short);

        let long_prefix = "p".repeat(150);
        let long = format!("#!/{long_prefix}/bin/python3.11\nprint()\n").into_bytes();
        assert_eq!(
            super::replace_long_shebang(long),
            b"#!/usr/bin/env python3.11\nprint()\n".to_vec()
        );

        let not_a_script = b"just some text".to_vec();
        assert_eq!(
            super::replace_long_shebang(not_a_script.clone()),
            not_a_script
        );
    }

    #[rstest]
    #[case(
        b"12345/placeholder/lib\x006789",
        "/placeholder",
        "/t",
        b"12345/t/lib\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x006789"
    )]
    #[case(b"short\x00", "short", "verylong", b"veryl\x00")]
    #[case(b"short1234\x00", "short", "verylong", b"verylong1\x00")]
    fn binary_replacement(
        #[case] input: &[u8],
        #[case] placeholder: &str,
        #[case] target_prefix: &str,
        #[case] expected: &[u8],
    ) {
        assert_eq!(
            expected.len(),
            input.len(),
            "the replacement must preserve the total length"
        );
        let mut output = Cursor::new(Vec::new());
        super::copy_and_replace_cstring_placeholder(
            input,
            &mut output,
            placeholder,
            target_prefix,
        )
        .unwrap();
        assert_eq!(output.into_inner(), expected);
    }
}
