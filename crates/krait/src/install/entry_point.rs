//! Generation of console-script entry points for noarch python packages.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use krait_conda_types::{
    package::EntryPoint,
    prefix_record::{PathType, PathsEntry},
};
use krait_digest::{HashingWriter, Sha256};

use super::python::PythonInfo;

/// Creates the entry point for one console script on unix: an executable
/// python script in the prefix's `bin` directory.
pub fn create_unix_python_entry_point(
    target_dir: &Path,
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> Result<PathsEntry, std::io::Error> {
    let relative_path = python_info.bin_dir.join(&entry_point.command);

    let script_path = target_dir.join(&relative_path);
    fs::create_dir_all(
        script_path
            .parent()
            .expect("the entry point path always has a parent"),
    )?;
    let script_contents = python_entry_point_template(target_prefix, entry_point, python_info);
    let (sha256, size) = write_and_hash(&script_path, script_contents)?;

    #[cfg(unix)]
    fs::set_permissions(
        &script_path,
        std::os::unix::fs::PermissionsExt::from_mode(0o775),
    )?;

    Ok(PathsEntry {
        relative_path,
        path_type: PathType::UnixPythonEntryPoint,
        no_link: false,
        sha256: Some(sha256),
        sha256_in_prefix: Some(sha256),
        size_in_bytes: Some(size as u64),
        file_mode: None,
        prefix_placeholder: None,
    })
}

/// Creates the entry point for one console script on windows: a
/// `<command>-script.py` file in the prefix's `Scripts` directory that the
/// interpreter can run directly.
pub fn create_windows_python_entry_point(
    target_dir: &Path,
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> Result<PathsEntry, std::io::Error> {
    let relative_path = python_info
        .bin_dir
        .join(format!("{}-script.py", entry_point.command));

    let script_path = target_dir.join(&relative_path);
    fs::create_dir_all(
        script_path
            .parent()
            .expect("the entry point path always has a parent"),
    )?;
    let script_contents = python_entry_point_template(target_prefix, entry_point, python_info);
    let (sha256, size) = write_and_hash(&script_path, script_contents)?;

    Ok(PathsEntry {
        relative_path,
        path_type: PathType::WindowsPythonEntryPointScript,
        no_link: false,
        sha256: Some(sha256),
        sha256_in_prefix: Some(sha256),
        size_in_bytes: Some(size as u64),
        file_mode: None,
        prefix_placeholder: None,
    })
}

/// The python source of an entry point script: a shebang followed by an
/// import of the configured function and a `sys.exit` call.
pub fn python_entry_point_template(
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> String {
    let shebang = python_info.shebang(target_prefix);

    // Importing `a.b:c.d` only needs the head of the function path.
    let (import_name, _) = entry_point
        .function
        .split_once('.')
        .unwrap_or((&entry_point.function, ""));

    let module = &entry_point.module;
    let func = &entry_point.function;
    format!(
        "{shebang}\n\
        # -*- coding: utf-8 -*-\n\
        import re\n\
        import sys\n\n\
        from {module} import {import_name}\n\n\
        if __name__ == '__main__':\n\
        \tsys.argv[0] = re.sub(r'(-script\\.pyw?|\\.exe)?$', '', sys.argv[0])\n\
        \tsys.exit({func}())\n\
        "
    )
}

/// Writes the contents to a file, returning its hash and size.
fn write_and_hash(
    path: &Path,
    contents: impl AsRef<[u8]>,
) -> io::Result<(krait_digest::Sha256Hash, usize)> {
    let bytes = contents.as_ref();
    let mut writer = HashingWriter::<_, Sha256>::new(File::create(path)?);
    writer.write_all(bytes)?;
    let (_, hash) = writer.finalize();
    Ok((hash, bytes.len()))
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::Platform;
    use krait_conda_types::Version;
    use std::str::FromStr;

    #[test]
    fn entry_point_script() {
        let python_info = PythonInfo::from_version(
            &Version::from_str("3.11.0").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        let entry_point = EntryPoint::from_str("jupyter-lab = jupyterlab.labapp:main").unwrap();

        let script = python_entry_point_template("/prefix", &entry_point, &python_info);
        assert!(script.starts_with("#!/prefix/bin/python3.11\n"));
        assert!(script.contains("from jupyterlab.labapp import main"));
        assert!(script.contains("sys.exit(main())"));
    }

    #[test]
    fn unix_entry_point_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let python_info = PythonInfo::from_version(
            &Version::from_str("3.11.0").unwrap(),
            None,
            Platform::Linux64,
        )
        .unwrap();
        let entry_point = EntryPoint::from_str("foo = foo.cli:main").unwrap();

        let entry = create_unix_python_entry_point(
            dir.path(),
            "/prefix",
            &entry_point,
            &python_info,
        )
        .unwrap();

        assert_eq!(entry.relative_path, std::path::Path::new("bin/foo"));
        assert!(dir.path().join("bin/foo").is_file());
        assert!(entry.sha256.is_some());
    }
}
