//! Write-temp-then-rename replacement of files.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Replace `path` with `contents` so readers observe either the old or the new file.
///
/// Missing parent directories are created. The temporary file lives next to
/// the target so the final rename stays on one filesystem.
///
/// # Errors
///
/// Returns [`Error::Io`] when the directory, temporary file, or rename fails.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|source| Error::io(parent, source))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|source| Error::io(parent, source))?;
    temp.write_all(contents)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|source| Error::io(path, source))?;
    temp.persist(path)
        .map_err(|err| Error::io(path, err.error))?;
    Ok(())
}

/// Read a file, mapping a missing file to [`Error::NotFound`].
///
/// # Errors
///
/// Returns [`Error::NotFound`] or [`Error::Io`].
pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                path: crate::display_path(path),
            }
        } else {
            Error::io(path, source)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replaces_existing_file_and_creates_parents() {
        let temp = TempDir::new().expect("tempdir");
        let target = temp.path().join("nested/dir/series");

        write_atomic(&target, b"one\n").expect("first write");
        write_atomic(&target, b"two\n").expect("second write");

        assert_eq!(fs::read(&target).expect("read back"), b"two\n");
        let leftovers: Vec<_> = fs::read_dir(target.parent().expect("parent"))
            .expect("list dir")
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = TempDir::new().expect("tempdir");
        let err = read(&temp.path().join("absent")).expect_err("missing file");
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
