use std::path::Path;

use fs_err as fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("reading {path}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_owned(),
        source,
    }
}

/// Whether `source` differs from its mirror under `build`: any path present
/// in `source` missing from `build`, or any file present in both differing
/// bytewise. Paths that exist only under `build` (recipe outputs) are not
/// considered changes.
pub fn changed(source: &Path, build: &Path) -> Result<bool, Error> {
    if !build.exists() {
        return Ok(true);
    }
    dir_changed(source, build)
}

fn dir_changed(source: &Path, build: &Path) -> Result<bool, Error> {
    for entry in fs::read_dir(source).map_err(|e| io(source, e))? {
        let entry = entry.map_err(|e| io(source, e))?;
        let source_path = entry.path();
        let build_path = build.join(entry.file_name());

        if !build_path.exists() {
            return Ok(true);
        }

        let file_type = entry.file_type().map_err(|e| io(&source_path, e))?;
        if file_type.is_dir() {
            if dir_changed(&source_path, &build_path)? {
                return Ok(true);
            }
        } else if files_differ(&source_path, &build_path)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn files_differ(a: &Path, b: &Path) -> Result<bool, Error> {
    let a_bytes = fs::read(a).map_err(|e| io(a, e))?;
    let b_bytes = fs::read(b).map_err(|e| io(b, e))?;
    Ok(a_bytes != b_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    #[test]
    fn missing_build_dir_is_changed() {
        let source = tempdir().unwrap();
        let build = source.path().join("does-not-exist");
        assert!(changed(source.path(), &build).unwrap());
    }

    #[test]
    fn identical_trees_are_unchanged() {
        let source = tempdir().unwrap();
        let build = tempdir().unwrap();
        stdfs::write(source.path().join("generate.py"), b"print(1)").unwrap();
        stdfs::write(build.path().join("generate.py"), b"print(1)").unwrap();

        assert!(!changed(source.path(), build.path()).unwrap());
    }

    #[test]
    fn differing_file_contents_are_changed() {
        let source = tempdir().unwrap();
        let build = tempdir().unwrap();
        stdfs::write(source.path().join("generate.py"), b"print(1)").unwrap();
        stdfs::write(build.path().join("generate.py"), b"print(2)").unwrap();

        assert!(changed(source.path(), build.path()).unwrap());
    }

    #[test]
    fn extra_output_only_in_build_is_not_a_change() {
        let source = tempdir().unwrap();
        let build = tempdir().unwrap();
        stdfs::write(source.path().join("generate.py"), b"print(1)").unwrap();
        stdfs::write(build.path().join("generate.py"), b"print(1)").unwrap();
        stdfs::create_dir(build.path().join("data")).unwrap();
        stdfs::write(build.path().join("data").join("out.txt"), b"hello").unwrap();

        assert!(!changed(source.path(), build.path()).unwrap());
    }

    #[test]
    fn new_source_file_is_a_change() {
        let source = tempdir().unwrap();
        let build = tempdir().unwrap();
        stdfs::write(source.path().join("generate.py"), b"print(1)").unwrap();
        stdfs::write(source.path().join("helper.py"), b"pass").unwrap();
        stdfs::write(build.path().join("generate.py"), b"print(1)").unwrap();

        assert!(changed(source.path(), build.path()).unwrap());
    }
}
