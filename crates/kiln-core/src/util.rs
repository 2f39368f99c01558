use std::os::unix::fs::symlink;
use std::path::Path;

use fs_err as fs;

/// Recursively copy `source` to `dest`, preserving symlinks rather than
/// following them.
pub fn copy_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from = entry.path();
        let to = dest.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir(&from, &to)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from)?;
            symlink(target, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    #[test]
    fn copies_nested_files() {
        let source = tempdir().unwrap();
        stdfs::create_dir(source.path().join("nested")).unwrap();
        stdfs::write(source.path().join("a.txt"), b"a").unwrap();
        stdfs::write(source.path().join("nested").join("b.txt"), b"b").unwrap();

        let dest = tempdir().unwrap();
        let dest_path = dest.path().join("copy");
        copy_dir(source.path(), &dest_path).unwrap();

        assert_eq!(stdfs::read(dest_path.join("a.txt")).unwrap(), b"a");
        assert_eq!(stdfs::read(dest_path.join("nested").join("b.txt")).unwrap(), b"b");
    }
}
