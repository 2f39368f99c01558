use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;

/// Where everything a build produces or caches lives on disk, grouped the
/// way the recipe tree and fetch cache are laid out underneath a single
/// build folder root.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    root: PathBuf,
}

impl BuildPaths {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let paths = Self { root };
        fs::create_dir_all(paths.fetch_cache_dir())?;
        fs::create_dir_all(paths.recipes_dir())?;
        Ok(paths)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fetch_cache_dir(&self) -> PathBuf {
        self.root.join("fetch_cache")
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.root.join("recipes")
    }

    pub fn recipe_build_dir(&self, name: &str, build_subfolder: &str) -> PathBuf {
        self.recipes_dir().join(name).join(build_subfolder)
    }
}
