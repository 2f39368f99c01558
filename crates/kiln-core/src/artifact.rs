use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::paths::BuildPaths;

/// Stable identifier for anything the build system can produce or fetch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn recipe(name: &str, version_tag: &str) -> Self {
        Self(format!("Recipe:{name}/{version_tag}"))
    }

    pub fn fetch(normalized_url: &Url) -> Self {
        Self(format!("Fetch:{normalized_url}"))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of recipe; currently only `python`, but kept open so the
/// manifest loader's dispatch stays a registry lookup rather than a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    Python,
}

impl RecipeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecipeKind::Python => "python",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: ArtifactId,
    pub name: String,
    pub version_tag: String,
    pub source_subfolder: String,
    pub build_subfolder: String,
    pub kind: RecipeKind,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone)]
pub struct Fetch {
    pub id: ArtifactId,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub enum Artifact {
    Recipe(Recipe),
    Fetch(Fetch),
}

impl Artifact {
    pub fn id(&self) -> &ArtifactId {
        match self {
            Artifact::Recipe(recipe) => &recipe.id,
            Artifact::Fetch(fetch) => &fetch.id,
        }
    }

    pub fn dependencies(&self) -> &[Dependency] {
        match self {
            Artifact::Recipe(recipe) => &recipe.dependencies,
            Artifact::Fetch(_) => &[],
        }
    }

    /// Where this artifact's content lives on disk once built.
    pub fn build_path(&self, paths: &BuildPaths) -> PathBuf {
        match self {
            Artifact::Recipe(recipe) => paths.recipe_build_dir(&recipe.name, &recipe.build_subfolder),
            Artifact::Fetch(fetch) => crate::fetch::cache_path(paths.root(), &fetch.url),
        }
    }
}

/// A recipe's reference to another artifact it needs mounted to build.
#[derive(Debug, Clone)]
pub enum Dependency {
    Fetch { artifact_id: ArtifactId, mount_subpath: PathBuf },
    Recipe { artifact_id: ArtifactId, mount_subpath: PathBuf },
}

impl Dependency {
    pub fn artifact_id(&self) -> &ArtifactId {
        match self {
            Dependency::Fetch { artifact_id, .. } | Dependency::Recipe { artifact_id, .. } => artifact_id,
        }
    }

    pub fn mount_subpath(&self) -> &Path {
        match self {
            Dependency::Fetch { mount_subpath, .. } | Dependency::Recipe { mount_subpath, .. } => mount_subpath,
        }
    }
}
