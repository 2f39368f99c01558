use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fs_err as fs;
use serde::Deserialize;
use thiserror::Error;

use crate::artifact::{ArtifactId, Dependency, Recipe, RecipeKind};
use crate::fetch;
use crate::registry::Registry;

/// A path component validated against the same constraints the manifest
/// schema places on folder names, folder aliases, fetch file names, and
/// referenced recipe names: non-empty, no leading/trailing space or dot,
/// free of characters that are unsafe in a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct PathSegment(String);

impl PathSegment {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum InvalidPathSegment {
    #[error("must not be empty")]
    Empty,
    #[error("must not start with a space or a dot")]
    LeadingSpaceOrDot,
    #[error("must not end with a space or a dot")]
    TrailingSpaceOrDot,
    #[error("contains a character that is not allowed in a path segment")]
    ForbiddenCharacter,
}

const FORBIDDEN_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

impl FromStr for PathSegment {
    type Err = InvalidPathSegment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let first = s.chars().next().ok_or(InvalidPathSegment::Empty)?;
        let last = s.chars().next_back().expect("non-empty checked above");

        if first == ' ' || first == '.' {
            return Err(InvalidPathSegment::LeadingSpaceOrDot);
        }
        if last == ' ' || last == '.' {
            return Err(InvalidPathSegment::TrailingSpaceOrDot);
        }
        if s.chars().any(|c| FORBIDDEN_CHARS.contains(&c) || c == '\r' || c == '\n') {
            return Err(InvalidPathSegment::ForbiddenCharacter);
        }

        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for PathSegment {
    type Error = InvalidPathSegment;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VersionEntry {
    folder: PathSegment,
    #[serde(default)]
    folder_alias: Option<PathSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RecipeType {
    Python,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeManifest {
    recipe_type: RecipeType,
    dependencies: Vec<DependencySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
enum DependencySpec {
    Fetch {
        url: String,
        #[serde(default)]
        file_name: Option<PathSegment>,
    },
    Build { recipe_name: PathSegment, version: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read recipes folder {path}")]
    RecipesRootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything produced by a manifest load: the populated registry, plus
/// human-readable warnings for every manifest_missing/manifest_invalid
/// condition encountered along the way (the caller decides how loudly to
/// surface them; loading itself never aborts on a single bad recipe).
pub struct LoadOutcome {
    pub registry: Registry,
    pub warnings: Vec<String>,
}

pub fn load_recipes(recipes_root: &Path) -> Result<LoadOutcome, Error> {
    let mut registry = Registry::default();
    let mut warnings = Vec::new();

    let entries = fs::read_dir(recipes_root).map_err(|source| Error::RecipesRootUnreadable {
        path: recipes_root.to_owned(),
        source,
    })?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                warnings.push(format!("could not read a directory entry under {recipes_root:?}: {source}"));
                continue;
            }
        };

        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        load_recipe(&entry.path(), &name, &mut registry, &mut warnings);
    }

    Ok(LoadOutcome { registry, warnings })
}

fn load_recipe(recipe_dir: &Path, name: &str, registry: &mut Registry, warnings: &mut Vec<String>) {
    let versions_path = recipe_dir.join("versions.json");

    let raw = match fs::read_to_string(&versions_path) {
        Ok(raw) => raw,
        Err(_) => {
            warnings.push(format!("{name}: missing versions.json, skipping recipe"));
            return;
        }
    };

    let versions: BTreeMap<String, VersionEntry> = match serde_json::from_str(&raw) {
        Ok(versions) => versions,
        Err(source) => {
            warnings.push(format!("{name}: invalid versions.json ({source}), skipping recipe"));
            return;
        }
    };

    for (version_tag, entry) in versions {
        load_version(recipe_dir, name, &version_tag, entry, registry, warnings);
    }
}

fn load_version(
    recipe_dir: &Path,
    name: &str,
    version_tag: &str,
    entry: VersionEntry,
    registry: &mut Registry,
    warnings: &mut Vec<String>,
) {
    let version_dir = recipe_dir.join(entry.folder.as_str());
    let recipe_json_path = version_dir.join("recipe.json");

    let raw = match fs::read_to_string(&recipe_json_path) {
        Ok(raw) => raw,
        Err(_) => {
            warnings.push(format!("{name}/{version_tag}: missing recipe.json, skipping version"));
            return;
        }
    };

    let manifest: RecipeManifest = match serde_json::from_str(&raw) {
        Ok(manifest) => manifest,
        Err(source) => {
            warnings.push(format!("{name}/{version_tag}: invalid recipe.json ({source}), skipping version"));
            return;
        }
    };

    let mut dependencies = Vec::with_capacity(manifest.dependencies.len());

    for dep in manifest.dependencies {
        match dep {
            DependencySpec::Fetch { url, file_name } => {
                let normalized = match fetch::normalize_url(&url) {
                    Ok(url) => url,
                    Err(source) => {
                        warnings.push(format!(
                            "{name}/{version_tag}: invalid fetch url {url:?} ({source}), skipping version"
                        ));
                        return;
                    }
                };

                let artifact_id = registry.register_fetch(normalized.clone());
                let file_name = file_name
                    .map(|segment| segment.as_str().to_owned())
                    .unwrap_or_else(|| fetch::default_file_name(&normalized));

                dependencies.push(Dependency::Fetch {
                    artifact_id,
                    mount_subpath: Path::new("fetch").join(file_name),
                });
            }
            DependencySpec::Build { recipe_name, version } => {
                let artifact_id = ArtifactId::recipe(recipe_name.as_str(), &version);
                let mount_subpath = Path::new("recipes").join(recipe_name.as_str()).join(&version).join("data");

                dependencies.push(Dependency::Recipe {
                    artifact_id,
                    mount_subpath,
                });
            }
        }
    }

    let build_subfolder = entry.folder_alias.unwrap_or_else(|| entry.folder.clone());

    registry.insert_recipe(Recipe {
        id: ArtifactId::recipe(name, version_tag),
        name: name.to_owned(),
        version_tag: version_tag.to_owned(),
        source_subfolder: entry.folder.as_str().to_owned(),
        build_subfolder: build_subfolder.as_str().to_owned(),
        kind: match manifest.recipe_type {
            RecipeType::Python => RecipeKind::Python,
        },
        dependencies,
    });
}
