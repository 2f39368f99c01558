use fs_err as fs;
use thiserror::Error;

use crate::artifact::{ArtifactId, Recipe};
use crate::change;
use crate::paths::BuildPaths;
use crate::registry::Registry;
use crate::sandbox::{self, Sandbox, Spec};
use crate::util;
use container::Exit;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dependency {0} is missing from the registry")]
    UnknownDependency(ArtifactId),
    #[error("change detection failed")]
    Change(#[from] change::Error),
    #[error("io error building recipe")]
    Io(#[from] std::io::Error),
    #[error("sandbox error")]
    Sandbox(#[from] sandbox::Error),
    #[error("build script exited with an error")]
    ScriptFailed { stderr: String },
    #[error("build exceeded its memory limit")]
    MemoryLimitExceeded,
    #[error("build exited with unclassified status {code}")]
    Unclassified { code: i32, stderr: String },
}

pub struct BuildContext<'a> {
    pub recipes_root: &'a std::path::Path,
    pub paths: &'a BuildPaths,
    pub registry: &'a Registry,
    pub sandbox: &'a dyn Sandbox,
    pub memory_limit_bytes: u64,
    pub override_: bool,
}

/// Build a single recipe: detect whether its source tree changed, mirror it
/// under the build folder if so, mount it and its dependencies into the
/// sandbox, and classify the sandbox's exit.
pub fn build(recipe: &Recipe, ctx: &BuildContext<'_>) -> Result<(), Error> {
    let source_path = ctx.recipes_root.join(&recipe.name).join(&recipe.source_subfolder);
    let build_path = ctx.paths.recipe_build_dir(&recipe.name, &recipe.build_subfolder);

    if build_path.exists() {
        if !ctx.override_ && !change::changed(&source_path, &build_path)? {
            tracing::info!(recipe = %recipe.id, "unchanged, skipping build");
            return Ok(());
        }
        fs::remove_dir_all(&build_path)?;
    }

    util::copy_dir(&source_path, &build_path)?;
    let data_dir = build_path.join("data");
    fs::create_dir_all(&data_dir)?;

    let mut dependencies = Vec::with_capacity(recipe.dependencies.len());
    for dependency in &recipe.dependencies {
        let artifact = ctx
            .registry
            .get(dependency.artifact_id())
            .ok_or_else(|| Error::UnknownDependency(dependency.artifact_id().clone()))?;
        let host_path = artifact.build_path(ctx.paths);
        dependencies.push((host_path, dependency.mount_subpath().to_owned()));
    }

    let spec = Spec {
        recipe: build_path,
        data: data_dir,
        dependencies,
        memory_limit_bytes: ctx.memory_limit_bytes,
    };

    match ctx.sandbox.run(&spec)? {
        Exit::Success => {
            tracing::info!(recipe = %recipe.id, kind = recipe.kind.as_str(), "build succeeded");
            Ok(())
        }
        Exit::ScriptFailed { stderr } => Err(Error::ScriptFailed { stderr }),
        Exit::MemoryLimitExceeded => Err(Error::MemoryLimitExceeded),
        Exit::Other { code, stderr } => Err(Error::Unclassified { code, stderr }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::RecipeKind;
    use crate::sandbox::FakeSandbox;
    use std::fs as stdfs;
    use tempfile::tempdir;

    fn write_recipe_source(recipes_root: &std::path::Path, name: &str, version: &str, body: &str) {
        let dir = recipes_root.join(name).join(version);
        stdfs::create_dir_all(&dir).unwrap();
        stdfs::write(dir.join("generate.py"), body).unwrap();
    }

    fn leaf_recipe(name: &str, version: &str) -> Recipe {
        Recipe {
            id: ArtifactId::recipe(name, version),
            name: name.to_owned(),
            version_tag: version.to_owned(),
            source_subfolder: version.to_owned(),
            build_subfolder: version.to_owned(),
            kind: RecipeKind::Python,
            dependencies: vec![],
        }
    }

    #[test]
    fn builds_and_then_skips_unchanged() {
        let recipes_root = tempdir().unwrap();
        write_recipe_source(recipes_root.path(), "leaf", "v1", "print(1)");

        let build_root = tempdir().unwrap();
        let paths = BuildPaths::new(build_root.path()).unwrap();
        let registry = Registry::default();
        let sandbox = FakeSandbox::new(|_spec| Ok(Exit::Success));

        let recipe = leaf_recipe("leaf", "v1");
        let ctx = BuildContext {
            recipes_root: recipes_root.path(),
            paths: &paths,
            registry: &registry,
            sandbox: &sandbox,
            memory_limit_bytes: 1 << 30,
            override_: false,
        };

        build(&recipe, &ctx).unwrap();
        assert_eq!(sandbox.invocation_count(), 1);

        build(&recipe, &ctx).unwrap();
        assert_eq!(sandbox.invocation_count(), 1, "unchanged recipe must not re-invoke the sandbox");
    }

    #[test]
    fn override_forces_rebuild() {
        let recipes_root = tempdir().unwrap();
        write_recipe_source(recipes_root.path(), "leaf", "v1", "print(1)");

        let build_root = tempdir().unwrap();
        let paths = BuildPaths::new(build_root.path()).unwrap();
        let registry = Registry::default();
        let sandbox = FakeSandbox::new(|_spec| Ok(Exit::Success));

        let recipe = leaf_recipe("leaf", "v1");
        let ctx = BuildContext {
            recipes_root: recipes_root.path(),
            paths: &paths,
            registry: &registry,
            sandbox: &sandbox,
            memory_limit_bytes: 1 << 30,
            override_: true,
        };

        build(&recipe, &ctx).unwrap();
        build(&recipe, &ctx).unwrap();
        assert_eq!(sandbox.invocation_count(), 2);
    }

    #[test]
    fn script_failure_is_reported_with_stderr() {
        let recipes_root = tempdir().unwrap();
        write_recipe_source(recipes_root.path(), "leaf", "v1", "raise SystemExit(1)");

        let build_root = tempdir().unwrap();
        let paths = BuildPaths::new(build_root.path()).unwrap();
        let registry = Registry::default();
        let sandbox = FakeSandbox::new(|_spec| {
            Ok(Exit::ScriptFailed {
                stderr: "boom".to_owned(),
            })
        });

        let recipe = leaf_recipe("leaf", "v1");
        let ctx = BuildContext {
            recipes_root: recipes_root.path(),
            paths: &paths,
            registry: &registry,
            sandbox: &sandbox,
            memory_limit_bytes: 1 << 30,
            override_: false,
        };

        let err = build(&recipe, &ctx).unwrap_err();
        assert!(matches!(err, Error::ScriptFailed { stderr } if stderr == "boom"));
    }

    #[test]
    fn oom_is_classified_distinctly() {
        let recipes_root = tempdir().unwrap();
        write_recipe_source(recipes_root.path(), "leaf", "v1", "x = [0] * (1 << 40)");

        let build_root = tempdir().unwrap();
        let paths = BuildPaths::new(build_root.path()).unwrap();
        let registry = Registry::default();
        let sandbox = FakeSandbox::new(|_spec| Ok(Exit::MemoryLimitExceeded));

        let recipe = leaf_recipe("leaf", "v1");
        let ctx = BuildContext {
            recipes_root: recipes_root.path(),
            paths: &paths,
            registry: &registry,
            sandbox: &sandbox,
            memory_limit_bytes: 1 << 30,
            override_: false,
        };

        let err = build(&recipe, &ctx).unwrap_err();
        assert!(matches!(err, Error::MemoryLimitExceeded));
    }
}
