use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rayon::prelude::*;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactId};
use crate::graph::Graph;
use crate::paths::BuildPaths;
use crate::recipe::{self, BuildContext};
use crate::registry::Registry;
use crate::sandbox::Sandbox;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dependency graph contains a cycle")]
    Cycle,
    #[error("could not build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-artifact failures collected over a whole run. A recipe whose
/// dependency failed is recorded here too (reason: "dependency failed"),
/// without its own `build` ever having been invoked.
#[derive(Debug, Default)]
pub struct Report {
    pub failed: HashMap<ArtifactId, String>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Options<'a> {
    pub recipes_root: &'a Path,
    pub paths: &'a BuildPaths,
    pub sandbox: &'a dyn Sandbox,
    pub memory_limit_bytes: u64,
    pub num_jobs: usize,
    pub override_: bool,
}

/// Walk the graph in topological waves, dispatching each wave's ready
/// artifacts to a bounded worker pool. A recipe is never built while any of
/// its dependencies is still pending, and any recipe with a failed
/// dependency is recorded as failed without being built.
pub fn build_all(registry: &Registry, graph: &Graph, options: &Options<'_>) -> Result<Report, Error> {
    let batches = graph.batches().map_err(|_| Error::Cycle)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_jobs.max(1))
        .build()?;

    let failed: Mutex<HashMap<ArtifactId, String>> = Mutex::new(HashMap::new());

    for batch in batches {
        pool.install(|| {
            batch.par_iter().for_each(|id| {
                let Some(artifact) = registry.get(id) else {
                    // Dependency-only ids referenced by a recipe but never
                    // declared as a top-level artifact; nothing to build.
                    return;
                };

                let blocked_by = artifact
                    .dependencies()
                    .iter()
                    .find(|dep| failed.lock().expect("lock poisoned").contains_key(dep.artifact_id()))
                    .map(|dep| dep.artifact_id().clone());

                if let Some(failed_dependency) = blocked_by {
                    tracing::warn!(%id, %failed_dependency, "dependency failed, skipping");
                    failed
                        .lock()
                        .expect("lock poisoned")
                        .insert(id.clone(), format!("dependency {failed_dependency} failed"));
                    return;
                }

                let result = dispatch(artifact, registry, options);

                if let Err(message) = result {
                    tracing::error!(%id, error = %message, "build failed");
                    failed.lock().expect("lock poisoned").insert(id.clone(), message);
                }
            });
        });
    }

    Ok(Report {
        failed: failed.into_inner().expect("lock poisoned"),
    })
}

fn dispatch(artifact: &Artifact, registry: &Registry, options: &Options<'_>) -> Result<(), String> {
    match artifact {
        Artifact::Fetch(fetch) => fetch
            .build(options.paths.root(), options.override_)
            .map_err(|error| error.to_string()),
        Artifact::Recipe(recipe) => {
            let ctx = BuildContext {
                recipes_root: options.recipes_root,
                paths: options.paths,
                registry,
                sandbox: options.sandbox,
                memory_limit_bytes: options.memory_limit_bytes,
                override_: options.override_,
            };
            recipe::build(recipe, &ctx).map_err(|error| error.to_string())
        }
    }
}
