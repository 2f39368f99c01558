pub mod artifact;
pub mod change;
pub mod fetch;
pub mod graph;
pub mod manifest;
pub mod paths;
pub mod recipe;
pub mod registry;
pub mod sandbox;
pub mod scheduler;
mod util;

use std::path::PathBuf;

use thiserror::Error;

pub use artifact::{Artifact, ArtifactId};
pub use graph::Graph;
pub use paths::BuildPaths;
pub use registry::Registry;
pub use sandbox::{NamespaceSandbox, Sandbox};
pub use scheduler::Report;

/// Everything a single invocation needs. Mirrors the CLI surface one to
/// one: there is no persisted config file layer, only these explicit
/// fields.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub recipes_folder: PathBuf,
    pub build_folder: PathBuf,
    pub sandbox_image: PathBuf,
    pub num_jobs: usize,
    pub override_: bool,
    pub memory_limit_bytes: u64,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("loading recipes")]
    Manifest(#[from] manifest::Error),
    #[error("setting up build folder")]
    Paths(#[from] std::io::Error),
    #[error("dependency graph is invalid")]
    Cycle(#[from] dag::CycleError),
    #[error("scheduling builds")]
    Scheduler(#[from] scheduler::Error),
}

/// Load every recipe manifest under `options.recipes_folder`, build the
/// dependency graph, and walk it to completion against a real namespace
/// sandbox. Returns a report listing every failed artifact rather than
/// stopping at the first failure; only problems that prevent the walk from
/// starting at all (an unreadable recipes folder, a dependency cycle)
/// surface as `Err`.
pub fn build_all(options: &BuildOptions) -> Result<BuildReport, Error> {
    let sandbox = NamespaceSandbox {
        image_root: options.sandbox_image.clone(),
    };
    build_all_with(options, &sandbox)
}

/// Same as [`build_all`], but against a caller-supplied [`Sandbox`]. The
/// seam tests use to drive a run end to end without real Linux namespaces.
pub fn build_all_with(options: &BuildOptions, sandbox: &dyn Sandbox) -> Result<BuildReport, Error> {
    let outcome = manifest::load_recipes(&options.recipes_folder)?;
    for warning in &outcome.warnings {
        tracing::warn!("{warning}");
    }

    let paths = BuildPaths::new(&options.build_folder)?;
    let graph = Graph::build(&outcome.registry);
    // Surface a cycle before spinning up the worker pool, even though
    // `scheduler::build_all` would hit the same error itself.
    graph.batches()?;

    let scheduler_options = scheduler::Options {
        recipes_root: &options.recipes_folder,
        paths: &paths,
        sandbox,
        memory_limit_bytes: options.memory_limit_bytes,
        num_jobs: options.num_jobs,
        override_: options.override_,
    };

    let report = scheduler::build_all(&outcome.registry, &graph, &scheduler_options)?;

    Ok(BuildReport {
        warnings: outcome.warnings,
        failed: report,
    })
}

/// What the CLI prints after a run: manifest-load warnings plus whatever
/// artifacts failed to build. A non-empty `failed` report is not a fatal
/// error in itself — the CLI exits non-zero but still reports what it
/// could.
#[derive(Debug)]
pub struct BuildReport {
    pub warnings: Vec<String>,
    pub failed: Report,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_success()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ArtifactId, &str)> {
        self.failed.failed.iter().map(|(id, reason)| (id, reason.as_str()))
    }
}
