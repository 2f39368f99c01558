use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use container::{Container, Exit};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sandbox failed to start")]
    Container(#[from] container::Error),
}

/// What a single sandboxed build needs mounted and how much memory it may use.
pub struct Spec {
    /// Read-only mount of the recipe's build-tree copy, at `/app/recipe`.
    pub recipe: PathBuf,
    /// Read-write mount for generator output, at `/app/data`.
    pub data: PathBuf,
    /// `(host path, subpath under /app/dependencies)` for each dependency.
    pub dependencies: Vec<(PathBuf, PathBuf)>,
    pub memory_limit_bytes: u64,
}

/// Capability boundary between the scheduler and whatever actually isolates
/// a recipe's generator script. Swappable so tests can drive the
/// classification paths (success, script failure, OOM, unclassified)
/// without namespaces, cgroups, or a real sandbox image.
pub trait Sandbox: Send + Sync {
    fn run(&self, spec: &Spec) -> Result<Exit, Error>;
}

/// Runs recipes inside a Linux namespace sandbox rooted at a prebuilt
/// image, with networking disabled and the given memory cap enforced via
/// cgroups.
pub struct NamespaceSandbox {
    pub image_root: PathBuf,
}

impl Sandbox for NamespaceSandbox {
    fn run(&self, spec: &Spec) -> Result<Exit, Error> {
        let mut container = Container::new(&self.image_root)
            .hostname("kiln-sandbox")
            .work_dir("/app")
            .bind_ro(&spec.recipe, "/app/recipe")
            .bind_rw(&spec.data, "/app/data")
            .memory_limit(spec.memory_limit_bytes);

        for (host, subpath) in &spec.dependencies {
            container = container.bind_ro(host, Path::new("/app/dependencies").join(subpath));
        }

        let program = PathBuf::from("/usr/bin/python3");
        let args = vec![
            "/usr/bin/python3".to_owned(),
            "/app/recipe/generate.py".to_owned(),
        ];

        Ok(container.run(&program, &args)?)
    }
}

/// Records invocations and returns a caller-supplied outcome, for tests
/// that need to assert "the sandbox ran exactly once" or "never ran" and
/// drive specific `Exit` classifications without a kernel.
pub struct FakeSandbox<F> {
    invocations: AtomicUsize,
    respond: F,
}

impl<F> FakeSandbox<F>
where
    F: Fn(&Spec) -> Result<Exit, Error> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            respond,
        }
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl<F> Sandbox for FakeSandbox<F>
where
    F: Fn(&Spec) -> Result<Exit, Error> + Send + Sync,
{
    fn run(&self, spec: &Spec) -> Result<Exit, Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        (self.respond)(spec)
    }
}
