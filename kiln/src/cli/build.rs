use std::path::PathBuf;

use kiln_core::BuildOptions;
use thiserror::Error;

const DEFAULT_MEMORY_LIMIT_MB: u64 = 1024;
const DEFAULT_SANDBOX_IMAGE: &str = "/var/lib/kiln/sandbox-image";

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Folder containing one subdirectory per recipe, each with a versions.json
    pub recipes_folder: PathBuf,

    #[arg(short = 'b', long = "build-folder", default_value = "./build")]
    pub build_folder: PathBuf,

    /// Force rebuild even when unchanged, and bypass the fetch cache
    #[arg(short = 'f', long = "override", default_value_t = false)]
    pub override_: bool,

    #[arg(short = 'j', long = "num-jobs", default_value_t = 1)]
    pub num_jobs: usize,

    #[arg(long = "sandbox-image", default_value = DEFAULT_SANDBOX_IMAGE)]
    pub sandbox_image: PathBuf,

    #[arg(long = "memory-limit-mb", default_value_t = DEFAULT_MEMORY_LIMIT_MB)]
    pub memory_limit_mb: u64,

    #[arg(short, long, default_value_t = false, global = true)]
    pub verbose: bool,

    #[arg(short, long, default_value_t = false, global = true)]
    pub quiet: bool,
}

pub fn handle(args: Args) -> Result<kiln_core::BuildReport, Error> {
    let options = BuildOptions {
        recipes_folder: args.recipes_folder,
        build_folder: args.build_folder,
        sandbox_image: args.sandbox_image,
        num_jobs: args.num_jobs.max(1),
        override_: args.override_,
        memory_limit_bytes: args.memory_limit_mb * 1024 * 1024,
    };

    Ok(kiln_core::build_all(&options)?)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("build")]
    Core(#[from] kiln_core::Error),
}
