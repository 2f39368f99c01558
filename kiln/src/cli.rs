use clap::Parser;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

mod build;

#[derive(Debug, Parser)]
pub struct Command {
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    Build(build::Args),
}

pub fn process() -> Result<(), Error> {
    let Command { subcommand } = Command::parse();

    let Subcommand::Build(args) = subcommand;
    init_logging(args.verbose, args.quiet);

    let report = build::handle(args)?;

    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }

    if report.is_success() {
        tracing::info!("build finished successfully");
    } else {
        let failures: Vec<_> = report.failures().collect();
        tracing::error!(failed = failures.len(), "build finished with failures");
        for (id, reason) in failures {
            eprintln!("{id}: {reason}");
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = match (verbose, quiet) {
        (true, _) => LevelFilter::DEBUG,
        (false, true) => LevelFilter::WARN,
        (false, false) => LevelFilter::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("build")]
    Build(#[from] build::Error),
}
