mod cli;

fn main() {
    if let Err(error) = cli::process() {
        eprint!("error: {error}");
        let mut source = std::error::Error::source(&error);
        while let Some(err) = source {
            eprint!(": {err}");
            source = err.source();
        }
        eprintln!();
        std::process::exit(1);
    }
}
