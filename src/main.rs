use std::process::ExitCode;

use clap::Parser;
use evsweep::cli::{run, Cli};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{prelude::*, EnvFilter};

fn init_tracing() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
}

fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("error: failed to initialize tracing: {err}");
        return ExitCode::from(1);
    }

    run(Cli::parse())
}
