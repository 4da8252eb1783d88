//! Pascal toolchain CLI: compile a `.pas` source file and run it on the
//! stack-based virtual machine.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use pascalvm_compiler::{CompilerConfig, Verbosity};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "pascalvm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run a pragmatic Pascal subset", long_about = None)]
struct Cli {
    /// Source file to compile and run
    source: PathBuf,

    /// Increase log verbosity; repeat for more detail (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write the generated instruction listing to this path
    #[arg(long, value_name = "PATH")]
    emit_listing: Option<PathBuf>,

    /// Generate the listing and stop; don't run it
    #[arg(long)]
    listing_only: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbosity = Verbosity::from_flag_count(cli.verbose);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = CompilerConfig::new(cli.source)
        .with_listing_only(cli.listing_only)
        .with_verbosity(verbosity);
    let config = match cli.emit_listing {
        Some(path) => config.with_listing(path),
        None => config,
    };

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout().lock();

    match pascalvm_compiler::run_with_config(&config, &mut input, &mut output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
