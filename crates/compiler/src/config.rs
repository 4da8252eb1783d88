//! Compiler configuration.
//!
//! Gathers the knobs the CLI exposes (source path, listing output,
//! verbosity) into one value so the orchestration pipeline in [`crate`]
//! doesn't have to thread four separate arguments through lex → parse →
//! analyze → codegen → run.

use std::path::PathBuf;

/// Logging verbosity, raised by repeated `-v` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Default: only warnings and errors.
    Warn,
    /// `-v`: info-level phase progress.
    Info,
    /// `-vv`: per-phase debug detail.
    Debug,
    /// `-vvv` and above: per-instruction trace detail.
    Trace,
}

impl Verbosity {
    pub fn from_flag_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Warn,
            1 => Verbosity::Info,
            2 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }

    /// The `tracing_subscriber::EnvFilter` directive this verbosity maps to
    /// when `RUST_LOG` is unset.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Verbosity::Warn => "warn",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Warn
    }
}

/// Resolved configuration for one compile-and-run invocation.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Path to the `.pas` source file.
    pub source: PathBuf,

    /// Where to write the generated instruction listing, if requested.
    pub emit_listing: Option<PathBuf>,

    /// Stop after generating the listing; don't run it on the virtual
    /// machine. Requires `emit_listing` to be useful, but isn't enforced
    /// here — the CLI validates that combination.
    pub listing_only: bool,

    pub verbosity: Verbosity,
}

impl CompilerConfig {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        CompilerConfig {
            source: source.into(),
            emit_listing: None,
            listing_only: false,
            verbosity: Verbosity::default(),
        }
    }

    pub fn with_listing(mut self, path: impl Into<PathBuf>) -> Self {
        self.emit_listing = Some(path.into());
        self
    }

    pub fn with_listing_only(mut self, listing_only: bool) -> Self {
        self.listing_only = listing_only;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_escalates_with_flag_count() {
        assert_eq!(Verbosity::from_flag_count(0), Verbosity::Warn);
        assert_eq!(Verbosity::from_flag_count(1), Verbosity::Info);
        assert_eq!(Verbosity::from_flag_count(2), Verbosity::Debug);
        assert_eq!(Verbosity::from_flag_count(5), Verbosity::Trace);
    }

    #[test]
    fn builder_sets_listing_and_verbosity() {
        let config = CompilerConfig::new("prog.pas")
            .with_listing("prog.lst")
            .with_listing_only(true)
            .with_verbosity(Verbosity::Debug);

        assert_eq!(config.source, PathBuf::from("prog.pas"));
        assert_eq!(config.emit_listing, Some(PathBuf::from("prog.lst")));
        assert!(config.listing_only);
        assert_eq!(config.verbosity, Verbosity::Debug);
    }
}
