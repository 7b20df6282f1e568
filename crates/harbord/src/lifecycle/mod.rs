//! Entry point composing configuration, daemonization, workers and signals.
//!
//! Three actions are available: `run` (the default), `print-config` and
//! `version`. Only `run` opens log sinks, binds sockets or detaches.

mod errors;
mod launch;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;

pub use self::errors::LaunchError;
pub use self::launch::{LaunchPlan, ProcessControl, RunOutcome, ServiceDeps, run_with};
use crate::cli::{Action, Cli, Flags};
use crate::loader::{ConfigLoader, SystemConfigLoader};
use crate::signals::ShutdownCause;

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

const COMPANY: &str = "\u{a9} harbor contributors";
const LOGO: &str = r"
 _   _    _    ____  ____   ___  ____
| | | |  / \  |  _ \| __ ) / _ \|  _ \
| |_| | / _ \ | |_) |  _ \| | | | |_) |
|  _  |/ ___ \|  _ <| |_) | |_| |  _ <
|_| |_/_/   \_\_| \_\____/ \___/|_| \_\
";

/// Runs `harbord` with `args`, writing user-facing output to the given
/// streams.
///
/// Usage errors and startup failures exit with status 1; `--help`,
/// `--version` and clean shutdowns exit with 0.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let rendered = error.render();
            if error.use_stderr() {
                let _ = write!(stderr, "{rendered}");
                return ExitCode::FAILURE;
            }
            let _ = write!(stdout, "{rendered}");
            return ExitCode::SUCCESS;
        }
    };

    let cwd = std::env::current_dir()
        .ok()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok());
    let loader = SystemConfigLoader::new(
        cli.flags.source(cwd.as_ref()),
        cli.flags.overrides(),
        Flags::defaults(cwd),
    );

    let result = match cli.action() {
        Action::Version => write_version(stdout),
        Action::PrintConfig => print_config(&loader, stdout),
        Action::Run => run_with(LaunchPlan::system(loader)).map(|outcome| exit_code(&outcome)),
    };
    match result {
        Ok(code) => code,
        Err(error) => {
            let _ = writeln!(stderr, "{}: {error}", env!("CARGO_PKG_NAME"));
            ExitCode::FAILURE
        }
    }
}

/// Builds the snapshot and writes its dump to `out`.
pub fn print_config<L, W>(loader: &L, out: &mut W) -> Result<ExitCode, LaunchError>
where
    L: ConfigLoader,
    W: Write,
{
    let config = loader.load()?;
    write!(out, "{config}").map_err(|source| LaunchError::Output { source })?;
    Ok(ExitCode::SUCCESS)
}

/// Writes the version banner to `out`.
pub fn write_version<W: Write>(out: &mut W) -> Result<ExitCode, LaunchError> {
    writeln!(
        out,
        "{LOGO}\n{COMPANY}\nv{}, build-at {}",
        env!("CARGO_PKG_VERSION"),
        env!("HARBORD_BUILD_DATE")
    )
    .map_err(|source| LaunchError::Output { source })?;
    Ok(ExitCode::SUCCESS)
}

fn exit_code(outcome: &RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Stopped {
            cause: ShutdownCause::WorkerFailed { .. },
            ..
        } => ExitCode::FAILURE,
        RunOutcome::Detached | RunOutcome::Stopped { .. } => ExitCode::SUCCESS,
    }
}
