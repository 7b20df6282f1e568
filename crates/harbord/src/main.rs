//! `harbord` binary entry point.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked handles: worker threads log to stderr while `run` is active.
    harbord::run(std::env::args_os(), &mut io::stdout(), &mut io::stderr())
}
