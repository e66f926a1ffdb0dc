//! Scribe CLI - Local-first chapter authoring with autosave

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = scribe_cli::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
