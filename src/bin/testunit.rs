/// testunit CLI
///
/// Runs the built-in root and leaf scenarios. The integration tests use it to
/// observe real process exit codes, including a root unit that re-raises a
/// fault.
use testunit_core::cli;

fn main() {
    match cli::run_cli() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}
