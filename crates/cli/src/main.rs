use std::process::ExitCode;

fn main() -> ExitCode {
    instaquote_cli::run()
}
