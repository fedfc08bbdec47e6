use std::process::ExitCode;

fn main() -> ExitCode {
    evergreen_cli::run()
}
