use std::process::ExitCode;

use colored::Colorize;
use oas_client_gen::cli;

fn main() -> ExitCode {
    let command_line_interface = cli::CommandLineInterface::load();
    let outcome = command_line_interface
        .init_logging()
        .and_then(|()| command_line_interface.run());
    match outcome {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
