mod cli;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    if args.verbose {
        tilecache::logger::echo_to_stderr(true);
    }
    tilecache::logger::init();
    cli::run(args)
}
