mod commands;

use clap::{Parser, Subcommand};
use std::env;
use std::io::{self, Write};

use commands::run::RunArgs;

fn print_top_usage_and_exit(program: &str, code: i32) -> ! {
    eprintln!(
        r#"Usage:
  {0} run [OPTIONS] "<code>"        # Run Brainfuck code (args are concatenated)
  {0} run [OPTIONS] --file <PATH>   # Run Brainfuck code loaded from file

Run "{0} <subcommand> --help" for more info.
Set RUST_LOG=debug (or trace) for engine logs on stderr.
"#,
        program
    );
    let _ = io::stderr().flush();
    std::process::exit(code);
}

#[derive(Parser, Debug)]
#[command(name = "bf", disable_help_flag = true, disable_help_subcommand = true)]
struct Cli {
    /// Show this help
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    help: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

fn main() {
    env_logger::init();

    // We still pull the program name for help rendering consistency
    let program = env::args().next().unwrap_or_else(|| String::from("bf"));

    let cli = Cli::parse();

    let code = match cli.command {
        Some(Command::Run(args)) if !cli.help => commands::run::run(&program, args),
        _ => print_top_usage_and_exit(&program, if cli.help { 0 } else { 2 }),
    };

    std::process::exit(code);
}
