use std::io::stdout;

use anyhow::Result;
use clap::{crate_version, value_parser, Arg, Command};
use clap_complete::{generate, Shell};

mod subcommands;

pub mod traits;
use traits::UtGptApp;

const SHELL: &str = "SHELL";

fn main() -> Result<()> {
    // Known subapplications.
    let apps = vec![subcommands::BuildApp::app()];

    env_logger::init();

    let cli = Command::new("utgpt")
        .about("Universal Transformer GPT models")
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommands(apps)
        .subcommand(
            Command::new("completions")
                .about("Generate completion scripts for your shell")
                .arg_required_else_help(true)
                .arg(
                    Arg::new(SHELL)
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        );
    let matches = cli.clone().get_matches();

    match matches.subcommand() {
        Some(("build", matches)) => subcommands::BuildApp::parse(matches)?.run(),
        Some(("completions", matches)) => {
            if let Some(shell) = matches.get_one::<Shell>(SHELL) {
                write_completion_script(cli, *shell);
            }
            Ok(())
        }
        _unknown => unreachable!(),
    }
}

fn write_completion_script(mut cli: Command, shell: Shell) {
    generate(shell, &mut cli, "utgpt", &mut stdout());
}
