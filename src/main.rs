use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crmflow::cli::args::{Cli, Commands};
use crmflow::cli::commands::{self, CommandContext};
use crmflow::config::{ColorSetting, Config};
use crmflow::logging::init_logging;
use crmflow::storage::Database;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_logging(&config.logging);

    match config.general.color {
        ColorSetting::Always => colored::control::set_override(true),
        ColorSetting::Never => colored::control::set_override(false),
        ColorSetting::Auto => {}
    }

    let db = match &cli.db {
        Some(path) => Database::open_at(path)?,
        None => Database::open()?,
    };
    let ctx = CommandContext::new(&db, &config, cli.org, cli.output);

    let output = match cli.command {
        Commands::Rules(args) => commands::rules(&ctx, args.command)?,
        Commands::Records(args) => commands::records(&ctx, args.command)?,
        Commands::Webform(args) => commands::webform(&ctx, args)?,
        Commands::Run(args) => commands::run(&ctx, args)?,
        Commands::Tick(args) => commands::tick(&ctx, &args)?,
        Commands::Jobs(args) => commands::jobs(&ctx, args.command)?,
        Commands::Runs(args) => commands::runs(&ctx, args.command)?,
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
