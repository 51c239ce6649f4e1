// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod commands;
mod config;
mod runtime;

use anyhow::{Context, Result, bail};
use config::Config;
use runtime::McpRuntime;
use std::env;
use std::io::IsTerminal;
use std::path::PathBuf;
use wisedeck_app::AppState;
use wisedeck_tui::AppRuntime;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let mut config_path = Config::default_path()?;
    let mut print_path = false;
    let mut print_example = false;
    let mut force_refresh = false;
    let mut command: Option<String> = None;
    let mut command_args: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
                config_path = PathBuf::from(value);
            }
            "--print-config-path" => {
                print_path = true;
            }
            "--print-example-config" => {
                print_example = true;
            }
            "--refresh" => {
                force_refresh = true;
            }
            "--version" | "-V" => {
                println!("wisedeck {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            _ if arg.starts_with('-') && command.is_none() => {
                bail!("unknown argument {arg:?}; run with --help to see supported options");
            }
            _ if command.is_none() => {
                command = Some(arg);
                // everything after the tool name belongs to the tool
                command_args.extend(args.by_ref());
            }
            _ => command_args.push(arg),
        }
    }

    if print_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if print_example {
        print!("{}", Config::example_config(&config_path));
        return Ok(());
    }

    let config = Config::load(&config_path).with_context(|| {
        format!(
            "load config {}; run `wisedeck --print-example-config` to generate a template",
            config_path.display()
        )
    })?;
    let mut runtime = McpRuntime::new(&config, force_refresh)?;

    match command.as_deref() {
        Some("list") => {
            let tools = runtime.list_catalog()?;
            for line in commands::catalog_listing(&tools) {
                println!("{line}");
            }
            Ok(())
        }
        Some(name) => {
            let tools = runtime.list_catalog()?;
            let tool = commands::find_tool(&tools, name)?;
            let arguments = commands::parse_tool_args(tool, &command_args)?;
            let outcome = runtime.call_tool(&tool.name, arguments)?;
            let color = std::io::stdout().is_terminal();
            for line in commands::render_outcome(&outcome, color)? {
                println!("{line}");
            }
            Ok(())
        }
        None => {
            if !std::io::stdout().is_terminal() || !std::io::stdin().is_terminal() {
                print_help();
                bail!("the interactive interface needs a terminal; pass a tool name instead");
            }
            let tools = runtime.list_catalog()?;
            let mut state = AppState::new(tools);
            state.group_commands = config.group_commands();
            state.rebuild_command_filter();
            wisedeck_tui::run_app(&mut state, &mut runtime)
        }
    }
}

fn print_help() {
    println!("wisedeck — palette for the Readwise tool catalog");
    println!();
    println!("Usage:");
    println!("  wisedeck                     Open the interactive palette");
    println!("  wisedeck list                Print the available tools");
    println!("  wisedeck <tool> [--flag v]   Invoke one tool directly");
    println!();
    println!("Options:");
    println!("  --config <path>          Use a specific config file");
    println!("  --refresh                Refetch the tool catalog, ignoring the cache");
    println!("  --print-config-path      Print the resolved config path");
    println!("  --print-example-config   Print a config template");
    println!("  --version                Print the version");
    println!("  --help                   Show this help");
    println!();
    println!("Each tool takes one --flag per schema property (dashes or");
    println!("underscores both work); booleans may be passed bare.");
}
