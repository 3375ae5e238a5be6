mod check;
mod serve;

use anyhow::{Result, anyhow};
use console::style;

use crate::core::terminal::{self, GuideSection};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Run the HTTP API, job workers and Slack webhook (default)")
        .command("check", "Validate configuration, ping the result store, list models")
        .print();

    GuideSection::new("Flags")
        .command("--api-host <host>", "Bind address (overrides API_HOST)")
        .command("--api-port <port>", "Bind port (overrides API_PORT)")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("chat-relay").green()
    );
}

/// Host and port from `--api-host` / `--api-port`, falling back to the given values.
pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    run_command(&args).await
}

async fn run_command(args: &[String]) -> Result<()> {
    let (cmd, flags_start) = match args.get(1).map(String::as_str) {
        None => ("serve", 1),
        Some(flag) if flag.starts_with("--") => ("serve", 1),
        Some(cmd) => (cmd, 2),
    };

    match cmd {
        "serve" => serve::run_server(args, flags_start).await,
        "check" => check::run_check().await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            Err(anyhow!("Unknown command: {}", other))
        }
    }
}
