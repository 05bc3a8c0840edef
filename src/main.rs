// ABOUTME: Entry point for the sshman CLI application.
// ABOUTME: Builds the client config from file and flags, then dispatches the command.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use snafu::ResultExt;
use sshman::config::{ClientConfig, Target};
use sshman::error::{ReadConfigSnafu, Result};
use sshman::output::{Output, OutputMode};
use sshman::ssh::Client;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut output = Output::new(OutputMode::from_flags(cli.json, cli.quiet));

    let code = match run(cli, &mut output).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&e.to_string());
            1
        }
    };

    // Exit explicitly: a pending stdin read from the shell would keep the runtime alive.
    std::process::exit(code);
}

async fn run(cli: Cli, output: &mut Output) -> Result<i32> {
    let mut config = build_config(&cli)?;
    if let Commands::Exec {
        command_timeout: Some(timeout),
        ..
    } = &cli.command
    {
        config.command_timeout = Some(*timeout);
    }

    let mut client = Client::new(config)?;
    let address = client.config().dial_settings().address;

    output.start_timer();
    if cli.fast || matches!(cli.command, Commands::Probe) {
        output.progress(&format!("Probing {} password candidates...", address));
        client.fast_connect().await?;
    } else {
        output.progress(&format!("Connecting to {}...", address));
        client.connect().await?;
    }

    let result = dispatch(&client, cli.command, output).await;

    if let Err(e) = client.close().await {
        tracing::debug!("disconnect from {} failed: {}", address, e);
    }
    result
}

async fn dispatch(client: &Client, command: Commands, output: &Output) -> Result<i32> {
    match command {
        Commands::Exec { command, .. } => {
            let result = client.exec_combined(&command.join(" ")).await?;
            output.command_output(&result);
            Ok(exit_code(result.exit_code))
        }
        Commands::Upload {
            local,
            remote,
            mode,
        } => {
            let copied = client.upload(&local, &remote, mode).await?;
            output.success(&format!(
                "Uploaded {} bytes to {} (mode {:o})",
                copied, remote, mode
            ));
            Ok(0)
        }
        Commands::Shell => {
            let exit = client.start_interactive_terminal().await?;
            if let Some(e) = &exit.resize_error {
                output.warning(&format!("terminal size sync stopped: {e}"));
            }
            Ok(exit.exit_status.map_or(1, exit_code))
        }
        Commands::Probe => {
            let password = client.winning_password().unwrap_or_default();
            output.success(&format!("Accepted password: {}", password));
            Ok(0)
        }
    }
}

fn exit_code(status: u32) -> i32 {
    i32::try_from(status).unwrap_or(255)
}

/// Config file (explicit, discovered, or none when a target is given) with flags applied on top.
fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let target = cli.target.as_deref().map(Target::parse).transpose()?;

    let mut config = match (&cli.config, &target) {
        (Some(path), _) => ClientConfig::load(path)?,
        (None, Some(_)) => ClientConfig::new(""),
        (None, None) => {
            let cwd = env::current_dir().context(ReadConfigSnafu {
                path: PathBuf::from("."),
            })?;
            ClientConfig::discover(&cwd)?
        }
    };

    if let Some(target) = &target {
        config = config.with_target(target);
    }

    let auth = &cli.auth;
    if let Some(password) = &auth.password {
        config.password = Some(password.clone());
    }
    config.passwords.extend(auth.passwords.iter().cloned());
    if let Some(identity) = &auth.identity {
        config.private_key = Some(identity.clone());
    }
    if let Some(passphrase) = &auth.passphrase {
        config.key_passphrase = Some(passphrase.clone());
    }
    config.challenge_answers.extend(auth.answers.iter().cloned());
    if auth.pty {
        config.pseudo_terminal = true;
    }
    if let Some(timeout) = auth.timeout {
        config.timeout = timeout;
    }

    if config.home_dir.is_none() {
        config.home_dir = dirs::home_dir();
    }
    Ok(config)
}
