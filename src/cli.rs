// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the target, credential flags, and subcommands.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sshman")]
#[command(about = "Connect to SSH hosts by key, password list, or challenge answers")]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON lines instead of human-readable messages
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub json: bool,

    /// Print only command results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to sshman.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Host to connect to, as [user@]host[:port]
    pub target: Option<String>,

    #[command(flatten)]
    pub auth: AuthArgs,

    /// Race one connection per password and keep the first that succeeds
    #[arg(long, global = true)]
    pub fast: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Credential overrides applied over the configuration file.
#[derive(Args, Debug, Default)]
pub struct AuthArgs {
    /// Password to try first
    #[arg(short = 'P', long, global = true)]
    pub password: Option<String>,

    /// Additional password candidate (repeatable)
    #[arg(long = "try-password", global = true)]
    pub passwords: Vec<String>,

    /// Private key as a file path or base64 material
    #[arg(short = 'i', long, global = true)]
    pub identity: Option<String>,

    /// Passphrase for an encrypted private key
    #[arg(long, global = true)]
    pub passphrase: Option<String>,

    /// Keyboard-interactive answer as "question=answer" (repeatable)
    #[arg(long = "answer", value_parser = parse_answer, global = true)]
    pub answers: Vec<(String, String)>,

    /// Allocate a pseudo-terminal for exec
    #[arg(short = 't', long, global = true)]
    pub pty: bool,

    /// Connect timeout per attempt, e.g. "3s"
    #[arg(long, value_parser = parse_duration, global = true)]
    pub timeout: Option<Duration>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command and print its combined output
    Exec {
        /// Command line to run remotely
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Give up after this long, e.g. "30s"
        #[arg(long, value_parser = parse_duration)]
        command_timeout: Option<Duration>,
    },

    /// Upload a local file over SFTP
    Upload {
        local: PathBuf,
        remote: String,

        /// Octal permission mode for the remote file
        #[arg(short, long, default_value = "644", value_parser = parse_mode)]
        mode: u32,
    },

    /// Open an interactive shell
    Shell,

    /// Find which password candidate the host accepts
    Probe,
}

fn parse_mode(s: &str) -> Result<u32, String> {
    let mode = u32::from_str_radix(s.trim_start_matches("0o"), 8)
        .map_err(|_| format!("invalid octal mode: {s}"))?;
    if mode > 0o7777 {
        return Err(format!("mode out of range: {s}"));
    }
    Ok(mode)
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_answer(s: &str) -> Result<(String, String), String> {
    // Answers may contain '=', questions rarely do.
    let (question, answer) = s
        .split_once('=')
        .ok_or_else(|| format!("expected question=answer, got {s:?}"))?;
    if question.is_empty() {
        return Err("question cannot be empty".to_string());
    }
    Ok((question.to_string(), answer.to_string()))
}
