use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// What a caller does when a commit does not reach durable storage.
#[derive(
    clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailurePolicy {
    /// Withhold the success signal but report no error.
    #[default]
    Silent,
    /// Surface the commit failure as an error.
    Report,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "prefs",
    about = "Durable named key-value stores",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API (default).
    Serve,

    /// Print the value stored under a key.
    Get(GetArgs),

    /// Store a value under a key and commit it.
    Put(PutArgs),

    /// Remove a key and commit the store.
    Remove(KeyArgs),

    /// Print every entry of a store as JSON.
    List(StoreArgs),

    /// Read or apply the redirect text.
    #[command(subcommand)]
    Redirect(RedirectCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum RedirectCommand {
    /// Print the stored redirect text (empty if unset).
    Show,

    /// Commit new redirect text and print the result.
    Apply(ApplyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(value_name = "STORE")]
    pub store: String,
}

#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    #[arg(value_name = "STORE")]
    pub store: String,

    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    #[arg(long, value_name = "VALUE", default_value = "")]
    pub default: String,
}

#[derive(Args, Debug, Clone)]
pub struct PutArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    #[arg(value_name = "VALUE")]
    pub value: String,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[arg(value_name = "TEXT")]
    pub text: String,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "PREFS_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:62417"
    )]
    pub bind: SocketAddr,

    #[arg(
        long,
        global = true,
        env = "PREFS_DATA_DIR",
        value_name = "PATH",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long = "commit-failure-policy",
        global = true,
        env = "PREFS_COMMIT_FAILURE_POLICY",
        value_name = "POLICY",
        default_value = "silent",
        value_enum
    )]
    pub commit_failure_policy: CommitFailurePolicy,
}
