use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use prefs::{
    config::{Cli, Command, CommitFailurePolicy, Config, RedirectCommand},
    redirect::{self, RedirectResult},
    store::PreferenceStore,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli.command.clone().unwrap_or(Command::Serve);
    let config = cli.config;
    let store = PreferenceStore::open_dir(&config.data_dir);
    let policy = config.commit_failure_policy;

    match cmd {
        Command::Serve => {
            run_server(config, store).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Get(args) => {
            let value = store.get(&args.key.store, &args.key.key, &args.default);
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Put(args) => {
            let committed = match policy {
                CommitFailurePolicy::Silent => {
                    store.put(&args.key.store, &args.key.key, &args.value)
                }
                CommitFailurePolicy::Report => {
                    store
                        .try_put(&args.key.store, &args.key.key, &args.value)
                        .with_context(|| format!("commit store {}", args.key.store))?;
                    true
                }
            };
            Ok(commit_exit_code(committed))
        }
        Command::Remove(args) => {
            let committed = match policy {
                CommitFailurePolicy::Silent => store.remove(&args.store, &args.key),
                CommitFailurePolicy::Report => {
                    store
                        .try_remove(&args.store, &args.key)
                        .with_context(|| format!("commit store {}", args.store))?;
                    true
                }
            };
            Ok(commit_exit_code(committed))
        }
        Command::List(args) => {
            let entries = store
                .try_entries(&args.store)
                .with_context(|| format!("read store {}", args.store))?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Redirect(RedirectCommand::Show) => {
            println!("{}", redirect::load_text(&store));
            Ok(ExitCode::SUCCESS)
        }
        Command::Redirect(RedirectCommand::Apply(args)) => {
            let result = redirect::apply_text(&store, &args.text, policy)
                .context("apply redirect text")?;
            println!("{}", result.as_str());
            Ok(match result {
                RedirectResult::Ok => ExitCode::SUCCESS,
                RedirectResult::Canceled => ExitCode::FAILURE,
            })
        }
    }
}

fn commit_exit_code(committed: bool) -> ExitCode {
    if committed {
        println!("committed");
        ExitCode::SUCCESS
    } else {
        println!("not committed");
        ExitCode::FAILURE
    }
}

async fn run_server(config: Config, store: PreferenceStore) -> Result<()> {
    let bind = config.bind;
    info!(
        bind = %bind,
        data_dir = %config.data_dir.display(),
        commit_failure_policy = ?config.commit_failure_policy,
        "starting prefs"
    );

    let app = prefs::http::build_router(config, Arc::new(store)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
