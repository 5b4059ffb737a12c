use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;

use casewatch::cancel::CancellationToken;
use casewatch::error::log_error;
use casewatch::push::attach_invalidation;
use casewatch::{AppState, PushChannel, SessionStatus, StreamSessionState, app_init};

/// Watch one analysis stage of a case run end to end.
#[derive(Debug, Parser)]
#[command(name = "casewatch", version, about)]
struct Cli {
    /// Case identifier
    case_id: String,

    /// Stage to run, e.g. `policy_analysis`
    stage: String,

    /// Ask the backend to recompute instead of serving a cached result
    #[arg(long)]
    refresh: bool,

    /// Do not open the case push channel
    #[arg(long)]
    no_push: bool,
}

const AUTOSAVE_EVERY: Duration = Duration::from_secs(30);
const GC_EVERY: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    log::info!("🚀 casewatch {}", env!("CARGO_PKG_VERSION"));
    let state = match app_init().await {
        Ok(state) => state,
        Err(e) => {
            log_error(&e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("✅ Application state initialized");

    let outcome = watch_stage(&state, &cli).await;

    state.push.disconnect_all().await;
    if let Err(e) = state.persister.save(&state.cache) {
        log_error(&e);
    }

    match outcome {
        Ok(final_state) if final_state.status == SessionStatus::Done => ExitCode::SUCCESS,
        Ok(final_state) => {
            eprintln!(
                "❌ {}",
                final_state.error.as_deref().unwrap_or("Analysis failed")
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            log_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn watch_stage(state: &Arc<AppState>, cli: &Cli) -> casewatch::Result<StreamSessionState> {
    let channel = if cli.no_push {
        None
    } else {
        Some(open_push(state, &cli.case_id).await?)
    };

    let background = CancellationToken::new();
    let autosave = state.persister.clone().spawn_autosave(
        state.cache.clone(),
        AUTOSAVE_EVERY,
        background.clone(),
    );

    let gc = state.cache.spawn_gc(GC_EVERY, background.clone());

    let session = state.stream_session();
    let run = session.start(&cli.case_id, &cli.stage, cli.refresh)?;
    if let Some(token) = session.cancellation_token() {
        state.requests.track(cli.case_id.clone(), token).await;
    }

    let mut updates = session.updates();
    let mut printed = 0;
    let final_state = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("⏹️  Interrupted");
                session.abort();
                break session.snapshot();
            }
            update = updates.next() => {
                let Some(snapshot) = update else { break session.snapshot() };
                printed = print_progress(&snapshot, printed);
                if snapshot.status.is_terminal() {
                    break snapshot;
                }
            }
        }
    };

    let _ = run.await;
    state.requests.unregister(&cli.case_id).await;
    background.cancel();
    let _ = autosave.await;
    let _ = gc.await;

    if let Some(channel) = channel {
        channel.disconnect().await;
    }
    Ok(final_state)
}

async fn open_push(state: &AppState, case_id: &str) -> casewatch::Result<Arc<PushChannel>> {
    let channel = state.push.case_channel(case_id)?;
    // Routing stays attached for the life of the channel.
    let _routing = attach_invalidation(&channel, state.cache.clone());
    channel.on_message(|message| {
        log::info!(
            "📨 {} {}",
            message.message_type,
            message.message.as_deref().unwrap_or_default()
        );
    });

    // The stream still works without push, so a failed connect is not fatal.
    if let Err(e) = channel.connect().await {
        log::warn!("Push channel unavailable: {}", e);
    }
    Ok(channel)
}

/// Prints events not yet shown; returns the new count.
fn print_progress(snapshot: &StreamSessionState, printed: usize) -> usize {
    for event in snapshot.events.iter().skip(printed) {
        let message = event.message.as_deref().unwrap_or_default();
        println!("[{:>3.0}%] {:<16} {}", snapshot.percent, event.event.as_ref(), message);
    }
    if snapshot.status == SessionStatus::Connecting && !snapshot.message.is_empty() {
        println!("       {}", snapshot.message);
    }
    snapshot.events.len()
}
