use std::{io::Write, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    DirectModelGateway, MissingSpeechCapture, ModelGateway, RelayModelGateway, SessionConfig,
    SessionController, SessionEvent, SessionPhase,
};
use shared::{
    domain::CaptureTarget,
    protocol::{DEFAULT_GEMINI_API_BASE, DEFAULT_GEMINI_MODEL},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod render;

use commands::{describe_outcome, parse_line, ReplCommand, HELP_TEXT};
use render::{render_step_table, MathRenderer, PlainTextRenderer};

#[derive(Parser, Debug)]
#[command(about = "Build an equation step by step from plain-language commands")]
struct Args {
    /// Relay endpoint that holds the model API key.
    #[arg(long, default_value = "http://127.0.0.1:8787/gemini-proxy")]
    relay_url: String,
    /// Call the model directly with this key instead of going through the relay.
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long, default_value = DEFAULT_GEMINI_API_BASE)]
    api_base: String,
    #[arg(long, default_value = DEFAULT_GEMINI_MODEL)]
    model: String,
    /// Seconds to wait for one transformation; 0 waits indefinitely.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let gateway = build_gateway(&args)?;
    let config = SessionConfig {
        request_timeout: (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs)),
    };
    let controller =
        SessionController::new_with_dependencies(gateway, Arc::new(MissingSpeechCapture), config);
    let renderer: Arc<dyn MathRenderer> = Arc::new(PlainTextRenderer);

    println!("{HELP_TEXT}");
    run_repl(controller, renderer).await
}

fn build_gateway(args: &Args) -> Result<Arc<dyn ModelGateway>> {
    match args.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => {
            info!(model = %args.model, "calling the model directly");
            let gateway = DirectModelGateway::new(&args.api_base, &args.model, key)
                .context("invalid direct model configuration")?;
            Ok(Arc::new(gateway))
        }
        _ => {
            info!(relay = %args.relay_url, "calling the model through the relay");
            let gateway = RelayModelGateway::new(&args.relay_url)
                .with_context(|| format!("invalid relay url '{}'", args.relay_url))?;
            Ok(Arc::new(gateway))
        }
    }
}

async fn run_repl(
    controller: Arc<SessionController>,
    renderer: Arc<dyn MathRenderer>,
) -> Result<()> {
    let mut events = controller.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt(controller.phase().await);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !dispatch(&controller, renderer.as_ref(), parse_line(&line)).await {
                    break;
                }
                prompt(controller.phase().await);
            }
            event = events.recv() => match event {
                Ok(event) => show_event(renderer.as_ref(), event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session events lagged");
                    println!("{}", render_step_table(renderer.as_ref(), &controller.steps().await));
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn dispatch(
    controller: &Arc<SessionController>,
    renderer: &dyn MathRenderer,
    command: ReplCommand,
) -> bool {
    match command {
        ReplCommand::Quit => return false,
        ReplCommand::Empty => {}
        ReplCommand::Help => println!("{HELP_TEXT}"),
        ReplCommand::Show => println!("{}", render_step_table(renderer, &controller.steps().await)),
        ReplCommand::Undo => {
            if !controller.undo().await {
                println!("Nothing to undo.");
            }
        }
        ReplCommand::Reset => controller.reset().await,
        ReplCommand::Edit { index, equation } => {
            if !controller.try_edit_equation(index, equation).await {
                println!("There is no step {}.", index + 1);
            }
        }
        ReplCommand::Dictate => {
            let target = if controller.steps().await.is_empty() {
                CaptureTarget::Initial
            } else {
                CaptureTarget::Command
            };
            // Failures already surface as a notice event.
            if let Err(err) = controller.toggle_dictation(target).await {
                debug!(error = %err, "dictation toggle failed");
            }
        }
        ReplCommand::Submit(text) => {
            let starting = controller.steps().await.is_empty();
            let controller = Arc::clone(controller);
            // Spawned so the prompt stays live and a second submission can be
            // seen being rejected.
            tokio::spawn(async move {
                let outcome = if starting {
                    controller.submit_initial(&text).await
                } else {
                    controller.submit_command(&text).await
                };
                debug!(?outcome, "submission finished");
                if let Some(message) = describe_outcome(&outcome) {
                    println!("{message}");
                }
            });
        }
        ReplCommand::Unknown(raw) => println!("Unknown command '{raw}'. Type :help for a list."),
    }
    true
}

fn show_event(renderer: &dyn MathRenderer, event: SessionEvent) {
    match event {
        SessionEvent::HistoryChanged(steps) => println!("{}", render_step_table(renderer, &steps)),
        SessionEvent::BusyChanged(true) => println!("Working..."),
        SessionEvent::BusyChanged(false) => {}
        SessionEvent::CaptureChanged(Some(target)) => println!("Listening ({target:?})..."),
        SessionEvent::CaptureChanged(None) => debug!("capture stopped"),
        SessionEvent::DraftsChanged(drafts) => debug!(?drafts, "drafts changed"),
        SessionEvent::Notice(notice) => println!("{notice}"),
    }
}

fn prompt(phase: SessionPhase) {
    let label = match phase {
        SessionPhase::IdleEmpty => "sentence",
        SessionPhase::IdleNonEmpty => "command",
        SessionPhase::Busy => "busy",
    };
    print!("{label}> ");
    let _ = std::io::stdout().flush();
}
