//! # WinSxS Cleanup - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Caricamento delle impostazioni all'avvio e salvataggio all'uscita
//! - Collegamento di Ctrl-C al token di cancellazione
//! - Scelta della presentazione (barra nel terminale o messaggi `--json`)
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI
//! 2. Configura il logging (WARN, o DEBUG con `--verbose`; `RUST_LOG` ha la precedenza)
//! 3. Carica le impostazioni (file mancante o corrotto ⇒ default)
//! 4. Esegue il sottocomando tramite `ReportEngine`
//! 5. Stampa il riepilogo, salva il transcript (`--log`) e le impostazioni
//!
//! ## Esempio di utilizzo:
//! ```bash
//! winsxs-cleanup analyze
//! winsxs-cleanup --log . cleanup --reset-base
//! winsxs-cleanup config set-reanalyze false
//! ```

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use winsxs_cleanup::json_output::{JsonMessage, JsonObserver};
use winsxs_cleanup::progress::{ProgressManager, TerminalObserver};
use winsxs_cleanup::{
    CleanupError, Config, ConfirmInput, ConfirmationPrompt, GateState, ReportEngine, RunObserver,
};

const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "winsxs-cleanup")]
#[command(about = "Analyze and clean up the Windows component store (WinSxS) with DISM")]
struct Args {
    /// Settings file (default: <config dir>/winsxs-cleanup/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit line-delimited JSON instead of the terminal view
    #[arg(long, global = true)]
    json: bool,

    /// Save the full transcript to this file (or into this directory)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze the component store and report the reclaimable upper bound
    Analyze,

    /// Clean up the component store
    Cleanup {
        /// Also remove superseded versions (/ResetBase, cannot be undone)
        #[arg(long)]
        reset_base: bool,

        /// Skip the re-analysis that measures the real savings
        #[arg(long)]
        no_reanalyze: bool,

        /// Acknowledge the reset-base warning up front (the countdown still runs)
        #[arg(long)]
        acknowledge: bool,
    },

    /// Show or change the saved settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings
    Show,

    /// Re-analyze after cleanup by default
    SetReanalyze {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("winsxs_cleanup={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings_path = args.config.clone().or_else(Config::default_path);
    let mut config = match &settings_path {
        Some(path) => Config::load_or_default(path).await,
        None => Config::default(),
    };

    let code = match &args.command {
        Command::Config { action } => {
            match action {
                ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&config)?),
                ConfigAction::SetReanalyze { enabled } => {
                    config.reanalyze_after_cleanup = *enabled;
                    println!("reanalyze_after_cleanup = {}", enabled);
                }
            }
            ExitCode::SUCCESS
        }
        Command::Analyze => run_operation(&args, &config, None).await?,
        Command::Cleanup {
            reset_base,
            no_reanalyze,
            acknowledge,
        } => {
            let request = CleanupRequest {
                reset_base: *reset_base,
                reanalyze: config.reanalyze_after_cleanup && !*no_reanalyze,
                acknowledge: *acknowledge,
            };
            run_operation(&args, &config, Some(request)).await?
        }
    };

    if let Some(path) = &settings_path {
        if let Err(e) = config.save_to_file(path).await {
            warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    Ok(code)
}

#[derive(Debug, Clone, Copy)]
struct CleanupRequest {
    reset_base: bool,
    reanalyze: bool,
    acknowledge: bool,
}

/// Run analyze (`cleanup == None`) or cleanup and report the outcome
async fn run_operation(args: &Args, config: &Config, cleanup: Option<CleanupRequest>) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let bar = (!args.json).then(|| ProgressManager::new("DISM"));
    let mut observer: Box<dyn RunObserver> = match &bar {
        Some(bar) => Box::new(TerminalObserver::new(bar.clone())),
        None => Box::new(JsonObserver::new()),
    };

    let mut engine = ReportEngine::new(config.clone());
    let operation = if cleanup.is_some() { "cleanup" } else { "analyze" };

    let result = match cleanup {
        None => analyze(&mut engine, args.json, &cancel, observer.as_mut()).await,
        Some(request) => {
            clean(&mut engine, request, args.json, bar.as_ref(), &cancel, observer.as_mut()).await
        }
    };

    let code = match result {
        Ok(()) => {
            if let Some(bar) = &bar {
                bar.finish("Done");
            }
            print_summary(&engine, args.json);
            ExitCode::SUCCESS
        }
        Err(e) if e.is_cancelled() => {
            engine.announce(observer.as_mut(), "⛔ Cancelled by user.");
            if let Some(bar) = &bar {
                bar.abandon("Cancelled");
            }
            if args.json {
                JsonMessage::cancelled(operation).emit();
            }
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            engine.announce(observer.as_mut(), &format!("❌ Error: {}", e));
            if let Some(bar) = &bar {
                bar.abandon("Failed");
            }
            if args.json {
                let details = std::error::Error::source(&e).map(|s| s.to_string());
                JsonMessage::error(e.to_string(), details).emit();
            }
            ExitCode::FAILURE
        }
    };

    if let Some(target) = &args.log {
        let path = engine.transcript().save(target).await?;
        if args.json {
            JsonMessage::SavedLog { path }.emit();
        } else {
            println!("Log saved: {}", path.display());
        }
    }

    Ok(code)
}

async fn analyze(
    engine: &mut ReportEngine,
    json: bool,
    cancel: &CancellationToken,
    observer: &mut dyn RunObserver,
) -> winsxs_cleanup::error::Result<()> {
    if json {
        let tool = &engine.config().tool;
        JsonMessage::start("analyze", &tool.program, tool.analyze()).emit();
    }

    let report = engine.analyze(cancel, observer).await?;
    if json {
        JsonMessage::analysis(&report).emit();
    }
    Ok(())
}

async fn clean(
    engine: &mut ReportEngine,
    request: CleanupRequest,
    json: bool,
    bar: Option<&ProgressManager>,
    cancel: &CancellationToken,
    observer: &mut dyn RunObserver,
) -> winsxs_cleanup::error::Result<()> {
    engine.ensure_elevated()?;

    if request.reset_base {
        let countdown = engine.config().confirm_countdown_secs;
        if !confirm_reset_base(countdown, request.acknowledge, json, bar, cancel).await {
            return Err(CleanupError::Cancelled);
        }
    }

    // a baseline measurement is needed for the real savings
    if request.reanalyze && !engine.report().actual_before.is_known() {
        analyze(engine, json, cancel, observer).await?;
    }

    if json {
        let tool = &engine.config().tool;
        JsonMessage::start("cleanup", &tool.program, tool.cleanup(request.reset_base)).emit();
    }

    let outcome = engine
        .cleanup(request.reset_base, request.reanalyze, cancel, observer)
        .await?;
    if json {
        JsonMessage::cleanup(&outcome).emit();
    }
    Ok(())
}

/// Two-step confirmation: countdown plus acknowledgement, read from stdin
async fn confirm_reset_base(
    countdown_secs: u32,
    acknowledge: bool,
    json: bool,
    bar: Option<&ProgressManager>,
    cancel: &CancellationToken,
) -> bool {
    let (tx, rx) = mpsc::channel(16);

    // Detached thread: a blocking stdin read must not hold up runtime shutdown.
    let reader_tx = tx.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(input) = ConfirmInput::from_line(&line) {
                if reader_tx.blocking_send(input).is_err() {
                    break;
                }
            }
        }
    });

    // With --acknowledge a closed stdin must not cancel the prompt
    let _keep_open = acknowledge.then_some(tx);

    let mut last_state = None;
    let confirmed = ConfirmationPrompt::new(countdown_secs)
        .acknowledged(acknowledge)
        .auto_confirm(acknowledge)
        .run(rx, cancel, |gate| {
            let state = gate.state();
            if last_state == Some(state) {
                return;
            }
            last_state = Some(state);

            let message = match state {
                GateState::Locked { seconds_remaining } => format!(
                    "ResetBase permanently removes superseded components and cannot be undone. \
                     Unlocks in {}s [y acknowledge / n withdraw / q cancel]",
                    seconds_remaining
                ),
                GateState::AwaitingAcknowledgement => {
                    "Type y to acknowledge that ResetBase cannot be undone, or q to cancel".to_string()
                }
                GateState::Unlocked => "Press Enter to run ResetBase, or q to cancel".to_string(),
            };

            match bar {
                Some(bar) => bar.set_message(&message),
                None if json => JsonMessage::Status { message }.emit(),
                None => eprintln!("{}", message),
            }
        })
        .await;

    if let Some(bar) = bar {
        bar.set_message("DISM");
    }
    debug!("Reset-base confirmation result: {}", confirmed);
    confirmed
}

fn print_summary(engine: &ReportEngine, json: bool) {
    let summary = engine.report().summary();
    if json {
        JsonMessage::summary(summary).emit();
        return;
    }

    println!();
    println!("Expected savings : {}", summary.expected);
    println!("Before cleanup   : {}", summary.before);
    println!("After cleanup    : {}", summary.after);
    println!("Saved            : {}", summary.saved);
}
