//! # Report Engine Module
//!
//! Questo modulo orchestra le esecuzioni di DISM e ne ricava il report di cleanup.
//!
//! ## Responsabilità:
//! - `analyze`: una esecuzione `/AnalyzeComponentStore`; estrae il limite
//!   superiore recuperabile e la dimensione reale dello store (misura "before")
//! - `cleanup`: una esecuzione `/StartComponentCleanup` (opzionalmente
//!   `/ResetBase`), poi una ri-analisi opzionale per la misura "after"
//! - Calcola il risparmio reale solo quando esistono entrambe le misure
//! - Mantiene il transcript della sessione
//!
//! ## Pipeline di un'esecuzione:
//! ```text
//! ProcessRunner ──(bounded channel of LineEvent)──▶ aggregator loop ──▶ RunObserver
//!                                                   ▲   │
//!                              250ms progress tick ─┘   └─▶ lines / transcript
//! ```
//! Il loop aggregatore è l'unico a scrivere sul `ProgressSynthesizer`: righe e
//! tick passano per lo stesso `select!`.
//!
//! ## Risparmio atteso:
//! Il limite superiore di DISM sovrastima sempre quanto libera un cleanup.
//! La stima mostrata è `[upper × 0.20, upper × 0.40]`, un'euristica empirica,
//! sempre etichettata come tale.

use crate::config::Config;
use crate::error::{CleanupError, Result};
use crate::platform::PlatformCommands;
use crate::privilege;
use crate::progress::ProgressSynthesizer;
use crate::runner::{LineEvent, ProcessRunner, RunResult};
use crate::scanner;
use crate::size::{format_mb, SizeMeasurement};
use crate::transcript::Transcript;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const EXPECTED_LOW_FACTOR: f64 = 0.20;
pub const EXPECTED_HIGH_FACTOR: f64 = 0.40;

/// Presentation hooks for a running operation
pub trait RunObserver {
    /// Status message (also written to the transcript)
    fn on_status(&mut self, _message: &str) {}

    /// Raw tool line; `shown` is false for progress bars and banners
    fn on_line(&mut self, _line: &LineEvent, _shown: bool) {}

    /// Display progress, 0-100
    fn on_progress(&mut self, _value: u8) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Heuristic range derived from the upper bound
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpectedSavings {
    pub upper_bound: SizeMeasurement,
    pub low: SizeMeasurement,
    pub high: SizeMeasurement,
}

impl ExpectedSavings {
    pub fn from_upper_bound(upper_bound: SizeMeasurement) -> Option<Self> {
        if !upper_bound.is_known() {
            return None;
        }
        Some(Self {
            upper_bound,
            low: SizeMeasurement::from_mb(upper_bound.mb() * EXPECTED_LOW_FACTOR),
            high: SizeMeasurement::from_mb(upper_bound.mb() * EXPECTED_HIGH_FACTOR),
        })
    }

    pub fn label(&self) -> String {
        format!(
            "{} (estimated {} ~ {}, heuristic)",
            self.upper_bound, self.low, self.high
        )
    }
}

/// Measurements gathered over one analyze and, optionally, one cleanup + re-analyze
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub upper_bound: SizeMeasurement,
    pub actual_before: SizeMeasurement,
    pub actual_after: SizeMeasurement,
}

impl CleanupReport {
    /// Realized savings in MB; `None` unless both sides were measured
    pub fn saved_mb(&self) -> Option<f64> {
        saved_between(self.actual_before, self.actual_after)
    }

    pub fn expected(&self) -> Option<ExpectedSavings> {
        ExpectedSavings::from_upper_bound(self.upper_bound)
    }

    /// "1.29 GB (before 12.03 GB → after 10.74 GB)" or "-"
    pub fn savings_label(&self) -> String {
        match self.saved_mb() {
            Some(saved) => format!(
                "{} (before {} → after {})",
                format_mb(saved),
                self.actual_before.label(),
                self.actual_after.label()
            ),
            None => "-".to_string(),
        }
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            expected: self.expected().map_or_else(|| "-".to_string(), |e| e.label()),
            before: self.actual_before.label(),
            after: self.actual_after.label(),
            saved: self.savings_label(),
        }
    }
}

fn saved_between(before: SizeMeasurement, after: SizeMeasurement) -> Option<f64> {
    if before.is_known() && after.is_known() {
        Some((before.mb() - after.mb()).max(0.0))
    } else {
        None
    }
}

/// Display labels for the four summary fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub expected: String,
    pub before: String,
    pub after: String,
    pub saved: String,
}

/// Result of `ReportEngine::analyze`
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub upper_bound: SizeMeasurement,
    pub actual_before: SizeMeasurement,
    pub run: RunResult,
}

/// Result of `ReportEngine::cleanup`
#[derive(Debug, Clone)]
pub struct CleanupOutcome {
    pub reset_base: bool,
    pub exit_code: i32,
    pub reanalysis: Option<RunResult>,
    pub actual_after: Option<SizeMeasurement>,
    pub saved_mb: Option<f64>,
}

/// Drives the cleanup tool and accumulates the report
#[derive(Debug)]
pub struct ReportEngine {
    config: Config,
    runner: ProcessRunner,
    report: CleanupReport,
    transcript: Transcript,
}

impl ReportEngine {
    pub fn new(config: Config) -> Self {
        let runner = ProcessRunner::new(PlatformCommands::instance().get_command(&config.tool.program));
        Self {
            config,
            runner,
            report: CleanupReport::default(),
            transcript: Transcript::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn report(&self) -> &CleanupReport {
        &self.report
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Record a status message in the transcript and show it
    pub fn announce(&mut self, observer: &mut dyn RunObserver, message: &str) {
        info!("{}", message);
        self.transcript.push(message);
        observer.on_status(message);
    }

    /// Run one invocation, feeding lines and ticks through a single aggregator.
    async fn execute(
        &mut self,
        args: Vec<String>,
        cancel: &CancellationToken,
        observer: &mut dyn RunObserver,
    ) -> Result<RunResult> {
        let (tx, mut rx) = mpsc::channel(self.config.line_channel_capacity);
        let mut progress =
            ProgressSynthesizer::with_stall_threshold(Instant::now(), self.config.stall_threshold());
        observer.on_progress(progress.value());

        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let runner = self.runner.clone();
        let run = runner.run(&args, tx, cancel);
        tokio::pin!(run);

        let mut lines = Vec::new();
        let outcome = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = rx.recv() => {
                    self.accept_line(event, &mut lines, &mut progress, observer);
                }
                _ = ticker.tick() => {
                    if let Some(value) = progress.tick(Instant::now()) {
                        observer.on_progress(value);
                    }
                }
            }
        };

        let exit_code = match outcome {
            Ok(code) => code,
            Err(e) => {
                observer.on_progress(progress.fail());
                return Err(e);
            }
        };

        // lines still buffered when the process finished
        while let Some(event) = rx.recv().await {
            self.accept_line(event, &mut lines, &mut progress, observer);
        }

        observer.on_progress(progress.complete());
        debug!("Run finished with {} lines, exit code {}", lines.len(), exit_code);
        Ok(RunResult { exit_code, lines })
    }

    fn accept_line(
        &mut self,
        event: LineEvent,
        lines: &mut Vec<String>,
        progress: &mut ProgressSynthesizer,
        observer: &mut dyn RunObserver,
    ) {
        if event.text.trim().is_empty() {
            return;
        }

        if let Some(value) = progress.observe_line(&event.text, Instant::now()) {
            observer.on_progress(value);
        }

        self.transcript.push(&event.text);
        observer.on_line(&event, !scanner::is_noise_line(&event.text));
        lines.push(event.text);
    }

    /// Fail closed when cleanup needs administrator rights we do not have
    pub fn ensure_elevated(&self) -> Result<()> {
        if self.config.require_elevation && !privilege::is_elevated() {
            return Err(CleanupError::NotElevated);
        }
        Ok(())
    }

    /// Analyze the component store.
    pub async fn analyze(
        &mut self,
        cancel: &CancellationToken,
        observer: &mut dyn RunObserver,
    ) -> Result<AnalysisReport> {
        self.report.upper_bound = SizeMeasurement::UNKNOWN;
        self.announce(observer, "▶ Analyzing the component store (this can take a few minutes)...");

        let run = self.execute(self.config.tool.analyze(), cancel, observer).await?;

        let values = scanner::first_values(run.lines.iter().map(String::as_str));
        self.report.upper_bound = values
            .upper_bound
            .as_deref()
            .map_or(SizeMeasurement::UNKNOWN, SizeMeasurement::parse);
        self.report.actual_before = values
            .actual_size
            .as_deref()
            .map_or(SizeMeasurement::UNKNOWN, SizeMeasurement::parse);
        self.report.actual_after = SizeMeasurement::UNKNOWN;

        match self.report.expected() {
            Some(expected) => {
                let message = format!("✔ Analysis complete: reclaimable upper bound {}", expected.label());
                self.announce(observer, &message);
            }
            None => self.announce(
                observer,
                "✅ Analysis complete. The store is already optimized or DISM did not report \
                 a reclaimable size. Re-analyze after cleanup to measure the real savings.",
            ),
        }

        if self.report.actual_before.is_known() {
            let message = format!(
                "ℹ Actual component store size (before cleanup): {}",
                self.report.actual_before
            );
            self.announce(observer, &message);
        }

        self.announce(observer, &format!("(Exit code: {})", run.exit_code));

        Ok(AnalysisReport {
            upper_bound: self.report.upper_bound,
            actual_before: self.report.actual_before,
            run,
        })
    }

    /// Clean up the component store, optionally re-analyzing afterwards.
    ///
    /// `reset_base` appends the irreversible flag; callers gate it behind the
    /// two-step confirmation.
    pub async fn cleanup(
        &mut self,
        reset_base: bool,
        reanalyze: bool,
        cancel: &CancellationToken,
        observer: &mut dyn RunObserver,
    ) -> Result<CleanupOutcome> {
        self.ensure_elevated()?;

        let before = self.report.actual_before;
        self.report.actual_after = SizeMeasurement::UNKNOWN;

        self.announce(
            observer,
            if reset_base {
                "▶ Starting ResetBase cleanup (cannot be undone)..."
            } else {
                "▶ Starting component store cleanup..."
            },
        );

        let run = self
            .execute(self.config.tool.cleanup(reset_base), cancel, observer)
            .await?;
        let label = if reset_base { "ResetBase" } else { "Cleanup" };
        self.announce(
            observer,
            &format!("✔ {} finished (Exit code: {})", label, run.exit_code),
        );

        let mut outcome = CleanupOutcome {
            reset_base,
            exit_code: run.exit_code,
            reanalysis: None,
            actual_after: None,
            saved_mb: None,
        };

        if reanalyze {
            self.announce(observer, "▶ Re-analyzing to measure the real savings...");
            let analysis = self.execute(self.config.tool.analyze(), cancel, observer).await?;

            let values = scanner::first_values(analysis.lines.iter().map(String::as_str));
            if let Some(text) = values.actual_size.as_deref() {
                self.report.actual_after = SizeMeasurement::parse(text);
            }

            let after = self.report.actual_after;
            outcome.actual_after = after.is_known().then_some(after);
            outcome.saved_mb = saved_between(before, after);

            match outcome.saved_mb {
                Some(saved) => {
                    let message = format!(
                        "✅ Real savings: {} (before {} → after {})",
                        format_mb(saved),
                        before,
                        after
                    );
                    self.announce(observer, &message);
                }
                None => self.announce(
                    observer,
                    "ℹ Cleanup completed, but without a measurement from before the cleanup \
                     the real savings for this run are not available.",
                ),
            }

            self.announce(
                observer,
                &format!("(Re-analyze exit code: {})", analysis.exit_code),
            );
            outcome.reanalysis = Some(analysis);
        }

        Ok(outcome)
    }
}
