//! # Progress Module
//!
//! Questo modulo trasforma le percentuali a raffica di DISM in un valore che
//! continua a muoversi e non torna mai indietro.
//!
//! ## Componenti principali:
//! - `ProgressSynthesizer`: macchina a stati per esecuzione, alimentata dalle
//!   percentuali reali e da un tick periodico
//! - `ProgressManager`: barra di progresso nel terminale con `indicatif`
//! - `TerminalObserver`: alimenta un `ProgressManager` dagli eventi dell'engine
//!
//! ## Avanzamento sintetico:
//! DISM può restare sulla stessa percentuale per decine di secondi. Se non
//! arriva un valore reale per la soglia di stallo (2s di default), ogni tick
//! aggiunge un punto, fino a 95 dopo la prima percentuale reale e a 90 prima.
//! Solo completamento (100) o fallimento (0) scavalcano la regola monotona.
//!
//! ## Feedback visivo:
//! ```text
//! ⠋ [00:02:15] [████████████████████>-------------------] 52% Analyzing component store
//! ```

use crate::engine::RunObserver;
use crate::runner::LineEvent;
use crate::scanner;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(2);
pub const CAP_WITH_SIGNAL: u8 = 95;
pub const CAP_WITHOUT_SIGNAL: u8 = 90;

/// Monotonic progress estimate for one external command run
#[derive(Debug, Clone)]
pub struct ProgressSynthesizer {
    last_value: u8,
    last_real_update: Instant,
    had_real_signal: bool,
    stall_threshold: Duration,
}

impl ProgressSynthesizer {
    pub fn new(now: Instant) -> Self {
        Self::with_stall_threshold(now, DEFAULT_STALL_THRESHOLD)
    }

    pub fn with_stall_threshold(now: Instant, stall_threshold: Duration) -> Self {
        Self {
            last_value: 0,
            last_real_update: now,
            had_real_signal: false,
            stall_threshold,
        }
    }

    pub fn value(&self) -> u8 {
        self.last_value
    }

    pub fn had_real_signal(&self) -> bool {
        self.had_real_signal
    }

    /// Record a real percentage reported by the tool.
    pub fn observe_percent(&mut self, percent: u8, now: Instant) -> u8 {
        self.last_value = self.last_value.max(percent.min(100));
        self.last_real_update = now;
        self.had_real_signal = true;
        self.last_value
    }

    /// Feed a raw output line; returns the new value when it carried a percentage.
    pub fn observe_line(&mut self, line: &str, now: Instant) -> Option<u8> {
        scanner::extract_percent(line).map(|p| self.observe_percent(p, now))
    }

    /// Periodic tick. Returns the new value only when it changed.
    pub fn tick(&mut self, now: Instant) -> Option<u8> {
        if now.saturating_duration_since(self.last_real_update) < self.stall_threshold {
            return None;
        }

        let cap = if self.had_real_signal {
            CAP_WITH_SIGNAL
        } else {
            CAP_WITHOUT_SIGNAL
        };

        let next = (self.last_value + 1).min(cap).max(self.last_value);
        if next == self.last_value {
            return None;
        }
        self.last_value = next;
        Some(next)
    }

    /// Successful completion always shows 100
    pub fn complete(&mut self) -> u8 {
        self.last_value = 100;
        self.last_value
    }

    /// Cancellation or failure always shows 0
    pub fn fail(&mut self) -> u8 {
        self.last_value = 0;
        self.last_value
    }
}

/// Terminal progress bar for a single run (0-100)
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new(100);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );

        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// A manager that draws nothing (used for `--json` output)
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn set_progress(&self, value: u8) {
        self.bar.set_position(u64::from(value.min(100)));
    }

    pub fn position(&self) -> u8 {
        self.bar.position().min(100) as u8
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Print a line above the bar without tearing it
    pub fn println(&self, line: &str) {
        self.bar.println(line);
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}

/// Live terminal view of a run: filtered lines above a progress bar
pub struct TerminalObserver {
    bar: ProgressManager,
}

impl TerminalObserver {
    pub fn new(bar: ProgressManager) -> Self {
        Self { bar }
    }

    pub fn bar(&self) -> &ProgressManager {
        &self.bar
    }
}

impl RunObserver for TerminalObserver {
    fn on_status(&mut self, message: &str) {
        self.bar.println(message);
    }

    fn on_line(&mut self, line: &LineEvent, shown: bool) {
        if shown {
            self.bar.println(&line.text);
        }
    }

    fn on_progress(&mut self, value: u8) {
        self.bar.set_progress(value);
    }
}
