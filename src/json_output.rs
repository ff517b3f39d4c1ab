//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato per `--json`: un oggetto JSON per
//! riga su stdout, per i front-end che usano la CLI come processo figlio.
//!
//! ## Tipi di messaggi:
//! - `start`: inizio di un'operazione (programma e argomenti)
//! - `progress`: cambio del progresso mostrato (0-100)
//! - `line`: una riga grezza dello strumento, con stream e visibilità
//! - `status`: un messaggio di stato
//! - `analysis`: fine dell'analisi con le misure
//! - `cleanup`: fine del cleanup con la misura "after" e il risparmio
//! - `summary`: le quattro etichette del riepilogo
//! - `saved_log`: transcript salvato
//! - `cancelled`: l'utente ha fermato l'operazione
//! - `error`: l'operazione è fallita

use crate::engine::{AnalysisReport, CleanupOutcome, ReportSummary, RunObserver};
use crate::runner::{LineEvent, Stream};
use serde::Serialize;
use std::path::PathBuf;

/// JSON message, tagged by `type`
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    Start {
        operation: String,
        program: String,
        args: Vec<String>,
    },

    Progress {
        value: u8,
    },

    Line {
        text: String,
        stream: Stream,
        shown: bool,
    },

    Status {
        message: String,
    },

    Analysis {
        upper_bound_mb: Option<f64>,
        actual_before_mb: Option<f64>,
        exit_code: i32,
        line_count: usize,
    },

    Cleanup {
        reset_base: bool,
        exit_code: i32,
        reanalyzed: bool,
        actual_after_mb: Option<f64>,
        saved_mb: Option<f64>,
    },

    Summary {
        expected: String,
        before: String,
        after: String,
        saved: String,
    },

    SavedLog {
        path: PathBuf,
    },

    Cancelled {
        operation: String,
    },

    Error {
        message: String,
        details: Option<String>,
    },
}

impl JsonMessage {
    /// Emit the message on stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(operation: &str, program: &str, args: Vec<String>) -> Self {
        Self::Start {
            operation: operation.to_string(),
            program: program.to_string(),
            args,
        }
    }

    pub fn analysis(report: &AnalysisReport) -> Self {
        Self::Analysis {
            upper_bound_mb: report.upper_bound.is_known().then(|| report.upper_bound.mb()),
            actual_before_mb: report.actual_before.is_known().then(|| report.actual_before.mb()),
            exit_code: report.run.exit_code,
            line_count: report.run.lines.len(),
        }
    }

    pub fn cleanup(outcome: &CleanupOutcome) -> Self {
        Self::Cleanup {
            reset_base: outcome.reset_base,
            exit_code: outcome.exit_code,
            reanalyzed: outcome.reanalysis.is_some(),
            actual_after_mb: outcome.actual_after.map(|after| after.mb()),
            saved_mb: outcome.saved_mb,
        }
    }

    pub fn summary(labels: ReportSummary) -> Self {
        Self::Summary {
            expected: labels.expected,
            before: labels.before,
            after: labels.after,
            saved: labels.saved,
        }
    }

    pub fn cancelled(operation: &str) -> Self {
        Self::Cancelled {
            operation: operation.to_string(),
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

/// Observer that turns engine events into JSON messages
#[derive(Debug, Default)]
pub struct JsonObserver {
    last_progress: Option<u8>,
}

impl JsonObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunObserver for JsonObserver {
    fn on_status(&mut self, message: &str) {
        JsonMessage::Status {
            message: message.to_string(),
        }
        .emit();
    }

    fn on_line(&mut self, line: &LineEvent, shown: bool) {
        JsonMessage::Line {
            text: line.text.clone(),
            stream: line.stream,
            shown,
        }
        .emit();
    }

    fn on_progress(&mut self, value: u8) {
        if self.last_progress != Some(value) {
            self.last_progress = Some(value);
            JsonMessage::Progress { value }.emit();
        }
    }
}
