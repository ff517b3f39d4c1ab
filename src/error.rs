//! # Error Types Module
//!
//! Questo modulo definisce i tipi di errore custom per pilotare lo strumento di cleanup.
//!
//! ## Categorie di errori:
//! - `Spawn`: il comando esterno non è partito
//! - `Cancelled`: l'utente ha chiesto di fermarsi; non è un fallimento
//! - `NotElevated`: cleanup richiesto senza diritti di amministratore
//! - `Io`: I/O su transcript o file di configurazione
//! - `Config`: valori di configurazione non validi
//! - `Task`: un task di lettura è andato in panic o è stato abortito
//!
//! Le righe o dimensioni non riconosciute non finiscono qui: scanner e size
//! parser le trattano come "sconosciute".
//!
//! ## Esempio:
//! ```rust,ignore
//! match engine.analyze(&cancel, &mut observer).await {
//!     Err(e) if e.is_cancelled() => println!("cancelled"),
//!     Err(e) => return Err(e.into()),
//!     Ok(report) => println!("{}", report.upper_bound),
//! }
//! ```

/// Errors surfaced by the process runner and report engine
#[derive(thiserror::Error, Debug)]
pub enum CleanupError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("administrator rights are required for this operation")]
    NotElevated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl CleanupError {
    /// True when the error represents a user-requested cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio::task::JoinError> for CleanupError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CleanupError>;
