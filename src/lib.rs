//! # WinSxS Cleanup Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//! Pilota analisi e cleanup del component store con DISM e trasforma il suo
//! output in un report su quanto un cleanup dovrebbe liberare e quanto libera davvero.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi principali tramite re-exports
//! - Fornisce un'interfaccia pulita per main.rs e altri front-end
//!
//! ## Architettura dei moduli:
//! - `size`: stringhe di dimensione ⇄ megabyte
//! - `scanner`: classifica le righe di DISM (percentuali, valori, rumore)
//! - `progress`: progresso sintetico monotono e barra nel terminale
//! - `runner`: avvia lo strumento e trasmette le righe, con kill dell'albero
//! - `platform`: decodifica della code page e terminazione dei processi
//! - `engine`: orchestrazione di analyze / cleanup e report
//! - `confirm`: conferma in due passi davanti a `/ResetBase`
//! - `privilege`: rilevamento dei diritti di amministratore
//! - `transcript`: log della sessione, salvato in UTF-8
//! - `json_output`: JSON per riga per `--json`
//! - `config`: impostazioni persistenti
//! - `error`: tipi di errore
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use winsxs_cleanup::{Config, NullObserver, ReportEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> winsxs_cleanup::error::Result<()> {
//! let mut engine = ReportEngine::new(Config::default());
//! let cancel = CancellationToken::new();
//! let analysis = engine.analyze(&cancel, &mut NullObserver).await?;
//! println!("reclaimable: {}", analysis.upper_bound.label());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod confirm;
pub mod engine;
pub mod error;
pub mod json_output;
pub mod platform;
pub mod privilege;
pub mod progress;
pub mod runner;
pub mod scanner;
pub mod size;
pub mod transcript;

pub use config::Config;
pub use confirm::{ConfirmInput, ConfirmationGate, ConfirmationPrompt, GateState};
pub use engine::{CleanupReport, NullObserver, ReportEngine, RunObserver};
pub use error::CleanupError;
pub use runner::{LineEvent, ProcessRunner, RunResult, Stream};
pub use size::SizeMeasurement;
pub use transcript::Transcript;
