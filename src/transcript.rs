//! # Transcript Module
//!
//! Questo modulo tiene la storia completa di una sessione: ogni riga grezza
//! dello strumento più ogni messaggio di stato. La vista live è filtrata (vedi
//! `scanner::is_noise_line`), il transcript mai. Salvato in UTF-8 senza BOM.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

const INITIAL_CAPACITY: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct Transcript {
    text: String,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            text: String::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append one line (a tool line or a status message)
    pub fn push(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }

    /// `WinSxS_Cleanup_Log_<yyyyMMdd_HHmmss>.txt`
    pub fn default_file_name(now: DateTime<Local>) -> String {
        format!("WinSxS_Cleanup_Log_{}.txt", now.format("%Y%m%d_%H%M%S"))
    }

    /// Write the transcript; a directory target gets the default file name.
    pub async fn save(&self, target: &Path) -> std::io::Result<PathBuf> {
        let path = if tokio::fs::metadata(target).await.map(|m| m.is_dir()).unwrap_or(false) {
            target.join(Self::default_file_name(Local::now()))
        } else {
            target.to_path_buf()
        };

        // Rust strings are UTF-8 already; nothing writes a BOM
        tokio::fs::write(&path, self.text.as_bytes()).await?;
        info!("Saved transcript ({} lines) to {}", self.line_count(), path.display());
        Ok(path)
    }
}
