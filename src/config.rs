//! # Configuration Management Module
//!
//! Questo modulo gestisce le impostazioni persistenti e i parametri di un'esecuzione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config`, salvata come piccolo record JSON
//! - Fornisce validazione dei parametri di runtime
//! - Carica all'avvio (file mancante o corrotto ⇒ default, mai fatale) e
//!   salva alla chiusura
//!
//! ## Parametri di configurazione:
//! - `reanalyze_after_cleanup`: seconda analisi dopo il cleanup per misurare
//!   il risparmio reale (default: true)
//! - `window`: ultima geometria della finestra, per i front-end che ne hanno una
//! - `tool`: programma e argomenti per analyze / cleanup / reset-base
//! - `tick_interval_ms`: cadenza del tick di progresso sintetico (default: 250)
//! - `stall_threshold_ms`: silenzio prima del progresso sintetico (default: 2000)
//! - `confirm_countdown_secs`: countdown della conferma reset-base (default: 5)
//! - `line_channel_capacity`: capacità del canale delle righe (default: 256)
//! - `require_elevation`: rifiuta il cleanup senza diritti di amministratore (default: true)
//!
//! ## Esempio:
//! ```rust
//! use winsxs_cleanup::Config;
//!
//! let config = Config {
//!     reanalyze_after_cleanup: false,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const APP_DIR: &str = "winsxs-cleanup";
const SETTINGS_FILE: &str = "settings.json";

/// Last window position and size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowGeometry {
    /// Geometry worth restoring; tiny or collapsed windows are ignored
    pub fn is_plausible(&self) -> bool {
        self.width > 300 && self.height > 300
    }
}

/// The external tool and its three argument sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommand {
    pub program: String,
    pub analyze_args: Vec<String>,
    pub cleanup_args: Vec<String>,
    pub reset_base_flag: String,
}

impl Default for ToolCommand {
    fn default() -> Self {
        let image = ["/Online", "/Cleanup-Image"];
        Self {
            program: "dism".to_string(),
            analyze_args: image
                .iter()
                .chain(&["/AnalyzeComponentStore"])
                .map(|s| s.to_string())
                .collect(),
            cleanup_args: image
                .iter()
                .chain(&["/StartComponentCleanup"])
                .map(|s| s.to_string())
                .collect(),
            reset_base_flag: "/ResetBase".to_string(),
        }
    }
}

impl ToolCommand {
    pub fn analyze(&self) -> Vec<String> {
        self.analyze_args.clone()
    }

    /// Cleanup arguments, with the irreversible flag appended for reset-base
    pub fn cleanup(&self, reset_base: bool) -> Vec<String> {
        let mut args = self.cleanup_args.clone();
        if reset_base {
            args.push(self.reset_base_flag.clone());
        }
        args
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Re-analyze after cleanup to compute the real savings
    pub reanalyze_after_cleanup: bool,
    /// Last window geometry (front-ends only)
    pub window: Option<WindowGeometry>,
    /// External tool invocation
    pub tool: ToolCommand,
    /// Synthetic progress tick cadence
    pub tick_interval_ms: u64,
    /// Silence after which synthetic progress kicks in
    pub stall_threshold_ms: u64,
    /// Seconds before the reset-base confirmation can unlock
    pub confirm_countdown_secs: u32,
    /// Bound of the line event channel
    pub line_channel_capacity: usize,
    /// Refuse cleanup without administrator rights
    pub require_elevation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reanalyze_after_cleanup: true,
            window: None,
            tool: ToolCommand::default(),
            tick_interval_ms: 250,
            stall_threshold_ms: 2000,
            confirm_countdown_secs: 5,
            line_channel_capacity: 256,
            require_elevation: true,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.tool.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Tool program must not be empty"));
        }

        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("Tick interval must be greater than 0"));
        }

        if self.stall_threshold_ms < self.tick_interval_ms {
            return Err(anyhow::anyhow!(
                "Stall threshold ({}ms) must not be shorter than the tick interval ({}ms)",
                self.stall_threshold_ms,
                self.tick_interval_ms
            ));
        }

        if self.line_channel_capacity == 0 {
            return Err(anyhow::anyhow!("Line channel capacity must be greater than 0"));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    /// `<config dir>/winsxs-cleanup/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings, falling back to defaults on any problem
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path).await {
            Ok(config) => {
                debug!("Loaded settings from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
