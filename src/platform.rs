//! # Platform Module
//!
//! Questo modulo centralizza le parti dipendenti dal sistema operativo.
//!
//! ## Responsabilità:
//! - Decodifica dell'output della console con la code page OEM legacy (Windows)
//! - Risoluzione del nome dell'eseguibile dello strumento
//! - Terminazione di un processo insieme a tutti i suoi discendenti
//!
//! ## Decodifica:
//! Le code page multi-byte (949, 932, 936, 950) passano per `encoding_rs`.
//! Le code page OEM a singolo byte (437, 850, 852, 866) che `encoding_rs` non
//! conosce usano le tabelle di `oem_cp`. UTF-8 resta l'ultima risorsa.

use encoding_rs::{Encoding, UTF_8};
use oem_cp::code_table::{
    DECODING_TABLE_CP437, DECODING_TABLE_CP850, DECODING_TABLE_CP852, DECODING_TABLE_CP866,
};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// How raw console bytes become text
#[derive(Debug, Clone, Copy)]
pub enum ConsoleDecoder {
    /// Any encoding `encoding_rs` knows, multi-byte pages included
    Encoding(&'static Encoding),
    /// Single-byte OEM page: ASCII below 0x80, lookup table above
    SingleByte {
        code_page: u16,
        high_half: &'static [char; 128],
    },
}

impl ConsoleDecoder {
    /// Table decoder for a single-byte OEM code page, if one is known
    pub fn single_byte(code_page: u16) -> Option<Self> {
        let high_half: &'static [char; 128] = match code_page {
            437 => &DECODING_TABLE_CP437,
            850 => &DECODING_TABLE_CP850,
            852 => &DECODING_TABLE_CP852,
            866 => &DECODING_TABLE_CP866,
            _ => return None,
        };
        Some(Self::SingleByte { code_page, high_half })
    }

    pub fn name(&self) -> String {
        match self {
            Self::Encoding(encoding) => encoding.name().to_string(),
            Self::SingleByte { code_page, .. } => format!("cp{}", code_page),
        }
    }

    fn decode(&self, raw: &[u8]) -> String {
        match self {
            Self::Encoding(encoding) => {
                let (text, had_errors) = encoding.decode_without_bom_handling(raw);
                if had_errors {
                    debug!("Malformed bytes in tool output for {}", encoding.name());
                }
                text.into_owned()
            }
            Self::SingleByte { high_half, .. } => raw
                .iter()
                .map(|&b| if b < 0x80 { char::from(b) } else { high_half[usize::from(b - 0x80)] })
                .collect(),
        }
    }
}

/// Platform-specific command manager
pub struct PlatformCommands {
    decoder: ConsoleDecoder,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(|| Self::with_decoder(console_decoder()))
    }

    pub fn with_decoder(decoder: ConsoleDecoder) -> Self {
        debug!("Console output decoder: {}", decoder.name());
        Self { decoder }
    }

    pub fn with_encoding(encoding: &'static Encoding) -> Self {
        Self::with_decoder(ConsoleDecoder::Encoding(encoding))
    }

    /// Get the platform-specific command name
    pub fn get_command(&self, base_name: &str) -> String {
        if cfg!(windows) && !base_name.to_ascii_lowercase().ends_with(".exe") {
            format!("{}.exe", base_name)
        } else {
            base_name.to_string()
        }
    }

    /// Decode one raw output line, replacing malformed sequences
    pub fn decode_line(&self, raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        self.decoder.decode(raw)
    }
}

#[cfg(windows)]
fn console_decoder() -> ConsoleDecoder {
    // SAFETY: GetOEMCP takes no arguments and only reads process state.
    let code_page = unsafe { windows_sys::Win32::Globalization::GetOEMCP() } as u16;
    if let Some(encoding) = codepage::to_encoding(code_page) {
        return ConsoleDecoder::Encoding(encoding);
    }
    ConsoleDecoder::single_byte(code_page).unwrap_or_else(|| {
        warn!("No decoder for OEM code page {}, falling back to UTF-8", code_page);
        ConsoleDecoder::Encoding(UTF_8)
    })
}

#[cfg(not(windows))]
fn console_decoder() -> ConsoleDecoder {
    ConsoleDecoder::Encoding(UTF_8)
}

/// Forcefully terminate a process and all of its descendants.
///
/// On Windows this goes through `taskkill /T`; on Unix the child is started in
/// its own process group and the whole group receives SIGKILL.
pub async fn kill_process_tree(pid: u32) {
    #[cfg(windows)]
    {
        let result = tokio::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()
            .await;
        match result {
            Ok(output) if output.status.success() => debug!("Killed process tree {}", pid),
            Ok(output) => warn!(
                "taskkill for {} exited with {}: {}",
                pid,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Failed to run taskkill for {}: {}", pid, e),
        }
    }

    #[cfg(unix)]
    {
        // SAFETY: killpg only sends a signal; a stale group id yields ESRCH.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            debug!("Killed process group {}", pid);
        } else {
            warn!(
                "killpg({}) failed: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }
}
