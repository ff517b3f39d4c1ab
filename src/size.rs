//! # Size Parsing Module
//!
//! Questo modulo converte le dimensioni stampate da DISM ("12.03 GB", "0 bytes",
//! "1,024.5 MB") in megabyte e viceversa.
//!
//! ## Regole:
//! - Base 1024 ovunque (DISM usa unità binarie con etichette decimali)
//! - I separatori delle migliaia (`,`) vengono rimossi prima del parsing
//! - Tutto ciò che non somiglia a `<numero> <unità>` diventa `0.0`, letto come
//!   "sconosciuto". L'output è localizzato e non è un contratto stabile, quindi
//!   un mancato riconoscimento non deve mai fermare un'esecuzione.
//!
//! ## Esempio:
//! ```rust
//! use winsxs_cleanup::size::{format_mb, parse_size_mb};
//!
//! assert_eq!(parse_size_mb("2 GB"), 2048.0);
//! assert_eq!(format_mb(2048.0), "2.00 GB");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

const MB_PER_GB: f64 = 1024.0;
const MB_PER_TB: f64 = 1024.0 * 1024.0;

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?P<num>[\d.,]+)\s*(?P<unit>TB|GB|MB|KB|bytes?|B)")
            .expect("size pattern is valid")
    })
}

/// Parse a human readable size into megabytes.
///
/// Returns `0.0` when the text cannot be understood.
pub fn parse_size_mb(text: &str) -> f64 {
    let s = text.trim();

    if s.eq_ignore_ascii_case("0 bytes") || s.eq_ignore_ascii_case("0 byte") || s == "0" {
        return 0.0;
    }

    let Some(caps) = size_pattern().captures(s) else {
        return 0.0;
    };

    let number = caps["num"].replace(',', "");
    let Ok(value) = number.parse::<f64>() else {
        return 0.0;
    };

    let mb = match caps["unit"].to_ascii_uppercase().as_str() {
        "TB" => value * MB_PER_TB,
        "GB" => value * MB_PER_GB,
        "MB" => value,
        "KB" => value / 1024.0,
        "B" | "BYTE" | "BYTES" => value / MB_PER_TB,
        _ => 0.0,
    };

    if mb.is_finite() && mb > 0.0 {
        mb
    } else {
        0.0
    }
}

/// Render a megabyte value in the largest unit that keeps it readable.
pub fn format_mb(mb: f64) -> String {
    if !(mb > 0.0) {
        return "0.0 MB".to_string();
    }

    if mb >= MB_PER_TB {
        format!("{:.2} TB", mb / MB_PER_TB)
    } else if mb >= MB_PER_GB {
        format!("{:.2} GB", mb / MB_PER_GB)
    } else {
        format!("{:.1} MB", mb)
    }
}

/// A size in megabytes. Zero means "not measured".
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeMeasurement(f64);

impl SizeMeasurement {
    pub const UNKNOWN: Self = Self(0.0);

    /// Build from a megabyte value; negative or non-finite input is unknown.
    pub fn from_mb(mb: f64) -> Self {
        if mb.is_finite() && mb > 0.0 {
            Self(mb)
        } else {
            Self::UNKNOWN
        }
    }

    pub fn parse(text: &str) -> Self {
        Self(parse_size_mb(text))
    }

    pub fn mb(self) -> f64 {
        self.0
    }

    pub fn is_known(self) -> bool {
        self.0 > 0.0
    }

    /// Formatted value, or `-` when nothing was measured
    pub fn label(self) -> String {
        if self.is_known() {
            format_mb(self.0)
        } else {
            "-".to_string()
        }
    }
}

impl fmt::Display for SizeMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_mb(self.0))
    }
}
