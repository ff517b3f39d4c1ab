//! # Line Scanner Module
//!
//! Questo modulo contiene i matcher senza stato applicati a ogni riga di DISM.
//!
//! ## Responsabilità:
//! - Estrae la percentuale dalle righe di progresso (`[==== 33.0% ====]`)
//! - Riconosce le due righe di valore del report, in inglese e coreano:
//!   - limite superiore recuperabile ("Backup and Disabled Features : 4.51 GB")
//!   - dimensione reale dello store ("Actual size of component store : 12.03 GB")
//! - Decide quali righe sono rumore per la vista live (barre, banner)
//!
//! Solo queste forme note vengono riconosciute; il resto è ignorato.

use regex::Regex;
use std::sync::OnceLock;

const UPPER_BOUND_PHRASES: &[&str] = &[
    "백업 및 사용 안 함",
    "backup and disabled",
    "backups and disabled",
    "reclaimable",
];
const ACTUAL_SIZE_PHRASES: &[&str] = &["실제 크기", "actual size"];
const BANNER_PREFIXES: &[&str] = &[
    "배포 이미지 서비스",
    "deployment image servicing",
    "version:",
    "이미지 버전",
];

/// Classification of a single output line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueLine {
    None,
    ReclaimableUpperBound(String),
    ActualStoreSize(String),
}

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("percent pattern is valid"))
}

fn bar_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[[=\-\s]*\d{1,3}(\.\d+)?%[=\-\s]*\]$").expect("bar pattern is valid")
    })
}

fn bare_percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{1,3}(\.\d+)?%$").expect("bare percent pattern is valid"))
}

/// Extract a percentage in `0..=100` from a raw line.
///
/// The number must not be glued to a preceding digit, so `1234%` yields nothing.
pub fn extract_percent(line: &str) -> Option<u8> {
    let mut from = 0;
    while let Some(caps) = percent_pattern().captures_at(line, from) {
        let number = caps.get(1)?;

        let preceded_by_digit = line[..number.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit());
        if preceded_by_digit {
            // candidates may overlap, retry one digit further
            from = number.start() + 1;
            continue;
        }

        return number
            .as_str()
            .parse::<f64>()
            .ok()
            .map(|value| value.clamp(0.0, 100.0).round() as u8);
    }
    None
}

fn contains_phrase(line: &str, phrases: &[&str]) -> bool {
    let lowered = line.to_lowercase();
    phrases.iter().any(|p| lowered.contains(p))
}

fn value_after_colon(line: &str) -> Option<String> {
    let (_, value) = line.split_once(':')?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Classify a line as one of the value lines the report cares about.
pub fn classify_value_line(line: &str) -> ValueLine {
    let s = line.trim();

    if contains_phrase(s, UPPER_BOUND_PHRASES) {
        if let Some(value) = value_after_colon(s) {
            return ValueLine::ReclaimableUpperBound(value);
        }
    }

    if contains_phrase(s, ACTUAL_SIZE_PHRASES) {
        if let Some(value) = value_after_colon(s) {
            return ValueLine::ActualStoreSize(value);
        }
    }

    ValueLine::None
}

/// First value text found for each field across a run's lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedValues {
    pub upper_bound: Option<String>,
    pub actual_size: Option<String>,
}

impl ScannedValues {
    /// Record a line; earlier matches win.
    pub fn observe(&mut self, line: &str) {
        match classify_value_line(line) {
            ValueLine::ReclaimableUpperBound(v) if self.upper_bound.is_none() => {
                self.upper_bound = Some(v);
            }
            ValueLine::ActualStoreSize(v) if self.actual_size.is_none() => {
                self.actual_size = Some(v);
            }
            _ => {}
        }
    }
}

/// Scan a whole line sequence, keeping the first match per field.
pub fn first_values<'a, I>(lines: I) -> ScannedValues
where
    I: IntoIterator<Item = &'a str>,
{
    let mut values = ScannedValues::default();
    for line in lines {
        values.observe(line);
    }
    values
}

/// True for lines that should be kept out of the live transcript view.
pub fn is_noise_line(line: &str) -> bool {
    let s = line.trim();

    if bar_pattern().is_match(s) {
        return true;
    }
    if s.contains('%') && s.contains('[') && s.contains(']') && s.contains('=') {
        return true;
    }
    if bare_percent_pattern().is_match(s) {
        return true;
    }

    let lowered = s.to_lowercase();
    BANNER_PREFIXES.iter().any(|p| lowered.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_percent_from_bar() {
        assert_eq!(extract_percent("[==========                 33.0%                          ]"), Some(33));
        assert_eq!(extract_percent("[===========================100.0%==========================]"), Some(100));
        assert_eq!(extract_percent("12.5 %"), Some(13));
        assert_eq!(extract_percent("progress 7%"), Some(7));
    }

    #[test]
    fn test_extract_percent_clamps_and_rejects() {
        assert_eq!(extract_percent("999%"), Some(100));
        assert_eq!(extract_percent("1234%"), None);
        assert_eq!(extract_percent("no percent here"), None);
        assert_eq!(extract_percent("%"), None);
    }

    #[test]
    fn test_extract_percent_skips_glued_number() {
        // the first candidate is glued to a digit, the second is valid
        assert_eq!(extract_percent("1234% then 40%"), Some(40));
    }

    #[test]
    fn test_extract_percent_finds_overlapping_candidate() {
        assert_eq!(extract_percent("1234.5%"), Some(5));
        assert_eq!(extract_percent("12.5 %"), Some(13));
    }

    #[test]
    fn test_classify_english_lines() {
        assert_eq!(
            classify_value_line("Backup and Disabled Features : 4.51 GB"),
            ValueLine::ReclaimableUpperBound("4.51 GB".into())
        );
        assert_eq!(
            classify_value_line("Backups and Disabled Features : 1.86 GB"),
            ValueLine::ReclaimableUpperBound("1.86 GB".into())
        );
        assert_eq!(
            classify_value_line("Reclaimable Packages : 2"),
            ValueLine::ReclaimableUpperBound("2".into())
        );
        assert_eq!(
            classify_value_line("Actual Size of Component Store : 12.03 GB"),
            ValueLine::ActualStoreSize("12.03 GB".into())
        );
    }

    #[test]
    fn test_classify_korean_lines() {
        assert_eq!(
            classify_value_line("백업 및 사용 안 함 기능 : 1.20 GB"),
            ValueLine::ReclaimableUpperBound("1.20 GB".into())
        );
        assert_eq!(
            classify_value_line("구성 요소 저장소의 실제 크기 : 8.10 GB"),
            ValueLine::ActualStoreSize("8.10 GB".into())
        );
    }

    #[test]
    fn test_classify_requires_value() {
        assert_eq!(classify_value_line("Actual size of component store :   "), ValueLine::None);
        assert_eq!(classify_value_line("Actual size of component store"), ValueLine::None);
        assert_eq!(classify_value_line("Date of Last Cleanup : 2024-01-01"), ValueLine::None);
    }

    #[test]
    fn test_first_match_wins() {
        let lines = [
            "Actual Size of Component Store : 12.03 GB",
            "Backup and Disabled Features : 4.51 GB",
            "Actual Size of Component Store : 99.00 GB",
            "Reclaimable Packages : 7",
        ];
        let values = first_values(lines.iter().copied());
        assert_eq!(values.actual_size.as_deref(), Some("12.03 GB"));
        assert_eq!(values.upper_bound.as_deref(), Some("4.51 GB"));
    }

    #[test]
    fn test_noise_lines() {
        assert!(is_noise_line("[==========                 33.0%                          ]"));
        assert!(is_noise_line("  45.5%  "));
        assert!(is_noise_line("Deployment Image Servicing and Management tool"));
        assert!(is_noise_line("Version: 10.0.19041.844"));
        assert!(is_noise_line("배포 이미지 서비스 및 관리 도구"));
        assert!(!is_noise_line("Actual Size of Component Store : 12.03 GB"));
        assert!(!is_noise_line("The operation completed successfully."));
        assert!(!is_noise_line(""));
    }
}
