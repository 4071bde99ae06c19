//! Stored label codes.
//!
//! Two formats coexist in storage:
//! - `{number}-VOL-{sequence}` (older records)
//! - `{number}-{sequence}-{timestamp}`, where the timestamp may itself
//!   contain dashes (`11082025-2313`)
//!
//! Both carry the invoice number and volume sequence, which is what
//! reconciliation matches on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelCodeFormat {
    Volume,
    Timestamped,
}

/// A stored code broken down into its positional parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCode {
    pub invoice_number: String,
    pub sequence: u32,
    pub format: LabelCodeFormat,
}

impl LabelCode {
    /// Parse `code` as a label of `invoice_number`.
    ///
    /// The number is matched as a prefix, so numbers containing dashes are
    /// handled. Returns `None` for codes of other invoices or unknown shapes.
    pub fn parse(code: &str, invoice_number: &str) -> Option<Self> {
        let rest = code.trim().strip_prefix(invoice_number)?.strip_prefix('-')?;

        if let Some(seq) = rest.strip_prefix("VOL-") {
            return Some(Self {
                invoice_number: invoice_number.to_string(),
                sequence: parse_sequence(seq)?,
                format: LabelCodeFormat::Volume,
            });
        }

        let (seq, timestamp) = rest.split_once('-')?;
        if timestamp.is_empty() || !timestamp.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return None;
        }
        Some(Self {
            invoice_number: invoice_number.to_string(),
            sequence: parse_sequence(seq)?,
            format: LabelCodeFormat::Timestamped,
        })
    }

    /// Code in the older `{number}-VOL-{sequence}` format.
    pub fn volume_code(invoice_number: &str, sequence: u32) -> String {
        format!("{invoice_number}-VOL-{sequence}")
    }
}

fn parse_sequence(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().filter(|n| *n > 0)
}
