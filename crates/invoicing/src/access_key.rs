//! 44-digit fiscal document access key.

use serde::{Deserialize, Serialize};

use loadorder_core::DomainError;

pub const ACCESS_KEY_LEN: usize = 44;

/// Access key of an electronic invoice: 44 ASCII digits.
///
/// Layout: state(2) year-month(4) issuer tax id(14) model(2) series(3)
/// number(9) emission type(1) numeric code(8) check digit(1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Parse an access key, ignoring embedded whitespace.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() != ACCESS_KEY_LEN {
            return Err(DomainError::invalid_id(format!(
                "access key must have {ACCESS_KEY_LEN} digits, got {}",
                digits.len()
            )));
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::invalid_id("access key must contain only digits"));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn state_code(&self) -> &str {
        &self.0[0..2]
    }

    /// Issue year and month as `YYMM`.
    pub fn year_month(&self) -> &str {
        &self.0[2..6]
    }

    pub fn issuer_tax_id(&self) -> &str {
        &self.0[6..20]
    }

    pub fn model(&self) -> &str {
        &self.0[20..22]
    }

    /// Series without left padding (`"001"` -> `"1"`).
    pub fn series(&self) -> &str {
        trim_zeros(&self.0[22..25])
    }

    /// Invoice number without left padding.
    pub fn number(&self) -> &str {
        trim_zeros(&self.0[25..34])
    }

    pub fn emission_type(&self) -> &str {
        &self.0[34..35]
    }

    pub fn numeric_code(&self) -> &str {
        &self.0[35..43]
    }

    pub fn check_digit(&self) -> u32 {
        u32::from(self.0.as_bytes()[43] - b'0')
    }

    /// Mod-11 check over the first 43 digits, weights 2..=9 from the right.
    pub fn has_valid_check_digit(&self) -> bool {
        let mut sum = 0u32;
        let mut weight = 2u32;
        for b in self.0.as_bytes()[..43].iter().rev() {
            sum += u32::from(b - b'0') * weight;
            weight = if weight == 9 { 2 } else { weight + 1 };
        }
        let remainder = sum % 11;
        let expected = if remainder < 2 { 0 } else { 11 - remainder };
        expected == self.check_digit()
    }
}

fn trim_zeros(s: &str) -> &str {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() { "0" } else { trimmed }
}

impl TryFrom<String> for AccessKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(value: AccessKey) -> Self {
        value.0
    }
}

impl core::fmt::Display for AccessKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
