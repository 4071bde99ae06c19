use serde::{Deserialize, Serialize};

use loadorder_core::{DomainError, ValueObject};

/// Kind of tax registration, told apart by digit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxIdKind {
    /// Individual (11 digits).
    Individual,
    /// Company (14 digits).
    Company,
}

/// Tax registration number of a party, digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    /// Parse a tax id, ignoring the usual punctuation (`.`, `-`, `/`, spaces).
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits: String = raw
            .chars()
            .filter(|c| !matches!(c, '.' | '-' | '/' | ' '))
            .collect();

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "tax id must contain only digits: {raw}"
            )));
        }
        match digits.len() {
            11 | 14 => Ok(Self(digits)),
            n => Err(DomainError::invalid_id(format!(
                "tax id must have 11 or 14 digits, got {n}"
            ))),
        }
    }

    pub fn kind(&self) -> TaxIdKind {
        if self.0.len() == 14 {
            TaxIdKind::Company
        } else {
            TaxIdKind::Individual
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaxId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

impl core::fmt::Display for TaxId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Postal address of a party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    pub district: String,
    pub city: String,
    /// Two-letter state code.
    pub state: String,
    pub postal_code: String,
}

/// Which side of the movement a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Sender,
    Recipient,
}

/// Snapshot of a party as printed on an invoice or typed into the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRecord {
    pub tax_id: Option<TaxId>,
    pub name: String,
    pub trade_name: Option<String>,
    pub state_registration: Option<String>,
    pub address: Address,
    pub phone: Option<String>,
}

impl ValueObject for PartyRecord {}

impl PartyRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_tax_id(mut self, tax_id: TaxId) -> Self {
        self.tax_id = Some(tax_id);
        self
    }

    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// A party with neither a name nor a tax id carries no information.
    pub fn is_empty(&self) -> bool {
        !self.has_name() && self.tax_id.is_none()
    }
}
