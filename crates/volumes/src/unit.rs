use serde::{Deserialize, Serialize};

use loadorder_core::{DomainError, DomainResult, ValueObject};

/// Round to the two decimals used for stored measurements.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Truncate to two decimals, tolerating binary noise just below a cent.
fn floor2(value: f64) -> f64 {
    (value * 100.0 + 1e-9).floor() / 100.0
}

/// Raw measurements of one package, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub height: f64,
    pub width: f64,
    pub length: f64,
}

impl ValueObject for Dimensions {}

impl Dimensions {
    pub fn new(height: f64, width: f64, length: f64) -> Self {
        Self { height, width, length }
    }

    fn validate(&self) -> DomainResult<()> {
        for (name, v) in [("height", self.height), ("width", self.width), ("length", self.length)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(DomainError::validation(format!(
                    "{name} must be a positive number, got {v}"
                )));
            }
        }
        Ok(())
    }
}

/// One physical package belonging to an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeUnit {
    /// 1-based position within the invoice.
    pub sequence: u32,
    pub height: f64,
    pub width: f64,
    pub length: f64,
    /// `height * width * length`, rounded to two decimals.
    pub cubic_m3: f64,
    /// Share of the invoice's declared weight, in kilograms.
    pub weight: f64,
}

impl ValueObject for VolumeUnit {}

impl VolumeUnit {
    pub fn new(sequence: u32, dims: Dimensions, weight: f64) -> DomainResult<Self> {
        dims.validate()?;
        if sequence == 0 {
            return Err(DomainError::validation("volume sequence starts at 1"));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(DomainError::validation(format!(
                "volume weight must be non-negative, got {weight}"
            )));
        }
        Ok(Self {
            sequence,
            height: dims.height,
            width: dims.width,
            length: dims.length,
            cubic_m3: round2(dims.height * dims.width * dims.length),
            weight: round2(weight),
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.height, self.width, self.length)
    }
}

/// Ordered set of volumes of one invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeDimensionSet {
    units: Vec<VolumeUnit>,
}

impl ValueObject for VolumeDimensionSet {}

impl VolumeDimensionSet {
    /// Build the set from raw measurements, apportioning `declared_weight`
    /// evenly. Shares are rounded down and the last unit absorbs the
    /// remainder, so the total matches the declared weight and no unit
    /// goes negative.
    pub fn from_dimensions(dims: &[Dimensions], declared_weight: f64) -> DomainResult<Self> {
        if !declared_weight.is_finite() || declared_weight < 0.0 {
            return Err(DomainError::validation("declared weight must be non-negative"));
        }
        let count = dims.len();
        let share = if count == 0 { 0.0 } else { floor2(declared_weight / count as f64) };

        let mut units = Vec::with_capacity(count);
        for (idx, d) in dims.iter().enumerate() {
            let weight = if idx + 1 == count {
                round2(declared_weight - share * (count - 1) as f64)
            } else {
                share
            };
            units.push(VolumeUnit::new(idx as u32 + 1, *d, weight)?);
        }
        Ok(Self { units })
    }

    /// Wrap units that were already computed (e.g. read back from storage).
    pub fn from_units(mut units: Vec<VolumeUnit>) -> DomainResult<Self> {
        units.sort_by_key(|u| u.sequence);
        for pair in units.windows(2) {
            if pair[0].sequence == pair[1].sequence {
                return Err(DomainError::invariant(format!(
                    "duplicate volume sequence {}",
                    pair[0].sequence
                )));
            }
        }
        Ok(Self { units })
    }

    pub fn units(&self) -> &[VolumeUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_cubic_m3(&self) -> f64 {
        round2(self.units.iter().map(|u| u.cubic_m3).sum())
    }

    pub fn total_weight(&self) -> f64 {
        round2(self.units.iter().map(|u| u.weight).sum())
    }

    /// Whether `other` is different enough to be worth storing.
    ///
    /// Only the unit count and the rounded totals are compared.
    pub fn differs_materially(&self, other: &Self) -> bool {
        self.len() != other.len()
            || self.total_cubic_m3() != other.total_cubic_m3()
            || self.total_weight() != other.total_weight()
    }
}
