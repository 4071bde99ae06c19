use chrono::{DateTime, FixedOffset, Offset, Utc};

/// UTC-03:00, the timezone labels are printed in unless configured otherwise.
pub const DEFAULT_OFFSET_MINUTES: i32 = -180;

/// Source of "now" for label generation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Builds display identities of the form `{number}-{seq:03}-{ddmmyyyy}-{hhmm}`.
///
/// The date and time are rendered in one fixed timezone so that the same
/// instant always yields the same identity, wherever the process runs.
#[derive(Debug, Clone, Copy)]
pub struct LabelIdGenerator {
    offset: FixedOffset,
}

impl Default for LabelIdGenerator {
    fn default() -> Self {
        Self::with_offset_minutes(DEFAULT_OFFSET_MINUTES).unwrap_or(Self { offset: Utc.fix() })
    }
}

impl LabelIdGenerator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// `None` when the offset is outside +/- 24h.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn generate(&self, invoice_number: &str, sequence: u32, clock: &dyn Clock) -> String {
        self.generate_at(invoice_number, sequence, clock.now())
    }

    pub fn generate_at(&self, invoice_number: &str, sequence: u32, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        format!(
            "{invoice_number}-{sequence:03}-{}",
            local.format("%d%m%Y-%H%M")
        )
    }
}
