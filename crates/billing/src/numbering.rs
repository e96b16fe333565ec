//! Invoice number format
//!
//! Numbers look like `INV-202501-0007`: a fixed prefix, the issue month as
//! `YYYYMM`, and a per-tenant sequence zero-padded to four digits. Sequences
//! past 9999 keep growing (`INV-202501-10000`); parsing only accepts the
//! canonical rendering, so `format` and `parse` are exact inverses.

use tirta_shared::UsagePeriod;

use crate::error::{BillingError, BillingResult};

pub const INVOICE_NUMBER_PREFIX: &str = "INV";

/// Invoice numbers issued before this year are not valid
pub const MIN_INVOICE_YEAR: i32 = 2024;

const SEQUENCE_WIDTH: usize = 4;

/// Parsed components of an invoice number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvoiceNumber {
    year: i32,
    month: u8,
    sequence: u32,
}

impl InvoiceNumber {
    pub fn new(period: UsagePeriod, sequence: u32) -> Self {
        Self {
            year: period.year(),
            month: period.month(),
            sequence,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Parse the canonical string form
    ///
    /// Only the shape is checked here; see [`InvoiceNumber::is_valid`] for the
    /// range rules.
    pub fn parse(s: &str) -> BillingResult<Self> {
        let invalid = || BillingError::InvalidInvoiceNumber(s.to_string());

        let rest = s
            .strip_prefix(INVOICE_NUMBER_PREFIX)
            .and_then(|r| r.strip_prefix('-'))
            .ok_or_else(invalid)?;
        let (year_month, sequence) = rest.split_once('-').ok_or_else(invalid)?;

        if year_month.len() != 6 || !year_month.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if sequence.len() < SEQUENCE_WIDTH || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year_month[..4].parse().map_err(|_| invalid())?;
        let month: u8 = year_month[4..].parse().map_err(|_| invalid())?;
        let seq: u32 = sequence.parse().map_err(|_| invalid())?;

        // Reject non-canonical padding such as "00012" for 12
        if format!("{:0width$}", seq, width = SEQUENCE_WIDTH) != sequence {
            return Err(invalid());
        }

        Ok(Self {
            year,
            month,
            sequence: seq,
        })
    }

    /// Year from 2024, a real calendar month, and a sequence of at least 1
    pub fn is_valid(&self) -> bool {
        self.year >= MIN_INVOICE_YEAR && (1..=12).contains(&self.month) && self.sequence >= 1
    }
}

impl std::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{:04}{:02}-{:0width$}",
            INVOICE_NUMBER_PREFIX,
            self.year,
            self.month,
            self.sequence,
            width = SEQUENCE_WIDTH
        )
    }
}

impl std::str::FromStr for InvoiceNumber {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Render the invoice number for a month and sequence
pub fn format_invoice_number(period: UsagePeriod, sequence: u32) -> String {
    InvoiceNumber::new(period, sequence).to_string()
}

/// Shared prefix of every number issued in `period`, e.g. `INV-202501-`
pub fn invoice_number_prefix(period: UsagePeriod) -> String {
    format!("{}-{}-", INVOICE_NUMBER_PREFIX, period.compact())
}

/// Check that a string is a well-formed, in-range invoice number
pub fn validate_invoice_number(s: &str) -> bool {
    InvoiceNumber::parse(s).is_ok_and(|number| number.is_valid())
}
