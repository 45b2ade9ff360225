//! Human-readable document numbers: `INV-2026-000042`, `TXN-2026-000007`.
//!
//! Sequences are per prefix and calendar year, allocated by the store inside
//! the same atomic unit that inserts the document.

use chrono::{DateTime, Datelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Invoice,
    Transaction,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "INV",
            DocumentKind::Transaction => "TXN",
        }
    }
}

/// Sequence year for a document issued at `at`.
pub fn sequence_year(at: DateTime<Utc>) -> i32 {
    at.year()
}

pub fn format_number(kind: DocumentKind, year: i32, sequence: i64) -> String {
    format!("{}-{}-{:06}", kind.prefix(), year, sequence)
}
