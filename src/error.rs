//! Error taxonomy for tree construction and report processing
//!
//! Mirrors the hand-rolled error enum + `From` impl style of
//! `usbd-human-interface-device`'s `UsbHidError` rather than reaching for
//! `thiserror`/`anyhow`: this crate has no transport errors to wrap, just a
//! handful of locally-meaningful fatal/non-fatal conditions.

use core::fmt;

/// Fatal failure while constructing an [`crate::tree::ElementTree`].
///
/// Any `BuildError` aborts the build; no partial tree is returned to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// `report_bits * report_count` does not fit in a `u32`.
    FieldSizeOverflow,
    /// The cookie allocator ran out of identifiers (more than `u32::MAX`
    /// elements were registered).
    CookieExhausted,
    /// A collection or array handler was asked to hold more than
    /// `TreeBuilder::max_children` entries outside the accepted overflow
    /// path (see `BuildError::ChildLimitExceeded` for the recoverable
    /// case).
    InvalidRecord(&'static str),
    /// An array handler's `usage_max < usage_min` makes `array_items`
    /// sizing impossible.
    InvalidUsageRange,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldSizeOverflow => {
                write!(f, "report_bits * report_count overflowed while sizing a field")
            }
            Self::CookieExhausted => write!(f, "cookie allocator exhausted"),
            Self::InvalidRecord(why) => write!(f, "malformed descriptor record: {why}"),
            Self::InvalidUsageRange => write!(f, "usage_max is less than usage_min"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Reason `process_report` skipped a handler element without treating it
/// as an error. Not returned to callers of the public API — `process_report`
/// communicates skips as `false` ("unchanged") — but surfaced internally for
/// logging and for tests that want to assert *why* nothing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSkip {
    WrongReportId,
    TooShort,
    NotInterruptPath,
    RollOverPhantom,
}

impl fmt::Display for ReportSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::WrongReportId => "report id does not match this handler",
            Self::TooShort => "report is shorter than this handler's field",
            Self::NotInterruptPath => "interrupt handler skipped on a non-interrupt report",
            Self::RollOverPhantom => "keyboard usage suppressed during roll-over",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for ReportSkip {}

/// The external value-commit (`updateElementValues`/`postElementValues`
/// equivalent) rejected a write. The element's value is rolled back to
/// `previous_value` by the caller of this error before it propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostFailure {
    pub status: i32,
}

impl fmt::Display for PostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "external value commit failed with status {}", self.status)
    }
}

impl std::error::Error for PostFailure {}
