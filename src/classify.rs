//! Maps a driver error to one of `{NoData, Communication, System, Application}`.
//! The mapping function itself is fixed; the state codes and vendor codes it
//! consults are data, kept here as plain constants so they can be extended
//! without touching the classification logic.

use crate::driver::{DriverError, ErrorCategory};

/// The result of classifying a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Empty-result signal; the connection is fine.
    NoData,
    /// The physical connection is suspect and must be retired.
    Communication,
    /// The physical connection is suspect and must be retired.
    System,
    /// The connection is fine, surface the error to the caller.
    Application,
}

/// SQLSTATE codes that mean "disconnected" beyond the `"08"` class prefix.
const DISCONNECTION_STATE_CODES: &[&str] = &["57P01", "57P02", "57P03"];

/// Vendor numeric codes that mean "lost connection" for drivers that don't
/// use SQLSTATE (e.g. MySQL's `CR_SERVER_GONE_ERROR` family).
const DISCONNECTION_VENDOR_CODES: &[i64] = &[2006, 2013, 1042, 1043];

/// SQLSTATE codes that mean "system error" (feature-not-supported,
/// system-error, configuration-error classes).
const SYSTEM_STATE_CODES: &[&str] = &["0A000", "58000", "58030", "F0000"];

/// Vendor numeric codes that mean "system error".
const SYSTEM_VENDOR_CODES: &[i64] = &[1205, 1213];

/// Walk the chained-cause list up to ten links and return the first
/// non-`Application` classification found; if none, `Application`.
pub fn classify(err: &dyn DriverError) -> Classification {
    let mut current: Option<&dyn DriverError> = Some(err);
    let mut hops = 0;

    while let Some(cause) = current {
        let verdict = classify_one(cause);
        if verdict != Classification::Application {
            return verdict;
        }

        hops += 1;
        if hops >= 10 {
            break;
        }
        current = DriverError::cause(cause);
    }

    Classification::Application
}

fn classify_one(err: &dyn DriverError) -> Classification {
    if let Some(code) = err.state_code() {
        if code.starts_with("02") {
            return Classification::NoData;
        }

        if code.starts_with("08") || DISCONNECTION_STATE_CODES.contains(&code) {
            return Classification::Communication;
        }

        if SYSTEM_STATE_CODES.contains(&code) {
            return Classification::System;
        }
    }

    if let Some(vendor) = err.vendor_code() {
        if DISCONNECTION_VENDOR_CODES.contains(&vendor) {
            return Classification::Communication;
        }
        if SYSTEM_VENDOR_CODES.contains(&vendor) {
            return Classification::System;
        }
    }

    if let Some(category) = err.category() {
        match category {
            ErrorCategory::Timeout
            | ErrorCategory::Recoverable
            | ErrorCategory::InvalidAuthorization
            | ErrorCategory::NonTransientConnection
            | ErrorCategory::TransientConnection => return Classification::Communication,
            ErrorCategory::NonTransient | ErrorCategory::TransactionRollback => {
                return Classification::System
            }
            ErrorCategory::Other => {}
        }
    }

    Classification::Application
}
