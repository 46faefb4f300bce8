//! Shared constants for end-to-end tests

// ============================================================================
// Seeded entities
// ============================================================================

pub const WIDGET_UID: i64 = 99;
pub const WIDGET_NAME: &str = "Widget";
pub const WIDGET_VALUE: i64 = 50;

pub const GADGET_UID: i64 = 100;
pub const GADGET_NAME: &str = "Gadget";
pub const GADGET_VALUE: i64 = 10;

// ============================================================================
// Runs
// ============================================================================

/// Run timestamp of the first run of every test.
pub const FIRST_RUN_TS: &str = "2024-01-01 00:00:00";

/// Account key of the mock blob store ("secret", base64 encoded).
pub const ACCOUNT_KEY: &str = "c2VjcmV0";
