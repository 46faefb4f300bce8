//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.

mod constants;
mod fixtures;
mod mock_blob_store;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::{january, TestEnv};
#[allow(unused_imports)]
pub use mock_blob_store::{MockBlobStore, RecordedPut};
