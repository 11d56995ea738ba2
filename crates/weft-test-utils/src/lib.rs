//! Mocks and fixtures shared by the Weft test suites.

pub mod fixtures;
mod mock_llm;
mod store;

pub use mock_llm::{MockLlmClient, MockReply, RecordedCall};
pub use store::MemoryGraphStore;

use std::path::PathBuf;

use weft_core::config::AppConfig;

/// Parse a TOML snippet into an [`AppConfig`], panicking on error.
pub fn config_from_toml(toml_str: &str) -> AppConfig {
    AppConfig::from_toml(toml_str).expect("test config should parse")
}

/// Write `contents` to `weft.toml` in a fresh temporary directory.
///
/// Keep the returned guard alive for as long as the file is needed.
pub fn write_config_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weft.toml");
    std::fs::write(&path, contents).expect("write config");
    (dir, path)
}
