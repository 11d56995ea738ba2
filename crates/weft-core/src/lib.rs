pub mod config;
pub mod error;
pub mod fragment;
pub mod graph;
pub mod records;
pub mod recovery;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, WeftError};
pub use fragment::{Fragment, FragmentDelta, FragmentSink};
pub use types::*;
