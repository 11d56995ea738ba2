pub mod builtin;
pub mod registry;

pub use builtin::{Builtin, BuiltinCapability};
pub use registry::CapabilitySet;
