//! Pack Filesystem Model
//!
//! - [`PackPath`]: normalized pack-rooted paths and include resolution rules
//! - [`ShaderStage`]: the stage-extension table and keyword fallback
//! - [`PackSource`]: read access to a pack's files

pub mod path;
pub mod source;
pub mod stage;

pub use path::PackPath;
pub use source::{DirectorySource, MemorySource, PackSource};
pub use stage::ShaderStage;
