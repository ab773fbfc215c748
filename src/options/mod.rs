//! User-Tunable Options
//!
//! - [`discover`] / [`OptionDiscoveryCache`]: find options in a pack
//! - [`OptionSet`]: the discovered options, boolean and enum partitions
//! - [`OptionValues`]: a sparse overlay of the user's non-default choices
//!
//! # Usage
//!
//! ```rust,ignore
//! let set = Arc::new(discover(&source, &settings));
//! let mut values = OptionValues::new(Arc::clone(&set));
//! values.set_choice("SHADOW_QUALITY", "2")?;
//!
//! // Persist only what differs from the defaults.
//! let props = values.to_properties_map();
//! let restored = OptionValues::from_properties(set, &props);
//! assert_eq!(restored, values);
//! ```

pub mod discovery;
pub mod model;

pub use discovery::{OptionDiscoveryCache, discover, scan_file};
pub use model::{
    BooleanOption, DeclarationKind, EnumOption, OptionOrigin, OptionRef, OptionSet, OptionValue,
    OptionValues, ShaderOption,
};
