//! Reference resolution: names, subtypes and objects.

pub mod entity;
pub mod names;
pub mod subtype;

pub use entity::{EntityResolver, ResolutionSource, ResolvedObject};
pub use names::{best_match, compare_names, extract_name, normalize_name, NameMatchTier};
pub use subtype::{display_label, parse_selection, SubtypeChoice, SubtypeMatcher};
