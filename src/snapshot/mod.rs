//! Snapshots - plain data, normalization, diffing and patches.
//!
//! ```text
//! live Value graph --normalize--> PlainValue --diff(previous, current)--> Patch
//! ```

mod diff;
mod normalize;
mod patch;
mod plain;

pub use diff::{diff, diff_bindings};
pub use normalize::{NormalizeError, normalize, normalize_bindings, normalize_each};
pub use patch::{Patch, PatchError, PathSegment, is_path_key, parse_path};
pub use plain::{Kind, PlainValue};
