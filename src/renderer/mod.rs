//! Renderer - retained-snapshot diffing onto the host write primitive.

mod diff;

pub use diff::PatchRenderer;
