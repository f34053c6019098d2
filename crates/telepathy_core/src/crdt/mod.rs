//! CRDT-backed document store.
//!
//! This module wraps a [yrs](https://docs.rs/yrs) document in a path-addressed
//! API. It provides:
//!
//! - [`TelepathicObject`]: the replicated document with its transaction log
//! - [`DocPath`]: parsing and native navigation of `a/b/0/c` style paths
//! - [`convert`]: explicit conversion between native values and CRDT values
//!
//! All containers inside the live document are Y.Map / Y.Array, so remote
//! Yjs clients see the same structure.

pub mod convert;
mod object;
mod path;

pub use object::TelepathicObject;
pub use path::DocPath;
