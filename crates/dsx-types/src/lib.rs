//! Foundation types for dsx, a composition layer over key-value datastores.
//!
//! Every other dsx crate depends on `dsx-types`.
//!
//! # Key Types
//!
//! - [`Key`] -- Hierarchical, path-like identifier (`/a/b/c`)
//! - [`Pair`] -- A key together with its opaque byte value, as yielded by queries

pub mod key;
pub mod pair;

pub use bytes::Bytes;
pub use key::Key;
pub use pair::Pair;
