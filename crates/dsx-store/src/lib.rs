//! The datastore contract for dsx.
//!
//! This crate defines the minimal key-value storage interface that every
//! dsx store and adapter implements, the lazy query machinery built on top
//! of it, and a reference in-memory backend.
//!
//! # Contract
//!
//! - [`Datastore`] -- open/close, put/get/has/delete, batches, queries, and
//!   streaming bulk variants with default implementations
//! - [`Batch`] -- writes accumulated until [`Batch::commit`]
//! - [`RawAccess`] -- optional capability exposing an un-transformed key space
//!
//! # Queries
//!
//! - [`Query`] / [`KeyQuery`] -- prefix, filters, orders, offset, limit
//! - [`stream`] -- the pull-based [`DataStream`] and its combinators
//!   (filter, take, skip, map, merge, sort_all)
//! - [`refine`] -- the standard prefix → filters → orders → offset → limit
//!   pipeline
//!
//! # Backends
//!
//! - [`MemoryDatastore`] -- `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Stores never interpret values; they are opaque bytes.
//! 2. Queries are lazy and pull-based; only ordering materializes results.
//! 3. Errors carry a structural [`ErrorKind`]; never match on message text.

pub mod error;
pub mod memory;
pub mod query;
pub mod stream;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use dsx_types::{Bytes, Key, Pair};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use memory::MemoryDatastore;
pub use query::{refine, Filter, KeyQuery, Order, Query, QueryItem};
pub use stream::{BoxStream, DataStream};
pub use traits::{Batch, Datastore, RawAccess, SharedDatastore};
