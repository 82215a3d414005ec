//! Composable datastore adapters for dsx.
//!
//! Every adapter implements [`dsx_store::Datastore`] and wraps one or more
//! child stores, so adapters nest freely: a namespace over a sharded store,
//! a mount table whose entries are tiered stores, and so on. Adapters own
//! no data of their own; all state lives in the children.
//!
//! # Adapters
//!
//! - [`keytransform`] -- [`KeyTransformDatastore`], rewriting keys through a
//!   [`KeyTransform`] while keeping queries in the caller's key space
//! - [`namespace`] -- [`NamespaceDatastore`], confining a caller under a prefix
//! - [`shard`] / [`sharding`] -- [`Shard`] functions and the
//!   [`ShardingDatastore`] that persists and applies them
//! - [`mount`] -- [`MountDatastore`], routing keys to children by prefix
//! - [`tiered`] -- [`TieredDatastore`], write-through replication with
//!   ordered read fallback
//!
//! # Configuration
//!
//! - [`config`] -- [`LayoutConfig`], a TOML-loadable description of an
//!   adapter tree

pub mod config;
mod fanout;
pub mod keytransform;
pub mod mount;
pub mod namespace;
pub mod shard;
pub mod sharding;
pub mod tiered;

#[cfg(test)]
mod testutil;

pub use config::{LayoutConfig, MountConfig};
pub use keytransform::{FnTransform, KeyTransform, KeyTransformDatastore};
pub use mount::{Mount, MountDatastore};
pub use namespace::{NamespaceDatastore, PrefixTransform};
pub use shard::Shard;
pub use sharding::{ShardTransform, ShardingDatastore};
pub use tiered::{TieredDatastore, TieredOptions};
