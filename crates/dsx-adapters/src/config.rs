//! Declarative store layouts.
//!
//! A [`LayoutConfig`] describes a tree of adapters over in-memory leaves and
//! can be loaded from TOML:
//!
//! ```toml
//! type = "tiered"
//! buffer = 32
//!
//! [[tiers]]
//! type = "memory"
//!
//! [[tiers]]
//! type = "sharding"
//! shard = "/repo/flatfs/shard/v1/next-to-last/2"
//! inner = { type = "memory" }
//! ```

use std::sync::Arc;

use dsx_store::{MemoryDatastore, SharedDatastore, StoreError, StoreResult};
use dsx_types::Key;
use serde::{Deserialize, Serialize};

use crate::mount::{Mount, MountDatastore};
use crate::namespace::NamespaceDatastore;
use crate::shard::Shard;
use crate::sharding::ShardingDatastore;
use crate::tiered::{TieredDatastore, TieredOptions};

/// One node of a store layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LayoutConfig {
    /// A fresh [`MemoryDatastore`].
    Memory,
    Namespace {
        prefix: Key,
        inner: Box<LayoutConfig>,
    },
    /// Without `shard`, the inner store must already carry one.
    Sharding {
        #[serde(default)]
        shard: Option<Shard>,
        inner: Box<LayoutConfig>,
    },
    Mount {
        mounts: Vec<MountConfig>,
    },
    Tiered {
        tiers: Vec<LayoutConfig>,
        #[serde(default = "default_buffer")]
        buffer: usize,
    },
}

fn default_buffer() -> usize {
    TieredOptions::default().buffer
}

/// A mount table entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    pub prefix: Key,
    pub store: LayoutConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl LayoutConfig {
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|err| StoreError::InvalidConfig(err.to_string()))
    }

    /// Construct the described store. It still has to be opened.
    pub fn build(&self) -> StoreResult<SharedDatastore> {
        let store: SharedDatastore = match self {
            Self::Memory => Arc::new(MemoryDatastore::new()),
            Self::Namespace { prefix, inner } => {
                Arc::new(NamespaceDatastore::with_prefix(inner.build()?, prefix.clone()))
            }
            Self::Sharding { shard, inner } => Arc::new(ShardingDatastore::new(inner.build()?, *shard)),
            Self::Mount { mounts } => {
                let mounts = mounts
                    .iter()
                    .map(|m| Ok(Mount::new(m.prefix.clone(), m.store.build()?)))
                    .collect::<StoreResult<Vec<_>>>()?;
                Arc::new(MountDatastore::new(mounts))
            }
            Self::Tiered { tiers, buffer } => {
                if tiers.is_empty() {
                    return Err(StoreError::InvalidConfig(
                        "tiered layout needs at least one tier".into(),
                    ));
                }
                let tiers = tiers
                    .iter()
                    .map(LayoutConfig::build)
                    .collect::<StoreResult<Vec<_>>>()?;
                Arc::new(TieredDatastore::with_options(
                    tiers,
                    TieredOptions { buffer: *buffer },
                ))
            }
        };
        Ok(store)
    }
}
