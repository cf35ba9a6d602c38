//! Static sharding: which shard owns a key, and how a request reaches it.

use crate::config::ShardConfig;
use crate::core::{KvError, Result};
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{Instrument, debug, info_span, warn};

// Cluster support is split by responsibility for easier navigation.
include!("cluster/shard_hash.rs");
include!("cluster/topology.rs");
include!("cluster/forwarder.rs");
include!("cluster/in_memory_forwarder.rs");
include!("cluster/router.rs");
