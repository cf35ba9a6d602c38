/// Immutable view of the cluster as seen from one node.
///
/// Built once at startup from the shard table and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTopology {
    shard_count: u32,
    self_index: u32,
    addresses: HashMap<u32, String>,
    replica_addresses: HashMap<u32, Vec<String>>,
}

impl ShardTopology {
    /// Builds a topology from an ordered list of owner addresses (index = position).
    pub fn new(self_index: u32, addresses: Vec<String>) -> Result<Self> {
        let shards = addresses
            .into_iter()
            .enumerate()
            .map(|(idx, address)| ShardConfig {
                name: format!("shard-{}", idx),
                idx: idx as u32,
                address,
                replicas: Vec::new(),
            })
            .collect::<Vec<_>>();
        let name = format!("shard-{}", self_index);
        Self::from_shards(&shards, &name)
    }

    /// Validates the shard table and locates the current node by `self_name`.
    ///
    /// Fails on an empty table, duplicate indices, gaps in `0..count`, empty
    /// addresses, or when `self_name` is not listed.
    pub fn from_shards(shards: &[ShardConfig], self_name: &str) -> Result<Self> {
        if shards.is_empty() {
            return Err(KvError::Config(
                "shard table must list at least one shard".to_string(),
            ));
        }

        let shard_count = shards.len() as u32;
        let mut addresses = HashMap::new();
        let mut replica_addresses = HashMap::new();
        let mut self_index = None;

        for shard in shards {
            if addresses.contains_key(&shard.idx) {
                return Err(KvError::Config(format!(
                    "duplicate shard index: {}",
                    shard.idx
                )));
            }
            if shard.address.trim().is_empty() {
                return Err(KvError::Config(format!(
                    "shard {} ({}) has an empty address",
                    shard.idx, shard.name
                )));
            }
            addresses.insert(shard.idx, shard.address.clone());
            replica_addresses.insert(shard.idx, shard.replicas.clone());

            if shard.name == self_name {
                if self_index.is_some() {
                    return Err(KvError::Config(format!(
                        "shard name {:?} appears more than once",
                        self_name
                    )));
                }
                self_index = Some(shard.idx);
            }
        }

        for idx in 0..shard_count {
            if !addresses.contains_key(&idx) {
                return Err(KvError::Config(format!(
                    "missing shard with index: {}",
                    idx
                )));
            }
        }

        let self_index = self_index.ok_or_else(|| {
            KvError::Config(format!("current shard {:?} not found", self_name))
        })?;

        Ok(Self {
            shard_count,
            self_index,
            addresses,
            replica_addresses,
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn self_index(&self) -> u32 {
        self.self_index
    }

    /// Shard index owning `key`.
    pub fn resolve(&self, key: &[u8]) -> u32 {
        stable_shard_for(key, self.shard_count)
    }

    pub fn is_local(&self, key: &[u8]) -> bool {
        self.resolve(key) == self.self_index
    }

    /// Address of the owner of `shard`.
    pub fn address_of(&self, shard: u32) -> Result<&str> {
        self.addresses
            .get(&shard)
            .map(String::as_str)
            .ok_or_else(|| {
                KvError::Routing(format!(
                    "shard {} is out of range for shard_count {}",
                    shard, self.shard_count
                ))
            })
    }

    /// Configured replica addresses for `shard`. Informational only.
    pub fn replicas_of(&self, shard: u32) -> &[String] {
        self.replica_addresses
            .get(&shard)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Address a follower of this node's shard pulls from.
    pub fn leader_address(&self) -> &str {
        self.addresses
            .get(&self.self_index)
            .map(String::as_str)
            .unwrap_or_default()
    }
}
