/// How a routed operation was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome<T> {
    /// This node owns the key; `value` is the local result.
    Local { shard: u32, value: T },
    /// Another shard owns the key; its answer is relayed unmodified.
    Forwarded {
        shard: u32,
        address: String,
        response: ForwardResponse,
    },
}

/// Single-hop request router: run locally when this node owns the key,
/// otherwise replay the original request against the owner.
#[derive(Clone)]
pub struct ShardRouter {
    topology: Arc<ShardTopology>,
    forwarder: Arc<dyn ShardForwarder>,
}

impl ShardRouter {
    pub fn new(topology: Arc<ShardTopology>, forwarder: Arc<dyn ShardForwarder>) -> Self {
        Self {
            topology,
            forwarder,
        }
    }

    pub fn topology(&self) -> &Arc<ShardTopology> {
        &self.topology
    }

    /// Routes `operation` on `key`.
    ///
    /// `local` runs only when the key resolves to this node; its error is returned
    /// as-is. Forwarding never re-resolves on the remote side and is not retried.
    pub async fn route<T, F, Fut>(
        &self,
        operation: &str,
        key: &[u8],
        request: &ForwardRequest,
        local: F,
    ) -> Result<RouteOutcome<T>>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let shard = self.topology.resolve(key);
        let span = info_span!(
            "route",
            op = operation,
            shard,
            self_shard = self.topology.self_index()
        );

        if shard == self.topology.self_index() {
            let value = local(shard).instrument(span).await?;
            return Ok(RouteOutcome::Local { shard, value });
        }

        let address = self.topology.address_of(shard)?.to_string();
        async {
            debug!(peer = %address, path = %request.path_and_query, "forwarding request");
            let response = self
                .forwarder
                .forward(&address, request)
                .await
                .inspect_err(|err| warn!(peer = %address, error = %err, "forward failed"))?;
            Ok::<_, KvError>(RouteOutcome::Forwarded {
                shard,
                address,
                response,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    fn two_shard_topology(self_index: u32) -> Arc<ShardTopology> {
        Arc::new(
            ShardTopology::new(
                self_index,
                vec!["shard-zero:8080".to_string(), "shard-one:8080".to_string()],
            )
            .unwrap(),
        )
    }

    fn shard_config(name: &str, idx: u32, address: &str) -> ShardConfig {
        ShardConfig {
            name: name.to_string(),
            idx,
            address: address.to_string(),
            replicas: Vec::new(),
        }
    }

    #[test]
    fn test_stable_shard_for_is_fnv1() {
        // FNV-1 64 reference values
        assert_eq!(
            stable_shard_for(b"a", u32::MAX),
            (0xaf63bd4c8601b7be % u32::MAX as u64) as u32
        );
        assert_eq!(stable_shard_for(b"keep-key", 2), 0);
        assert_eq!(stable_shard_for(b"remove-key", 2), 1);
        assert_eq!(stable_shard_for(b"anything", 1), 0);
        assert_eq!(stable_shard_for(b"anything", 0), 0);
    }

    #[test]
    fn test_resolve_is_stable_across_nodes() {
        let zero = two_shard_topology(0);
        let one = two_shard_topology(1);
        for i in 0..200 {
            let key = format!("key-{}", i);
            assert_eq!(zero.resolve(key.as_bytes()), one.resolve(key.as_bytes()));
            assert_eq!(zero.resolve(key.as_bytes()), zero.resolve(key.as_bytes()));
            assert!(zero.resolve(key.as_bytes()) < 2);
        }
    }

    #[test]
    fn test_topology_rejects_duplicate_index() {
        let shards = vec![shard_config("a", 0, "a:1"), shard_config("b", 0, "b:1")];
        let err = ShardTopology::from_shards(&shards, "a").unwrap_err();
        assert!(matches!(err, KvError::Config(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_topology_rejects_gap() {
        let shards = vec![shard_config("a", 0, "a:1"), shard_config("b", 2, "b:1")];
        let err = ShardTopology::from_shards(&shards, "a").unwrap_err();
        assert!(
            matches!(err, KvError::Config(msg) if msg.contains("missing shard with index: 1"))
        );
    }

    #[test]
    fn test_topology_rejects_unknown_self() {
        let shards = vec![shard_config("a", 0, "a:1"), shard_config("b", 1, "b:1")];
        assert!(matches!(
            ShardTopology::from_shards(&shards, "c"),
            Err(KvError::Config(_))
        ));
        assert!(matches!(
            ShardTopology::from_shards(&[], "a"),
            Err(KvError::Config(_))
        ));
    }

    #[test]
    fn test_topology_lookups() {
        let mut shards = vec![shard_config("a", 1, "a:1"), shard_config("b", 0, "b:1")];
        shards[0].replicas = vec!["a-replica:1".to_string()];
        let topology = ShardTopology::from_shards(&shards, "a").unwrap();

        assert_eq!(topology.shard_count(), 2);
        assert_eq!(topology.self_index(), 1);
        assert_eq!(topology.address_of(0).unwrap(), "b:1");
        assert_eq!(topology.leader_address(), "a:1");
        assert_eq!(topology.replicas_of(1), ["a-replica:1".to_string()]);
        assert!(topology.replicas_of(0).is_empty());
        let owned = (0..)
            .map(|i| format!("k{}", i))
            .find(|key| topology.resolve(key.as_bytes()) == 1)
            .unwrap();
        assert!(topology.is_local(owned.as_bytes()));
        assert!(matches!(topology.address_of(7), Err(KvError::Routing(_))));
    }

    #[test]
    fn test_http_base_url() {
        assert_eq!(http_base_url("127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(http_base_url("https://db.local/"), "https://db.local");
    }

    #[tokio::test]
    async fn test_route_runs_locally_for_owned_key() {
        let forwarder = Arc::new(InMemoryForwarder::new());
        let router = ShardRouter::new(two_shard_topology(0), forwarder.clone());

        let request = ForwardRequest::get("/get?key=keep-key");
        let outcome = router
            .route("get", b"keep-key", &request, |shard| async move {
                Ok(format!("local {}", shard))
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RouteOutcome::Local {
                shard: 0,
                value: "local 0".to_string()
            }
        );
        assert!(forwarder.delivered().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_forwards_and_relays_verbatim() {
        let forwarder = Arc::new(InMemoryForwarder::new());
        let peer = axum::Router::new().route(
            "/get",
            get(|| async { (StatusCode::NOT_FOUND, "not on this shard") }),
        );
        forwarder.register_peer("shard-one:8080", peer).unwrap();
        let router = ShardRouter::new(two_shard_topology(0), forwarder.clone());

        let request = ForwardRequest::get("/get?key=remove-key");
        let outcome = router
            .route("get", b"remove-key", &request, |_| async {
                Ok::<_, KvError>(())
            })
            .await
            .unwrap();

        match outcome {
            RouteOutcome::Forwarded {
                shard,
                address,
                response,
            } => {
                assert_eq!(shard, 1);
                assert_eq!(address, "shard-one:8080");
                assert_eq!(response.status, StatusCode::NOT_FOUND);
                assert_eq!(response.body_text(), "not on this shard");
            }
            other => panic!("expected forward, got {:?}", other),
        }
        assert_eq!(
            forwarder.delivered().unwrap(),
            vec![("shard-one:8080".to_string(), request)]
        );
    }

    #[tokio::test]
    async fn test_route_to_unreachable_shard_is_routing_error() {
        let router = ShardRouter::new(two_shard_topology(0), Arc::new(InMemoryForwarder::new()));
        let err = router
            .route("get", b"remove-key", &ForwardRequest::get("/get?key=remove-key"), |_| async {
                Ok::<_, KvError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::Routing(_)));
    }

    #[tokio::test]
    async fn test_local_error_is_returned_unchanged() {
        let router = ShardRouter::new(two_shard_topology(0), Arc::new(InMemoryForwarder::new()));
        let request = ForwardRequest::get("/set?key=keep-key&value=1");
        let err = router
            .route("set", b"keep-key", &request, |_| async {
                Err::<(), _>(KvError::ReadOnly)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::ReadOnly));
    }
}
