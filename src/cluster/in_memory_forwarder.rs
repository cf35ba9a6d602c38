/// An in-memory implementation of `ShardForwarder` for testing.
///
/// Each registered address maps to a peer's axum `Router`; forwarding drives the
/// peer app directly through `tower::ServiceExt::oneshot` instead of a socket.
#[derive(Clone, Default)]
pub struct InMemoryForwarder {
    peers: Arc<Mutex<HashMap<String, axum::Router>>>,
    delivered: Arc<Mutex<Vec<(String, ForwardRequest)>>>,
}

impl InMemoryForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the app answering for `address`.
    pub fn register_peer(&self, address: impl Into<String>, app: axum::Router) -> Result<()> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(KvError::Routing("peer address must not be empty".to_string()));
        }
        self.peers.lock()?.insert(address, app);
        Ok(())
    }

    /// Removes a peer, making it unreachable.
    pub fn unregister_peer(&self, address: &str) -> Result<bool> {
        Ok(self.peers.lock()?.remove(address).is_some())
    }

    /// Requests delivered so far, with their target address.
    pub fn delivered(&self) -> Result<Vec<(String, ForwardRequest)>> {
        Ok(self.delivered.lock()?.clone())
    }

    fn peer(&self, address: &str) -> Result<axum::Router> {
        self.peers.lock()?.get(address).cloned().ok_or_else(|| {
            KvError::Routing(format!("shard at {} is unreachable", address))
        })
    }
}

#[async_trait]
impl ShardForwarder for InMemoryForwarder {
    async fn forward(&self, address: &str, request: &ForwardRequest) -> Result<ForwardResponse> {
        use tower::ServiceExt;

        let app = self.peer(address)?;
        self.delivered
            .lock()?
            .push((address.to_string(), request.clone()));

        let http_request = http::Request::builder()
            .method(request.method.clone())
            .uri(request.path_and_query.as_str())
            .body(axum::body::Body::empty())
            .map_err(|e| KvError::Routing(format!("invalid forward request: {}", e)))?;

        let response = app
            .oneshot(http_request)
            .await
            .map_err(|e| KvError::Transport(format!("peer {} failed: {}", address, e)))?;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| {
                KvError::Transport(format!("failed to read body from {}: {}", address, e))
            })?;

        Ok(ForwardResponse {
            status,
            body: body.to_vec(),
        })
    }
}
