/// A request to be replayed verbatim against another shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus query string exactly as received, e.g. `/get?key=foo`.
    pub path_and_query: String,
}

impl ForwardRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
        }
    }

    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self::new(Method::GET, path_and_query)
    }
}

/// The remote shard's answer, relayed to the caller without modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ForwardResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Trait for components that can deliver a request to the owner of another shard.
#[async_trait]
pub trait ShardForwarder: Send + Sync {
    /// Sends `request` to `address` and returns whatever the peer answered.
    ///
    /// Unreachable peers fail with `KvError::Routing`, timeouts with `KvError::Transport`.
    async fn forward(&self, address: &str, request: &ForwardRequest) -> Result<ForwardResponse>;
}

/// Prefixes `http://` unless the configured address already carries a scheme.
pub fn http_base_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", address.trim_end_matches('/'))
    }
}

/// Forwards over HTTP with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KvError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ShardForwarder for HttpForwarder {
    async fn forward(&self, address: &str, request: &ForwardRequest) -> Result<ForwardResponse> {
        let url = format!("{}{}", http_base_url(address), request.path_and_query);
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| {
                KvError::Routing(format!("unsupported method {}: {}", request.method, e))
            })?;

        let response = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KvError::Transport(format!("request to {} timed out", url))
                } else {
                    KvError::Routing(format!("error forwarding request to {}: {}", url, e))
                }
            })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| KvError::Transport(format!("invalid status from {}: {}", url, e)))?;
        let body = response.bytes().await?.to_vec();
        Ok(ForwardResponse { status, body })
    }
}
