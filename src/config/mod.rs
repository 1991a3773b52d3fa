use std::time::Duration;
use url::Url;

use crate::cli::Args;
use crate::error::{ ApiError, ApiResult };

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Prefix for every buffered (envelope) call.
pub const API_PREFIX: &str = "/api";
/// Absolute path of the streaming endpoint; it does not go through `API_PREFIX`.
pub const STREAM_PATH: &str = "/api/chat/stream";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: Url,
    pub api_prefix: String,
    pub stream_path: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse(DEFAULT_SERVER_URL).expect("default server url is valid"),
            api_prefix: API_PREFIX.to_string(),
            stream_path: STREAM_PATH.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: &str) -> ApiResult<Self> {
        let server_url = Url::parse(server_url.trim())?;
        if server_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("'{}' cannot be used as a base URL", server_url)));
        }
        Ok(Self {
            server_url,
            ..Self::default()
        })
    }

    pub fn from_args(args: &Args) -> ApiResult<Self> {
        let mut config = Self::new(&args.server_url)?;
        config.timeout = Duration::from_millis(args.timeout_ms);
        Ok(config)
    }

    fn origin(&self) -> &str {
        self.server_url.as_str().trim_end_matches('/')
    }

    /// Base for buffered calls, e.g. `http://host:8080/api`.
    pub fn api_base(&self) -> String {
        format!("{}{}", self.origin(), self.api_prefix)
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.origin(), self.stream_path)
    }
}
