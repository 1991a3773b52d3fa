use log::{ debug, error };
use reqwest::{ Client as HttpClient, RequestBuilder, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ de::DeserializeOwned, Serialize };

use crate::config::ClientConfig;
use crate::error::{ ApiError, ApiResult };
use crate::models::chat::Envelope;

/// Buffered JSON client for `<origin>/api`.
///
/// Every completed request is decoded as an [`Envelope`], whatever its HTTP
/// status; only transport failures and undecodable bodies become errors.
#[derive(Clone)]
pub struct RequestClient {
    http: HttpClient,
    base_url: String,
}

impl RequestClient {
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)]
    ) -> ApiResult<Envelope<T>> {
        let mut req = self.http.get(self.url(path));
        if !query.is_empty() {
            req = req.query(query);
        }
        self.execute(req, path).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> ApiResult<Envelope<T>> {
        let req = self.http.post(self.url(path));
        self.execute(req, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B
    ) -> ApiResult<Envelope<T>> {
        let req = self.http.post(self.url(path)).json(body);
        self.execute(req, path).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        path: &str
    ) -> ApiResult<Envelope<T>> {
        let resp = req.send().await.map_err(|e| {
            error!("Request error on {}: {}", path, e);
            ApiError::Transport(e)
        })?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| {
            error!("Request error on {} while reading body: {}", path, e);
            ApiError::Transport(e)
        })?;
        debug!("{} -> {} ({} bytes)", path, status, body.len());

        serde_json::from_slice::<Envelope<T>>(&body).map_err(|e| {
            error!("Request error on {}: undecodable envelope (status {}): {}", path, status, e);
            ApiError::Decode(format!("{} (status {})", e, status.as_u16()))
        })
    }
}
