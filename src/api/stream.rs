use bytes::Bytes;
use futures::{ Stream, StreamExt };
use log::{ debug, error, info };
use reqwest::{ Client as HttpClient, StatusCode, header::{ HeaderMap, ACCEPT } };
use std::fmt;
use std::pin::Pin;

use crate::config::ClientConfig;
use crate::error::{ ApiError, ApiResult };
use crate::models::chat::ChatReq;

/// `X-Memory-Id`; lowercase so it can double as a static `HeaderName`.
pub const MEMORY_ID_HEADER: &str = "x-memory-id";

pub type ByteStream = Pin<Box<dyn Stream<Item = ApiResult<Bytes>> + Send>>;
pub type TextStream = Pin<Box<dyn Stream<Item = ApiResult<String>> + Send>>;

/// An open response body plus the memory id the backend resolved for it.
///
/// Nothing has been read from `stream` yet; dropping it closes the connection.
pub struct ChatStream {
    pub memory_id: String,
    pub stream: ByteStream,
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream").field("memory_id", &self.memory_id).finish_non_exhaustive()
    }
}

impl ChatStream {
    pub fn into_parts(self) -> (String, ByteStream) {
        (self.memory_id, self.stream)
    }

    /// Decodes the body as UTF-8 text chunks, holding back code points that
    /// are split across network chunks.
    pub fn into_text(self) -> TextStream {
        let state = (self.stream, Utf8Decoder::default(), false);
        futures::stream
            ::unfold(state, |(mut stream, mut decoder, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    match stream.next().await {
                        Some(Ok(chunk)) => {
                            let text = decoder.decode(&chunk);
                            if text.is_empty() {
                                continue;
                            }
                            return Some((Ok(text), (stream, decoder, false)));
                        }
                        Some(Err(e)) => {
                            return Some((Err(e), (stream, decoder, true)));
                        }
                        None => {
                            let tail = decoder.finish();
                            if tail.is_empty() {
                                return None;
                            }
                            return Some((Ok(tail), (stream, decoder, true)));
                        }
                    }
                }
            })
            .boxed()
    }

    pub async fn read_to_string(self) -> ApiResult<String> {
        let mut text = self.into_text();
        let mut out = String::new();
        while let Some(chunk) = text.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}

/// Incremental UTF-8 decoder. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // incomplete sequence at the end, wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes whatever is still buffered once the stream has ended.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Raw streaming client. Unlike [`super::request::RequestClient`] it has no
/// timeout and does not expect an envelope.
#[derive(Clone)]
pub struct StreamClient {
    http: HttpClient,
    url: String,
}

impl StreamClient {
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        let http = HttpClient::builder().build()?;
        Ok(Self {
            http,
            url: config.stream_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, req: &ChatReq) -> ApiResult<ChatStream> {
        match self.open(req).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                error!("Failed to send chat message: {}", e);
                Err(e)
            }
        }
    }

    async fn open(&self, req: &ChatReq) -> ApiResult<ChatStream> {
        info!("Sending chat message for memory id '{}'", req.memory_id);

        let resp = self.http.post(&self.url).header(ACCEPT, "text/plain").json(req).send().await?;

        let status = resp.status();
        debug!("Response status: {}", status);
        debug!("Response headers: {:?}", resp.headers());

        if !status.is_success() {
            let body = resp.text().await?;
            error!("Stream API error: {}", body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let memory_id = resolve_memory_id(resp.headers(), &req.memory_id);
        debug!("Memory ID resolved to '{}'", memory_id);

        if !has_body(status) {
            return Err(ApiError::NoBody);
        }

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(ApiError::from))
            .boxed();

        Ok(ChatStream { memory_id, stream })
    }
}

/// Header value wins over the id the caller sent.
pub fn resolve_memory_id(headers: &HeaderMap, requested: &str) -> String {
    headers
        .get(MEMORY_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(requested)
        .to_string()
}

/// Only null-body statuses lack a stream; an empty 200 is an empty stream.
fn has_body(status: StatusCode) -> bool {
    status != StatusCode::NO_CONTENT && status != StatusCode::RESET_CONTENT
}
