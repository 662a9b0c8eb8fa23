use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(86_400);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Timeout,
    ReadTimeout,
    Dns,
    Tls,
    Connect,
    Other,
}

#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UpstreamError {}

fn classify(err: &wreq::Error) -> UpstreamErrorKind {
    if err.is_timeout() {
        return UpstreamErrorKind::Timeout;
    }
    if err.is_connect() {
        return UpstreamErrorKind::Connect;
    }
    let message = err.to_string().to_ascii_lowercase();
    if message.contains("dns") || message.contains("resolve") {
        UpstreamErrorKind::Dns
    } else if message.contains("tls") || message.contains("ssl") {
        UpstreamErrorKind::Tls
    } else {
        UpstreamErrorKind::Other
    }
}

/// What the client ultimately reads: a single buffer for non-streaming
/// dispatch, or a channel of chunks fed by a background task for SSE.
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Result<Bytes, UpstreamError>>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

/// Thin wrapper over a single shared `wreq::Client`, the ancestor's
/// upstream-dispatch idiom stripped of its proxy-resolver layer (this
/// gateway has no outbound-proxy concept).
pub struct UpstreamClient {
    client: wreq::Client,
}

impl UpstreamClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = wreq::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    pub async fn dispatch(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
        body: Bytes,
        want_stream: bool,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|err| UpstreamError {
            kind: classify(&err),
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();

        if !want_stream {
            let bytes = response.bytes().await.map_err(|err| UpstreamError {
                kind: UpstreamErrorKind::ReadTimeout,
                message: err.to_string(),
            })?;
            return Ok(UpstreamResponse {
                status,
                body: UpstreamBody::Bytes(bytes),
            });
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await;
                match next {
                    Ok(Some(Ok(chunk))) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Some(Err(err))) => {
                        let _ = tx
                            .send(Err(UpstreamError {
                                kind: classify(&err),
                                message: err.to_string(),
                            }))
                            .await;
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        let _ = tx
                            .send(Err(UpstreamError {
                                kind: UpstreamErrorKind::ReadTimeout,
                                message: "upstream stream idle timeout".to_string(),
                            }))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            body: UpstreamBody::Stream(rx),
        })
    }
}
