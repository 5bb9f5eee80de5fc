use std::time::Duration;

use cadence_core::{
    ActivityCursor, ActivityEvent, ActivityFetcher, ActivityType, Credentials, EventId,
    EventStream, FetchError, StreamItem,
};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

const ACCESS_TOKEN_HEADER: &str = "x-access-token";
const ACCESS_SECRET_HEADER: &str = "x-access-secret";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-rate-limit-remaining";
const RATE_LIMIT_RESET_IN_HEADER: &str = "x-rate-limit-reset-in";

/// Events buffered between the connection reader and the scheduler.
const STREAM_BUFFER: usize = 64;

/// HTTP client for the upstream activity API.
///
/// Polling: `GET {base}/v1/{posts|mentions}?since_id=N` returns a JSON array
/// of events. Streaming: `GET {base}/v1/stream` returns newline-delimited
/// JSON events for both activity types until the connection drops.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, path: &str, credentials: &Credentials) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header(ACCESS_TOKEN_HEADER, &credentials.access_token)
            .header(ACCESS_SECRET_HEADER, &credentials.secret_access_token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, FetchError> {
        let response = request.send().await.map_err(network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(classify(status, response.headers()))
    }
}

fn network(err: reqwest::Error) -> FetchError {
    FetchError::Network(err.to_string())
}

/// Map a non-success upstream response onto the scheduler's failure kinds.
fn classify(status: StatusCode, headers: &HeaderMap) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            remaining: header_number(headers, RATE_LIMIT_REMAINING_HEADER)
                .and_then(|n| u32::try_from(n).ok()),
            reset_in: header_number(headers, RATE_LIMIT_RESET_IN_HEADER).map(Duration::from_secs),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Auth(format!("upstream answered {status}"))
        }
        other => FetchError::Network(format!("upstream answered {other}")),
    }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn activity_path(activity: ActivityType) -> &'static str {
    match activity {
        ActivityType::Posts => "/v1/posts",
        ActivityType::Mentions => "/v1/mentions",
    }
}

#[async_trait::async_trait]
impl ActivityFetcher for HttpFetcher {
    async fn fetch(
        &self,
        activity: ActivityType,
        credentials: &Credentials,
        since_id: Option<EventId>,
    ) -> Result<Vec<ActivityEvent>, FetchError> {
        let mut request = self.authorized(activity_path(activity), credentials);
        if let Some(since_id) = since_id {
            request = request.query(&[("since_id", since_id)]);
        }
        let response = self.send(request).await?;
        let body = response.bytes().await.map_err(network)?;
        serde_json::from_slice(&body)
            .map_err(|e| FetchError::Network(format!("malformed {activity} page: {e}")))
    }

    async fn open_stream(
        &self,
        credentials: &Credentials,
        resume: &ActivityCursor,
    ) -> Result<EventStream, FetchError> {
        let mut request = self.authorized("/v1/stream", credentials);
        if let Some(posts) = resume.posts {
            request = request.query(&[("posts_since_id", posts)]);
        }
        if let Some(mentions) = resume.mentions {
            request = request.query(&[("mentions_since_id", mentions)]);
        }
        let response = self.send(request).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(read_ndjson(response, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Forward one item per line until the body ends, a read fails, or the
/// receiving side is dropped. Blank lines are keep-alives.
async fn read_ndjson(response: Response, tx: mpsc::Sender<Result<StreamItem, FetchError>>) {
    let mut body = std::pin::pin!(response.bytes_stream());
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!("stream receiver dropped, closing upstream connection");
                return;
            }
            chunk = body.next() => chunk,
        };
        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                let _ = tx.send(Err(network(e))).await;
                return;
            }
            None => return,
        };
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let item = parse_line(line.trim_ascii());
            let malformed = item.is_err();
            if tx.send(item).await.is_err() {
                debug!("stream receiver dropped, closing upstream connection");
                return;
            }
            if malformed {
                return;
            }
        }
    }
}

fn parse_line(line: &[u8]) -> Result<StreamItem, FetchError> {
    if line.is_empty() {
        return Ok(StreamItem::KeepAlive);
    }
    serde_json::from_slice(line)
        .map(StreamItem::Event)
        .map_err(|e| FetchError::Network(format!("malformed stream event: {e}")))
}
