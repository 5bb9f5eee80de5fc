use std::time::Duration;

use tokio_stream::StreamExt;
use tracing::debug;

use super::*;
use crate::model::ActivityEvent;
use crate::storage;
use crate::upstream::{EventStream, StreamItem};

/// Why a read loop ended.
enum ReadEnd {
    Cancelled,
    Superseded,
    Failed(FetchError),
}

/// What the connection task does after a failure.
enum Next {
    Retry(Duration),
    Stop,
}

/// Resolves once the owner asks this connection to stop, or drops the
/// record (and with it the sender).
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Connection task for one stream record. Runs until cancelled, superseded
/// by a newer record for the same user, or left `Disconnected`.
pub(super) async fn run(
    shared: Arc<Shared>,
    user_id: UserId,
    connection_id: Uuid,
    mut cancel: watch::Receiver<bool>,
) {
    let handshake_timeout = shared.config.handshake_timeout();
    loop {
        let Some((credentials, resume)) = begin_attempt(&shared, &user_id, connection_id) else {
            return;
        };

        let opened = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = tokio::time::timeout(
                handshake_timeout,
                shared.fetcher.open_stream(&credentials, &resume),
            ) => result.unwrap_or(Err(FetchError::Timeout(handshake_timeout))),
        };

        let failure = match opened {
            Ok(stream) => {
                if !mark_connected(&shared, &user_id, connection_id) {
                    return;
                }
                match read_events(&shared, &user_id, connection_id, stream, &mut cancel).await {
                    ReadEnd::Cancelled | ReadEnd::Superseded => return,
                    ReadEnd::Failed(e) => e,
                }
            }
            Err(e) => e,
        };

        match after_failure(&shared, &user_id, connection_id, failure) {
            Next::Retry(delay) => {
                tokio::select! {
                    _ = cancelled(&mut cancel) => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Next::Stop => return,
        }
    }
}

/// Enter `Connecting` and snapshot what the handshake needs.
fn begin_attempt(
    shared: &Shared,
    user_id: &str,
    connection_id: Uuid,
) -> Option<(Credentials, ActivityCursor)> {
    let mut records = shared.records.lock();
    let record = records
        .get_mut(user_id)
        .filter(|r| r.connection_id == connection_id)?;
    record.state = ConnectionState::Connecting;
    Some((record.credentials.clone(), record.cursor))
}

fn mark_connected(shared: &Shared, user_id: &str, connection_id: Uuid) -> bool {
    let mut records = shared.records.lock();
    let Some(record) = records
        .get_mut(user_id)
        .filter(|r| r.connection_id == connection_id)
    else {
        return false;
    };
    record.state = ConnectionState::Connected;
    record.reconnect_attempt = 0;
    record.last_error = None;
    shared.report_connected(&records);
    info!(%user_id, %connection_id, "stream connected");
    true
}

async fn read_events(
    shared: &Shared,
    user_id: &str,
    connection_id: Uuid,
    mut stream: EventStream,
    cancel: &mut watch::Receiver<bool>,
) -> ReadEnd {
    let idle_timeout = shared.config.idle_timeout();
    loop {
        let next = tokio::select! {
            _ = cancelled(cancel) => return ReadEnd::Cancelled,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };
        let event = match next {
            Ok(Some(Ok(StreamItem::Event(event)))) => event,
            Ok(Some(Ok(StreamItem::KeepAlive))) => continue,
            Ok(Some(Err(e))) => return ReadEnd::Failed(e),
            Ok(None) => {
                return ReadEnd::Failed(FetchError::Network("stream closed by upstream".to_string()))
            }
            Err(_) => return ReadEnd::Failed(FetchError::Timeout(idle_timeout)),
        };
        if let Some(end) = accept_event(shared, user_id, connection_id, event).await {
            return end;
        }
    }
}

/// Deduplicate, record and advance the cursor for one streamed event. The
/// store write runs with the records lock released; the cursor only moves if
/// this connection still owns the record afterwards.
async fn accept_event(
    shared: &Shared,
    user_id: &str,
    connection_id: Uuid,
    event: ActivityEvent,
) -> Option<ReadEnd> {
    {
        let records = shared.records.lock();
        let Some(record) = records
            .get(user_id)
            .filter(|r| r.connection_id == connection_id)
        else {
            return Some(ReadEnd::Superseded);
        };
        if record.cursor.has_seen(&event) {
            shared.metrics.record_stream_duplicate();
            debug!(
                %user_id,
                event_id = event.id,
                activity = %event.activity_type,
                "duplicate event dropped"
            );
            return None;
        }
    }

    let (event_id, activity) = (event.id, event.activity_type);
    if let Err(e) = storage::record_on_blocking_pool(&shared.store, user_id, vec![event]).await {
        warn!(%user_id, event_id, error = %e, "failed to record streamed event");
        return Some(ReadEnd::Failed(FetchError::Network(format!(
            "record failed: {e}"
        ))));
    }

    let mut records = shared.records.lock();
    let Some(record) = records
        .get_mut(user_id)
        .filter(|r| r.connection_id == connection_id)
    else {
        return Some(ReadEnd::Superseded);
    };
    record.cursor.advance(activity, event_id);
    shared.metrics.record_events("stream", activity, 1);
    None
}

/// Decide between reconnecting and giving up, and update the record.
fn after_failure(
    shared: &Shared,
    user_id: &str,
    connection_id: Uuid,
    failure: FetchError,
) -> Next {
    let next = {
        let mut records = shared.records.lock();
        let Some(record) = records
            .get_mut(user_id)
            .filter(|r| r.connection_id == connection_id)
        else {
            return Next::Stop;
        };
        record.last_error = Some(failure.to_string());

        let next = if failure.is_auth() {
            record.state = ConnectionState::Disconnected;
            shared.metrics.record_stream_failure();
            warn!(%user_id, %connection_id, error = %failure, "stream credentials rejected");
            Next::Stop
        } else {
            record.reconnect_attempt = record.reconnect_attempt.saturating_add(1);
            if record.reconnect_attempt >= shared.config.max_reconnect_attempts {
                record.state = ConnectionState::Disconnected;
                shared.metrics.record_stream_failure();
                error!(
                    %user_id,
                    %connection_id,
                    attempt = record.reconnect_attempt,
                    error = %failure,
                    "stream gave up reconnecting"
                );
                Next::Stop
            } else {
                record.state = ConnectionState::Reconnecting;
                shared.metrics.record_stream_reconnect();
                let delay = shared.backoff.delay(record.reconnect_attempt - 1);
                warn!(
                    %user_id,
                    %connection_id,
                    attempt = record.reconnect_attempt,
                    ?delay,
                    error = %failure,
                    "stream dropped, reconnecting"
                );
                Next::Retry(delay)
            }
        };
        shared.report_connected(&records);
        next
    };

    if failure.is_auth() {
        shared.notifier.notify_auth_failure(user_id);
    }
    next
}
