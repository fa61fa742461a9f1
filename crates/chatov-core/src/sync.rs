//! Poll/retry state machine keeping the overlay in sync with the chat server.
//!
//! One request is in flight at a time. Every cycle ends in `Idle` with exactly one next-poll
//! delay, chosen from the [`RetryPolicy`] by the outcome class. The loop never gives up.

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    domain::{MessageId, SessionId},
    ports::{Cursor, HttpResponse, MessageSink, Transport, TransportError},
    protocol::{decode_batch, DecodeError},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after a clean batch.
    pub poll_interval: Duration,
    /// Delay after a bad status, malformed payload, or a processing failure.
    pub protocol_retry: Duration,
    /// Delay after a connection failure.
    pub transport_retry: Duration,
    /// Delay after a request timeout (the server was likely holding a long poll).
    pub timeout_retry: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            protocol_retry: Duration::from_millis(5_000),
            transport_retry: Duration::from_millis(5_000),
            timeout_retry: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, result: &Result<usize, SyncError>) -> Duration {
        match result {
            Ok(_) => self.poll_interval,
            Err(SyncError::Timeout) => self.timeout_retry,
            Err(SyncError::Transport(_)) => self.transport_retry,
            Err(
                SyncError::Status { .. }
                | SyncError::Parse(_)
                | SyncError::Shape(_)
                | SyncError::Sink(_),
            ) => self.protocol_retry,
        }
    }
}

/// One failed poll cycle, by failure class.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("server responded with {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("malformed payload: {0}")]
    Parse(serde_json::Error),
    #[error("unexpected payload shape: {0}")]
    Shape(serde_json::Error),
    #[error("message processing failed: {0}")]
    Sink(crate::Error),
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => SyncError::Timeout,
            TransportError::Connection(msg) => SyncError::Transport(msg),
        }
    }
}

impl From<DecodeError> for SyncError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Parse(e) => SyncError::Parse(e),
            DecodeError::Shape(e) => SyncError::Shape(e),
        }
    }
}

/// Server session + incremental cursor. Written only by [`SyncClient`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub session_id: Option<SessionId>,
    pub last_message_id: Option<MessageId>,
}

impl Session {
    /// Cursor for the next request; only sent once both halves are known.
    pub fn cursor(&self) -> Option<Cursor> {
        match (&self.session_id, &self.last_message_id) {
            (Some(sid), Some(mid)) => Some(Cursor {
                session_id: sid.clone(),
                last_message_id: mid.clone(),
            }),
            _ => None,
        }
    }
}

/// Where the client is in its `Idle → Polling → Idle` cycle.
///
/// `Polling` is observable between [`SyncClient::begin`] and [`SyncClient::complete`], i.e. while
/// the request is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
}

#[derive(Debug)]
pub struct PollOutcome {
    /// Number of messages handed to the sink.
    pub result: Result<usize, SyncError>,
    pub next_delay: Duration,
}

pub struct SyncClient {
    transport: Arc<dyn Transport>,
    session: Session,
    policy: RetryPolicy,
    state: PollState,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            session: Session::default(),
            policy,
            state: PollState::Idle,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Run a single request/response cycle and pick the next delay.
    pub async fn poll(&mut self, sink: &mut dyn MessageSink) -> PollOutcome {
        let response = self.begin().await;
        self.complete(response, sink)
    }

    /// Poll forever, sleeping the policy delay between cycles.
    pub async fn run(&mut self, sink: &mut dyn MessageSink) {
        loop {
            let outcome = self.poll(sink).await;
            tokio::time::sleep(outcome.next_delay).await;
        }
    }

    /// Enter `Polling` and issue the request for the current cursor.
    ///
    /// The returned future owns everything it needs, so the caller may keep handling other
    /// events while it is pending. Feed its output to [`complete`](Self::complete).
    pub fn begin(
        &mut self,
    ) -> impl Future<Output = Result<HttpResponse, SyncError>> + Send + 'static {
        self.state = PollState::Polling;
        let transport = self.transport.clone();
        let cursor = self.session.cursor();
        async move {
            transport
                .get_messages(cursor.as_ref())
                .await
                .map_err(SyncError::from)
        }
    }

    /// Apply a response to the session and `sink`, return to `Idle` and pick the next delay.
    pub fn complete(
        &mut self,
        response: Result<HttpResponse, SyncError>,
        sink: &mut dyn MessageSink,
    ) -> PollOutcome {
        let result = response.and_then(|resp| self.apply(resp, sink));
        self.state = PollState::Idle;

        let next_delay = self.policy.delay_for(&result);
        match &result {
            Ok(n) if *n > 0 => {
                tracing::debug!(messages = n, last = ?self.session.last_message_id, "batch applied")
            }
            Ok(_) => {}
            Err(SyncError::Timeout) => {
                tracing::warn!("timed out requesting new messages, retrying now")
            }
            Err(e @ SyncError::Transport(_)) => {
                tracing::warn!(retry_ms = next_delay.as_millis() as u64, "error requesting new messages: {e}")
            }
            Err(e) => {
                tracing::error!(retry_ms = next_delay.as_millis() as u64, "error parsing new messages: {e}")
            }
        }

        PollOutcome { result, next_delay }
    }

    fn apply(
        &mut self,
        resp: HttpResponse,
        sink: &mut dyn MessageSink,
    ) -> Result<usize, SyncError> {
        if resp.status != 200 {
            return Err(SyncError::Status {
                status: resp.status,
                reason: resp.reason,
            });
        }

        let batch = decode_batch(&resp.body)?;

        if let Some(current) = &self.session.session_id {
            if *current != batch.session_id {
                tracing::info!(old = %current, new = %batch.session_id, "server session changed");
                self.session.last_message_id = None;
            }
        }
        self.session.session_id = Some(batch.session_id);

        // Server contract: messages arrive in ascending id order, so the last one is the cursor.
        let mut delivered = 0usize;
        for msg in batch.messages {
            let id = msg.id.clone();
            sink.append(msg).map_err(SyncError::Sink)?;
            self.session.last_message_id = Some(id);
            delivered += 1;
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::{domain::Message, Error};

    #[derive(Default)]
    struct FakeTransport {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        cursors: Mutex<Vec<Option<Cursor>>>,
    }

    impl FakeTransport {
        fn reply(self, r: Result<HttpResponse, TransportError>) -> Self {
            self.replies.lock().unwrap().push_back(r);
            self
        }

        fn ok(self, body: &str) -> Self {
            self.reply(Ok(HttpResponse {
                status: 200,
                reason: "OK".to_string(),
                body: body.to_string(),
            }))
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get_messages(
            &self,
            cursor: Option<&Cursor>,
        ) -> Result<HttpResponse, TransportError> {
            self.cursors.lock().unwrap().push(cursor.cloned());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connection("no reply queued".to_string())))
        }
    }

    impl MessageSink for Vec<Message> {
        fn append(&mut self, msg: Message) -> crate::Result<()> {
            self.push(msg);
            Ok(())
        }
    }

    struct FailingSink {
        accepted: usize,
        limit: usize,
    }

    impl MessageSink for FailingSink {
        fn append(&mut self, _msg: Message) -> crate::Result<()> {
            if self.accepted == self.limit {
                return Err(Error::Render("node creation failed".to_string()));
            }
            self.accepted += 1;
            Ok(())
        }
    }

    fn batch(sid: &str, mids: &[u64]) -> String {
        let messages: Vec<String> = mids
            .iter()
            .map(|m| {
                format!(r##"{{"mid": {m}, "user": "u", "user_color": "#fff", "message": "m{m}"}}"##)
            })
            .collect();
        format!(r#"{{"sid": "{sid}", "messages": [{}]}}"#, messages.join(","))
    }

    fn client(t: FakeTransport) -> (SyncClient, Arc<FakeTransport>) {
        let t = Arc::new(t);
        (SyncClient::new(t.clone(), RetryPolicy::default()), t)
    }

    #[tokio::test]
    async fn success_advances_cursor_and_polls_again_soon() {
        let (mut c, t) = client(
            FakeTransport::default()
                .ok(&batch("s1", &[1, 2, 3]))
                .ok(&batch("s1", &[])),
        );
        let mut sink: Vec<Message> = Vec::new();

        let out = c.poll(&mut sink).await;
        assert_eq!(out.result.unwrap(), 3);
        assert_eq!(out.next_delay, Duration::from_millis(250));
        assert_eq!(c.state(), PollState::Idle);
        assert_eq!(
            c.session().last_message_id,
            Some(MessageId("3".to_string()))
        );
        assert_eq!(sink.len(), 3);

        c.poll(&mut sink).await;
        let cursors = t.cursors.lock().unwrap();
        assert_eq!(cursors[0], None);
        assert_eq!(
            cursors[1],
            Some(Cursor {
                session_id: SessionId("s1".to_string()),
                last_message_id: MessageId("3".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn transport_failure_backs_off_five_seconds() {
        let (mut c, _) = client(
            FakeTransport::default()
                .ok(&batch("s1", &[4]))
                .reply(Err(TransportError::Connection("refused".to_string()))),
        );
        let mut sink: Vec<Message> = Vec::new();
        c.poll(&mut sink).await;

        let out = c.poll(&mut sink).await;
        assert!(matches!(out.result, Err(SyncError::Transport(_))));
        assert_eq!(out.next_delay, Duration::from_millis(5_000));
        assert_eq!(
            c.session().last_message_id,
            Some(MessageId("4".to_string()))
        );
    }

    #[tokio::test]
    async fn state_is_polling_while_request_in_flight() {
        let (mut c, _) = client(FakeTransport::default().ok(&batch("s", &[1])));
        assert_eq!(c.state(), PollState::Idle);

        let pending = c.begin();
        assert_eq!(c.state(), PollState::Polling);

        let response = pending.await;
        let out = c.complete(response, &mut Vec::<Message>::new());
        assert_eq!(out.result.unwrap(), 1);
        assert_eq!(c.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn timeout_retries_immediately() {
        let (mut c, _) = client(FakeTransport::default().reply(Err(TransportError::Timeout)));
        let out = c.poll(&mut Vec::<Message>::new()).await;
        assert!(matches!(out.result, Err(SyncError::Timeout)));
        assert_eq!(out.next_delay, Duration::ZERO);
    }

    #[tokio::test]
    async fn malformed_payload_backs_off_and_applies_nothing() {
        let (mut c, _) = client(
            FakeTransport::default()
                .ok("<html>oops</html>")
                .ok(r#"{"sid": "s", "messages": [{"mid": 1}]}"#),
        );
        let mut sink: Vec<Message> = Vec::new();

        let out = c.poll(&mut sink).await;
        assert!(matches!(out.result, Err(SyncError::Parse(_))));
        assert_eq!(out.next_delay, Duration::from_millis(5_000));

        let out = c.poll(&mut sink).await;
        assert!(matches!(out.result, Err(SyncError::Shape(_))));
        assert_eq!(out.next_delay, Duration::from_millis(5_000));

        assert!(sink.is_empty());
        assert_eq!(c.session(), &Session::default());
    }

    #[tokio::test]
    async fn bad_status_is_a_protocol_error() {
        let (mut c, _) = client(FakeTransport::default().reply(Ok(HttpResponse {
            status: 503,
            reason: "Service Unavailable".to_string(),
            body: String::new(),
        })));
        let out = c.poll(&mut Vec::<Message>::new()).await;
        assert!(matches!(
            out.result,
            Err(SyncError::Status { status: 503, .. })
        ));
        assert_eq!(out.next_delay, Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn sink_failure_keeps_cursor_at_last_delivered() {
        let (mut c, _) = client(FakeTransport::default().ok(&batch("s", &[1, 2, 3])));
        let mut sink = FailingSink {
            accepted: 0,
            limit: 2,
        };
        let out = c.poll(&mut sink).await;
        assert!(matches!(out.result, Err(SyncError::Sink(_))));
        assert_eq!(out.next_delay, Duration::from_millis(5_000));
        assert_eq!(
            c.session().last_message_id,
            Some(MessageId("2".to_string()))
        );
    }

    #[tokio::test]
    async fn session_change_resets_cursor() {
        let (mut c, t) = client(
            FakeTransport::default()
                .ok(&batch("old", &[9]))
                .ok(&batch("new", &[]))
                .ok(&batch("new", &[])),
        );
        let mut sink: Vec<Message> = Vec::new();
        c.poll(&mut sink).await;
        c.poll(&mut sink).await;
        assert_eq!(c.session().session_id, Some(SessionId("new".to_string())));
        assert_eq!(c.session().last_message_id, None);

        c.poll(&mut sink).await;
        assert_eq!(t.cursors.lock().unwrap()[2], None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reschedules_after_every_cycle() {
        let (mut c, t) = client(
            FakeTransport::default()
                .reply(Err(TransportError::Connection("down".to_string())))
                .ok(&batch("s", &[1])),
        );
        let mut sink: Vec<Message> = Vec::new();

        // Fails (5s), succeeds (250ms), then fails again past the deadline.
        let _ = tokio::time::timeout(Duration::from_millis(5_100), c.run(&mut sink)).await;
        assert_eq!(sink.len(), 1);
        assert!(t.cursors.lock().unwrap().len() >= 2);
    }
}
