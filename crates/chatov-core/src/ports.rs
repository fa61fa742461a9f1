use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{Message, MessageId, ReplyContext, SessionId},
    Result,
};

/// Incremental fetch position sent as `sid` + `mid`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub session_id: SessionId,
    pub last_message_id: MessageId,
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Hexagonal port for the `get-messages` request/response primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_messages(
        &self,
        cursor: Option<&Cursor>,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

/// Handle to a visual node created by a [`Renderer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Everything a renderer needs to draw one chat line. Badges are already resolved to
/// locators for the active tier.
#[derive(Clone, Debug)]
pub struct MessageView<'a> {
    pub author: &'a str,
    pub author_color: &'a str,
    pub text: &'a str,
    pub badges: Vec<&'a str>,
    pub reply: Option<&'a ReplyContext>,
}

/// Display capability: create, update and destroy message nodes.
pub trait Renderer {
    /// Create a node at the newest end of the display.
    fn create(&mut self, view: &MessageView<'_>) -> Result<NodeId>;
    /// Swap the source of the badge at `slot` (index into `MessageView::badges`).
    fn set_badge_source(&mut self, node: NodeId, slot: usize, locator: &str) -> Result<()>;
    /// Start the exit transition.
    fn mark_removing(&mut self, node: NodeId);
    fn destroy(&mut self, node: NodeId);
}

/// Identity of one display-buffer entry (message ids may repeat across polls).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Delayed callbacks the message buffer asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// Display timeout elapsed: start the exit transition.
    Expire(EntryId),
    /// Exit transition finished: destroy the node.
    Destroy(EntryId),
}

/// Delayed-callback capability. A cancelled timer must never deliver its event.
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId;
    fn cancel(&mut self, id: TimerId);
}

/// Consumer of decoded messages, in payload order.
pub trait MessageSink {
    fn append(&mut self, msg: Message) -> Result<()>;
}
