use std::fmt;

/// Server-assigned session token (opaque).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

/// Server-assigned message id (opaque cursor token).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Integer resolution multiplier identifying an image variant (1x, 2x, 4x, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tier(pub u32);

impl Tier {
    pub const BASE: Tier = Tier(1);
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

/// Quoted message a chat line is replying to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyContext {
    pub user: String,
    pub text: String,
}

/// A chat message as received from the server. Immutable once decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub author: String,
    pub author_color: String,
    pub text: String,
    pub badges: Vec<crate::variants::ImageVariantSet>,
    pub reply: Option<ReplyContext>,
}
