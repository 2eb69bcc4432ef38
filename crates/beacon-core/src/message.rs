//! Broadcast messages and their priority tag.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::ids::{ConnectionId, MessageId, PrincipalId};

/// Delivery priority. Ordering is `Low < Normal < Urgent`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background traffic, first to be evicted.
    Low,
    /// Regular peer traffic.
    #[default]
    Normal,
    /// Drained before anything else.
    Urgent,
}

impl Priority {
    /// All priorities, lowest first.
    pub const ALL: [Self; 3] = [Self::Low, Self::Normal, Self::Urgent];

    /// Dense index, `0` for [`Priority::Low`].
    pub const fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::Urgent => 2,
        }
    }

    /// Lowercase label used in logs and metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Who a message is addressed to. The origin connection is always excluded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Audience {
    /// Every registered connection.
    #[default]
    Everyone,
    /// Only connections authenticated as this principal.
    Principal(PrincipalId),
}

/// A message waiting for, or undergoing, fan-out.
///
/// Fields are private: once built and handed to the dispatch queue the
/// message is shared behind an `Arc` and never mutated.
#[derive(Clone, Debug)]
pub struct Message {
    id: MessageId,
    payload: Bytes,
    priority: Priority,
    origin: Option<ConnectionId>,
    audience: Audience,
    created_at: Instant,
}

impl Message {
    /// A hub-originated message addressed to everyone.
    pub fn new(payload: impl Into<Bytes>, priority: Priority) -> Self {
        Self {
            id: MessageId::generate(),
            payload: payload.into(),
            priority,
            origin: None,
            audience: Audience::Everyone,
            created_at: Instant::now(),
        }
    }

    /// A message received from a peer; the peer will not receive its own copy.
    pub fn from_peer(origin: ConnectionId, payload: impl Into<Bytes>, priority: Priority) -> Self {
        Self {
            origin: Some(origin),
            ..Self::new(payload, priority)
        }
    }

    /// Restrict delivery to an audience.
    #[must_use]
    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    /// Message ID.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Opaque payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Priority tag.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Originating connection, `None` for hub-originated messages.
    pub fn origin(&self) -> Option<&ConnectionId> {
        self.origin.as_ref()
    }

    /// Delivery audience.
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// Time since the message was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether a connection with the given identity should receive this message.
    pub fn is_addressed_to(&self, conn_id: &ConnectionId, principal: Option<&PrincipalId>) -> bool {
        if self.origin.as_ref() == Some(conn_id) {
            return false;
        }
        match &self.audience {
            Audience::Everyone => true,
            Audience::Principal(target) => principal == Some(target),
        }
    }
}
