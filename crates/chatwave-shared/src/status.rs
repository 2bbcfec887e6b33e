//! Message lifecycle.
//!
//! The server-side lifecycle is `sent → delivered → read` and only moves
//! forward. Clients layer a local [`DeliveryState`] on top of it so that
//! optimistic messages can be shown as sending or failed before a server
//! copy exists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Server-side message status. Variants are declared in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Returns `true` if moving from `self` to `next` is a strict advance.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next > self
    }

    /// The furthest of two statuses.
    pub fn furthest(self, other: MessageStatus) -> MessageStatus {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// Why a locally-created message failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The server refused the message (validation or authorization).
    /// Resending the same message will not help.
    Rejected,
    /// The server could not persist it or throttled it. Safe to resend.
    Unavailable,
    /// No acknowledgment arrived in time. The message may have been stored;
    /// only an explicit resend is offered.
    TimedOut,
}

impl FailureReason {
    pub fn from_code(code: ErrorCode) -> Self {
        if code.is_rejection() {
            FailureReason::Rejected
        } else if code == ErrorCode::NetworkPartition {
            FailureReason::TimedOut
        } else {
            FailureReason::Unavailable
        }
    }

    /// Whether the UI should offer a resend action.
    pub fn can_resend(&self) -> bool {
        !matches!(self, FailureReason::Rejected)
    }
}

/// Client-visible state of a cached message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum DeliveryState {
    Sending,
    Failed(FailureReason),
    Confirmed(MessageStatus),
}

impl DeliveryState {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, DeliveryState::Confirmed(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryState::Sending)
    }

    pub fn server_status(&self) -> Option<MessageStatus> {
        match self {
            DeliveryState::Confirmed(status) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_advances() {
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(MessageStatus::Delivered.can_advance_to(MessageStatus::Read));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Sent));
    }

    #[test]
    fn furthest_keeps_the_later_status() {
        assert_eq!(
            MessageStatus::Read.furthest(MessageStatus::Sent),
            MessageStatus::Read
        );
        assert_eq!(
            MessageStatus::Sent.furthest(MessageStatus::Delivered),
            MessageStatus::Delivered
        );
    }

    #[test]
    fn status_text_round_trip() {
        for status in [
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>(), Ok(status));
        }
        assert!("sending".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn rejection_renders_differently_from_outage() {
        assert_eq!(
            FailureReason::from_code(ErrorCode::Validation),
            FailureReason::Rejected
        );
        assert_eq!(
            FailureReason::from_code(ErrorCode::TransientStore),
            FailureReason::Unavailable
        );
        assert!(!FailureReason::Rejected.can_resend());
        assert!(FailureReason::TimedOut.can_resend());
    }
}
