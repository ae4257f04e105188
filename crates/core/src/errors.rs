use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const GENERIC_RETRY_MESSAGE: &str = "Something went wrong. Please try again.";
pub const MAX_TOKENS_MESSAGE: &str =
    "The response stopped because it reached the token limit. Try a shorter prompt or ask to continue.";

/// Codes carried by [`ChatError::Stream`].
pub const STREAM_DECODE: u16 = 1;
pub const STREAM_INTERRUPTED: u16 = 2;
pub const STREAM_IDLE: u16 = 3;

/// Terminal status attached to a generation stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Complete,
    Error,
    MaxTokens,
    ErrorToxic,
    ErrorLimit,
    UserCancel,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinishReason::Complete => "COMPLETE",
            FinishReason::Error => "ERROR",
            FinishReason::MaxTokens => "MAX_TOKENS",
            FinishReason::ErrorToxic => "ERROR_TOXIC",
            FinishReason::ErrorLimit => "ERROR_LIMIT",
            FinishReason::UserCancel => "USER_CANCEL",
            FinishReason::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    /// `status` is 0 when no HTTP response was received.
    #[error("network error ({status}): {message}")]
    Network { status: u16, message: String },
    #[error("stream finished with {reason}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    FinishStream {
        reason: FinishReason,
        detail: Option<String>,
    },
    #[error("stream error ({code}): {message}")]
    Stream { code: u16, message: String },
    #[error("unauthorized")]
    Unauthorized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    FinishStream,
    Stream,
    Unauthorized,
    Unknown,
}

impl ChatError {
    pub fn network<S: Into<String>>(status: u16, message: S) -> Self {
        ChatError::Network {
            status,
            message: message.into(),
        }
    }

    pub fn stream<S: Into<String>>(code: u16, message: S) -> Self {
        ChatError::Stream {
            code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Network { .. } => ErrorKind::Network,
            ChatError::FinishStream { .. } => ErrorKind::FinishStream,
            ChatError::Stream { .. } => ErrorKind::Stream,
            ChatError::Unauthorized => ErrorKind::Unauthorized,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            ChatError::Network { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(400)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ChatError::Unauthorized) || self.status() == Some(401)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_session_unavailable(&self) -> bool {
        self.status() == Some(503)
    }

    /// Only an `ERROR` finish counts; `COMPLETE` and `MAX_TOKENS` are normal endings.
    pub fn is_finished_with_unexpected_error(&self) -> bool {
        matches!(
            self,
            ChatError::FinishStream {
                reason: FinishReason::Error,
                ..
            }
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Network { status, .. } => *status == 0 || *status >= 500,
            ChatError::Stream { code, .. } => *code == STREAM_INTERRUPTED,
            _ => false,
        }
    }

    /// Banner text for a front end.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::FinishStream { reason, detail } => {
                finish_reason_error_message(reason, detail.as_deref())
            }
            ChatError::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
            ChatError::Network { status, message } => match status {
                0 => "Unable to reach the server. Check your connection and try again.".to_string(),
                400 if !message.is_empty() => message.clone(),
                400 => "The request was invalid.".to_string(),
                401 => "Your session has expired. Please sign in again.".to_string(),
                403 => "You do not have access to this resource.".to_string(),
                404 => "The requested resource was not found.".to_string(),
                503 => "The service is temporarily unavailable. Please try again later.".to_string(),
                _ => GENERIC_RETRY_MESSAGE.to_string(),
            },
            ChatError::Stream { .. } => GENERIC_RETRY_MESSAGE.to_string(),
        }
    }
}

pub fn finish_reason_error_message(reason: &FinishReason, detail: Option<&str>) -> String {
    match reason {
        FinishReason::Error => detail.unwrap_or(GENERIC_RETRY_MESSAGE).to_string(),
        FinishReason::MaxTokens => MAX_TOKENS_MESSAGE.to_string(),
        _ => GENERIC_RETRY_MESSAGE.to_string(),
    }
}

pub fn is_finished_with_unexpected_error(err: &(dyn StdError + 'static)) -> bool {
    find_chat_error(err).is_some_and(ChatError::is_finished_with_unexpected_error)
}

/// First `ChatError` in the source chain of `err`, if any.
pub fn find_chat_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ChatError> {
    let mut cur = Some(err);
    while let Some(e) = cur {
        if let Some(chat) = e.downcast_ref::<ChatError>() {
            return Some(chat);
        }
        cur = e.source();
    }
    None
}

pub fn classify(err: &(dyn StdError + 'static)) -> ErrorKind {
    find_chat_error(err)
        .map(ChatError::kind)
        .unwrap_or(ErrorKind::Unknown)
}
