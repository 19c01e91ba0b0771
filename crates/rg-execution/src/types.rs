use rg_schemas::{Side, Ticket};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue result code for a completed request.
pub const RETCODE_DONE: u32 = 10009;

/// Result / last-error codes meaning the venue's automated execution switch is off.
pub const AUTOMATION_DISABLED_CODES: [i64; 2] = [10027, 10028];

const AUTOMATION_DISABLED_TEXT: &str = "autotrading disabled";

/// Longest comment the venue accepts.
pub const COMMENT_MAX_LEN: usize = 31;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// Immediate-or-cancel.
    Ioc,
    /// Fill-or-kill.
    Fok,
}

impl fmt::Display for FillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillMode::Ioc => write!(f, "IOC"),
            FillMode::Fok => write!(f, "FOK"),
        }
    }
}

/// Market order that flattens (part of) an existing position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticket: Ticket,
    pub symbol: String,
    /// Direction of this order (opposite of the position).
    pub side: Side,
    pub volume: f64,
    pub price: f64,
    /// Allowed slippage in points.
    pub deviation: u32,
    pub fill: FillMode,
    pub comment: String,
}

/// Protective level change. 0.0 means "no level" on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub ticket: Ticket,
    pub symbol: String,
    pub sl: f64,
    pub tp: f64,
    pub comment: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: u32,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    /// Venue-side last error code observed alongside this result.
    #[serde(default)]
    pub last_error: Option<i64>,
}

impl OrderResult {
    pub fn done(price: f64, volume: f64) -> Self {
        Self {
            retcode: RETCODE_DONE,
            comment: "done".to_string(),
            price,
            volume,
            last_error: None,
        }
    }

    pub fn rejected(retcode: u32, comment: impl Into<String>) -> Self {
        Self {
            retcode,
            comment: comment.into(),
            ..Self::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.retcode == RETCODE_DONE
    }

    /// Any one of result code, last-error code, or comment text is enough.
    pub fn automation_disabled(&self) -> bool {
        AUTOMATION_DISABLED_CODES.contains(&(self.retcode as i64))
            || self
                .last_error
                .map(|c| AUTOMATION_DISABLED_CODES.contains(&c))
                .unwrap_or(false)
            || self
                .comment
                .to_lowercase()
                .contains(AUTOMATION_DISABLED_TEXT)
    }
}

/// A venue call that produced no result at all (transport, terminal gone, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VenueError {
    pub code: Option<i64>,
    pub message: String,
}

impl VenueError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn automation_disabled(&self) -> bool {
        self.code
            .map(|c| AUTOMATION_DISABLED_CODES.contains(&c))
            .unwrap_or(false)
            || self.message.to_lowercase().contains(AUTOMATION_DISABLED_TEXT)
    }
}

impl fmt::Display for VenueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(c) => write!(f, "VENUE_ERROR[{c}]: {}", self.message),
            None => write!(f, "VENUE_ERROR: {}", self.message),
        }
    }
}

impl std::error::Error for VenueError {}

/// ASCII only, at most `COMMENT_MAX_LEN` characters.
pub fn safe_comment(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii())
        .take(COMMENT_MAX_LEN)
        .collect()
}
