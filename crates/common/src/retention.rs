use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RetentionParseError;

const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Named history durations a viewer can pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RetentionWindow {
    ThirtySeconds,
    #[default]
    OneMinute,
    FiveMinutes,
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
    OneYear,
    FiveYears,
}

impl RetentionWindow {
    pub const ALL: [RetentionWindow; 9] = [
        RetentionWindow::ThirtySeconds,
        RetentionWindow::OneMinute,
        RetentionWindow::FiveMinutes,
        RetentionWindow::OneHour,
        RetentionWindow::OneDay,
        RetentionWindow::OneWeek,
        RetentionWindow::OneMonth,
        RetentionWindow::OneYear,
        RetentionWindow::FiveYears,
    ];

    pub fn as_millis(self) -> u64 {
        match self {
            RetentionWindow::ThirtySeconds => 30 * SECOND,
            RetentionWindow::OneMinute => MINUTE,
            RetentionWindow::FiveMinutes => 5 * MINUTE,
            RetentionWindow::OneHour => HOUR,
            RetentionWindow::OneDay => DAY,
            RetentionWindow::OneWeek => 7 * DAY,
            RetentionWindow::OneMonth => 30 * DAY,
            RetentionWindow::OneYear => 365 * DAY,
            RetentionWindow::FiveYears => 5 * 365 * DAY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RetentionWindow::ThirtySeconds => "30s",
            RetentionWindow::OneMinute => "1m",
            RetentionWindow::FiveMinutes => "5m",
            RetentionWindow::OneHour => "1h",
            RetentionWindow::OneDay => "1d",
            RetentionWindow::OneWeek => "1w",
            RetentionWindow::OneMonth => "1mo",
            RetentionWindow::OneYear => "1y",
            RetentionWindow::FiveYears => "5y",
        }
    }

    /// Oldest timestamp still retained at `now_ms`.
    pub fn cutoff(self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.as_millis())
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RetentionWindow {
    type Err = RetentionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetentionWindow::ALL
            .into_iter()
            .find(|w| w.label() == s.trim())
            .ok_or_else(|| RetentionParseError(s.to_string()))
    }
}

impl TryFrom<String> for RetentionWindow {
    type Error = RetentionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RetentionWindow> for String {
    fn from(window: RetentionWindow) -> Self {
        window.label().to_string()
    }
}
