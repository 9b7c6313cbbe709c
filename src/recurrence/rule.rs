use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How often a recurring task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(Error::InvalidRule(format!("unknown frequency '{other}'"))),
        }
    }
}

/// When a recurring series stops producing successors.
///
/// Wire shape: `{"type": "never"}`, `{"type": "after_count", "value": 10}`,
/// `{"type": "on_date", "value": "2026-12-31T00:00:00Z"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EndCondition {
    Never,
    AfterCount(u32),
    OnDate(String),
}

impl Default for EndCondition {
    fn default() -> Self {
        Self::Never
    }
}

/// A task's recurrence rule, persisted as JSON on the task row and carried
/// verbatim onto every spawned successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub end_condition: EndCondition,
}

fn default_interval() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            enabled: true,
            end_condition: EndCondition::Never,
        }
    }

    pub fn with_end_condition(mut self, end_condition: EndCondition) -> Self {
        self.end_condition = end_condition;
        self
    }

    /// Structural/semantic validation. A rule failing any check is rejected
    /// before being attached to a task or used by the coordinator.
    ///
    /// Frequency and `after_count` counts are already constrained by the type
    /// system (serde rejects unknown frequencies and negative counts at the
    /// deserialization boundary); what remains is the interval and the
    /// `on_date` timestamp.
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(Error::InvalidRule(
                "interval must be a positive integer".into(),
            ));
        }
        if let EndCondition::OnDate(date) = &self.end_condition {
            DateTime::parse_from_rfc3339(date).map_err(|e| {
                Error::InvalidRule(format!("end condition date '{date}' is not RFC 3339: {e}"))
            })?;
        }
        Ok(())
    }
}
