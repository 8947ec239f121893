//! Repository types.

use chrono::{DateTime, Days, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Harvest state of a repository.
///
/// A repository starts IDLE. Only IDLE repositories may start a harvest.
/// PAUSED_ON_ERROR is left only through an explicit resume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HarvestState {
    Idle,
    Harvesting,
    PausedOnError,
}

impl HarvestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestState::Idle => "idle",
            HarvestState::Harvesting => "harvesting",
            HarvestState::PausedOnError => "paused_on_error",
        }
    }
}

impl fmt::Display for HarvestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarvestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(HarvestState::Idle),
            "harvesting" => Ok(HarvestState::Harvesting),
            "paused_on_error" => Ok(HarvestState::PausedOnError),
            other => Err(format!("unknown harvest state: {}", other)),
        }
    }
}

/// How often a repository is harvested by the calendar scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::Daily => "daily",
            Schedule::Weekly => "weekly",
            Schedule::Monthly => "monthly",
        }
    }
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Schedule::Daily),
            "weekly" => Ok(Schedule::Weekly),
            "monthly" => Ok(Schedule::Monthly),
            other => Err(format!("unknown schedule: {}", other)),
        }
    }
}

/// A configured OAI-PMH source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    pub id: String,
    pub name: String,
    /// OAI-PMH base URL.
    pub url: String,
    pub metadata_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    /// Stylesheet file name, relative to the stylesheet directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stylesheet: Option<String>,
    pub enabled: bool,
    pub schedule: Schedule,
    /// Time of day (UTC) at which scheduled harvests become due.
    pub anchor_time: NaiveTime,
    pub state: HarvestState,
    /// Set by the calendar scheduler or an operator, cleared when a harvest starts.
    pub harvest_requested: bool,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_harvest: Option<DateTime<Utc>>,
    /// Latest datestamp seen by a completed harvest, used as `from=` next time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datestamp: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// Whether the calendar should request a harvest at `now`.
    ///
    /// A repository that was never harvested is due once today's anchor time
    /// has passed. Otherwise it is due at the anchor time one schedule period
    /// after the day of its last harvest.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let next_day = match self.last_harvest {
            None => Some(now.date_naive()),
            Some(last) => {
                let day = last.date_naive();
                match self.schedule {
                    Schedule::Daily => day.checked_add_days(Days::new(1)),
                    Schedule::Weekly => day.checked_add_days(Days::new(7)),
                    Schedule::Monthly => day.checked_add_months(Months::new(1)),
                }
            }
        };

        match next_day {
            Some(day) => now >= day.and_time(self.anchor_time).and_utc(),
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state == HarvestState::PausedOnError
    }
}

/// Request to register a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRepository {
    pub id: String,
    pub name: String,
    pub url: String,
    pub metadata_prefix: String,
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub stylesheet: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default = "default_anchor")]
    pub anchor_time: NaiveTime,
}

fn default_enabled() -> bool {
    true
}

fn default_anchor() -> NaiveTime {
    NaiveTime::MIN
}

impl NewRepository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            metadata_prefix: "oai_dc".to_string(),
            set: None,
            stylesheet: None,
            enabled: true,
            schedule: Schedule::Daily,
            anchor_time: default_anchor(),
        }
    }

    pub fn with_set(mut self, set: impl Into<String>) -> Self {
        self.set = Some(set.into());
        self
    }

    pub fn with_stylesheet(mut self, stylesheet: impl Into<String>) -> Self {
        self.stylesheet = Some(stylesheet.into());
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule, anchor_time: NaiveTime) -> Self {
        self.schedule = schedule;
        self.anchor_time = anchor_time;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Result of counting one more consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTally {
    pub consecutive_failures: u32,
    /// True only for the call that moved the repository into PAUSED_ON_ERROR.
    pub paused_now: bool,
}
