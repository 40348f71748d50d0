//! Core data models for the prediction engine
//!
//! Report records are owned by the application's persistence layer and only
//! borrowed here. Verdicts and hotspot clusters are handed back to the caller,
//! which decides whether to persist them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{GeoPoint, GridCell};

/// Priority levels, in ascending order of urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub const ALL: [Priority; Priority::COUNT] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    /// Position in `ALL`, used as the class index by the classifiers.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Case-insensitive parse of a priority name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "Low"),
            Priority::Medium => write!(f, "Medium"),
            Priority::High => write!(f, "High"),
            Priority::Critical => write!(f, "Critical"),
        }
    }
}

/// Report lifecycle status. Variants are declared in lifecycle order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ReportStatus {
    #[default]
    Pending,
    #[serde(rename = "Under Investigation", alias = "UnderInvestigation")]
    UnderInvestigation,
    Resolved,
    Closed,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Pending => write!(f, "Pending"),
            ReportStatus::UnderInvestigation => write!(f, "Under Investigation"),
            ReportStatus::Resolved => write!(f, "Resolved"),
            ReportStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Where an incident happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    /// Raw WGS84 coordinates
    Coordinates { lat: f64, lon: f64 },
    /// A named district/zone as entered by the reporter
    Zone { name: String },
}

impl Location {
    pub fn point(lat: f64, lon: f64) -> Self {
        Location::Coordinates { lat, lon }
    }

    pub fn zone(name: impl Into<String>) -> Self {
        Location::Zone { name: name.into() }
    }
}

/// Reference to the citizen who filed a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reporter {
    pub id: String,
    /// Number of reports this citizen filed before this one
    #[serde(default)]
    pub prior_reports: u32,
}

/// Snapshot of one citizen report at the time features are extracted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    #[serde(default)]
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub reporter: Option<Reporter>,
    #[serde(default)]
    pub status: ReportStatus,
    /// Resolved priority label; `None` for new/untriaged reports
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Statuses the report moved through, oldest first
    #[serde(default)]
    pub status_history: Vec<ReportStatus>,
}

/// Why a record violates the data-model invariants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIssue {
    UnknownCategory(String),
    FutureTimestamp,
}

impl std::fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordIssue::UnknownCategory(c) => write!(f, "category '{}' is not configured", c),
            RecordIssue::FutureTimestamp => write!(f, "timestamp is in the future"),
        }
    }
}

impl ReportRecord {
    pub fn new(category: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            category: category.into(),
            description: String::new(),
            timestamp,
            location: None,
            reporter: None,
            status: ReportStatus::Pending,
            priority: None,
            status_history: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_reporter(mut self, id: impl Into<String>, prior_reports: u32) -> Self {
        self.reporter = Some(Reporter {
            id: id.into(),
            prior_reports,
        });
        self
    }

    /// Mark the record as triaged: sets the priority and a resolved status.
    pub fn labeled(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self.status = ReportStatus::Resolved;
        self.status_history = vec![
            ReportStatus::Pending,
            ReportStatus::UnderInvestigation,
            ReportStatus::Resolved,
        ];
        self
    }

    /// Check category membership and that the report is not dated in the future.
    pub fn validate(&self, categories: &[String], now: DateTime<Utc>) -> Result<(), RecordIssue> {
        let category = self.category.trim();
        if !categories.iter().any(|c| c.eq_ignore_ascii_case(category)) {
            return Err(RecordIssue::UnknownCategory(self.category.clone()));
        }
        if self.timestamp > now {
            return Err(RecordIssue::FutureTimestamp);
        }
        Ok(())
    }

    /// Status history only moves forward through the lifecycle and ends at
    /// the current status. An empty history is trivially consistent.
    pub fn has_consistent_history(&self) -> bool {
        if self.status_history.is_empty() {
            return true;
        }
        let forward = self.status_history.windows(2).all(|w| w[0] < w[1]);
        forward && self.status_history.last() == Some(&self.status)
    }
}

/// Monotonically increasing model version identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl VersionId {
    pub fn next(self) -> Self {
        VersionId(self.0 + 1)
    }

    /// Parse `"7"` or `"v7"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let digits = s.strip_prefix('v').unwrap_or(s);
        digits.parse().ok().map(VersionId)
    }

    /// Directory name used by the on-disk registry.
    pub fn dir_name(&self) -> String {
        format!("v{:06}", self.0)
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Output of one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub priority: Priority,
    /// Probability of `priority` under the model, in [0, 1]
    pub confidence: f64,
    /// Full distribution, indexed by `Priority::index`
    pub probabilities: [f64; Priority::COUNT],
    pub model_version: VersionId,
    /// Confidence fell below the configured threshold
    pub low_confidence: bool,
    /// `Some(true)` when the report falls inside a published hotspot;
    /// `None` when no hotspot snapshot exists or the report has no location
    pub in_hotspot: Option<bool>,
}

impl Verdict {
    /// Whether the calling workflow should route this report to a human.
    pub fn needs_review(&self) -> bool {
        self.low_confidence
    }
}

/// A spatially and temporally co-located group of reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotCluster {
    pub centroid: GeoPoint,
    /// Distance from the centroid to the farthest member report, in metres
    pub radius_m: f64,
    pub report_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub cells: Vec<GridCell>,
    /// Most frequent categories, descending
    pub top_categories: Vec<(String, usize)>,
}

impl HotspotCluster {
    /// Whether `point` lies within the cluster's radius.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.centroid.haversine_m(point) <= self.radius_m
    }
}
