//! Resource status taxonomy and boundary classification.
//!
//! The source exposes loosely-typed lifecycle labels and a pair of
//! call-to-action indicators. Everything is collapsed into a small closed
//! enum here; the raw label survives only in logs and the audit column.

use serde::{Deserialize, Serialize};
use time::Date;
use utoipa::ToSchema;

/// Closed status taxonomy for a tracked resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Not yet open for entries (includes "closed" and "provisional").
    Unopened,
    /// The unrestricted enrollment action is available.
    OpenStandard,
    /// Only the gated application action is available.
    OpenRestricted,
    /// Finished or cancelled; no further polling value.
    Terminal,
}

impl ResourceStatus {
    pub fn as_db(&self) -> &'static str {
        match self {
            ResourceStatus::Unopened => "unopened",
            ResourceStatus::OpenStandard => "open_standard",
            ResourceStatus::OpenRestricted => "open_restricted",
            ResourceStatus::Terminal => "terminal",
        }
    }

    /// Parse the stored column value. Unknown values (from a newer or older
    /// schema) fall back to `Unopened` so a resource is never dropped.
    pub fn from_db(value: &str) -> ResourceStatus {
        match value {
            "open_standard" => ResourceStatus::OpenStandard,
            "open_restricted" => ResourceStatus::OpenRestricted,
            "terminal" => ResourceStatus::Terminal,
            _ => ResourceStatus::Unopened,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ResourceStatus::OpenStandard | ResourceStatus::OpenRestricted
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceStatus::Terminal)
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Raw reading returned by the fetch collaborator for one resource page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReading {
    /// The unrestricted enrollment call-to-action is present.
    #[serde(default)]
    pub standard_entry: bool,
    /// The gated application call-to-action is present.
    #[serde(default)]
    pub restricted_entry: bool,
    /// Lifecycle label shown by the source when no call-to-action is present.
    #[serde(default)]
    pub source_label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub starts_on: Option<Date>,
    #[serde(default)]
    pub ends_on: Option<Date>,
}

/// Classification result, carrying the raw label back when it was not
/// recognized so the caller can log the anomaly.
#[derive(Clone, Debug, PartialEq)]
pub struct Classified {
    pub status: ResourceStatus,
    pub unrecognized_label: Option<String>,
}

/// Map a raw reading onto the closed taxonomy.
///
/// Precedence is fixed: the gated application indicator wins over the
/// enrollment indicator, which wins over any lifecycle label. Unrecognized
/// labels default to `Unopened` and are reported, never dropped.
pub fn classify(reading: &StatusReading) -> Classified {
    if reading.restricted_entry {
        return Classified {
            status: ResourceStatus::OpenRestricted,
            unrecognized_label: None,
        };
    }
    if reading.standard_entry {
        return Classified {
            status: ResourceStatus::OpenStandard,
            unrecognized_label: None,
        };
    }

    match reading.source_label.as_deref() {
        None => Classified {
            status: ResourceStatus::Unopened,
            unrecognized_label: None,
        },
        Some(label) => match label.to_ascii_lowercase().as_str() {
            "closed" | "provisional" | "scheduled" | "upcoming" => Classified {
                status: ResourceStatus::Unopened,
                unrecognized_label: None,
            },
            "finished" | "cancelled" | "archived" => Classified {
                status: ResourceStatus::Terminal,
                unrecognized_label: None,
            },
            _ => Classified {
                status: ResourceStatus::Unopened,
                unrecognized_label: Some(label.to_string()),
            },
        },
    }
}
