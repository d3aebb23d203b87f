use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Store-assigned surrogate key. `None` until the store has persisted the row.
pub type Id = i64;

// ── RawData ──────────────────────────────────────────────────────────────────

/// Every incoming notification, verbatim, plus the canonical fields the
/// parser (component C) extracted from it. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub id: Id,
    pub deployment: String,
    pub when: Decimal,
    pub host: String,
    pub service: String,
    pub routing_key: String,
    pub event: String,
    pub request_id: Option<String>,
    pub instance_id: Option<String>,
    pub json: String,
    pub state: Option<String>,
    pub old_task: Option<String>,
}

// ── Lifecycle / Timing ───────────────────────────────────────────────────────

/// Per-instance aggregate view: the latest state and task_state, and the raw
/// event that produced them. Unique per `instance_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub id: Id,
    pub instance_id: String,
    pub last_raw_id: Id,
    pub last_state: String,
    pub last_task_state: String,
}

/// A start/end pair for a named event on a lifecycle. Uniquely identified by
/// `(lifecycle_id, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub id: Id,
    pub lifecycle_id: Id,
    pub name: String,
    pub start_raw_id: Option<Id>,
    pub start_when: Option<Decimal>,
    pub end_raw_id: Option<Id>,
    pub end_when: Option<Decimal>,
    pub diff: Option<Decimal>,
}

impl Timing {
    /// Populate the end side and derive `diff`. No-op on `diff` if the start
    /// side was never populated (out-of-order arrival, §4.E).
    pub fn close(&mut self, end_raw_id: Id, end_when: Decimal) {
        self.end_raw_id = Some(end_raw_id);
        self.end_when = Some(end_when);
        if let Some(start_when) = self.start_when {
            self.diff = Some(end_when - start_when);
        }
    }
}

/// Per-request latency accumulator rooted at the API-host `update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTracker {
    pub id: Id,
    pub request_id: String,
    pub lifecycle_id: Id,
    pub start: Decimal,
    pub last_timing_id: Option<Id>,
    pub duration: Decimal,
}

// ── Usage / Delete / Exists ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsImage {
    pub os_architecture: String,
    pub os_version: String,
    pub os_distro: String,
    pub rax_options: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceUsage {
    pub id: Id,
    pub instance_id: String,
    pub request_id: String,
    pub launched_at: Option<DateTime<Utc>>,
    pub instance_type_id: Option<String>,
    pub tenant: String,
    pub image: OsImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDelete {
    pub id: Id,
    pub instance_id: String,
    pub launched_at: Option<DateTime<Utc>>,
    pub deleted_at: DateTime<Utc>,
}

/// A read-only, out-of-band authoritative snapshot, keyed the same way as
/// Usage+Delete, used only as the verifier's fallback source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReconcile {
    pub id: Id,
    pub instance_id: String,
    pub launched_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub instance_type_id: Option<String>,
    pub tenant: String,
    pub image: OsImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistsStatus {
    Pending,
    Verifying,
    Verified,
    Reconciled,
    Failed,
}

impl ExistsStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExistsStatus::Verified | ExistsStatus::Reconciled | ExistsStatus::Failed)
    }
}

impl std::fmt::Display for ExistsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExistsStatus::Pending => "pending",
            ExistsStatus::Verifying => "verifying",
            ExistsStatus::Verified => "verified",
            ExistsStatus::Reconciled => "reconciled",
            ExistsStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A billing-audit record. Immutable except for `status`/`fail_reason`, and
/// terminal once it reaches `{Verified, Reconciled, Failed}` — see
/// [`ExistsStatus::is_terminal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceExists {
    pub id: Id,
    pub message_id: String,
    pub instance_id: String,
    pub launched_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub audit_period_beginning: DateTime<Utc>,
    pub audit_period_ending: DateTime<Utc>,
    pub instance_type_id: String,
    pub tenant: String,
    pub image: OsImage,
    pub usage_id: Option<Id>,
    pub delete_id: Option<Id>,
    pub raw_id: Id,
    pub status: ExistsStatus,
    pub fail_reason: Option<String>,
}

impl InstanceExists {
    fn transition(&mut self, to: ExistsStatus) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_verifying(&mut self) -> Result<(), DomainError> {
        self.transition(ExistsStatus::Verifying)
    }

    pub fn mark_verified(&mut self) -> Result<(), DomainError> {
        self.fail_reason = None;
        self.transition(ExistsStatus::Verified)
    }

    pub fn mark_reconciled(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.fail_reason = Some(reason.into());
        self.transition(ExistsStatus::Reconciled)
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.fail_reason = Some(reason.into());
        self.transition(ExistsStatus::Failed)
    }
}
