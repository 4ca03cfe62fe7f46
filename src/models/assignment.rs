use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Broadcasted,
    Assigned,
    Completed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Candidate drivers, nearest first.
    pub broadcasted_to: Vec<Uuid>,
    pub status: AssignmentStatus,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn broadcast(order_id: Uuid, candidates: Vec<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            broadcasted_to: candidates,
            status: AssignmentStatus::Broadcasted,
            assigned_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_candidate(&self, driver_id: Uuid) -> bool {
        self.broadcasted_to.contains(&driver_id)
    }

    /// Candidates other than the given driver, in broadcast order.
    pub fn other_candidates(&self, driver_id: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.broadcasted_to
            .iter()
            .copied()
            .filter(move |id| *id != driver_id)
    }
}
