//! Ticket / Task / Subtask data model (§3) and the single-writer `TicketHolder` cell.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Backlog,
    Active,
    Failed,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtaskStatus {
    Incomplete,
    InProgress,
    AwaitingReview,
    Complete,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: SubtaskStatus,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            status: SubtaskStatus::Incomplete,
            last_updated: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub branch_name: Option<String>,
    pub tasks: Vec<Task>,
    pub activity_log: Vec<String>,
    pub spend: f64,
    pub max_cost: Option<f64>,
}

impl Ticket {
    /// A ticket has a "valid plan" iff it has at least one task and every task has at least one
    /// subtask (§3 invariant).
    pub fn has_valid_plan(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| !t.subtasks.is_empty())
    }

    /// Iterate subtasks in task order then subtask order (§4.2 fairness guarantee).
    pub fn iter_subtasks(&self) -> impl Iterator<Item = (&Task, &Subtask)> {
        self.tasks.iter().flat_map(|t| t.subtasks.iter().map(move |s| (t, s)))
    }

    pub fn would_exceed_budget(&self, projected_spend: f64) -> bool {
        match self.max_cost {
            Some(max) => projected_spend > max,
            None => false,
        }
    }
}

/// Single-writer mutable cell for the current ticket snapshot.
///
/// Owned by the Orchestrator; tool handlers read through a clone of this handle and mutate it
/// only via the API client's returned representation (§5 shared resources).
#[derive(Clone)]
pub struct TicketHolder(Arc<RwLock<Ticket>>);

impl TicketHolder {
    pub fn new(ticket: Ticket) -> Self {
        Self(Arc::new(RwLock::new(ticket)))
    }

    pub async fn get(&self) -> Ticket {
        self.0.read().await.clone()
    }

    pub async fn replace(&self, ticket: Ticket) {
        *self.0.write().await = ticket;
    }
}
