use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::schema::{customers, ticket_messages, ticket_notes, tickets};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = customers)]
pub struct Customer {
    pub id: Uuid,
    pub display_name: String,
    /// Stored lower-cased; unique constraint on this column is the
    /// concurrent-creation guard.
    pub primary_email: String,
    pub alt_emails: Vec<String>,
    pub phone: Option<String>,
    pub tags: Vec<String>,
    pub ticket_count: i32,
    /// Advisory pointer only. Never owning, never cascading, cleared on merge.
    pub possible_duplicate_of: Option<Uuid>,
    pub order_count: i32,
    pub lifetime_value: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    /// Human-facing id, e.g. "TKT-583201". Distinct from the row id.
    pub ticket_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub priority: String,
    pub channel: String,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = ticket_messages)]
pub struct TicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    /// Sequence-assigned; breaks ordering ties between equal timestamps.
    pub seq: i64,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = ticket_messages)]
pub struct NewTicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_notes)]
pub struct TicketNote {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Open and pending tickets accept new customer messages directly.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageAuthor {
    Customer,
    Agent,
    System,
}

impl MessageAuthor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            TicketStatus::Open,
            TicketStatus::Pending,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("reopened"), None);
    }

    #[test]
    fn only_open_and_pending_are_active() {
        assert!(TicketStatus::Open.is_active());
        assert!(TicketStatus::Pending.is_active());
        assert!(!TicketStatus::Resolved.is_active());
        assert!(!TicketStatus::Closed.is_active());
    }
}
