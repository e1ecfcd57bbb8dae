use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::union_tags;
use crate::shared::errors::{http_err, CoreError};
use crate::shared::models::Customer;
use crate::shared::schema::{customers, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::{advisory_xact_lock, get_conn, lock_key};

#[derive(Debug, Serialize)]
pub struct MergeOutcome {
    pub customer: Customer,
    pub tickets_moved: usize,
}

/// The surviving field values after a merge. Pure so the rules are
/// testable without a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub tags: Vec<String>,
    pub alt_emails: Vec<String>,
    pub phone: Option<String>,
    pub order_count: i32,
    pub lifetime_value: f64,
    pub ticket_count: i32,
}

/// Field-level reconciliation: tags and alternate emails union, the
/// secondary's primary email survives as an alternate, phone keeps the
/// primary's value with the secondary's as fallback, commerce totals
/// take the max (they may be overlapping syncs, never summed), ticket
/// counts add because the tickets themselves move.
pub fn reconcile(primary: &Customer, secondary: &Customer) -> Reconciled {
    let tags = union_tags(&primary.tags, &secondary.tags);
    let mut alt_emails = union_tags(&primary.alt_emails, &secondary.alt_emails);
    if secondary.primary_email != primary.primary_email
        && !alt_emails.contains(&secondary.primary_email)
    {
        alt_emails.push(secondary.primary_email.clone());
    }
    alt_emails.retain(|e| e != &primary.primary_email);

    Reconciled {
        tags,
        alt_emails,
        phone: primary.phone.clone().or_else(|| secondary.phone.clone()),
        order_count: primary.order_count.max(secondary.order_count),
        lifetime_value: primary.lifetime_value.max(secondary.lifetime_value),
        ticket_count: primary.ticket_count + secondary.ticket_count,
    }
}

fn load_customer(conn: &mut PgConnection, id: Uuid) -> Result<Customer, CoreError> {
    customers::table
        .find(id)
        .first::<Customer>(conn)
        .optional()?
        .ok_or_else(|| CoreError::NotFound(format!("customer {id}")))
}

/// Consolidate the secondary customer into the primary and retire the
/// secondary. Irreversible, operator-triggered, never invoked by the
/// resolver.
///
/// Runs as one transaction holding both customers' advisory locks
/// (taken in sorted order), so a contact event resolving to the
/// secondary mid-merge waits and then retries against the survivor.
/// A repeated call with the retired secondary id fails with NotFound.
pub fn merge_customers(
    conn: &mut PgConnection,
    primary_id: Uuid,
    secondary_id: Uuid,
) -> Result<MergeOutcome, CoreError> {
    if primary_id == secondary_id {
        return Err(CoreError::Validation(
            "cannot merge a customer into itself".into(),
        ));
    }

    conn.transaction::<MergeOutcome, CoreError, _>(|conn| {
        let mut keys = [lock_key(primary_id), lock_key(secondary_id)];
        keys.sort_unstable();
        for key in keys {
            advisory_xact_lock(conn, key)?;
        }

        let primary = load_customer(conn, primary_id)?;
        let secondary = load_customer(conn, secondary_id)?;

        // 1. Every ticket the secondary owns moves to the primary.
        let tickets_moved =
            diesel::update(tickets::table.filter(tickets::customer_id.eq(secondary.id)))
                .set((
                    tickets::customer_id.eq(primary.id),
                    tickets::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

        // 2-4. Surviving field values.
        let fields = reconcile(&primary, &secondary);

        // 5. A completed merge resolves any pending duplicate suspicion.
        let merged = diesel::update(customers::table.find(primary.id))
            .set((
                customers::tags.eq(fields.tags),
                customers::alt_emails.eq(fields.alt_emails),
                customers::phone.eq(fields.phone),
                customers::order_count.eq(fields.order_count),
                customers::lifetime_value.eq(fields.lifetime_value),
                customers::ticket_count.eq(fields.ticket_count),
                customers::possible_duplicate_of.eq(None::<Uuid>),
                customers::updated_at.eq(Utc::now()),
            ))
            .get_result::<Customer>(conn)?;

        // 6. No pointer may dangle at the retired record.
        diesel::update(customers::table.filter(customers::possible_duplicate_of.eq(secondary.id)))
            .set(customers::possible_duplicate_of.eq(None::<Uuid>))
            .execute(conn)?;

        // 7. Retire the secondary.
        diesel::delete(customers::table.find(secondary.id)).execute(conn)?;

        info!(
            "merged customer {} into {} ({} tickets moved)",
            secondary.id, merged.id, tickets_moved
        );
        Ok(MergeOutcome {
            customer: merged,
            tickets_moved,
        })
    })
}

// ===== HTTP surface =====

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub primary_id: Uuid,
    pub secondary_id: Uuid,
}

pub async fn merge_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeOutcome>, (StatusCode, String)> {
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    let outcome = merge_customers(&mut conn, req.primary_id, req.secondary_id).map_err(http_err)?;
    Ok(Json(outcome))
}

pub fn configure_merge_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/customers/merge", post(merge_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn customer(email: &str, phone: Option<&str>) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            display_name: "Test".into(),
            primary_email: email.into(),
            alt_emails: Vec::new(),
            phone: phone.map(str::to_string),
            tags: Vec::new(),
            ticket_count: 0,
            possible_duplicate_of: None,
            order_count: 0,
            lifetime_value: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn secondary_primary_email_becomes_an_alternate() {
        let primary = customer("a@example.com", None);
        let secondary = customer("b@example.com", None);
        let fields = reconcile(&primary, &secondary);
        assert_eq!(fields.alt_emails, vec!["b@example.com".to_string()]);
    }

    #[test]
    fn primary_own_email_never_lands_in_alternates() {
        let primary = customer("a@example.com", None);
        let mut secondary = customer("a@example.com", None);
        secondary.alt_emails = vec!["a@example.com".into(), "c@example.com".into()];
        let fields = reconcile(&primary, &secondary);
        assert_eq!(fields.alt_emails, vec!["c@example.com".to_string()]);
    }

    #[test]
    fn phone_prefers_primary_falls_back_to_secondary() {
        let primary = customer("a@example.com", Some("111"));
        let secondary = customer("b@example.com", Some("222"));
        assert_eq!(reconcile(&primary, &secondary).phone.as_deref(), Some("111"));

        let primary = customer("a@example.com", None);
        assert_eq!(reconcile(&primary, &secondary).phone.as_deref(), Some("222"));
    }

    #[test]
    fn commerce_totals_take_max_ticket_counts_sum() {
        let mut primary = customer("a@example.com", None);
        let mut secondary = customer("b@example.com", None);
        primary.order_count = 3;
        secondary.order_count = 7;
        primary.lifetime_value = 120.0;
        secondary.lifetime_value = 80.0;
        primary.ticket_count = 2;
        secondary.ticket_count = 5;

        let fields = reconcile(&primary, &secondary);
        assert_eq!(fields.order_count, 7);
        assert_eq!(fields.lifetime_value, 120.0);
        assert_eq!(fields.ticket_count, 7);
    }

    #[test]
    fn tags_union_without_duplicates() {
        let mut primary = customer("a@example.com", None);
        let mut secondary = customer("b@example.com", None);
        primary.tags = vec!["vip".into(), "billing".into()];
        secondary.tags = vec!["billing".into(), "bug".into()];
        assert_eq!(
            reconcile(&primary, &secondary).tags,
            vec!["vip".to_string(), "billing".to_string(), "bug".to_string()]
        );
    }
}
