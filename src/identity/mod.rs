use std::cmp::Ordering;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::errors::{http_err, CoreError};
use crate::shared::models::Customer;
use crate::shared::schema::customers;
use crate::shared::state::AppState;
use crate::shared::utils::{advisory_xact_lock, get_conn, lock_key, normalize_email, phone_suffix};

/// Fuzzy-name threshold above which a new customer is flagged as a
/// possible duplicate of the best-scoring candidate. The scoring
/// formula and this value are a preserved compatibility contract;
/// see DESIGN.md before touching either.
pub const NAME_MATCH_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Email,
    Phone,
    PossibleDuplicate,
    New,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub customer: Customer,
    pub match_kind: MatchKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub possible_match: Option<Customer>,
}

/// Lowercase, strip everything that is not a letter, collapse runs of
/// whitespace. Both sides of every name comparison go through this.
fn normalize_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn name_tokens(name: &str) -> Vec<String> {
    normalize_name(name)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Per-token-pair award: 1.0 for exact equality, 0.8 when lengths
/// differ by at most one and the aligned characters differ in at most
/// one position. Single-letter tokens never score; this keeps stray
/// initials from inflating unrelated names.
fn token_award(a: &str, b: &str) -> f64 {
    let la = a.chars().count();
    let lb = b.chars().count();
    if la <= 1 || lb <= 1 {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if la.abs_diff(lb) <= 1 {
        let mismatches = a.chars().zip(b.chars()).filter(|(x, y)| x != y).count();
        if mismatches <= 1 {
            return 0.8;
        }
    }
    0.0
}

/// Partial-credit name similarity in [0, 1]. Each token takes its best
/// award against the other name's tokens; the sum is divided by the
/// larger token count. Not a true edit distance.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let ta = name_tokens(a);
    let tb = name_tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let sum: f64 = ta
        .iter()
        .map(|x| tb.iter().map(|y| token_award(x, y)).fold(0.0, f64::max))
        .sum();
    sum / ta.len().max(tb.len()) as f64
}

fn find_by_email(
    conn: &mut PgConnection,
    email_norm: &str,
) -> Result<Option<Customer>, diesel::result::Error> {
    customers::table
        .filter(customers::primary_email.eq(email_norm))
        .first::<Customer>(conn)
        .optional()
}

/// Alternate-email bookkeeping for a phone-tier match: the incoming
/// address joins the list unless it is the primary or already present,
/// so repeated contacts from the same address change nothing.
fn merged_alt_emails(existing: &Customer, email_norm: &str) -> Vec<String> {
    let mut alts = existing.alt_emails.clone();
    if email_norm != existing.primary_email && !alts.iter().any(|e| e == email_norm) {
        alts.push(email_norm.to_string());
    }
    alts
}

/// Tier-1 side effects: refresh the display name if it changed,
/// backfill a missing phone, bump the ticket count. Runs under the
/// customer's advisory lock with the row re-read, so a concurrent
/// merge cannot leave us updating a retired row; the count bump is a
/// server-side increment, so concurrent resolves each land theirs.
/// `None` means the row disappeared and resolution must start over.
fn touch_email_match(
    conn: &mut PgConnection,
    customer_id: Uuid,
    full_name: &str,
    phone: Option<&str>,
) -> Result<Option<Customer>, CoreError> {
    conn.transaction::<Option<Customer>, CoreError, _>(|conn| {
        advisory_xact_lock(conn, lock_key(customer_id))?;
        let existing = customers::table
            .find(customer_id)
            .first::<Customer>(conn)
            .optional()?;
        let Some(existing) = existing else {
            return Ok(None);
        };
        let name = if !full_name.trim().is_empty() && existing.display_name != full_name.trim() {
            full_name.trim().to_string()
        } else {
            existing.display_name.clone()
        };
        let phone = match (&existing.phone, phone) {
            (None, Some(p)) if !p.trim().is_empty() => Some(p.trim().to_string()),
            _ => existing.phone.clone(),
        };
        let updated = diesel::update(customers::table.find(customer_id))
            .set((
                customers::display_name.eq(name),
                customers::phone.eq(phone),
                customers::ticket_count.eq(customers::ticket_count + 1),
                customers::updated_at.eq(Utc::now()),
            ))
            .get_result::<Customer>(conn)?;
        Ok(Some(updated))
    })
}

/// Tier-2 side effects under the same locking discipline: record the
/// incoming address as an alternate and bump the count.
fn touch_phone_match(
    conn: &mut PgConnection,
    customer_id: Uuid,
    email_norm: &str,
) -> Result<Option<Customer>, CoreError> {
    conn.transaction::<Option<Customer>, CoreError, _>(|conn| {
        advisory_xact_lock(conn, lock_key(customer_id))?;
        let existing = customers::table
            .find(customer_id)
            .first::<Customer>(conn)
            .optional()?;
        let Some(existing) = existing else {
            return Ok(None);
        };
        let updated = diesel::update(customers::table.find(customer_id))
            .set((
                customers::alt_emails.eq(merged_alt_emails(&existing, email_norm)),
                customers::ticket_count.eq(customers::ticket_count + 1),
                customers::updated_at.eq(Utc::now()),
            ))
            .get_result::<Customer>(conn)?;
        Ok(Some(updated))
    })
}

fn insert_customer(
    conn: &mut PgConnection,
    email_norm: &str,
    phone: Option<&str>,
    full_name: &str,
    possible_duplicate_of: Option<Uuid>,
) -> Result<Customer, diesel::result::Error> {
    let now = Utc::now();
    let customer = Customer {
        id: Uuid::new_v4(),
        display_name: full_name.trim().to_string(),
        primary_email: email_norm.to_string(),
        alt_emails: Vec::new(),
        phone: phone
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        tags: Vec::new(),
        ticket_count: 1,
        possible_duplicate_of,
        order_count: 0,
        lifetime_value: 0.0,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(customers::table)
        .values(&customer)
        .get_result::<Customer>(conn)
}

/// Insert the flagged record under the candidate's advisory lock,
/// re-checking the candidate first so the new `possible_duplicate_of`
/// pointer cannot reference a customer a concurrent merge just
/// retired. `None` means the candidate is gone or the unique-email
/// race was lost; either way resolution starts over.
fn create_flagged(
    conn: &mut PgConnection,
    email_norm: &str,
    phone: Option<&str>,
    full_name: &str,
    candidate_id: Uuid,
) -> Result<Option<Customer>, CoreError> {
    let created = conn.transaction::<Option<Customer>, CoreError, _>(|conn| {
        advisory_xact_lock(conn, lock_key(candidate_id))?;
        let candidate_exists: bool = diesel::dsl::select(diesel::dsl::exists(
            customers::table.find(candidate_id),
        ))
        .get_result(conn)?;
        if !candidate_exists {
            return Ok(None);
        }
        insert_customer(conn, email_norm, phone, full_name, Some(candidate_id))
            .map(Some)
            .map_err(CoreError::from)
    });
    match created {
        Err(CoreError::Conflict(_)) => {
            info!("unique violation creating {email_norm}; re-resolving by email");
            Ok(None)
        }
        other => other,
    }
}

/// How many times resolution re-runs the tiers after losing a race to
/// a concurrent create or merge before giving up.
const RESOLVE_ATTEMPTS: usize = 3;

/// Resolve a contact to exactly zero or one existing customer.
///
/// Tiered, short-circuiting, first match wins:
/// 1. exact primary-email match (case-insensitive)
/// 2. phone last-10-digit suffix match
/// 3. fuzzy full-name match above the threshold (flags, never merges)
/// 4. fresh customer record
///
/// Every matched-row mutation re-reads its row under the same
/// per-customer advisory lock that routing and merging take, and an
/// insert can lose the unique primary_email race; in either case one
/// more pass over the tiers lands on the surviving row instead of
/// surfacing a conflict.
pub fn resolve_contact(
    conn: &mut PgConnection,
    email: &str,
    phone: Option<&str>,
    full_name: &str,
) -> Result<Resolution, CoreError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(CoreError::Validation("a valid email is required".into()));
    }
    if full_name.trim().is_empty() {
        return Err(CoreError::Validation("full name is required".into()));
    }

    let email_norm = normalize_email(email);
    for _ in 0..RESOLVE_ATTEMPTS {
        if let Some(resolution) = resolve_once(conn, &email_norm, phone, full_name)? {
            return Ok(resolution);
        }
        debug!("resolution for {email_norm} raced a concurrent write; retrying");
    }
    Err(CoreError::Conflict(format!(
        "customer records for {email_norm} kept changing during resolution"
    )))
}

/// One pass over the four tiers. `None` means a locked re-check found
/// the matched row gone, or an insert lost the unique-email race; the
/// caller retries from tier 1.
fn resolve_once(
    conn: &mut PgConnection,
    email_norm: &str,
    phone: Option<&str>,
    full_name: &str,
) -> Result<Option<Resolution>, CoreError> {
    // Tier 1: exact primary email.
    if let Some(existing) = find_by_email(conn, email_norm)? {
        return Ok(
            touch_email_match(conn, existing.id, full_name, phone)?.map(|customer| {
                debug!("resolved {} by email", customer.id);
                Resolution {
                    customer,
                    match_kind: MatchKind::Email,
                    possible_match: None,
                }
            }),
        );
    }

    // Tier 2: phone suffix. Full scan by design at this data scale.
    if let Some(suffix) = phone.and_then(phone_suffix) {
        let with_phone: Vec<Customer> = customers::table
            .filter(customers::phone.is_not_null())
            .load(conn)?;
        let hit = with_phone
            .into_iter()
            .find(|c| c.phone.as_deref().and_then(phone_suffix).as_deref() == Some(&suffix));
        if let Some(existing) = hit {
            return Ok(
                touch_phone_match(conn, existing.id, email_norm)?.map(|customer| {
                    debug!("resolved {} by phone suffix", customer.id);
                    Resolution {
                        customer,
                        match_kind: MatchKind::Phone,
                        possible_match: None,
                    }
                }),
            );
        }
    }

    // Tier 3: fuzzy name, only for first + last. A hit creates a new
    // record and flags it for operator review; it never auto-merges.
    if name_tokens(full_name).len() >= 2 {
        let all: Vec<Customer> = customers::table.load(conn)?;
        let best = all
            .into_iter()
            .map(|c| (name_similarity(full_name, &c.display_name), c))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        if let Some((score, candidate)) = best {
            if score > NAME_MATCH_THRESHOLD {
                info!(
                    "contact {} scored {:.2} against customer {}; flagging possible duplicate",
                    email_norm, score, candidate.id
                );
                return Ok(
                    create_flagged(conn, email_norm, phone, full_name, candidate.id)?.map(
                        |customer| Resolution {
                            customer,
                            match_kind: MatchKind::PossibleDuplicate,
                            possible_match: Some(candidate),
                        },
                    ),
                );
            }
        }
    }

    // Tier 4: nobody matched.
    match insert_customer(conn, email_norm, phone, full_name, None) {
        Ok(customer) => Ok(Some(Resolution {
            customer,
            match_kind: MatchKind::New,
            possible_match: None,
        })),
        Err(err) if CoreError::is_unique_violation(&err) => {
            info!("unique violation creating {email_norm}; re-resolving by email");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

// ===== HTTP surface =====

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub email: String,
    pub phone: Option<String>,
    pub full_name: String,
}

pub async fn resolve_identity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Resolution>, (StatusCode, String)> {
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    let resolution = resolve_contact(&mut conn, &req.email, req.phone.as_deref(), &req.full_name)
        .map_err(http_err)?;
    Ok(Json(resolution))
}

pub fn configure_identity_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/identity/resolve", post(resolve_identity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typo_tolerant_first_names_clear_threshold() {
        assert!(name_similarity("John Smith", "Jon Smith") > NAME_MATCH_THRESHOLD);
        assert!(name_similarity("Sarah Lee", "Sara Lee") > NAME_MATCH_THRESHOLD);
    }

    #[test]
    fn unrelated_names_stay_below_threshold() {
        assert!(name_similarity("John Smith", "Alice Johnson") <= NAME_MATCH_THRESHOLD);
        assert!(name_similarity("Maria Garcia", "Bob Wu") <= NAME_MATCH_THRESHOLD);
    }

    #[test]
    fn similarity_ignores_case_and_punctuation() {
        assert_eq!(name_similarity("John Smith", "john  smith!"), 1.0);
        assert_eq!(name_similarity("Anne-Marie Clark", "anne marie clark"), 1.0);
    }

    #[test]
    fn single_letter_tokens_never_score() {
        assert_eq!(token_award("j", "j"), 0.0);
        assert_eq!(token_award("a", "b"), 0.0);
    }

    #[test]
    fn token_award_tiers() {
        assert_eq!(token_award("smith", "smith"), 1.0);
        assert_eq!(token_award("john", "jon"), 0.8);
        assert_eq!(token_award("sarah", "sara"), 0.8);
        assert_eq!(token_award("smith", "alice"), 0.0);
        assert_eq!(token_award("john", "johnson"), 0.0);
    }

    #[test]
    fn empty_names_score_zero() {
        assert_eq!(name_similarity("", "John Smith"), 0.0);
        assert_eq!(name_similarity("...", "John Smith"), 0.0);
    }

    fn stored_customer(primary_email: &str, alt_emails: Vec<String>) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            display_name: "Kim Lee".into(),
            primary_email: primary_email.into(),
            alt_emails,
            phone: Some("+1 415 555 0100".into()),
            tags: Vec::new(),
            ticket_count: 1,
            possible_duplicate_of: None,
            order_count: 0,
            lifetime_value: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn alternate_email_append_is_idempotent() {
        let customer = stored_customer("kim@example.com", Vec::new());
        let once = merged_alt_emails(&customer, "kim@work.example");
        assert_eq!(once, vec!["kim@work.example".to_string()]);

        let customer = stored_customer("kim@example.com", once.clone());
        assert_eq!(merged_alt_emails(&customer, "kim@work.example"), once);
    }

    #[test]
    fn primary_email_never_becomes_its_own_alternate() {
        let customer = stored_customer("kim@example.com", Vec::new());
        assert!(merged_alt_emails(&customer, "kim@example.com").is_empty());
    }

    #[test]
    fn score_normalizes_by_larger_token_count() {
        // "john smith" vs "john smith jr": two exact awards over three tokens.
        let score = name_similarity("John Smith", "John Smith Jr");
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }
}
