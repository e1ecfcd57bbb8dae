use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::classify::{classify, tags_from_note, union_tags, Classification};
use crate::config::{RecencyOrder, RoutingConfig};
use crate::identity::resolve_contact;
use crate::llm::draft_reply;
use crate::shared::errors::{http_err, CoreError};
use crate::shared::models::{
    Customer, MessageAuthor, NewTicketMessage, Ticket, TicketMessage, TicketNote, TicketStatus,
};
use crate::shared::schema::{customers, ticket_messages, ticket_notes, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::{advisory_xact_lock, get_conn, lock_key};

const TICKET_NUMBER_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Threaded,
    Reopened,
    Created,
}

#[derive(Debug, Clone, Serialize)]
pub struct Routing {
    pub ticket: Ticket,
    pub action: RouteAction,
}

/// A closed or resolved ticket only reopens while the window is still
/// open; at or past the boundary a fresh ticket is created instead.
pub fn reopen_eligible(
    last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    now - last_updated < window
}

/// Small display-id space, so the pick is collision-checked against
/// the store instead of trusted.
fn generate_ticket_number(conn: &mut PgConnection) -> Result<String, CoreError> {
    use diesel::dsl::{exists, select};
    for _ in 0..TICKET_NUMBER_ATTEMPTS {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let candidate = format!("TKT-{n:06}");
        let taken: bool = select(exists(
            tickets::table.filter(tickets::ticket_number.eq(&candidate)),
        ))
        .get_result(conn)?;
        if !taken {
            return Ok(candidate);
        }
    }
    Err(CoreError::Database(
        "exhausted ticket number attempts".to_string(),
    ))
}

fn append_message(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    author: MessageAuthor,
    content: &str,
) -> Result<TicketMessage, diesel::result::Error> {
    let row = NewTicketMessage {
        id: Uuid::new_v4(),
        ticket_id,
        author: author.as_str().to_string(),
        content: content.to_string(),
        created_at: Utc::now(),
    };
    diesel::insert_into(ticket_messages::table)
        .values(&row)
        .get_result::<TicketMessage>(conn)
}

fn load_ticket(conn: &mut PgConnection, id: Uuid) -> Result<Ticket, CoreError> {
    tickets::table
        .find(id)
        .first::<Ticket>(conn)
        .optional()?
        .ok_or_else(|| CoreError::NotFound(format!("ticket {id}")))
}

fn most_recent_with_status(
    conn: &mut PgConnection,
    customer_id: Uuid,
    statuses: &[&str],
    recency: RecencyOrder,
) -> Result<Option<Ticket>, diesel::result::Error> {
    let base = tickets::table
        .filter(tickets::customer_id.eq(customer_id))
        .filter(tickets::status.eq_any(statuses));
    match recency {
        RecencyOrder::UpdatedAt => base
            .order((tickets::updated_at.desc(), tickets::id.desc()))
            .first::<Ticket>(conn)
            .optional(),
        RecencyOrder::CreatedAt => base
            .order((tickets::created_at.desc(), tickets::id.desc()))
            .first::<Ticket>(conn)
            .optional(),
    }
}

fn summarize(text: &str) -> Option<String> {
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(120).collect())
}

/// Attach an incoming customer message to the right ticket.
///
/// Ordered branches: thread onto the most recent open or pending
/// ticket; else reopen the most recent resolved or closed ticket still
/// inside the reopen window; else create a new
/// ticket seeded with the classification. Runs in one transaction
/// under a per-customer advisory lock, so two concurrent messages from
/// the same customer cannot each open a ticket.
pub fn route_message(
    conn: &mut PgConnection,
    routing: &RoutingConfig,
    customer_id: Uuid,
    text: &str,
    classification: &Classification,
    channel: &str,
) -> Result<Routing, CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::Validation("message text is required".into()));
    }
    let window = routing.reopen_window();
    let recency = routing.recency;
    conn.transaction::<Routing, CoreError, _>(|conn| {
        advisory_xact_lock(conn, lock_key(customer_id))?;

        let customer_exists: bool = diesel::dsl::select(diesel::dsl::exists(
            customers::table.find(customer_id),
        ))
        .get_result(conn)?;
        if !customer_exists {
            return Err(CoreError::NotFound(format!("customer {customer_id}")));
        }

        let now = Utc::now();

        // Branch 1: an open or pending conversation absorbs the message.
        if let Some(ticket) =
            most_recent_with_status(conn, customer_id, &["open", "pending"], recency)?
        {
            append_message(conn, ticket.id, MessageAuthor::Customer, text)?;
            let updated = diesel::update(tickets::table.find(ticket.id))
                .set((
                    tickets::status.eq(TicketStatus::Open.as_str()),
                    tickets::tags.eq(union_tags(&ticket.tags, &classification.tags)),
                    tickets::updated_at.eq(now),
                ))
                .get_result::<Ticket>(conn)?;
            debug!("threaded message onto {}", updated.ticket_number);
            return Ok(Routing {
                ticket: updated,
                action: RouteAction::Threaded,
            });
        }

        // Branch 2: a recently closed conversation reopens.
        if let Some(ticket) =
            most_recent_with_status(conn, customer_id, &["resolved", "closed"], recency)?
        {
            if reopen_eligible(ticket.updated_at, now, window) {
                append_message(conn, ticket.id, MessageAuthor::Customer, text)?;
                append_message(
                    conn,
                    ticket.id,
                    MessageAuthor::System,
                    &format!(
                        "Ticket {} reopened by a customer follow-up.",
                        ticket.ticket_number
                    ),
                )?;
                let updated = diesel::update(tickets::table.find(ticket.id))
                    .set((
                        tickets::status.eq(TicketStatus::Open.as_str()),
                        tickets::tags.eq(union_tags(&ticket.tags, &classification.tags)),
                        tickets::updated_at.eq(now),
                    ))
                    .get_result::<Ticket>(conn)?;
                info!("reopened {}", updated.ticket_number);
                return Ok(Routing {
                    ticket: updated,
                    action: RouteAction::Reopened,
                });
            }
        }

        // Branch 3: fresh conversation.
        let ticket_number = generate_ticket_number(conn)?;
        let ticket = Ticket {
            id: Uuid::new_v4(),
            ticket_number: ticket_number.clone(),
            customer_id,
            status: TicketStatus::Open.as_str().to_string(),
            priority: classification.priority.as_str().to_string(),
            channel: channel.to_string(),
            tags: classification.tags.clone(),
            summary: summarize(text),
            created_at: now,
            updated_at: now,
        };
        let ticket = diesel::insert_into(tickets::table)
            .values(&ticket)
            .get_result::<Ticket>(conn)?;
        append_message(conn, ticket.id, MessageAuthor::Customer, text)?;
        append_message(
            conn,
            ticket.id,
            MessageAuthor::Agent,
            &format!(
                "Thanks for reaching out! We opened ticket {ticket_number} and will get back to you shortly."
            ),
        )?;
        info!("created {} for customer {}", ticket_number, customer_id);
        Ok(Routing {
            ticket,
            action: RouteAction::Created,
        })
    })
}

// ===== HTTP surface =====

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub customer_id: Uuid,
    pub text: String,
    pub channel: Option<String>,
    pub classification: Classification,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub email: String,
    pub phone: Option<String>,
    pub full_name: String,
    pub text: String,
    pub purpose: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub customer: Customer,
    pub match_kind: crate::identity::MatchKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub possible_match: Option<Customer>,
    pub ticket: Ticket,
    pub action: RouteAction,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub content: String,
    pub author_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    pub text: String,
    pub instructions: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub draft: String,
}

#[derive(Debug, Serialize)]
pub struct TicketWithConversation {
    pub ticket: Ticket,
    pub messages: Vec<TicketMessage>,
    pub notes: Vec<TicketNote>,
}

pub async fn route_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RouteRequest>,
) -> Result<Json<Routing>, (StatusCode, String)> {
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    let routing = route_message(
        &mut conn,
        &state.config.routing,
        req.customer_id,
        &req.text,
        &req.classification,
        req.channel.as_deref().unwrap_or("web"),
    )
    .map_err(http_err)?;
    Ok(Json(routing))
}

/// One unit of work per contact event: validate, resolve the identity,
/// classify the text, route the message.
pub async fn ingest_contact(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    if req.text.trim().is_empty() {
        return Err(CoreError::Validation("message text is required".into()).into());
    }
    let mut conn = get_conn(&state.conn).map_err(http_err)?;

    let resolution = resolve_contact(
        &mut conn,
        &req.email,
        req.phone.as_deref(),
        &req.full_name,
    )
    .map_err(http_err)?;

    let classification = classify(req.purpose.as_deref(), &req.text);
    let routing = route_message(
        &mut conn,
        &state.config.routing,
        resolution.customer.id,
        &req.text,
        &classification,
        req.channel.as_deref().unwrap_or("web"),
    )
    .map_err(http_err)?;

    Ok(Json(IngestResponse {
        customer: resolution.customer,
        match_kind: resolution.match_kind,
        possible_match: resolution.possible_match,
        ticket: routing.ticket,
        action: routing.action,
    }))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketWithConversation>, (StatusCode, String)> {
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    let ticket = load_ticket(&mut conn, id).map_err(http_err)?;
    let messages: Vec<TicketMessage> = ticket_messages::table
        .filter(ticket_messages::ticket_id.eq(id))
        .order((ticket_messages::created_at.asc(), ticket_messages::seq.asc()))
        .load(&mut conn)
        .map_err(http_err)?;
    let notes: Vec<TicketNote> = ticket_notes::table
        .filter(ticket_notes::ticket_id.eq(id))
        .order(ticket_notes::created_at.asc())
        .load(&mut conn)
        .map_err(http_err)?;
    Ok(Json(TicketWithConversation {
        ticket,
        messages,
        notes,
    }))
}

pub async fn list_customer_tickets(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<Ticket>>, (StatusCode, String)> {
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    let rows: Vec<Ticket> = tickets::table
        .filter(tickets::customer_id.eq(customer_id))
        .order((tickets::updated_at.desc(), tickets::id.desc()))
        .load(&mut conn)
        .map_err(http_err)?;
    Ok(Json(rows))
}

/// Explicit status updates may park, resolve, or close a ticket.
/// Reopening happens through customer follow-ups or agent replies, not
/// through this endpoint.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Ticket>, (StatusCode, String)> {
    let status = TicketStatus::parse(&req.status)
        .ok_or_else(|| CoreError::Validation(format!("unknown status {:?}", req.status)))
        .map_err(http_err)?;
    if status == TicketStatus::Open {
        return Err(CoreError::Validation(
            "tickets reopen through replies, not status updates".into(),
        )
        .into());
    }
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    load_ticket(&mut conn, id).map_err(http_err)?;
    let updated = diesel::update(tickets::table.find(id))
        .set((
            tickets::status.eq(status.as_str()),
            tickets::updated_at.eq(Utc::now()),
        ))
        .get_result::<Ticket>(&mut conn)
        .map_err(http_err)?;
    Ok(Json(updated))
}

/// Agent reply: appended to the conversation and the ticket returns to
/// open, whatever state it was in.
pub async fn agent_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> Result<Json<TicketMessage>, (StatusCode, String)> {
    if req.content.trim().is_empty() {
        return Err(CoreError::Validation("reply content is required".into()).into());
    }
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    let result = conn.transaction::<TicketMessage, CoreError, _>(|conn| {
        let ticket = load_ticket(conn, id)?;
        let message = append_message(conn, ticket.id, MessageAuthor::Agent, &req.content)?;
        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::status.eq(TicketStatus::Open.as_str()),
                tickets::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        Ok(message)
    });
    result
        .map(Json)
        .map_err(http_err)
}

/// Staff note: recorded on the ticket, and any tags the note synthesizes
/// are unioned into the owning customer's tag set.
pub async fn add_note(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<Json<TicketNote>, (StatusCode, String)> {
    if req.content.trim().is_empty() {
        return Err(CoreError::Validation("note content is required".into()).into());
    }
    let mut conn = get_conn(&state.conn).map_err(http_err)?;
    let result = conn.transaction::<TicketNote, CoreError, _>(|conn| {
        let ticket = load_ticket(conn, id)?;
        let note = TicketNote {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            author_name: req.author_name.clone(),
            content: req.content.clone(),
            created_at: Utc::now(),
        };
        let note = diesel::insert_into(ticket_notes::table)
            .values(&note)
            .get_result::<TicketNote>(conn)?;
        let derived = tags_from_note(&note.content);
        if !derived.is_empty() {
            let customer: Customer = customers::table
                .find(ticket.customer_id)
                .first::<Customer>(conn)?;
            diesel::update(customers::table.find(customer.id))
                .set((
                    customers::tags.eq(union_tags(&customer.tags, &derived)),
                    customers::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
        }
        Ok(note)
    });
    result
        .map(Json)
        .map_err(http_err)
}

/// Draft a reply with the text-generation service; on any failure the
/// agent's rough text comes back unchanged.
pub async fn draft_ticket_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<DraftRequest>,
) -> Result<Json<DraftResponse>, (StatusCode, String)> {
    let conversation = {
        let mut conn = get_conn(&state.conn).map_err(http_err)?;
        let ticket = load_ticket(&mut conn, id).map_err(http_err)?;
        let messages: Vec<TicketMessage> = ticket_messages::table
            .filter(ticket_messages::ticket_id.eq(ticket.id))
            .order((ticket_messages::created_at.asc(), ticket_messages::seq.asc()))
            .load(&mut conn)
            .map_err(http_err)?;
        messages
            .iter()
            .map(|m| format!("{}: {}", m.author, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let draft = draft_reply(
        state.llm_provider.as_ref(),
        req.instructions.as_deref(),
        &conversation,
        &req.text,
    )
    .await;
    Ok(Json(DraftResponse { draft }))
}

pub fn configure_ticket_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/contacts", post(ingest_contact))
        .route("/api/tickets/route", post(route_ticket))
        .route("/api/tickets/:id", get(get_ticket))
        .route("/api/tickets/:id/status", put(update_status))
        .route("/api/tickets/:id/reply", post(agent_reply))
        .route("/api/tickets/:id/notes", post(add_note))
        .route("/api/tickets/:id/draft", post(draft_ticket_reply))
        .route("/api/customers/:id/tickets", get(list_customer_tickets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopen_window_boundary() {
        let window = Duration::hours(24);
        let now = Utc::now();
        assert!(reopen_eligible(now - Duration::hours(23), now, window));
        assert!(!reopen_eligible(now - Duration::hours(25), now, window));
        // Exactly on the boundary counts as expired.
        assert!(!reopen_eligible(now - Duration::hours(24), now, window));
    }

    #[test]
    fn summary_is_first_line_clamped() {
        assert_eq!(
            summarize("My order is late\nIt was due last week"),
            Some("My order is late".to_string())
        );
        assert_eq!(summarize("   \n\n"), None);
        let long = "x".repeat(500);
        assert_eq!(summarize(&long).map(|s| s.chars().count()), Some(120));
    }

    #[test]
    fn route_actions_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&RouteAction::Threaded).unwrap(),
            "\"threaded\""
        );
        assert_eq!(
            serde_json::to_string(&RouteAction::Reopened).unwrap(),
            "\"reopened\""
        );
        assert_eq!(
            serde_json::to_string(&RouteAction::Created).unwrap(),
            "\"created\""
        );
    }
}
