//! Cross-module checks on the pure decision logic: fuzzy identity
//! scoring, routing branch selection at the reopen boundary, merge
//! field reconciliation, and note tag synthesis.

use chrono::{Duration, Utc};
use uuid::Uuid;

use deskserver::classify::{classify, tags_from_note, union_tags};
use deskserver::identity::{name_similarity, NAME_MATCH_THRESHOLD};
use deskserver::merge::reconcile;
use deskserver::shared::models::{Customer, Priority};
use deskserver::tickets::reopen_eligible;

fn customer(email: &str) -> Customer {
    let now = Utc::now();
    Customer {
        id: Uuid::new_v4(),
        display_name: "Test Person".into(),
        primary_email: email.into(),
        alt_emails: Vec::new(),
        phone: None,
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
fn documented_similarity_fixtures() {
    assert!(name_similarity("John Smith", "Jon Smith") > NAME_MATCH_THRESHOLD);
    assert!(name_similarity("Sarah Lee", "Sara Lee") > NAME_MATCH_THRESHOLD);
    assert!(name_similarity("John Smith", "Alice Johnson") <= NAME_MATCH_THRESHOLD);
}

#[test]
fn reopen_window_defines_the_routing_boundary() {
    let window = Duration::hours(24);
    let now = Utc::now();
    // Resolved 23 hours ago: follow-up reopens the ticket.
    assert!(reopen_eligible(now - Duration::hours(23), now, window));
    // Resolved 25 hours ago: follow-up opens a new ticket.
    assert!(!reopen_eligible(now - Duration::hours(25), now, window));
}

#[test]
fn a_shorter_window_flips_the_outcome() {
    let now = Utc::now();
    let last = now - Duration::hours(10);
    assert!(reopen_eligible(last, now, Duration::hours(24)));
    assert!(!reopen_eligible(last, now, Duration::hours(8)));
}

#[test]
fn merge_reconciliation_end_to_end() {
    let mut primary = customer("primary@example.com");
    let mut secondary = customer("secondary@example.com");
    primary.tags = vec!["vip".into()];
    secondary.tags = vec!["billing".into()];
    secondary.alt_emails = vec!["old@example.com".into()];
    primary.order_count = 2;
    secondary.order_count = 9;
    primary.lifetime_value = 500.0;
    secondary.lifetime_value = 499.0;
    primary.ticket_count = 4;
    secondary.ticket_count = 3;
    secondary.phone = Some("+1 555 123 4567".into());

    let fields = reconcile(&primary, &secondary);
    assert_eq!(fields.tags, vec!["vip".to_string(), "billing".to_string()]);
    assert!(fields.alt_emails.contains(&"old@example.com".to_string()));
    assert!(fields.alt_emails.contains(&"secondary@example.com".to_string()));
    assert_eq!(fields.order_count, 9);
    assert_eq!(fields.lifetime_value, 500.0);
    assert_eq!(fields.ticket_count, 7);
    assert_eq!(fields.phone.as_deref(), Some("+1 555 123 4567"));
}

#[test]
fn classification_feeds_ticket_tags() {
    let classification = classify(None, "There is an error on my invoice, need a refund");
    let seeded = classification.tags.clone();
    assert!(seeded.contains(&"billing".to_string()));
    assert!(seeded.contains(&"bug".to_string()));
    assert!(seeded.contains(&"refund".to_string()));
    assert_eq!(classification.priority, Priority::High);

    // A second event's tags union in without duplicates.
    let second = classify(None, "still a billing problem, also can't login");
    let merged = union_tags(&seeded, &second.tags);
    assert_eq!(
        merged.iter().filter(|t| t.as_str() == "billing").count(),
        1
    );
    assert!(merged.contains(&"account".to_string()));
}

#[test]
fn note_synthesis_unions_into_customer_tags() {
    let mut c = customer("note@example.com");
    c.tags = vec!["vip".into()];
    let derived = tags_from_note("VIP asked for a refund, call them back tomorrow");
    let merged = union_tags(&c.tags, &derived);
    assert!(merged.contains(&"refund_requested".to_string()));
    assert!(merged.contains(&"callback".to_string()));
    assert_eq!(merged.iter().filter(|t| t.as_str() == "vip").count(), 1);
}
