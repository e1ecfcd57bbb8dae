use serde::{Deserialize, Serialize};

use crate::shared::models::Priority;

/// Output of the keyword classifier consumed by the thread router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub tags: Vec<String>,
    pub priority: Priority,
}

/// Keyword groups: a tag is awarded when any keyword in its group
/// appears in the text (case-insensitive substring match).
const TAG_RULES: &[(&str, &[&str])] = &[
    ("billing", &["invoice", "billing", "charge", "payment", "card"]),
    ("bug", &["error", "crash", "broken", "bug", "not working"]),
    ("refund", &["refund", "money back", "chargeback"]),
    ("shipping", &["shipping", "delivery", "package", "tracking"]),
    ("account", &["password", "login", "sign in", "account locked"]),
];

const URGENT_KEYWORDS: &[&str] = &["urgent", "asap", "immediately", "emergency", "outage"];
const HIGH_KEYWORDS: &[&str] = &["refund", "chargeback", "cannot access", "locked out"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Pure keyword classifier: maps a contact purpose and free text to a
/// tag set and a priority. No state, no side effects.
pub fn classify(purpose: Option<&str>, text: &str) -> Classification {
    let haystack = text.to_lowercase();
    let purpose = purpose.map(str::to_lowercase);

    let mut tags: Vec<String> = Vec::new();
    for (tag, keywords) in TAG_RULES {
        if contains_any(&haystack, keywords) {
            tags.push((*tag).to_string());
        }
    }
    if purpose.as_deref() == Some("complaint") {
        tags.push("complaint".to_string());
    }

    let priority = if contains_any(&haystack, URGENT_KEYWORDS) {
        Priority::Urgent
    } else if contains_any(&haystack, HIGH_KEYWORDS) || purpose.as_deref() == Some("complaint") {
        Priority::High
    } else if purpose.as_deref() == Some("question") {
        Priority::Low
    } else {
        Priority::Medium
    };

    Classification { tags, priority }
}

/// Tags synthesized from a staff note. Co-occurrence rules catch
/// phrasings that single keywords would miss ("wants to cancel the
/// subscription"). Result is unioned into the owning customer's tags.
pub fn tags_from_note(text: &str) -> Vec<String> {
    let haystack = text.to_lowercase();
    let mut tags = Vec::new();

    if haystack.contains("vip") {
        tags.push("vip".to_string());
    }
    if haystack.contains("refund") {
        tags.push("refund_requested".to_string());
    }
    if haystack.contains("cancel")
        && (haystack.contains("subscription") || haystack.contains("account"))
    {
        tags.push("churn_risk".to_string());
    }
    if haystack.contains("call") && haystack.contains("back") {
        tags.push("callback".to_string());
    }
    if haystack.contains("angry") || haystack.contains("frustrated") {
        tags.push("escalation".to_string());
    }

    tags
}

/// Union `incoming` into `existing`, preserving existing order and
/// skipping duplicates. Used for ticket tags and customer tags alike.
pub fn union_tags(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    for tag in incoming {
        if !merged.iter().any(|t| t == tag) {
            merged.push(tag.clone());
        }
    }
    merged
}
