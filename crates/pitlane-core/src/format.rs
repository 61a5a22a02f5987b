//! Human-readable rendering of history entries and timestamps.

use chrono::{DateTime, Utc};

use crate::models::{HistoryAction, HistoryRecord};

/// Render a history entry as a sentence, e.g. "Maya swapped from Red Racer to Blue Bolt".
///
/// Names are the ones captured when the entry was written; a missing name
/// falls back to the stored id so entries for deleted vehicles stay legible.
pub fn describe(record: &HistoryRecord) -> String {
    let meta = &record.metadata;
    let member = if meta.member_name.is_empty() {
        record.member_id.as_str()
    } else {
        meta.member_name.as_str()
    };
    let resource = name_or_id(&meta.resource_name, record.resource_id.as_ref().map(|r| r.as_str()));
    let previous_resource = name_or_id(
        &meta.previous_resource_name,
        record.previous_resource_id.as_ref().map(|r| r.as_str()),
    );
    let group = name_or_id(&meta.group_name, record.group_id.as_ref().map(|g| g.as_str()));
    let previous_group = name_or_id(
        &meta.previous_group_name,
        record.previous_group_id.as_ref().map(|g| g.as_str()),
    );

    let mut sentence = match record.action {
        HistoryAction::Assigned => match (resource, previous_resource) {
            (Some(to), Some(was)) => format!("{} assigned to {} (was {})", member, to, was),
            (Some(to), None) => format!("{} assigned to {}", member, to),
            (None, _) => format!("{} assigned", member),
        },
        HistoryAction::Unassigned => match resource {
            Some(from) => format!("{} unassigned from {}", member, from),
            None => format!("{} unassigned", member),
        },
        HistoryAction::Swapped => match (previous_resource, resource) {
            (Some(from), Some(to)) => format!("{} swapped from {} to {}", member, from, to),
            (None, Some(to)) => format!("{} swapped to {}", member, to),
            (_, None) => format!("{} swapped vehicles", member),
        },
        HistoryAction::TeamChanged => match (previous_group, group) {
            (Some(from), Some(to)) => format!("{} moved from {} to {}", member, from, to),
            (None, Some(to)) => format!("{} joined {}", member, to),
            (Some(from), None) => format!("{} left {}", member, from),
            (None, None) => format!("{} changed teams", member),
        },
    };

    if let Some(reason) = &record.reason {
        sentence.push_str(". Reason: ");
        sentence.push_str(reason);
    }
    sentence
}

fn name_or_id<'a>(name: &'a Option<String>, id: Option<&'a str>) -> Option<&'a str> {
    name.as_deref().filter(|n| !n.is_empty()).or(id)
}

/// Short relative age like "just now", "5m ago", "2h ago" or "3d ago".
pub fn relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - timestamp).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        // 1h 30m+ rounds up to 2h
        let rounded = if minutes % 60 >= 30 { hours + 1 } else { hours };
        format!("{}h ago", rounded)
    } else {
        let days = minutes / 1440;
        let rounded = if (minutes % 1440) / 60 >= 12 { days + 1 } else { days };
        format!("{}d ago", rounded)
    }
}

/// Absolute timestamp for tables, e.g. "May 02, 2026 14:03".
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%b %d, %Y %H:%M").to_string()
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
