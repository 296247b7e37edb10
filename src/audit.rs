use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Uploaded,
    Viewed,
    Annotated,
    Signed,
    PagesReordered,
    Finalized,
    Downloaded,
    Shared,
    #[serde(other)]
    Other,
}

impl AuditAction {
    pub fn label(&self) -> &'static str {
        match self {
            AuditAction::Created => "Created",
            AuditAction::Uploaded => "Uploaded",
            AuditAction::Viewed => "Viewed",
            AuditAction::Annotated => "Annotated",
            AuditAction::Signed => "Signed",
            AuditAction::PagesReordered => "Pages reordered",
            AuditAction::Finalized => "Finalized",
            AuditAction::Downloaded => "Downloaded",
            AuditAction::Shared => "Shared",
            AuditAction::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub document_id: String,
    pub action: AuditAction,
    pub actor_label: String,
    #[serde(default)]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    // "2024-03-01 14:05 UTC  Signed  by Jane Roe: page 2"
    pub fn certificate_line(&self) -> String {
        let mut line = format!(
            "{}  {}  by {}",
            self.created_at.format("%Y-%m-%d %H:%M UTC"),
            self.action.label(),
            self.actor_label
        );
        if let Some(details) = self.details.as_deref().filter(|d| !d.trim().is_empty()) {
            line.push_str(": ");
            line.push_str(details.trim());
        }
        line
    }
}

// Oldest first; entries sharing a timestamp keep their input order.
pub fn sort_for_certificate(entries: &[AuditEntry]) -> Vec<&AuditEntry> {
    let mut sorted: Vec<&AuditEntry> = entries.iter().collect();
    sorted.sort_by_key(|entry| entry.created_at);
    sorted
}

// Newest first, for the live activity view.
pub fn sort_for_live_view(entries: &[AuditEntry]) -> Vec<&AuditEntry> {
    let mut sorted: Vec<&AuditEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, ts: i64, action: AuditAction) -> AuditEntry {
        AuditEntry {
            id: id.to_string(),
            document_id: "doc".to_string(),
            action,
            actor_label: "Jane Roe".to_string(),
            details: None,
            created_at: DateTime::<Utc>::from_timestamp(ts, 0).expect("ts"),
        }
    }

    #[test]
    fn certificate_order_is_ascending_and_stable() {
        let entries = vec![
            entry("c", 300, AuditAction::Signed),
            entry("a", 100, AuditAction::Created),
            entry("b1", 200, AuditAction::Viewed),
            entry("b2", 200, AuditAction::Annotated),
        ];
        let ids: Vec<&str> = sort_for_certificate(&entries)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b1", "b2", "c"]);

        let live: Vec<&str> = sort_for_live_view(&entries)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(live, vec!["c", "b1", "b2", "a"]);
    }

    #[test]
    fn unknown_actions_deserialize_as_other() {
        let json = r#"{"id":"1","documentId":"doc","action":"exported","actorLabel":"ops","createdAt":"2024-03-01T14:05:00Z"}"#;
        let parsed: AuditEntry = serde_json::from_str(json).expect("json");
        assert_eq!(parsed.action, AuditAction::Other);
        assert!(parsed.details.is_none());

        let reordered: AuditAction = serde_json::from_str(r#""pages_reordered""#).expect("json");
        assert_eq!(reordered, AuditAction::PagesReordered);
    }

    #[test]
    fn certificate_line_includes_details_when_present() {
        let mut e = entry("1", 1_709_301_900, AuditAction::Signed);
        assert_eq!(e.certificate_line(), "2024-03-01 14:05 UTC  Signed  by Jane Roe");
        e.details = Some(" page 2 ".to_string());
        assert_eq!(
            e.certificate_line(),
            "2024-03-01 14:05 UTC  Signed  by Jane Roe: page 2"
        );
    }
}
