//! Outbox for email and SMS messages.
//!
//! Automations never talk to a delivery provider. They append messages here
//! and a separate process drains the table.

use chrono::Utc;
use rusqlite::{params, Row};

use super::types::{Channel, OutboundMessage};
use crate::error::CrmError;
use crate::storage::{parse_timestamp, sql_time, Database};

/// Outbox store.
pub struct Outbox<'a> {
    db: &'a Database,
}

impl<'a> Outbox<'a> {
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Queue a message.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty recipient or body, or a
    /// database error if the insert fails.
    pub fn enqueue(
        &self,
        organization_id: &str,
        record_id: Option<i64>,
        channel: Channel,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<OutboundMessage, CrmError> {
        if recipient.trim().is_empty() {
            return Err(CrmError::Validation(format!(
                "No recipient for {} message",
                channel.as_str()
            )));
        }
        if channel == Channel::Email && !recipient.contains('@') {
            return Err(CrmError::Validation(format!(
                "Invalid email recipient: {recipient}"
            )));
        }
        if body.trim().is_empty() {
            return Err(CrmError::Validation("Message body is empty".to_string()));
        }

        let now = Utc::now();
        let conn = self.db.connection();
        conn.execute(
            r"INSERT INTO outbox (organization_id, record_id, channel, recipient, subject, body, status, created_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7)",
            params![
                organization_id,
                record_id,
                channel.as_str(),
                recipient,
                subject,
                body,
                sql_time(&now),
            ],
        )
        .map_err(|e| CrmError::Database(format!("Failed to queue message: {e}")))?;

        Ok(OutboundMessage {
            id: Some(conn.last_insert_rowid()),
            organization_id: organization_id.to_string(),
            record_id,
            channel,
            recipient: recipient.to_string(),
            subject: subject.map(String::from),
            body: body.to_string(),
            status: "queued".to_string(),
            created_at: now,
        })
    }

    /// Queued messages for an organization, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn queued(&self, organization_id: &str) -> Result<Vec<OutboundMessage>, CrmError> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare(
                r"SELECT id, organization_id, record_id, channel, recipient, subject, body, status, created_at
                  FROM outbox WHERE organization_id = ?1 AND status = 'queued'
                  ORDER BY id ASC",
            )
            .map_err(|e| CrmError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([organization_id], row_to_message)
            .map_err(|e| CrmError::Database(format!("Failed to query outbox: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CrmError::Database(e.to_string()))
    }
}

fn row_to_message(row: &Row<'_>) -> Result<OutboundMessage, rusqlite::Error> {
    let channel: String = row.get(3)?;
    let created_at: String = row.get(8)?;
    Ok(OutboundMessage {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        record_id: row.get(2)?,
        channel: Channel::from_string(&channel),
        recipient: row.get(4)?,
        subject: row.get(5)?,
        body: row.get(6)?,
        status: row.get(7)?,
        created_at: parse_timestamp(&created_at, Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_email() {
        let db = Database::open_in_memory().unwrap();
        let outbox = Outbox::new(&db);

        outbox
            .enqueue("acme", Some(1), Channel::Email, "ann@example.com", Some("Hi"), "Welcome")
            .unwrap();
        outbox
            .enqueue("acme", Some(1), Channel::Sms, "+15550100", None, "Welcome")
            .unwrap();

        let queued = outbox.queued("acme").unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].channel, Channel::Email);
        assert_eq!(queued[1].channel, Channel::Sms);
        assert!(outbox.queued("globex").unwrap().is_empty());
    }

    #[test]
    fn test_validation() {
        let db = Database::open_in_memory().unwrap();
        let outbox = Outbox::new(&db);

        assert!(outbox
            .enqueue("acme", None, Channel::Email, "", None, "body")
            .is_err());
        assert!(outbox
            .enqueue("acme", None, Channel::Email, "not-an-email", None, "body")
            .is_err());
        assert!(outbox
            .enqueue("acme", None, Channel::Sms, "+1555", None, " ")
            .is_err());
    }
}
