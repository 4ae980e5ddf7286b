//! Per-owner transcription preferences and backend credentials.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use secrecy::{ExposeSecret, SecretString};

use super::{format_timestamp, Database, DatabaseError};

#[derive(Debug)]
pub struct OwnerSettings {
    pub owner_id: String,
    /// Recipient for completion notices.
    pub email: Option<String>,
    /// Overrides the configured backend URL for this owner's jobs.
    pub backend_url: Option<String>,
    /// Sent as `X-API-KEY` in place of the configured key.
    pub api_key: Option<SecretString>,
    pub default_language: Option<String>,
    pub default_model: Option<String>,
    pub notifications_enabled: bool,
    /// Delete the audio blob once the job completed.
    pub auto_delete_audio: bool,
}

impl OwnerSettings {
    pub fn defaults(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            email: None,
            backend_url: None,
            api_key: None,
            default_language: None,
            default_model: None,
            notifications_enabled: true,
            auto_delete_audio: false,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }
}

pub fn find(db: &Database, owner_id: &str) -> Result<Option<OwnerSettings>, DatabaseError> {
    db.with_conn(|conn| {
        let settings = conn
            .query_row(
                "SELECT owner_id, email, backend_url, api_key, default_language, default_model,
                 notifications_enabled, auto_delete_audio
                 FROM owner_settings WHERE owner_id = ?1",
                params![owner_id],
                |r| {
                    let api_key: Option<String> = r.get(3)?;
                    Ok(OwnerSettings {
                        owner_id: r.get(0)?,
                        email: r.get(1)?,
                        backend_url: r.get(2)?,
                        api_key: api_key.filter(|k| !k.is_empty()).map(SecretString::from),
                        default_language: r.get(4)?,
                        default_model: r.get(5)?,
                        notifications_enabled: r.get(6)?,
                        auto_delete_audio: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(settings)
    })
}

/// Returns stored settings, or defaults when the owner never saved any.
pub fn get_or_default(db: &Database, owner_id: &str) -> Result<OwnerSettings, DatabaseError> {
    Ok(find(db, owner_id)?.unwrap_or_else(|| OwnerSettings::defaults(owner_id)))
}

pub fn upsert(db: &Database, settings: &OwnerSettings) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = format_timestamp(Utc::now());
        conn.execute(
            "INSERT INTO owner_settings (owner_id, email, backend_url, api_key, default_language,
             default_model, notifications_enabled, auto_delete_audio, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(owner_id) DO UPDATE SET
               email = excluded.email,
               backend_url = excluded.backend_url,
               api_key = excluded.api_key,
               default_language = excluded.default_language,
               default_model = excluded.default_model,
               notifications_enabled = excluded.notifications_enabled,
               auto_delete_audio = excluded.auto_delete_audio,
               updated_at = excluded.updated_at",
            params![
                settings.owner_id,
                settings.email,
                settings.backend_url,
                settings.api_key.as_ref().map(|k| k.expose_secret().to_string()),
                settings.default_language,
                settings.default_model,
                settings.notifications_enabled,
                settings.auto_delete_audio,
                now,
            ],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let db = Database::open_in_memory().unwrap();
        let settings = get_or_default(&db, "owner-1").unwrap();
        assert_eq!(settings.owner_id, "owner-1");
        assert!(settings.notifications_enabled);
        assert!(!settings.auto_delete_audio);
        assert!(!settings.has_api_key());
    }

    #[test]
    fn test_upsert_and_update() {
        let db = Database::open_in_memory().unwrap();
        let mut settings = OwnerSettings::defaults("owner-1");
        settings.email = Some("owner@example.com".to_string());
        settings.api_key = Some(SecretString::from("k-1"));
        settings.default_language = Some("en".to_string());
        upsert(&db, &settings).unwrap();

        let stored = find(&db, "owner-1").unwrap().unwrap();
        assert_eq!(stored.email.as_deref(), Some("owner@example.com"));
        assert_eq!(stored.api_key.unwrap().expose_secret(), "k-1");
        assert_eq!(stored.default_language.as_deref(), Some("en"));

        settings.notifications_enabled = false;
        settings.api_key = None;
        upsert(&db, &settings).unwrap();

        let stored = find(&db, "owner-1").unwrap().unwrap();
        assert!(!stored.notifications_enabled);
        assert!(!stored.has_api_key());
    }
}
