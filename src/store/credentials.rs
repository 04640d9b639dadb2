//! Credential CRUD and status transitions.

use chrono::Utc;
use rusqlite::{params, Row};
use rusqlite::types::ToSql;
use uuid::Uuid;

use super::{
    parse_json_list, parse_opt_ts, parse_provider, parse_ts, to_json_list, to_ts, Credential,
    CredentialStatus, Database,
};
use crate::error::{Error, Result};
use crate::provider::{AccountIdentity, ProviderKind};

/// Fields required to create a credential. URLs and scopes are already
/// resolved against provider defaults; the secret is already encrypted.
pub struct NewCredential {
    pub name: String,
    pub display_name: String,
    pub provider: ProviderKind,
    pub client_id: String,
    pub encrypted_client_secret: String,
    pub redirect_uri: String,
    pub tenant_id: Option<String>,
    pub authorization_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

/// Partial update. `None` leaves the column untouched. Changing the OAuth
/// configuration (client id/secret, redirect URI, tenant, scopes) resets
/// status to `pending`; display name and URL overrides do not.
#[derive(Default)]
pub struct CredentialUpdate {
    pub display_name: Option<String>,
    pub client_id: Option<String>,
    pub encrypted_client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub tenant_id: Option<String>,
    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub scopes: Option<Vec<String>>,
}

impl CredentialUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.client_id.is_none()
            && self.encrypted_client_secret.is_none()
            && self.redirect_uri.is_none()
            && self.tenant_id.is_none()
            && self.authorization_url.is_none()
            && self.token_url.is_none()
            && self.scopes.is_none()
    }

    pub fn resets_status(&self) -> bool {
        self.client_id.is_some()
            || self.encrypted_client_secret.is_some()
            || self.redirect_uri.is_some()
            || self.tenant_id.is_some()
            || self.scopes.is_some()
    }
}

const CREDENTIAL_COLUMNS: &str = "id, name, display_name, provider, client_id, \
     encrypted_client_secret, redirect_uri, tenant_id, authorization_url, token_url, \
     scopes, connected_email, external_account_id, connected_display_name, status, \
     error_message, last_connected_at, created_at, updated_at";

fn row_to_credential(row: &Row<'_>) -> rusqlite::Result<Credential> {
    let provider: String = row.get(3)?;
    let scopes: String = row.get(10)?;
    let status: String = row.get(14)?;
    let last_connected_at: Option<String> = row.get(16)?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;

    Ok(Credential {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        provider: parse_provider(&provider)?,
        client_id: row.get(4)?,
        encrypted_client_secret: row.get(5)?,
        redirect_uri: row.get(6)?,
        tenant_id: row.get(7)?,
        authorization_url: row.get(8)?,
        token_url: row.get(9)?,
        scopes: parse_json_list(&scopes),
        connected_email: row.get(11)?,
        external_account_id: row.get(12)?,
        connected_display_name: row.get(13)?,
        status: CredentialStatus::parse(&status),
        error_message: row.get(15)?,
        last_connected_at: parse_opt_ts(last_connected_at)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Classify a UNIQUE violation on the credentials table into a caller-facing
/// message. Returns `None` for unrelated errors.
fn duplicate_detail(err: &rusqlite::Error) -> Option<String> {
    if let rusqlite::Error::SqliteFailure(code, Some(msg)) = err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("credentials.name") {
                return Some("a credential with this name already exists".to_string());
            }
            if msg.contains("credentials.provider") || msg.contains("credentials.client_id") {
                return Some(
                    "a credential with this provider and client_id already exists".to_string(),
                );
            }
        }
    }
    None
}

impl Database {
    /// Insert a new credential in `pending` status.
    pub fn create_credential(&self, new: NewCredential) -> Result<Credential> {
        let id = Uuid::new_v4().to_string();
        let now = to_ts(Utc::now());

        let result = self.conn().execute(
            r#"
            INSERT INTO credentials (
                id, name, display_name, provider, client_id, encrypted_client_secret,
                redirect_uri, tenant_id, authorization_url, token_url, scopes,
                status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12, ?12)
            "#,
            params![
                id,
                new.name,
                new.display_name,
                new.provider.as_str(),
                new.client_id,
                new.encrypted_client_secret,
                new.redirect_uri,
                new.tenant_id,
                new.authorization_url,
                new.token_url,
                to_json_list(&new.scopes),
                now,
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) => {
                if let Some(detail) = duplicate_detail(&e) {
                    return Err(Error::DuplicateCredential(detail));
                }
                return Err(e.into());
            }
        }

        self.get_credential(&id)?
            .ok_or(Error::NotFound("credential"))
    }

    pub fn get_credential(&self, id: &str) -> Result<Option<Credential>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials WHERE id = ?1",
            CREDENTIAL_COLUMNS
        ))?;

        let mut rows = stmt.query_map(params![id], row_to_credential)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_credentials(&self) -> Result<Vec<Credential>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials ORDER BY created_at DESC",
            CREDENTIAL_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], row_to_credential)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Resolve a credential for token vending by one of its alternate keys.
    /// Only `connected` credentials are considered.
    pub fn find_connected_credential(
        &self,
        column: CredentialSelector,
        value: &str,
    ) -> Result<Option<Credential>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials WHERE {} = ?1 AND status = 'connected'",
            CREDENTIAL_COLUMNS,
            column.column()
        ))?;

        let mut rows = stmt.query_map(params![value], row_to_credential)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Apply a partial update. Returns the updated row, or `None` if the
    /// credential does not exist.
    pub fn update_credential(
        &self,
        id: &str,
        update: CredentialUpdate,
    ) -> Result<Option<Credential>> {
        if update.is_empty() {
            return self.get_credential(id);
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(v) = &update.display_name {
            sets.push("display_name = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.client_id {
            sets.push("client_id = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.encrypted_client_secret {
            sets.push("encrypted_client_secret = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.redirect_uri {
            sets.push("redirect_uri = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.tenant_id {
            sets.push("tenant_id = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.authorization_url {
            sets.push("authorization_url = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.token_url {
            sets.push("token_url = ?");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.scopes {
            sets.push("scopes = ?");
            values.push(Box::new(to_json_list(v)));
        }

        if update.resets_status() {
            sets.push("status = 'pending'");
            sets.push("error_message = NULL");
        }
        sets.push("updated_at = ?");
        values.push(Box::new(to_ts(Utc::now())));

        values.push(Box::new(id.to_string()));

        // Plain `?` placeholders bind positionally
        let sql = format!("UPDATE credentials SET {} WHERE id = ?", sets.join(", "));

        let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let changed = {
            let conn = self.conn();
            match conn.execute(&sql, params.as_slice()) {
                Ok(n) => n,
                Err(e) => {
                    if let Some(detail) = duplicate_detail(&e) {
                        return Err(Error::DuplicateCredential(detail));
                    }
                    return Err(e.into());
                }
            }
        };

        if changed == 0 {
            return Ok(None);
        }
        self.get_credential(id)
    }

    /// Delete a credential; token pair and subscriptions cascade.
    pub fn delete_credential(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM credentials WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Transition to `connected` with the resolved account identity.
    pub fn mark_credential_connected(
        &self,
        id: &str,
        identity: &AccountIdentity,
    ) -> Result<()> {
        let now = to_ts(Utc::now());
        self.conn().execute(
            r#"
            UPDATE credentials
            SET connected_email = ?1,
                external_account_id = ?2,
                connected_display_name = ?3,
                status = 'connected',
                error_message = NULL,
                last_connected_at = ?4,
                updated_at = ?4
            WHERE id = ?5
            "#,
            params![
                identity.email,
                identity.external_id,
                identity.display_name,
                now,
                id
            ],
        )?;
        Ok(())
    }

    /// Transition to `error`, preserving the failure detail for operators.
    pub fn mark_credential_error(&self, id: &str, detail: &str) -> Result<()> {
        let now = to_ts(Utc::now());
        self.conn().execute(
            "UPDATE credentials SET status = 'error', error_message = ?1, updated_at = ?2 \
             WHERE id = ?3",
            params![detail, now, id],
        )?;
        Ok(())
    }
}

/// Alternate keys accepted by the internal token-vending endpoint.
#[derive(Clone, Copy, Debug)]
pub enum CredentialSelector {
    Id,
    Name,
    ConnectedEmail,
    ExternalAccountId,
}

impl CredentialSelector {
    fn column(&self) -> &'static str {
        match self {
            CredentialSelector::Id => "id",
            CredentialSelector::Name => "name",
            CredentialSelector::ConnectedEmail => "connected_email",
            CredentialSelector::ExternalAccountId => "external_account_id",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(name: &str, client_id: &str) -> NewCredential {
        let descriptor = ProviderKind::Ms365.descriptor(None);
        NewCredential {
            name: name.to_string(),
            display_name: format!("{} display", name),
            provider: ProviderKind::Ms365,
            client_id: client_id.to_string(),
            encrypted_client_secret: "ciphertext".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            tenant_id: None,
            authorization_url: descriptor.authorize_url,
            token_url: descriptor.token_url,
            scopes: descriptor.default_scopes,
        }
    }

    #[test]
    fn test_create_and_get() {
        let db = test_db();
        let created = db.create_credential(sample("acme-ms365", "client-1")).unwrap();

        assert_eq!(created.status, CredentialStatus::Pending);
        assert_eq!(created.provider, ProviderKind::Ms365);
        assert_eq!(created.scopes.len(), 4);

        let fetched = db.get_credential(&created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "acme-ms365");
        assert_eq!(fetched.client_id, "client-1");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let db = test_db();
        db.create_credential(sample("acme", "client-1")).unwrap();

        let err = db.create_credential(sample("acme", "client-2")).unwrap_err();
        assert!(matches!(err, Error::DuplicateCredential(_)));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_duplicate_provider_client_id_rejected() {
        let db = test_db();
        db.create_credential(sample("first", "client-1")).unwrap();

        let err = db.create_credential(sample("second", "client-1")).unwrap_err();
        assert!(matches!(err, Error::DuplicateCredential(_)));
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_update_secret_resets_status() {
        let db = test_db();
        let cred = db.create_credential(sample("acme", "client-1")).unwrap();
        db.mark_credential_connected(
            &cred.id,
            &crate::provider::AccountIdentity {
                email: Some("a@b.c".into()),
                external_id: Some("x".into()),
                display_name: None,
            },
        )
        .unwrap();

        let updated = db
            .update_credential(
                &cred.id,
                CredentialUpdate {
                    encrypted_client_secret: Some("new-ciphertext".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, CredentialStatus::Pending);
        assert_eq!(updated.encrypted_client_secret, "new-ciphertext");
    }

    #[test]
    fn test_update_display_name_keeps_status() {
        let db = test_db();
        let cred = db.create_credential(sample("acme", "client-1")).unwrap();
        db.mark_credential_connected(
            &cred.id,
            &crate::provider::AccountIdentity {
                email: None,
                external_id: None,
                display_name: None,
            },
        )
        .unwrap();

        let updated = db
            .update_credential(
                &cred.id,
                CredentialUpdate {
                    display_name: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, CredentialStatus::Connected);
        assert_eq!(updated.display_name, "Renamed");
    }

    #[test]
    fn test_update_missing_credential() {
        let db = test_db();
        let result = db
            .update_credential(
                "no-such-id",
                CredentialUpdate {
                    display_name: Some("x".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_mark_error_and_reconnect() {
        let db = test_db();
        let cred = db.create_credential(sample("acme", "client-1")).unwrap();

        db.mark_credential_error(&cred.id, "exchange failed: 400").unwrap();
        let errored = db.get_credential(&cred.id).unwrap().unwrap();
        assert_eq!(errored.status, CredentialStatus::Error);
        assert_eq!(errored.error_message.as_deref(), Some("exchange failed: 400"));

        db.mark_credential_connected(
            &cred.id,
            &crate::provider::AccountIdentity {
                email: Some("a@b.c".into()),
                external_id: Some("ext".into()),
                display_name: Some("A".into()),
            },
        )
        .unwrap();
        let connected = db.get_credential(&cred.id).unwrap().unwrap();
        assert_eq!(connected.status, CredentialStatus::Connected);
        assert!(connected.error_message.is_none());
        assert!(connected.last_connected_at.is_some());
    }

    #[test]
    fn test_find_connected_by_alternate_keys() {
        let db = test_db();
        let cred = db.create_credential(sample("acme", "client-1")).unwrap();

        // Not connected yet: no match
        assert!(db
            .find_connected_credential(CredentialSelector::Name, "acme")
            .unwrap()
            .is_none());

        db.mark_credential_connected(
            &cred.id,
            &crate::provider::AccountIdentity {
                email: Some("ops@acme.com".into()),
                external_id: Some("ext-1".into()),
                display_name: None,
            },
        )
        .unwrap();

        for (selector, value) in [
            (CredentialSelector::Id, cred.id.as_str()),
            (CredentialSelector::Name, "acme"),
            (CredentialSelector::ConnectedEmail, "ops@acme.com"),
            (CredentialSelector::ExternalAccountId, "ext-1"),
        ] {
            let found = db.find_connected_credential(selector, value).unwrap();
            assert_eq!(found.unwrap().id, cred.id);
        }
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        let cred = db.create_credential(sample("acme", "client-1")).unwrap();

        assert!(db.delete_credential(&cred.id).unwrap());
        assert!(db.get_credential(&cred.id).unwrap().is_none());
        assert!(!db.delete_credential(&cred.id).unwrap());
    }
}
