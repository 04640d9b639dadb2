//! Token pair persistence.
//!
//! One row per credential. Written by the OAuth flow engine on the initial
//! grant and by the token broker on refresh; read by the broker.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{parse_json_list, parse_ts, to_json_list, to_ts, Database, TokenPair};
use crate::error::Result;

/// Token pair as written by the flow engine. Tokens arrive already encrypted.
pub struct TokenPairRecord {
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl Database {
    /// Insert or replace the token pair for a credential (initial grant or
    /// re-authorization).
    pub fn upsert_token_pair(&self, credential_id: &str, record: TokenPairRecord) -> Result<()> {
        let now = to_ts(Utc::now());
        self.conn().execute(
            r#"
            INSERT INTO credential_tokens (
                credential_id, encrypted_access_token, encrypted_refresh_token,
                scopes, expires_at, last_refreshed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(credential_id) DO UPDATE SET
                encrypted_access_token = excluded.encrypted_access_token,
                encrypted_refresh_token = excluded.encrypted_refresh_token,
                scopes = excluded.scopes,
                expires_at = excluded.expires_at,
                last_refreshed_at = excluded.last_refreshed_at
            "#,
            params![
                credential_id,
                record.encrypted_access_token,
                record.encrypted_refresh_token,
                to_json_list(&record.scopes),
                to_ts(record.expires_at),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_token_pair(&self, credential_id: &str) -> Result<Option<TokenPair>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT credential_id, encrypted_access_token, encrypted_refresh_token, \
                    scopes, expires_at, last_refreshed_at \
             FROM credential_tokens WHERE credential_id = ?1",
        )?;

        let mut rows = stmt.query_map(params![credential_id], |row| {
            let scopes: String = row.get(3)?;
            let expires_at: String = row.get(4)?;
            let last_refreshed_at: String = row.get(5)?;
            Ok(TokenPair {
                credential_id: row.get(0)?,
                encrypted_access_token: row.get(1)?,
                encrypted_refresh_token: row.get(2)?,
                scopes: parse_json_list(&scopes),
                expires_at: parse_ts(&expires_at)?,
                last_refreshed_at: parse_ts(&last_refreshed_at)?,
            })
        })?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Store a refreshed access token. The refresh token is only replaced
    /// when the provider rotated it; otherwise the stored one stays.
    pub fn update_access_token(
        &self,
        credential_id: &str,
        encrypted_access_token: &str,
        rotated_refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = to_ts(Utc::now());
        match rotated_refresh_token {
            Some(refresh) => {
                self.conn().execute(
                    "UPDATE credential_tokens \
                     SET encrypted_access_token = ?1, encrypted_refresh_token = ?2, \
                         expires_at = ?3, last_refreshed_at = ?4 \
                     WHERE credential_id = ?5",
                    params![
                        encrypted_access_token,
                        refresh,
                        to_ts(expires_at),
                        now,
                        credential_id
                    ],
                )?;
            }
            None => {
                self.conn().execute(
                    "UPDATE credential_tokens \
                     SET encrypted_access_token = ?1, expires_at = ?2, last_refreshed_at = ?3 \
                     WHERE credential_id = ?4",
                    params![encrypted_access_token, to_ts(expires_at), now, credential_id],
                )?;
            }
        }
        Ok(())
    }
}
