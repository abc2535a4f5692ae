// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Used Token
//!
//! Replay ledger in PostgreSQL, for deployments where several controller
//! replicas verify tokens against one store.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `UsedTokenRepository` with a conditional upsert

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::credential::{TokenId, UseReason, UsedTokenRecord};
use crate::domain::repository::{RepositoryError, UsedTokenRepository};

/// DDL for the ledger table, applied by `Database::ensure_schema`.
pub const USED_TOKENS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS used_tokens (
    jti         UUID PRIMARY KEY,
    expires_at  TIMESTAMPTZ NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL,
    reason      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS used_tokens_expires_at_idx ON used_tokens (expires_at);
"#;

pub struct PostgresUsedTokenRepository {
    pool: PgPool,
}

impl PostgresUsedTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsedTokenRepository for PostgresUsedTokenRepository {
    async fn insert_if_absent(&self, record: &UsedTokenRecord, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        // The row lock taken by ON CONFLICT serialises racing inserts of one jti;
        // the WHERE clause only lets an expired record be overwritten.
        let row = sqlx::query(
            r#"
            INSERT INTO used_tokens (jti, expires_at, recorded_at, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (jti) DO UPDATE SET
                expires_at = EXCLUDED.expires_at,
                recorded_at = EXCLUDED.recorded_at,
                reason = EXCLUDED.reason
            WHERE used_tokens.expires_at < $5
            RETURNING jti
            "#,
        )
        .bind(record.jti.0)
        .bind(record.expires_at)
        .bind(record.recorded_at)
        .bind(record.reason.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record used token: {}", e)))?;

        Ok(row.is_some())
    }

    async fn find(&self, jti: TokenId) -> Result<Option<UsedTokenRecord>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT jti, expires_at, recorded_at, reason
            FROM used_tokens
            WHERE jti = $1
            "#,
        )
        .bind(jti.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(parse_used_token_row).transpose()
    }

    async fn force_insert(&self, record: &UsedTokenRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO used_tokens (jti, expires_at, recorded_at, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (jti) DO UPDATE SET
                expires_at = GREATEST(used_tokens.expires_at, EXCLUDED.expires_at),
                recorded_at = EXCLUDED.recorded_at,
                reason = EXCLUDED.reason
            "#,
        )
        .bind(record.jti.0)
        .bind(record.expires_at)
        .bind(record.recorded_at)
        .bind(record.reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to force used token: {}", e)))?;

        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let result = sqlx::query("DELETE FROM used_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }
}

fn parse_used_token_row(row: sqlx::postgres::PgRow) -> Result<UsedTokenRecord, RepositoryError> {
    let reason: String = row.try_get("reason")?;
    let reason = match reason.as_str() {
        "consumed" => UseReason::Consumed,
        "revoked" => UseReason::Revoked,
        other => {
            return Err(RepositoryError::Serialization(format!(
                "unknown used-token reason: {}",
                other
            )))
        }
    };

    Ok(UsedTokenRecord {
        jti: TokenId(row.try_get("jti")?),
        expires_at: row.try_get("expires_at")?,
        recorded_at: row.try_get("recorded_at")?,
        reason,
    })
}
