use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::VaultDb;

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyStoreError {
    #[error("invalid idempotency record: {0}")]
    Invalid(String),
    #[error("db error: {0}")]
    Db(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyState {
    InFlight,
    Completed,
}

impl IdempotencyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_flight" => Some(Self::InFlight),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Identifies one logical request: the same key on another endpoint is a different request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyScope {
    pub key: String,
    pub endpoint: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub scope: IdempotencyScope,
    pub user_id: Option<String>,
    pub request_hash: String,
    pub state: IdempotencyState,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ClaimInput {
    pub scope: IdempotencyScope,
    pub user_id: Option<String>,
    pub request_hash: String,
    pub now: DateTime<Utc>,
    /// In-flight claims by the same user created before this instant are
    /// abandoned and may be taken over.
    pub stale_before: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn is_abandoned_for(&self, input: &ClaimInput) -> bool {
        self.state == IdempotencyState::InFlight
            && self.user_id == input.user_id
            && self.created_at < input.stale_before
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the key and must complete or release it.
    Claimed,
    Existing(IdempotencyRecord),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically inserts an in-flight record, or returns the one already there.
    /// An abandoned claim (see [`ClaimInput::stale_before`]) is taken over instead.
    async fn claim(&self, input: ClaimInput) -> Result<ClaimOutcome, IdempotencyStoreError>;

    async fn get(
        &self,
        scope: &IdempotencyScope,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError>;

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        status_code: u16,
        response_body: &str,
        now: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError>;

    /// Drops an in-flight claim so a retry can run. Completed records are kept.
    async fn release(&self, scope: &IdempotencyScope) -> Result<(), IdempotencyStoreError>;
}

pub fn memory() -> Arc<dyn IdempotencyStore> {
    Arc::new(MemoryIdempotencyStore::default())
}

pub fn postgres(db: Arc<VaultDb>) -> Arc<dyn IdempotencyStore> {
    Arc::new(PostgresIdempotencyStore { db })
}

#[derive(Default)]
struct MemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyScope, IdempotencyRecord>>,
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn claim(&self, input: ClaimInput) -> Result<ClaimOutcome, IdempotencyStoreError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records
            .get(&input.scope)
            .filter(|existing| !existing.is_abandoned_for(&input))
        {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        let record = IdempotencyRecord {
            scope: input.scope.clone(),
            user_id: input.user_id,
            request_hash: input.request_hash,
            state: IdempotencyState::InFlight,
            status_code: None,
            response_body: None,
            created_at: input.now,
            completed_at: None,
        };
        let _ = records.insert(input.scope, record);
        Ok(ClaimOutcome::Claimed)
    }

    async fn get(
        &self,
        scope: &IdempotencyScope,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        let records = self.records.lock().await;
        Ok(records.get(scope).cloned())
    }

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        status_code: u16,
        response_body: &str,
        now: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(scope) else {
            return Err(IdempotencyStoreError::Invalid(format!(
                "no claim for idempotency key {}",
                scope.key
            )));
        };
        record.state = IdempotencyState::Completed;
        record.status_code = Some(status_code);
        record.response_body = Some(response_body.to_string());
        record.completed_at = Some(now);
        Ok(())
    }

    async fn release(&self, scope: &IdempotencyScope) -> Result<(), IdempotencyStoreError> {
        let mut records = self.records.lock().await;
        if records
            .get(scope)
            .is_some_and(|record| record.state == IdempotencyState::InFlight)
        {
            let _ = records.remove(scope);
        }
        Ok(())
    }
}

struct PostgresIdempotencyStore {
    db: Arc<VaultDb>,
}

fn db_error(error: tokio_postgres::Error) -> IdempotencyStoreError {
    IdempotencyStoreError::Db(error.to_string())
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn claim(&self, input: ClaimInput) -> Result<ClaimOutcome, IdempotencyStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let inserted = client
            .query_opt(
                r#"
                INSERT INTO vault.api_idempotency AS existing (
                  idempotency_key,
                  endpoint,
                  method,
                  user_id,
                  request_hash,
                  state,
                  created_at
                )
                VALUES ($1,$2,$3,$4,$5,'in_flight',$6)
                ON CONFLICT (idempotency_key, endpoint, method) DO UPDATE
                   SET request_hash = EXCLUDED.request_hash,
                       created_at = EXCLUDED.created_at
                 WHERE existing.state = 'in_flight'
                   AND existing.user_id IS NOT DISTINCT FROM EXCLUDED.user_id
                   AND existing.created_at < $7
                RETURNING idempotency_key
                "#,
                &[
                    &input.scope.key,
                    &input.scope.endpoint,
                    &input.scope.method,
                    &input.user_id,
                    &input.request_hash,
                    &input.now,
                    &input.stale_before,
                ],
            )
            .await
            .map_err(db_error)?;
        if inserted.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let existing = select_record(&client, &input.scope).await?;
        match existing {
            Some(record) => Ok(ClaimOutcome::Existing(record)),
            // Released between the insert and the read; the caller retries as a fresh claim.
            None => Err(IdempotencyStoreError::Invalid(format!(
                "idempotency key {} changed during claim",
                input.scope.key
            ))),
        }
    }

    async fn get(
        &self,
        scope: &IdempotencyScope,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        select_record(&client, scope).await
    }

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        status_code: u16,
        response_body: &str,
        now: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let status_code = i32::from(status_code);
        let updated = client
            .execute(
                r#"
                UPDATE vault.api_idempotency
                   SET state = 'completed',
                       status_code = $4,
                       response_body = $5,
                       completed_at = $6
                 WHERE idempotency_key = $1
                   AND endpoint = $2
                   AND method = $3
                "#,
                &[
                    &scope.key,
                    &scope.endpoint,
                    &scope.method,
                    &status_code,
                    &response_body,
                    &now,
                ],
            )
            .await
            .map_err(db_error)?;
        if updated == 0 {
            return Err(IdempotencyStoreError::Invalid(format!(
                "no claim for idempotency key {}",
                scope.key
            )));
        }
        Ok(())
    }

    async fn release(&self, scope: &IdempotencyScope) -> Result<(), IdempotencyStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                r#"
                DELETE FROM vault.api_idempotency
                 WHERE idempotency_key = $1
                   AND endpoint = $2
                   AND method = $3
                   AND state = 'in_flight'
                "#,
                &[&scope.key, &scope.endpoint, &scope.method],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

async fn select_record(
    client: &tokio_postgres::Client,
    scope: &IdempotencyScope,
) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
    let row = client
        .query_opt(
            r#"
            SELECT idempotency_key, endpoint, method, user_id, request_hash, state,
                   status_code, response_body, created_at, completed_at
              FROM vault.api_idempotency
             WHERE idempotency_key = $1
               AND endpoint = $2
               AND method = $3
            "#,
            &[&scope.key, &scope.endpoint, &scope.method],
        )
        .await
        .map_err(db_error)?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(
        map_idempotency_row(&row).map_err(IdempotencyStoreError::Invalid)?,
    ))
}

fn map_idempotency_row(row: &tokio_postgres::Row) -> Result<IdempotencyRecord, String> {
    let state: String = row.get("state");
    let status_code: Option<i32> = row.get("status_code");
    let status_code = status_code
        .map(|code| u16::try_from(code).map_err(|error| format!("invalid status_code: {error}")))
        .transpose()?;
    Ok(IdempotencyRecord {
        scope: IdempotencyScope {
            key: row.get("idempotency_key"),
            endpoint: row.get("endpoint"),
            method: row.get("method"),
        },
        user_id: row.get("user_id"),
        request_hash: row.get("request_hash"),
        state: IdempotencyState::parse(state.as_str())
            .ok_or_else(|| format!("unknown idempotency state: {state}"))?,
        status_code,
        response_body: row.get("response_body"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    })
}
