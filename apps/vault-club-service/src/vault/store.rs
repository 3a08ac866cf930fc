use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_postgres::Transaction;
use tokio_postgres::error::SqlState;
use vault_ledger::{
    EpochWindow, PoolBalances, apply_weekly_cycle, format_amount, harvest_yield, next_epoch_number,
    split_deposit, sum_amounts_lenient,
};

use crate::db::VaultDb;
use crate::vault::types::{
    AuditLogRow, DepositOutcome, DepositRow, EpochRow, EpochStatus, HarvestOutcome, HarvestRow,
    PoolLedgerRow, StatsSnapshot,
};

/// Ledger values are persisted with this many decimal places.
pub const LEDGER_DECIMAL_PLACES: u32 = 8;

/// Advisory lock taken by every epoch transition in Postgres.
const EPOCH_TRANSITION_LOCK_KEY: i64 = 0x5641_554C_5445_5043;

#[derive(Debug, thiserror::Error)]
pub enum VaultStoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("db error: {0}")]
    Db(String),
}

#[derive(Debug, Clone)]
pub struct DepositInsertInput {
    pub deposit_id: String,
    pub user_id: String,
    pub wallet_address: Option<String>,
    pub amount: Decimal,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HarvestInput {
    pub harvest_id: String,
    pub executed_by: String,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Appends a deposit to the open epoch covering `now` (creating it if
    /// needed) and credits the pool ledger with the deposit split.
    async fn record_deposit(
        &self,
        input: DepositInsertInput,
    ) -> Result<DepositOutcome, VaultStoreError>;

    /// Harvests the most recent open epoch whose window has elapsed.
    /// Returns `None` when there is nothing to harvest. Either way an open
    /// epoch covering `now` exists afterwards.
    async fn harvest_closed_epoch(
        &self,
        input: HarvestInput,
    ) -> Result<Option<HarvestOutcome>, VaultStoreError>;

    async fn current_epoch(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<EpochRow>, VaultStoreError>;

    async fn epoch_deposit_amounts(&self, epoch_number: i64)
    -> Result<Vec<String>, VaultStoreError>;

    async fn wallet_deposit_amounts(&self, wallet: &str) -> Result<Vec<String>, VaultStoreError>;

    async fn stats_snapshot(&self) -> Result<StatsSnapshot, VaultStoreError>;

    async fn ledger(&self) -> Result<PoolLedgerRow, VaultStoreError>;

    async fn list_harvests(&self) -> Result<Vec<HarvestRow>, VaultStoreError>;

    async fn insert_audit_log(&self, entry: AuditLogRow) -> Result<(), VaultStoreError>;
}

pub fn memory() -> Arc<dyn VaultStore> {
    Arc::new(MemoryVaultStore::default())
}

pub fn postgres(db: Arc<VaultDb>) -> Arc<dyn VaultStore> {
    Arc::new(PostgresVaultStore { db })
}

/// Memory store seeded with deposit rows as an older writer may have stored
/// them, amounts unvalidated.
#[cfg(test)]
pub(crate) fn memory_with_raw_deposits(
    epoch: EpochRow,
    amounts: &[&str],
) -> Arc<dyn VaultStore> {
    let deposits = amounts
        .iter()
        .enumerate()
        .map(|(index, amount)| DepositRow {
            deposit_id: format!("legacy-{index}"),
            epoch_number: epoch.epoch_number,
            user_id: "legacy-user".to_string(),
            wallet_address: None,
            amount: (*amount).to_string(),
            created_at: epoch.starts_at,
        })
        .collect();
    let inner = MemoryVaultInner {
        epochs: BTreeMap::from([(epoch.epoch_number, epoch)]),
        deposits,
        ..MemoryVaultInner::default()
    };
    Arc::new(MemoryVaultStore {
        inner: Mutex::new(inner),
    })
}

fn credit_ledger(
    balances: &PoolBalances,
    amount: Decimal,
) -> Result<PoolBalances, VaultStoreError> {
    let split = split_deposit(amount).map_err(|error| VaultStoreError::Invalid(error.to_string()))?;
    Ok(balances
        .credit_deposit(&split)
        .round_dp(LEDGER_DECIMAL_PLACES))
}

#[derive(Default)]
struct MemoryVaultStore {
    inner: Mutex<MemoryVaultInner>,
}

#[derive(Default)]
struct MemoryVaultInner {
    epochs: BTreeMap<i64, EpochRow>,
    deposits: Vec<DepositRow>,
    harvests: BTreeMap<i64, HarvestRow>,
    ledger: PoolLedgerRow,
    audit_logs: Vec<AuditLogRow>,
}

impl MemoryVaultInner {
    fn ensure_open_epoch(&mut self, now: DateTime<Utc>) -> EpochRow {
        if let Some(existing) = self
            .epochs
            .values()
            .rev()
            .find(|epoch| epoch.is_open_at(now))
        {
            return existing.clone();
        }
        let window = EpochWindow::starting_at_midnight_of(now);
        let last = self.epochs.keys().next_back().copied();
        let epoch = EpochRow {
            epoch_number: next_epoch_number(now, last),
            starts_at: window.starts_at,
            ends_at: window.ends_at,
            status: EpochStatus::Open,
            created_at: now,
        };
        self.epochs.insert(epoch.epoch_number, epoch.clone());
        tracing::info!(
            epoch_number = epoch.epoch_number,
            starts_at = %epoch.starts_at,
            ends_at = %epoch.ends_at,
            "vault epoch opened"
        );
        epoch
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn record_deposit(
        &self,
        input: DepositInsertInput,
    ) -> Result<DepositOutcome, VaultStoreError> {
        let mut inner = self.inner.lock().await;
        let ledger = credit_ledger(&inner.ledger.balances, input.amount)?;
        let epoch = inner.ensure_open_epoch(input.now);

        let deposit = DepositRow {
            deposit_id: input.deposit_id,
            epoch_number: epoch.epoch_number,
            user_id: input.user_id,
            wallet_address: input.wallet_address,
            amount: format_amount(input.amount),
            created_at: input.now,
        };
        inner.deposits.push(deposit.clone());
        inner.ledger = PoolLedgerRow {
            balances: ledger,
            updated_at: Some(input.now),
        };

        Ok(DepositOutcome {
            deposit,
            epoch,
            ledger,
        })
    }

    async fn harvest_closed_epoch(
        &self,
        input: HarvestInput,
    ) -> Result<Option<HarvestOutcome>, VaultStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(epoch_number) = inner
            .epochs
            .values()
            .rev()
            .find(|epoch| {
                epoch.status == EpochStatus::Open && epoch.window().is_closed_at(input.now)
            })
            .map(|epoch| epoch.epoch_number)
        else {
            inner.ensure_open_epoch(input.now);
            return Ok(None);
        };
        if inner.harvests.contains_key(&epoch_number) {
            return Err(VaultStoreError::Conflict(format!(
                "epoch {epoch_number} already harvested"
            )));
        }

        let totals = sum_amounts_lenient(
            inner
                .deposits
                .iter()
                .filter(|deposit| deposit.epoch_number == epoch_number)
                .map(|deposit| deposit.amount.as_str()),
        );
        let harvest = HarvestRow {
            harvest_id: input.harvest_id,
            epoch_number,
            executed_by: input.executed_by,
            yield_amount: format_amount(harvest_yield(totals.total)),
            deposits_total: format_amount(totals.total),
            created_at: input.now,
        };

        let cycle = apply_weekly_cycle(&inner.ledger.balances);
        let ledger = cycle.after.round_dp(LEDGER_DECIMAL_PLACES);

        inner.harvests.insert(epoch_number, harvest.clone());
        if let Some(epoch) = inner.epochs.get_mut(&epoch_number) {
            epoch.status = EpochStatus::Harvested;
        }
        inner.ledger = PoolLedgerRow {
            balances: ledger,
            updated_at: Some(input.now),
        };
        let next_epoch = inner.ensure_open_epoch(input.now);

        Ok(Some(HarvestOutcome {
            harvest,
            next_epoch,
            cycle,
            ledger,
            deposits_counted: totals.rows,
            malformed_deposits: totals.malformed,
        }))
    }

    async fn current_epoch(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<EpochRow>, VaultStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .epochs
            .values()
            .rev()
            .find(|epoch| epoch.is_open_at(now))
            .cloned())
    }

    async fn epoch_deposit_amounts(
        &self,
        epoch_number: i64,
    ) -> Result<Vec<String>, VaultStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .deposits
            .iter()
            .filter(|deposit| deposit.epoch_number == epoch_number)
            .map(|deposit| deposit.amount.clone())
            .collect())
    }

    async fn wallet_deposit_amounts(&self, wallet: &str) -> Result<Vec<String>, VaultStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .deposits
            .iter()
            .filter(|deposit| deposit.wallet_address.as_deref() == Some(wallet))
            .map(|deposit| deposit.amount.clone())
            .collect())
    }

    async fn stats_snapshot(&self) -> Result<StatsSnapshot, VaultStoreError> {
        let inner = self.inner.lock().await;
        let users: HashSet<&str> = inner
            .deposits
            .iter()
            .map(|deposit| deposit.user_id.as_str())
            .collect();
        Ok(StatsSnapshot {
            distinct_users: users.len() as u64,
            amounts: inner
                .deposits
                .iter()
                .map(|deposit| deposit.amount.clone())
                .collect(),
            ledger: inner.ledger,
        })
    }

    async fn ledger(&self) -> Result<PoolLedgerRow, VaultStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.ledger)
    }

    async fn list_harvests(&self) -> Result<Vec<HarvestRow>, VaultStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.harvests.values().cloned().collect())
    }

    async fn insert_audit_log(&self, entry: AuditLogRow) -> Result<(), VaultStoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .audit_logs
            .iter()
            .any(|existing| existing.audit_id == entry.audit_id)
        {
            return Err(VaultStoreError::Conflict(
                "audit_id already recorded".to_string(),
            ));
        }
        inner.audit_logs.push(entry);
        Ok(())
    }
}

struct PostgresVaultStore {
    db: Arc<VaultDb>,
}

fn db_error(error: tokio_postgres::Error) -> VaultStoreError {
    if error.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return VaultStoreError::Conflict(error.to_string());
    }
    VaultStoreError::Db(error.to_string())
}

async fn lock_epoch_transitions(tx: &Transaction<'_>) -> Result<(), VaultStoreError> {
    tx.execute(
        "SELECT pg_advisory_xact_lock($1)",
        &[&EPOCH_TRANSITION_LOCK_KEY],
    )
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn ensure_open_epoch(
    tx: &Transaction<'_>,
    now: DateTime<Utc>,
) -> Result<EpochRow, VaultStoreError> {
    let existing = tx
        .query_opt(
            r#"
            SELECT epoch_number, starts_at, ends_at, status, created_at
              FROM vault.vault_epochs
             WHERE status = 'open'
               AND starts_at <= $1
               AND ends_at > $1
             ORDER BY epoch_number DESC
             LIMIT 1
            "#,
            &[&now],
        )
        .await
        .map_err(db_error)?;
    if let Some(row) = existing {
        return map_epoch_row(&row).map_err(VaultStoreError::Db);
    }

    let last: Option<i64> = tx
        .query_one(
            "SELECT MAX(epoch_number) AS last_epoch_number FROM vault.vault_epochs",
            &[],
        )
        .await
        .map_err(db_error)?
        .get("last_epoch_number");
    let window = EpochWindow::starting_at_midnight_of(now);
    let epoch_number = next_epoch_number(now, last);

    let inserted = tx
        .query_one(
            r#"
            INSERT INTO vault.vault_epochs (epoch_number, starts_at, ends_at, status, created_at)
            VALUES ($1,$2,$3,'open',$4)
            RETURNING epoch_number, starts_at, ends_at, status, created_at
            "#,
            &[&epoch_number, &window.starts_at, &window.ends_at, &now],
        )
        .await
        .map_err(db_error)?;
    let epoch = map_epoch_row(&inserted).map_err(VaultStoreError::Db)?;
    tracing::info!(
        epoch_number = epoch.epoch_number,
        starts_at = %epoch.starts_at,
        ends_at = %epoch.ends_at,
        "vault epoch opened"
    );
    Ok(epoch)
}

async fn load_ledger_for_update(tx: &Transaction<'_>) -> Result<PoolLedgerRow, VaultStoreError> {
    let row = tx
        .query_opt(
            r#"
            SELECT p1, p2, p3, updated_at
              FROM vault.vault_pool_ledger
             WHERE ledger_id = 1
             FOR UPDATE
            "#,
            &[],
        )
        .await
        .map_err(db_error)?;
    match row {
        Some(row) => map_ledger_row(&row).map_err(VaultStoreError::Db),
        None => Ok(PoolLedgerRow::default()),
    }
}

async fn store_ledger(
    tx: &Transaction<'_>,
    balances: &PoolBalances,
    now: DateTime<Utc>,
) -> Result<(), VaultStoreError> {
    tx.execute(
        r#"
        INSERT INTO vault.vault_pool_ledger (ledger_id, p1, p2, p3, updated_at)
        VALUES (1,$1,$2,$3,$4)
        ON CONFLICT (ledger_id) DO UPDATE
           SET p1 = EXCLUDED.p1,
               p2 = EXCLUDED.p2,
               p3 = EXCLUDED.p3,
               updated_at = EXCLUDED.updated_at
        "#,
        &[&balances.p1(), &balances.p2(), &balances.p3(), &now],
    )
    .await
    .map_err(db_error)?;
    Ok(())
}

#[async_trait]
impl VaultStore for PostgresVaultStore {
    async fn record_deposit(
        &self,
        input: DepositInsertInput,
    ) -> Result<DepositOutcome, VaultStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;
        lock_epoch_transitions(&tx).await?;

        let epoch = ensure_open_epoch(&tx, input.now).await?;
        let amount = format_amount(input.amount);
        let inserted = tx
            .query_one(
                r#"
                INSERT INTO vault.vault_epoch_deposits (
                  deposit_id,
                  epoch_number,
                  user_id,
                  wallet_address,
                  amount,
                  created_at
                )
                VALUES ($1,$2,$3,$4,$5,$6)
                RETURNING deposit_id, epoch_number, user_id, wallet_address, amount, created_at
                "#,
                &[
                    &input.deposit_id,
                    &epoch.epoch_number,
                    &input.user_id,
                    &input.wallet_address,
                    &amount,
                    &input.now,
                ],
            )
            .await
            .map_err(db_error)?;
        let deposit = map_deposit_row(&inserted).map_err(VaultStoreError::Db)?;

        let current = load_ledger_for_update(&tx).await?;
        let ledger = credit_ledger(&current.balances, input.amount)?;
        store_ledger(&tx, &ledger, input.now).await?;

        tx.commit().await.map_err(db_error)?;
        Ok(DepositOutcome {
            deposit,
            epoch,
            ledger,
        })
    }

    async fn harvest_closed_epoch(
        &self,
        input: HarvestInput,
    ) -> Result<Option<HarvestOutcome>, VaultStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client.transaction().await.map_err(db_error)?;
        lock_epoch_transitions(&tx).await?;

        let closed = tx
            .query_opt(
                r#"
                SELECT epoch_number, starts_at, ends_at, status, created_at
                  FROM vault.vault_epochs
                 WHERE status = 'open'
                   AND ends_at <= $1
                 ORDER BY epoch_number DESC
                 LIMIT 1
                 FOR UPDATE
                "#,
                &[&input.now],
            )
            .await
            .map_err(db_error)?;
        let Some(closed) = closed else {
            ensure_open_epoch(&tx, input.now).await?;
            tx.commit().await.map_err(db_error)?;
            return Ok(None);
        };
        let epoch = map_epoch_row(&closed).map_err(VaultStoreError::Db)?;

        let amounts: Vec<String> = tx
            .query(
                "SELECT amount FROM vault.vault_epoch_deposits WHERE epoch_number = $1",
                &[&epoch.epoch_number],
            )
            .await
            .map_err(db_error)?
            .iter()
            .map(|row| row.get("amount"))
            .collect();
        let totals = sum_amounts_lenient(amounts.iter().map(String::as_str));
        let yield_amount = format_amount(harvest_yield(totals.total));
        let deposits_total = format_amount(totals.total);

        let inserted = tx
            .query_one(
                r#"
                INSERT INTO vault.vault_epoch_harvests (
                  harvest_id,
                  epoch_number,
                  executed_by,
                  yield_amount,
                  deposits_total,
                  created_at
                )
                VALUES ($1,$2,$3,$4,$5,$6)
                RETURNING harvest_id, epoch_number, executed_by, yield_amount, deposits_total, created_at
                "#,
                &[
                    &input.harvest_id,
                    &epoch.epoch_number,
                    &input.executed_by,
                    &yield_amount,
                    &deposits_total,
                    &input.now,
                ],
            )
            .await
            .map_err(db_error)?;
        let harvest = map_harvest_row(&inserted).map_err(VaultStoreError::Db)?;

        tx.execute(
            r#"
            UPDATE vault.vault_epochs
               SET status = 'harvested'
             WHERE epoch_number = $1
            "#,
            &[&epoch.epoch_number],
        )
        .await
        .map_err(db_error)?;

        let current = load_ledger_for_update(&tx).await?;
        let cycle = apply_weekly_cycle(&current.balances);
        let ledger = cycle.after.round_dp(LEDGER_DECIMAL_PLACES);
        store_ledger(&tx, &ledger, input.now).await?;

        let next_epoch = ensure_open_epoch(&tx, input.now).await?;
        tx.commit().await.map_err(db_error)?;

        Ok(Some(HarvestOutcome {
            harvest,
            next_epoch,
            cycle,
            ledger,
            deposits_counted: totals.rows,
            malformed_deposits: totals.malformed,
        }))
    }

    async fn current_epoch(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<EpochRow>, VaultStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                r#"
                SELECT epoch_number, starts_at, ends_at, status, created_at
                  FROM vault.vault_epochs
                 WHERE status = 'open'
                   AND starts_at <= $1
                   AND ends_at > $1
                 ORDER BY epoch_number DESC
                 LIMIT 1
                "#,
                &[&now],
            )
            .await
            .map_err(db_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(map_epoch_row(&row).map_err(VaultStoreError::Db)?))
    }

    async fn epoch_deposit_amounts(
        &self,
        epoch_number: i64,
    ) -> Result<Vec<String>, VaultStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let rows = client
            .query(
                "SELECT amount FROM vault.vault_epoch_deposits WHERE epoch_number = $1",
                &[&epoch_number],
            )
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(|row| row.get("amount")).collect())
    }

    async fn wallet_deposit_amounts(&self, wallet: &str) -> Result<Vec<String>, VaultStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let rows = client
            .query(
                "SELECT amount FROM vault.vault_epoch_deposits WHERE wallet_address = $1",
                &[&wallet],
            )
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(|row| row.get("amount")).collect())
    }

    async fn stats_snapshot(&self) -> Result<StatsSnapshot, VaultStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let members: i64 = client
            .query_one(
                "SELECT COUNT(DISTINCT user_id)::BIGINT AS members FROM vault.vault_epoch_deposits",
                &[],
            )
            .await
            .map_err(db_error)?
            .get("members");
        let amounts = client
            .query("SELECT amount FROM vault.vault_epoch_deposits", &[])
            .await
            .map_err(db_error)?
            .iter()
            .map(|row| row.get("amount"))
            .collect();
        let ledger = client
            .query_opt(
                "SELECT p1, p2, p3, updated_at FROM vault.vault_pool_ledger WHERE ledger_id = 1",
                &[],
            )
            .await
            .map_err(db_error)?;
        let ledger = match ledger {
            Some(row) => map_ledger_row(&row).map_err(VaultStoreError::Db)?,
            None => PoolLedgerRow::default(),
        };
        Ok(StatsSnapshot {
            distinct_users: u64::try_from(members).unwrap_or(0),
            amounts,
            ledger,
        })
    }

    async fn ledger(&self) -> Result<PoolLedgerRow, VaultStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                "SELECT p1, p2, p3, updated_at FROM vault.vault_pool_ledger WHERE ledger_id = 1",
                &[],
            )
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => map_ledger_row(&row).map_err(VaultStoreError::Db),
            None => Ok(PoolLedgerRow::default()),
        }
    }

    async fn list_harvests(&self) -> Result<Vec<HarvestRow>, VaultStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let rows = client
            .query(
                r#"
                SELECT harvest_id, epoch_number, executed_by, yield_amount, deposits_total, created_at
                  FROM vault.vault_epoch_harvests
                 ORDER BY epoch_number ASC
                "#,
                &[],
            )
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| map_harvest_row(row).map_err(VaultStoreError::Db))
            .collect()
    }

    async fn insert_audit_log(&self, entry: AuditLogRow) -> Result<(), VaultStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let status_code = i32::from(entry.status_code);
        client
            .execute(
                r#"
                INSERT INTO vault.api_audit_logs (
                  audit_id,
                  user_id,
                  endpoint,
                  method,
                  status_code,
                  idempotency_key,
                  request_hash,
                  created_at
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                "#,
                &[
                    &entry.audit_id,
                    &entry.user_id,
                    &entry.endpoint,
                    &entry.method,
                    &status_code,
                    &entry.idempotency_key,
                    &entry.request_hash,
                    &entry.created_at,
                ],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

fn map_epoch_row(row: &tokio_postgres::Row) -> Result<EpochRow, String> {
    let status: String = row.get("status");
    Ok(EpochRow {
        epoch_number: row.get("epoch_number"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        status: EpochStatus::parse(status.as_str())
            .ok_or_else(|| format!("unknown epoch status: {status}"))?,
        created_at: row.get("created_at"),
    })
}

fn map_deposit_row(row: &tokio_postgres::Row) -> Result<DepositRow, String> {
    Ok(DepositRow {
        deposit_id: row.get("deposit_id"),
        epoch_number: row.get("epoch_number"),
        user_id: row.get("user_id"),
        wallet_address: row.get("wallet_address"),
        amount: row.get("amount"),
        created_at: row.get("created_at"),
    })
}

fn map_harvest_row(row: &tokio_postgres::Row) -> Result<HarvestRow, String> {
    Ok(HarvestRow {
        harvest_id: row.get("harvest_id"),
        epoch_number: row.get("epoch_number"),
        executed_by: row.get("executed_by"),
        yield_amount: row.get("yield_amount"),
        deposits_total: row.get("deposits_total"),
        created_at: row.get("created_at"),
    })
}

fn map_ledger_row(row: &tokio_postgres::Row) -> Result<PoolLedgerRow, String> {
    let balances = PoolBalances::try_new(row.get("p1"), row.get("p2"), row.get("p3"))
        .map_err(|error| error.to_string())?;
    Ok(PoolLedgerRow {
        balances,
        updated_at: row.get("updated_at"),
    })
}
