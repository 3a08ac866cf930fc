use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use vault_ledger::{format_amount, parse_amount, sum_amounts_lenient};

use crate::vault::store::{DepositInsertInput, HarvestInput, VaultStore, VaultStoreError};
use crate::vault::types::{
    AuditLogRow, CurrentEpoch, DepositAccepted, DepositRequest, HarvestExecuted, VaultStats,
    WalletBalance,
};

pub const SYSTEM_HEALTH: u8 = 100;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("nothing to harvest")]
    NothingToHarvest,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NothingToHarvest => "nothing_to_harvest",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidRequest(message) | Self::Conflict(message) | Self::Internal(message) => {
                message.clone()
            }
            Self::NothingToHarvest => "no closed epoch is waiting to be harvested".to_string(),
        }
    }
}

/// Source of "now" for epoch decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct VaultService {
    store: Arc<dyn VaultStore>,
    clock: Arc<dyn Clock>,
    network: String,
}

impl VaultService {
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            network: "testnet".to_string(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn VaultStore> {
        &self.store
    }

    pub async fn deposit(
        &self,
        user_id: &str,
        request: &DepositRequest,
    ) -> Result<DepositAccepted, VaultError> {
        let raw = request
            .amount_text()
            .ok_or_else(|| VaultError::InvalidRequest("amount is required".to_string()))?;
        let amount =
            parse_amount(raw.as_str()).map_err(|error| VaultError::InvalidRequest(error.to_string()))?;
        if amount.is_zero() {
            return Err(VaultError::InvalidRequest(
                "amount must be greater than zero".to_string(),
            ));
        }
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(VaultError::InvalidRequest("user_id is required".to_string()));
        }

        let outcome = self
            .store
            .record_deposit(DepositInsertInput {
                deposit_id: Uuid::now_v7().to_string(),
                user_id: user_id.to_string(),
                wallet_address: request.wallet(),
                amount,
                now: self.clock.now(),
            })
            .await
            .map_err(map_store_error)?;

        tracing::info!(
            epoch_number = outcome.epoch.epoch_number,
            deposit_id = %outcome.deposit.deposit_id,
            user_id = %outcome.deposit.user_id,
            amount = %outcome.deposit.amount,
            p1 = %outcome.ledger.p1(),
            p2 = %outcome.ledger.p2(),
            p3 = %outcome.ledger.p3(),
            "vault deposit recorded"
        );

        Ok(DepositAccepted {
            accepted: true,
            amount: outcome.deposit.amount,
            wallet_address: outcome.deposit.wallet_address,
            epoch_number: outcome.epoch.epoch_number,
            network: self.network.clone(),
        })
    }

    pub async fn harvest(&self, executed_by: &str) -> Result<HarvestExecuted, VaultError> {
        let executed_by = executed_by.trim();
        if executed_by.is_empty() {
            return Err(VaultError::InvalidRequest(
                "executed_by is required".to_string(),
            ));
        }

        let outcome = self
            .store
            .harvest_closed_epoch(HarvestInput {
                harvest_id: Uuid::now_v7().to_string(),
                executed_by: executed_by.to_string(),
                now: self.clock.now(),
            })
            .await
            .map_err(map_store_error)?
            .ok_or(VaultError::NothingToHarvest)?;

        if outcome.malformed_deposits > 0 {
            tracing::warn!(
                epoch_number = outcome.harvest.epoch_number,
                malformed = outcome.malformed_deposits,
                counted = outcome.deposits_counted,
                "vault harvest treated malformed deposit amounts as zero"
            );
        }
        tracing::info!(
            epoch_number = outcome.harvest.epoch_number,
            executed_by = %outcome.harvest.executed_by,
            yield_amount = %outcome.harvest.yield_amount,
            deposits_total = %outcome.harvest.deposits_total,
            profit_total = %outcome.cycle.profits.total(),
            next_epoch_number = outcome.next_epoch.epoch_number,
            "vault harvest executed"
        );

        Ok(HarvestExecuted {
            accepted: true,
            executed: true,
            epoch_number: outcome.harvest.epoch_number,
            yield_amount: outcome.harvest.yield_amount,
            deposits_total: outcome.harvest.deposits_total,
            next_epoch_number: outcome.next_epoch.epoch_number,
            network: self.network.clone(),
        })
    }

    pub async fn stats(&self) -> Result<VaultStats, VaultError> {
        let snapshot = self.store.stats_snapshot().await.map_err(map_store_error)?;
        let totals = sum_amounts_lenient(snapshot.amounts.iter().map(String::as_str));
        if totals.malformed > 0 {
            tracing::warn!(
                malformed = totals.malformed,
                "vault stats skipped malformed deposit amounts"
            );
        }
        let balances = snapshot.ledger.balances;
        Ok(VaultStats {
            total_members: snapshot.distinct_users,
            total_deposits: format_amount(totals.total),
            system_health: SYSTEM_HEALTH,
            transactions: totals.rows as u64,
            strand1_balance: format_amount(balances.p1()),
            strand2_balance: format_amount(balances.p2()),
            strand3_balance: format_amount(balances.p3()),
        })
    }

    pub async fn current_epoch(&self) -> Result<CurrentEpoch, VaultError> {
        let epoch = self
            .store
            .current_epoch(self.clock.now())
            .await
            .map_err(map_store_error)?;
        let deposits_total = match epoch.as_ref() {
            Some(epoch) => {
                let amounts = self
                    .store
                    .epoch_deposit_amounts(epoch.epoch_number)
                    .await
                    .map_err(map_store_error)?;
                sum_amounts_lenient(amounts.iter().map(String::as_str)).total
            }
            None => rust_decimal::Decimal::ZERO,
        };
        Ok(CurrentEpoch {
            epoch,
            deposits_total: format_amount(deposits_total),
        })
    }

    pub async fn wallet_balance(&self, wallet: &str) -> Result<WalletBalance, VaultError> {
        let wallet = wallet.trim();
        if wallet.is_empty() {
            return Err(VaultError::InvalidRequest("wallet is required".to_string()));
        }
        let amounts = self
            .store
            .wallet_deposit_amounts(wallet)
            .await
            .map_err(map_store_error)?;
        let totals = sum_amounts_lenient(amounts.iter().map(String::as_str));
        Ok(WalletBalance {
            wallet: wallet.to_string(),
            balance: format_amount(totals.total),
        })
    }

    /// Audit failures never fail the request; they are logged and dropped.
    pub async fn record_audit(&self, entry: AuditEntry<'_>) {
        let row = AuditLogRow {
            audit_id: Uuid::now_v7().to_string(),
            user_id: entry.user_id.map(ToOwned::to_owned),
            endpoint: entry.endpoint.to_string(),
            method: entry.method.to_string(),
            status_code: entry.status_code,
            idempotency_key: entry.idempotency_key.map(ToOwned::to_owned),
            request_hash: entry.request_hash.map(ToOwned::to_owned),
            created_at: self.clock.now(),
        };
        if let Err(error) = self.store.insert_audit_log(row).await {
            tracing::warn!(
                endpoint = entry.endpoint,
                reason = %error,
                "vault audit log write failed"
            );
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuditEntry<'a> {
    pub user_id: Option<&'a str>,
    pub endpoint: &'a str,
    pub method: &'a str,
    pub status_code: u16,
    pub idempotency_key: Option<&'a str>,
    pub request_hash: Option<&'a str>,
}

/// SHA-256 of the serde form of `value`, hex encoded.
pub fn canonical_sha256(value: &impl Serialize) -> Result<String, VaultError> {
    let bytes = serde_json::to_vec(value).map_err(|error| VaultError::Internal(error.to_string()))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

fn map_store_error(error: VaultStoreError) -> VaultError {
    match error {
        VaultStoreError::Conflict(message) => VaultError::Conflict(message),
        VaultStoreError::Invalid(message) => VaultError::InvalidRequest(message),
        VaultStoreError::Db(message) => VaultError::Internal(message),
    }
}
