use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vault_ledger::{EpochWindow, PoolBalances, WeeklyCycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochStatus {
    Open,
    Harvested,
}

impl EpochStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Harvested => "harvested",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "harvested" => Some(Self::Harvested),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRow {
    pub epoch_number: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: EpochStatus,
    pub created_at: DateTime<Utc>,
}

impl EpochRow {
    pub fn window(&self) -> EpochWindow {
        EpochWindow {
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }

    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.status == EpochStatus::Open && self.window().contains(at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRow {
    pub deposit_id: String,
    pub epoch_number: i64,
    pub user_id: String,
    pub wallet_address: Option<String>,
    /// Stored as text; legacy writers may have left non-numeric values.
    pub amount: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestRow {
    pub harvest_id: String,
    pub epoch_number: i64,
    pub executed_by: String,
    pub yield_amount: String,
    pub deposits_total: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolLedgerRow {
    pub balances: PoolBalances,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for PoolLedgerRow {
    fn default() -> Self {
        Self {
            balances: PoolBalances::ZERO,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogRow {
    pub audit_id: String,
    pub user_id: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub idempotency_key: Option<String>,
    pub request_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DepositOutcome {
    pub deposit: DepositRow,
    pub epoch: EpochRow,
    pub ledger: PoolBalances,
}

#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub harvest: HarvestRow,
    pub next_epoch: EpochRow,
    pub cycle: WeeklyCycle,
    pub ledger: PoolBalances,
    pub deposits_counted: usize,
    pub malformed_deposits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub distinct_users: u64,
    pub amounts: Vec<String>,
    pub ledger: PoolLedgerRow,
}

/// Body of `POST /v1/vault/deposit`. `amount` may arrive as a string or a JSON number.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepositRequest {
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default, alias = "walletAddress")]
    pub wallet_address: Option<String>,
}

impl DepositRequest {
    /// Text form of the submitted amount, before validation.
    pub fn amount_text(&self) -> Option<String> {
        match self.amount.as_ref()? {
            Value::String(raw) => Some(raw.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    pub fn wallet(&self) -> Option<String> {
        self.wallet_address
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAccepted {
    pub accepted: bool,
    pub amount: String,
    pub wallet_address: Option<String>,
    pub epoch_number: i64,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestExecuted {
    pub accepted: bool,
    pub executed: bool,
    pub epoch_number: i64,
    pub yield_amount: String,
    pub deposits_total: String,
    pub next_epoch_number: i64,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStats {
    pub total_members: u64,
    pub total_deposits: String,
    pub system_health: u8,
    pub transactions: u64,
    pub strand1_balance: String,
    pub strand2_balance: String,
    pub strand3_balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentEpoch {
    pub epoch: Option<EpochRow>,
    pub deposits_total: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub wallet: String,
    pub balance: String,
}
