use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::task::JoinSet;
use vault_ledger::{PoolTier, apply_weekly_cycle};

use crate::vault::store::{self, DepositInsertInput, HarvestInput, LEDGER_DECIMAL_PLACES};
use crate::vault::types::{DepositRequest, EpochRow, EpochStatus};
use crate::vault::{ManualClock, VaultError, VaultService};

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .context("valid test timestamp")
}

fn deposit_request(amount: serde_json::Value, wallet: Option<&str>) -> DepositRequest {
    DepositRequest {
        amount: Some(amount),
        wallet_address: wallet.map(ToOwned::to_owned),
    }
}

fn service_at(now: DateTime<Utc>) -> (VaultService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let service = VaultService::new(store::memory()).with_clock(clock.clone());
    (service, clock)
}

#[tokio::test]
async fn first_deposit_opens_an_epoch_at_utc_midnight() -> Result<()> {
    let now = at(2025, 3, 12, 15, 45)?;
    let (service, _clock) = service_at(now);

    let accepted = service
        .deposit("user-1", &deposit_request(json!("100"), Some("tb1qwallet")))
        .await?;
    assert!(accepted.accepted);
    assert_eq!(accepted.amount, "100");
    assert_eq!(accepted.epoch_number, now.timestamp());
    assert_eq!(accepted.network, "testnet");
    assert_eq!(accepted.wallet_address.as_deref(), Some("tb1qwallet"));

    let current = service.current_epoch().await?;
    let epoch = current.epoch.context("open epoch")?;
    assert_eq!(epoch.starts_at, at(2025, 3, 12, 0, 0)?);
    assert_eq!(epoch.ends_at, at(2025, 3, 19, 0, 0)?);
    assert_eq!(epoch.status, EpochStatus::Open);
    assert_eq!(current.deposits_total, "100");
    Ok(())
}

#[tokio::test]
async fn deposits_in_the_same_window_share_an_epoch() -> Result<()> {
    let (service, clock) = service_at(at(2025, 3, 12, 9, 0)?);
    let first = service
        .deposit("user-1", &deposit_request(json!("40"), None))
        .await?;
    clock.advance(Duration::days(2));
    let second = service
        .deposit("user-2", &deposit_request(json!(60), None))
        .await?;
    assert_eq!(first.epoch_number, second.epoch_number);
    assert_eq!(second.amount, "60");
    Ok(())
}

#[tokio::test]
async fn deposit_of_one_hundred_splits_the_ledger() -> Result<()> {
    let (service, _clock) = service_at(at(2025, 3, 12, 9, 0)?);
    service
        .deposit("user-1", &deposit_request(json!("100"), None))
        .await?;
    let ledger = service.store().ledger().await?.balances;
    assert_eq!(ledger.p1(), dec!(60));
    assert_eq!(ledger.p2(), dec!(10));
    assert_eq!(ledger.p3(), dec!(30));
    Ok(())
}

#[tokio::test]
async fn invalid_amounts_are_rejected_before_any_write() -> Result<()> {
    let (service, _clock) = service_at(at(2025, 3, 12, 9, 0)?);
    for amount in [json!("abc"), json!("-5"), json!("0"), json!(true), json!("")] {
        let result = service
            .deposit("user-1", &deposit_request(amount.clone(), None))
            .await;
        assert!(
            matches!(result, Err(VaultError::InvalidRequest(_))),
            "amount {amount} should be rejected"
        );
    }
    let missing = service.deposit("user-1", &DepositRequest::default()).await;
    assert!(matches!(missing, Err(VaultError::InvalidRequest(_))));

    assert!(service.current_epoch().await?.epoch.is_none());
    assert_eq!(service.stats().await?.transactions, 0);
    Ok(())
}

#[tokio::test]
async fn harvest_before_the_window_closes_has_nothing_to_do() -> Result<()> {
    let (service, clock) = service_at(at(2025, 3, 12, 9, 0)?);
    let empty = service.harvest("admin").await;
    assert!(matches!(empty, Err(VaultError::NothingToHarvest)));
    assert!(service.current_epoch().await?.epoch.is_some());

    service
        .deposit("user-1", &deposit_request(json!("40"), None))
        .await?;
    clock.set(at(2025, 3, 18, 23, 59)?);
    let still_open = service.harvest("admin").await;
    assert!(matches!(still_open, Err(VaultError::NothingToHarvest)));
    Ok(())
}

#[tokio::test]
async fn harvest_yields_one_percent_and_opens_the_next_epoch() -> Result<()> {
    let start = at(2025, 3, 12, 9, 0)?;
    let (service, clock) = service_at(start);
    let first = service
        .deposit("user-1", &deposit_request(json!("40"), None))
        .await?;
    service
        .deposit("user-2", &deposit_request(json!("60"), None))
        .await?;
    let before = service.store().ledger().await?.balances;

    clock.set(at(2025, 3, 19, 0, 0)?);
    let harvested = service.harvest("admin-1").await?;
    assert!(harvested.executed);
    assert_eq!(harvested.epoch_number, first.epoch_number);
    assert_eq!(harvested.yield_amount, "1");
    assert_eq!(harvested.deposits_total, "100");
    assert!(harvested.next_epoch_number > harvested.epoch_number);

    let current = service.current_epoch().await?;
    let next = current.epoch.context("next epoch")?;
    assert_eq!(next.epoch_number, harvested.next_epoch_number);
    assert_eq!(next.starts_at, at(2025, 3, 19, 0, 0)?);
    assert_eq!(current.deposits_total, "0");

    let cycle = apply_weekly_cycle(&before);
    let after = service.store().ledger().await?.balances;
    for tier in PoolTier::ALL {
        assert_eq!(
            after.get(tier),
            (before.get(tier) + cycle.routing.net_change(tier)).round_dp(LEDGER_DECIMAL_PLACES)
        );
    }

    let again = service.harvest("admin-1").await;
    assert!(matches!(again, Err(VaultError::NothingToHarvest)));
    let harvests = service.store().list_harvests().await?;
    assert_eq!(harvests.len(), 1);
    Ok(())
}

#[tokio::test]
async fn empty_closed_epoch_harvests_zero_yield() -> Result<()> {
    let (service, clock) = service_at(at(2025, 3, 12, 9, 0)?);
    service
        .deposit("user-1", &deposit_request(json!("10"), None))
        .await?;
    clock.set(at(2025, 3, 19, 1, 0)?);
    service.harvest("admin").await?;

    clock.set(at(2025, 3, 26, 0, 0)?);
    let second = service.harvest("admin").await?;
    assert_eq!(second.yield_amount, "0");
    assert_eq!(second.deposits_total, "0");
    Ok(())
}

#[tokio::test]
async fn backlog_drains_newest_epoch_first() -> Result<()> {
    let store = store::memory();
    let first = at(2025, 3, 12, 9, 0)?;
    store
        .record_deposit(DepositInsertInput {
            deposit_id: "d-1".to_string(),
            user_id: "user-1".to_string(),
            wallet_address: None,
            amount: dec!(100),
            now: first,
        })
        .await?;
    let second = at(2025, 3, 20, 9, 0)?;
    store
        .record_deposit(DepositInsertInput {
            deposit_id: "d-2".to_string(),
            user_id: "user-1".to_string(),
            wallet_address: None,
            amount: dec!(300),
            now: second,
        })
        .await?;

    let later = at(2025, 4, 1, 0, 0)?;
    let newest = store
        .harvest_closed_epoch(HarvestInput {
            harvest_id: "h-1".to_string(),
            executed_by: "admin".to_string(),
            now: later,
        })
        .await?
        .context("newest closed epoch")?;
    assert_eq!(newest.harvest.epoch_number, second.timestamp());
    assert_eq!(newest.harvest.yield_amount, "3");

    let oldest = store
        .harvest_closed_epoch(HarvestInput {
            harvest_id: "h-2".to_string(),
            executed_by: "admin".to_string(),
            now: later,
        })
        .await?
        .context("oldest closed epoch")?;
    assert_eq!(oldest.harvest.epoch_number, first.timestamp());
    assert_eq!(oldest.harvest.yield_amount, "1");
    assert_eq!(oldest.next_epoch.epoch_number, newest.next_epoch.epoch_number);

    let drained = store
        .harvest_closed_epoch(HarvestInput {
            harvest_id: "h-3".to_string(),
            executed_by: "admin".to_string(),
            now: later,
        })
        .await?;
    assert!(drained.is_none());
    Ok(())
}

#[tokio::test]
async fn concurrent_first_deposits_create_a_single_epoch() -> Result<()> {
    let (service, _clock) = service_at(at(2025, 3, 12, 9, 0)?);
    let mut tasks = JoinSet::new();
    for index in 0..16 {
        let service = service.clone();
        tasks.spawn(async move {
            service
                .deposit(
                    format!("user-{index}").as_str(),
                    &deposit_request(json!("1"), None),
                )
                .await
        });
    }
    let mut epochs = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        epochs.push(joined??.epoch_number);
    }
    epochs.dedup();
    assert_eq!(epochs.len(), 1);

    let stats = service.stats().await?;
    assert_eq!(stats.total_members, 16);
    assert_eq!(stats.transactions, 16);
    assert_eq!(stats.total_deposits, "16");
    Ok(())
}

#[tokio::test]
async fn concurrent_harvests_execute_once() -> Result<()> {
    let (service, clock) = service_at(at(2025, 3, 12, 9, 0)?);
    service
        .deposit("user-1", &deposit_request(json!("50"), None))
        .await?;
    clock.set(at(2025, 3, 20, 0, 0)?);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let service = service.clone();
        tasks.spawn(async move { service.harvest("admin").await });
    }
    let mut executed = 0;
    let mut nothing = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(_) => executed += 1,
            Err(VaultError::NothingToHarvest) => nothing += 1,
            Err(other) => return Err(anyhow!("unexpected harvest error: {other}")),
        }
    }
    assert_eq!(executed, 1);
    assert_eq!(nothing, 7);
    assert_eq!(service.store().list_harvests().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn stats_report_members_totals_and_strand_balances() -> Result<()> {
    let (service, _clock) = service_at(at(2025, 3, 12, 9, 0)?);
    service
        .deposit("user-1", &deposit_request(json!("100"), Some("w-1")))
        .await?;
    service
        .deposit("user-1", &deposit_request(json!("50.5"), Some("w-1")))
        .await?;
    service
        .deposit("user-2", &deposit_request(json!(25), Some("w-2")))
        .await?;

    let stats = service.stats().await?;
    assert_eq!(stats.total_members, 2);
    assert_eq!(stats.transactions, 3);
    assert_eq!(stats.total_deposits, "175.5");
    assert_eq!(stats.system_health, 100);
    assert_eq!(stats.strand1_balance, "105.3");
    assert_eq!(stats.strand2_balance, "17.55");
    assert_eq!(stats.strand3_balance, "52.65");

    let balance = service.wallet_balance("w-1").await?;
    assert_eq!(balance.balance, "150.5");
    let unknown = service.wallet_balance("w-404").await?;
    assert_eq!(unknown.balance, "0");
    Ok(())
}

#[tokio::test]
async fn malformed_stored_amounts_count_as_zero_at_harvest() -> Result<()> {
    let starts_at = at(2025, 3, 12, 0, 0)?;
    let epoch = EpochRow {
        epoch_number: starts_at.timestamp(),
        starts_at,
        ends_at: starts_at + Duration::days(7),
        status: EpochStatus::Open,
        created_at: starts_at,
    };
    let store = store::memory_with_raw_deposits(epoch, &["100", "abc", "", "50"]);

    let outcome = store
        .harvest_closed_epoch(HarvestInput {
            harvest_id: "h-legacy".to_string(),
            executed_by: "admin".to_string(),
            now: at(2025, 3, 19, 0, 0)?,
        })
        .await?
        .context("closed epoch with legacy rows")?;
    assert_eq!(outcome.harvest.deposits_total, "150");
    assert_eq!(outcome.harvest.yield_amount, "1.5");
    assert_eq!(outcome.deposits_counted, 4);
    assert_eq!(outcome.malformed_deposits, 2);

    let service = VaultService::new(store);
    let stats = service.stats().await?;
    assert_eq!(stats.transactions, 4);
    assert_eq!(stats.total_deposits, "150");
    Ok(())
}
