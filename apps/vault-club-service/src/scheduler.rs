use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::vault::types::HarvestExecuted;
use crate::vault::{VaultError, VaultService};

pub const SCHEDULER_ACTOR: &str = "system:scheduler";

/// Upper bound on harvests per pass, so a long backlog cannot pin the task.
pub const MAX_HARVESTS_PER_PASS: usize = 64;

/// Harvests closed epochs until none are left (or the per-pass bound is hit).
pub async fn run_harvest_pass(
    service: &VaultService,
    executed_by: &str,
) -> Result<Vec<HarvestExecuted>, VaultError> {
    let mut executed = Vec::new();
    while executed.len() < MAX_HARVESTS_PER_PASS {
        match service.harvest(executed_by).await {
            Ok(harvest) => executed.push(harvest),
            Err(VaultError::NothingToHarvest) => break,
            Err(error) => return Err(error),
        }
    }
    Ok(executed)
}

pub fn spawn_harvest_scheduler(service: VaultService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match run_harvest_pass(&service, SCHEDULER_ACTOR).await {
                Ok(executed) if executed.is_empty() => {
                    tracing::debug!("vault harvest scheduler found nothing to harvest");
                }
                Ok(executed) => {
                    tracing::info!(harvested = executed.len(), "vault harvest scheduler pass");
                }
                Err(error) => {
                    tracing::warn!(
                        code = error.code(),
                        reason = %error,
                        "vault harvest scheduler pass failed"
                    );
                }
            }
        }
    })
}
