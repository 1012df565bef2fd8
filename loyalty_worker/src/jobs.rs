//! The worker's scheduled jobs. Each one is a tokio task that runs its batch operation once per interval, starting
//! immediately. A failed run is logged and the job carries on at the next tick.
use std::time::Duration;

use chrono::Utc;
use log::*;
use loyalty_engine::{
    events::EventProducers,
    BalanceApi,
    EngineConfig,
    ExpirationApi,
    LoyaltyEventApi,
    RetentionApi,
    RetentionWindow,
    SqliteDatabase,
    TenantManagement,
    ThresholdTierPolicy,
};
use tokio::task::JoinHandle;

/// Starts the point expiry job. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_expiration_worker(db: SqliteDatabase, producers: EventProducers, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        let api = ExpirationApi::new(db, producers);
        info!("🕰️ Point expiry worker started");
        loop {
            timer.tick().await;
            info!("🕰️ Running point expiry job");
            match api.process_all_tenants(Utc::now()).await {
                Ok(reports) => {
                    let rows = reports.iter().map(|r| r.transactions_created).sum::<usize>();
                    let failures = reports.iter().map(|r| r.failures).sum::<usize>();
                    info!("🕰️ Expiry run over {} tenants wrote {rows} rows. {failures} failures", reports.len());
                    for r in &reports {
                        debug!(
                            "🕰️ Tenant #{}: {} expired from {} memberships",
                            r.tenant_id, r.points_expired, r.memberships_processed
                        );
                    }
                },
                Err(e) => {
                    error!("🕰️ Error running point expiry job: {e}");
                },
            }
        }
    })
}

/// Starts the retention streak job. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_retention_worker(
    db: SqliteDatabase,
    producers: EventProducers,
    config: EngineConfig,
    window: RetentionWindow,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        let events = LoyaltyEventApi::new(db.clone(), ThresholdTierPolicy::new(db), producers, &config);
        let api = RetentionApi::new(events, window);
        info!("🕰️ Retention worker started with {window:?} windows");
        loop {
            timer.tick().await;
            info!("🕰️ Running retention job");
            match api.evaluate_all_tenants(Utc::now()).await {
                Ok(reports) => {
                    for r in &reports {
                        info!(
                            "🕰️ Tenant #{}: {} streak events awarded {} across {} memberships. {} failures",
                            r.tenant_id, r.events_processed, r.points_awarded, r.memberships_processed, r.failures
                        );
                    }
                },
                Err(e) => {
                    error!("🕰️ Error running retention job: {e}");
                },
            }
        }
    })
}

/// Starts the balance repair job. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_balance_repair_worker(db: SqliteDatabase, batch_size: usize, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        let api = BalanceApi::new(db.clone()).with_batch_size(batch_size);
        info!("🕰️ Balance repair worker started");
        loop {
            timer.tick().await;
            info!("🕰️ Running balance repair job");
            let tenants = match db.fetch_active_tenants().await {
                Ok(tenants) => tenants,
                Err(e) => {
                    error!("🕰️ Error fetching tenants for balance repair: {e}");
                    continue;
                },
            };
            for tenant in tenants {
                match api.recalculate_tenant(tenant.id).await {
                    Ok(report) if report.failed > 0 => {
                        warn!("🕰️ {} balances of tenant #{} could not be repaired", report.failed, tenant.id);
                    },
                    Ok(_) => {},
                    Err(e) => error!("🕰️ Error repairing balances for tenant #{}: {e}", tenant.id),
                }
            }
        }
    })
}
