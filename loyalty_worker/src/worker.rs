use futures::FutureExt;
use log::*;
use loyalty_engine::{EngineConfig, EventHandlers, EventHooks, SqliteDatabase};

use crate::{
    config::WorkerConfig,
    errors::WorkerError,
    jobs::{start_balance_repair_worker, start_expiration_worker, start_retention_worker},
};

const EVENT_BUFFER_SIZE: usize = 256;

/// Connects to the database, starts every scheduled job and runs until Ctrl-C is received.
pub async fn run_worker(config: WorkerConfig) -> Result<(), WorkerError> {
    if config.database_url.trim().is_empty() {
        return Err(WorkerError::ConfigurationError("LOYALTY_DATABASE_URL cannot be empty".into()));
    }
    let db = SqliteDatabase::new_with_url(&config.database_url, config.max_connections)
        .await
        .map_err(|e| WorkerError::InitializeError(e.to_string()))?;
    let expiration_period = to_period(config.expiration_interval)?;
    let retention_period = to_period(config.retention_interval)?;
    let repair_period = to_period(config.balance_repair_interval)?;
    let engine = EngineConfig::from_env_or_default();
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, logging_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let window = config.retention_mode.window(engine.retention_window_days);
    let jobs = [
        start_expiration_worker(db.clone(), producers.clone(), expiration_period),
        start_retention_worker(db.clone(), producers, engine.clone(), window, retention_period),
        start_balance_repair_worker(db, engine.balance_batch_size, repair_period),
    ];
    info!("🚀️ {} jobs scheduled. Press Ctrl-C to stop.", jobs.len());
    tokio::signal::ctrl_c().await?;
    info!("🚀️ Shutting down");
    for job in jobs {
        job.abort();
    }
    Ok(())
}

/// The worker has no downstream consumers of engine events, so it records them in the log.
fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_points_expired(|ev| {
            info!(
                "📬️ {} expired from membership #{} in row #{}",
                ev.points_expired, ev.membership_id, ev.transaction_id
            );
            async {}.boxed()
        })
        .on_points_awarded(|ev| {
            debug!("📬️ {} awarded to membership #{} for {}", ev.total_points, ev.membership_id, ev.source_event_id);
            async {}.boxed()
        });
    hooks
}

fn to_period(interval: chrono::Duration) -> Result<std::time::Duration, WorkerError> {
    interval.to_std().map_err(|e| WorkerError::ConfigurationError(format!("{interval} is not a valid interval. {e}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn negative_intervals_are_rejected() {
        assert_eq!(to_period(chrono::Duration::hours(2)).unwrap(), std::time::Duration::from_secs(7200));
        assert!(matches!(to_period(chrono::Duration::hours(-1)), Err(WorkerError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn empty_database_url_is_a_configuration_error() {
        let config = WorkerConfig { database_url: " ".into(), ..Default::default() };
        let err = run_worker(config).await.unwrap_err();
        assert!(matches!(err, WorkerError::ConfigurationError(_)));
    }
}
