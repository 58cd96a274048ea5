use crate::cycle::CycleRunner;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Fires cycles on a fixed period, one at a time.
pub struct Scheduler {
    period: Duration,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Runs a cycle immediately and then once per period until `shutdown`
    /// resolves. A cycle that overruns the period swallows the missed ticks
    /// instead of queueing them. Shutdown may cut a running cycle short.
    pub async fn run<F>(&self, runner: &dyn CycleRunner, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(period_secs = self.period.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = runner.run_cycle() => {}
            }
        }
        info!("scheduler stopped");
    }
}
