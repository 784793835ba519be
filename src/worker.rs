use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::contingency::ContingencyService;

/// Cadence of the three periodic stages.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub event_interval: Duration,
    pub batch_delay: Duration,
    pub batch_interval: Duration,
    pub poll_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            event_interval: Duration::from_secs(600),
            batch_delay: Duration::from_secs(30),
            batch_interval: Duration::from_secs(300),
            poll_delay: Duration::from_secs(120),
            poll_interval: Duration::from_secs(120),
        }
    }
}

/// Runs the event, batch and poll stages as independent periodic tasks.
pub struct Orchestrator {
    service: Arc<ContingencyService>,
    schedule: Schedule,
}

pub struct WorkerHandles {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandles {
    /// Wait for every task to observe shutdown and exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Contingency worker task panicked: {e}");
            }
        }
    }
}

impl Orchestrator {
    pub fn new(service: Arc<ContingencyService>, schedule: Schedule) -> Self {
        Self { service, schedule }
    }

    /// Spawn the three tasks. They stop once `shutdown` turns `true`.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> WorkerHandles {
        let event_service = self.service.clone();
        let batch_service = self.service.clone();
        let poll_service = self.service.clone();

        let handles = vec![
            tokio::spawn(run_periodic(
                "event",
                Duration::ZERO,
                self.schedule.event_interval,
                shutdown.clone(),
                move || {
                    let service = event_service.clone();
                    async move { service.run_event_stage().await.map(|_| ()) }
                },
            )),
            tokio::spawn(run_periodic(
                "batch",
                self.schedule.batch_delay,
                self.schedule.batch_interval,
                shutdown.clone(),
                move || {
                    let service = batch_service.clone();
                    async move { service.run_batch_stage().await.map(|_| ()) }
                },
            )),
            tokio::spawn(run_periodic(
                "poll",
                self.schedule.poll_delay,
                self.schedule.poll_interval,
                shutdown,
                move || {
                    let service = poll_service.clone();
                    async move { service.poll_all().await.map(|_| ()) }
                },
            )),
        ];

        tracing::info!("Contingency workers started");
        WorkerHandles { handles }
    }
}

async fn run_periodic<F, Fut, E>(
    name: &'static str,
    initial_delay: Duration,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    tracing::debug!("Contingency {name} task started");

    if !initial_delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        if let Err(e) = tick().await {
            tracing::error!("Contingency {name} pass failed: {e}");
        }
    }

    tracing::debug!("Contingency {name} task stopped");
}
