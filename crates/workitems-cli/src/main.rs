use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::info;

use workitems_core::app::{FleetProcessingState, ReminderManager, WorkItemProducer};
use workitems_core::config::WorkItemConsumerOptions;
use workitems_core::domain::WorkItem;
use workitems_core::impls::{InMemoryQueue, InMemoryStore, StaticReplicaResolver};
use workitems_core::observability::init_tracing;
use workitems_core::ports::{StateStore, WorkItemQueue};
use workitems_core::typed::Processor;
use workitems_core::{ProcessingError, WorkItemsBuilder};

const REPLICA: &str = "workitems-demo-0";

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl WorkItem for Hello {
    const TYPE: &'static str = "Hello";
}

/// Fails the first `n` deliveries to show redelivery.
struct HelloProcessor {
    remaining_failures: AtomicU32,
}

impl HelloProcessor {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Processor<Hello> for HelloProcessor {
    async fn process(&self, item: Hello, _cancel: &CancellationToken) -> Result<bool, ProcessingError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(anyhow::anyhow!("intentional failure (left={left})").into());
        }

        info!(name = %item.name, "hello");
        Ok(true)
    }

    fn mutex_key(&self, item: &Hello) -> Option<String> {
        Some(format!("Hello_{}", item.name))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BuildCheckReminder {
    build_id: u64,
}

impl WorkItem for BuildCheckReminder {
    const TYPE: &'static str = "BuildCheckReminder";
}

struct BuildCheckProcessor {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkItemQueue>,
}

impl BuildCheckProcessor {
    fn reminders(&self, build_id: u64) -> ReminderManager<BuildCheckReminder> {
        ReminderManager::new(
            WorkItemProducer::new(Arc::clone(&self.queue)),
            Arc::clone(&self.store),
            &build_id.to_string(),
        )
    }
}

#[async_trait]
impl Processor<BuildCheckReminder> for BuildCheckProcessor {
    async fn process(
        &self,
        item: BuildCheckReminder,
        _cancel: &CancellationToken,
    ) -> Result<bool, ProcessingError> {
        self.reminders(item.build_id)
            .reminder_received()
            .await
            .map_err(anyhow::Error::from)?;
        info!(build_id = item.build_id, "build check reminder fired");
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(false);

    // (A) Options, queue and store
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let options = WorkItemConsumerOptions::load(config_path.as_deref())
        .context("loading work item options")?
        // short lease so the retry shows up quickly
        .with_invisibility_time(Duration::from_secs(1))
        .with_poll_timeout(Duration::from_millis(200))
        .with_state_poll_interval(Duration::from_millis(200));

    let queue: Arc<dyn WorkItemQueue> = Arc::new(InMemoryQueue::new());
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());

    // (B) Host
    let mut host = WorkItemsBuilder::new(REPLICA)
        .register::<Hello, _>(HelloProcessor::new(1))?
        .register::<BuildCheckReminder, _>(BuildCheckProcessor {
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
        })?
        .expect_work_item_types(&[Hello::TYPE, BuildCheckReminder::TYPE])
        .options(options)
        .queue(Arc::clone(&queue))
        .store(Arc::clone(&store))
        .build()?;

    let cancel = CancellationToken::new();
    host.start(&cancel).await?;
    host.processing_state().set_start().await?;

    // (C) Work items and reminders
    let hello = host.producers().create_producer::<Hello>();
    for name in ["ada", "grace", "ada"] {
        hello.produce(&Hello { name: name.into() }).await?;
    }

    let kept = ReminderManager::new(
        host.producers().create_producer::<BuildCheckReminder>(),
        Arc::clone(&store),
        "1",
    );
    kept.set_reminder(&BuildCheckReminder { build_id: 1 }, Duration::from_secs(2))
        .await?;

    let cancelled = ReminderManager::new(
        host.producers().create_producer::<BuildCheckReminder>(),
        Arc::clone(&store),
        "2",
    );
    cancelled
        .set_reminder(&BuildCheckReminder { build_id: 2 }, Duration::from_secs(2))
        .await?;
    cancelled.unset_reminder().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = sleep(Duration::from_secs(4)) => {}
    }

    // (D) Drain like a deployment would, then stop
    let fleet = FleetProcessingState::new(
        Arc::new(StaticReplicaResolver::new([REPLICA])),
        Arc::clone(&store),
    );
    let drained = fleet
        .stop_all_and_wait(10, Duration::from_millis(500))
        .await?;

    cancel.cancel();
    host.shutdown().await;

    let counts = host.counts();
    info!(drained, ?counts, "demo finished");
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
