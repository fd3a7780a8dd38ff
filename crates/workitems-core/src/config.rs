//! Consumer configuration.
//!
//! Loaded from an optional TOML file, then overridden by `WORKITEMS__*`
//! environment variables (e.g. `WORKITEMS__QUEUE_POLL_TIMEOUT=5`).
//! Durations are whole seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "WORKITEMS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load work item configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid work item configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkItemConsumerOptions {
    #[serde(alias = "WorkItemQueueName", alias = "workitemqueuename")]
    pub work_item_queue_name: String,

    /// How long a received message stays hidden from other consumers.
    #[serde(
        with = "duration_secs",
        alias = "QueueMessageInvisibilityTime",
        alias = "queuemessageinvisibilitytime"
    )]
    pub queue_message_invisibility_time: Duration,

    /// Sleep after an empty receive.
    #[serde(
        with = "duration_secs",
        alias = "QueuePollTimeout",
        alias = "queuepolltimeout"
    )]
    pub queue_poll_timeout: Duration,

    /// A failing message is deleted once it has been received this many times.
    #[serde(alias = "MaxWorkItemRetries", alias = "maxworkitemretries")]
    pub max_work_item_retries: u32,

    #[serde(alias = "WorkItemConsumerCount", alias = "workitemconsumercount")]
    pub consumer_count: usize,

    /// How often a consumer re-reads the replica state while not Working.
    #[serde(
        with = "duration_secs",
        alias = "StatePollInterval",
        alias = "statepollinterval"
    )]
    pub state_poll_interval: Duration,

    /// `false` starts the replica in Working right away (local development);
    /// `true` leaves it Initializing until an explicit start.
    #[serde(alias = "WaitForInitialization", alias = "waitforinitialization")]
    pub wait_for_initialization: bool,
}

impl Default for WorkItemConsumerOptions {
    fn default() -> Self {
        Self {
            work_item_queue_name: "workitems".to_string(),
            queue_message_invisibility_time: Duration::from_secs(5 * 60),
            queue_poll_timeout: Duration::from_secs(1),
            max_work_item_retries: 5,
            consumer_count: 1,
            state_poll_interval: Duration::from_secs(5),
            wait_for_initialization: true,
        }
    }
}

impl WorkItemConsumerOptions {
    /// Defaults, then `path` (if given and present), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let options: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.work_item_queue_name.trim().is_empty() {
            return Err(ConfigError::Invalid("work_item_queue_name is empty".into()));
        }
        if self.max_work_item_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_work_item_retries must be at least 1".into(),
            ));
        }
        if self.consumer_count == 0 {
            return Err(ConfigError::Invalid("consumer_count must be at least 1".into()));
        }
        if self.queue_message_invisibility_time.is_zero() {
            return Err(ConfigError::Invalid(
                "queue_message_invisibility_time must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.work_item_queue_name = name.into();
        self
    }

    pub fn with_invisibility_time(mut self, invisibility: Duration) -> Self {
        self.queue_message_invisibility_time = invisibility;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.queue_poll_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_work_item_retries = retries;
        self
    }

    pub fn with_consumer_count(mut self, count: usize) -> Self {
        self.consumer_count = count;
        self
    }

    pub fn with_state_poll_interval(mut self, interval: Duration) -> Self {
        self.state_poll_interval = interval;
        self
    }

    pub fn with_wait_for_initialization(mut self, wait: bool) -> Self {
        self.wait_for_initialization = wait;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
