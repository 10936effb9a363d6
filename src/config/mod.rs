mod settings;

pub use settings::{
    DatabaseConfig, ProviderConfig, RetentionConfig, Settings, SweepConfig, WebhookProviderConfig,
    WorkerConfig,
};
