pub mod config;
pub mod render;

pub use config::{
    Assertion, CaptureSpec, CheckConfig, CheckNotification, CheckSchedule, ComputedMetric,
    Config, ConfigDuration, FailureRatioThreshold, HealthConfig, HookAction, HookConfig,
    HttpRequestConfig, MaintenanceKind, MaintenanceSpec, MetricReference, MetricThreshold,
    MetricsCheckSpec, MetricsConfig, NotificationOverride, NotificationPolicy, NotifierConfig,
    PolicyStage, PreAuthConfig, SecretSpec, ServerSection, ServiceConfig, ServiceDefaults,
    StorageConfig, Thresholds,
};
pub use render::{CheckScope, RenderScope, TemplateEngine};
