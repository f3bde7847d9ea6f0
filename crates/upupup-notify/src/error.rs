/// Errors that can occur within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Notifier configuration is missing a required field or fails to decode.
    #[error("notify: invalid notifier configuration: {0}")]
    InvalidConfig(String),

    /// The notifier type tag is not recognised.
    #[error("notify: unsupported notifier type {0:?}")]
    UnsupportedType(String),

    /// A `*_ref` field points at a secret that was not resolved.
    #[error("notify: missing secret {0:?}")]
    MissingSecret(String),

    /// Two notifiers share one id.
    #[error("notify: duplicate notifier {0:?}")]
    Duplicate(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("notify: http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The external API answered with a non-success status.
    #[error("notify: {service} response: {status}")]
    Api { service: &'static str, status: u16 },

    /// SMTP transport error when sending email.
    #[error("notify: smtp error: {0}")]
    Smtp(String),

    /// Rendering a payload template failed.
    #[error("notify: template error: {0}")]
    Template(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
