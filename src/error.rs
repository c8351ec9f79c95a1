use thiserror::Error;

/// Failure taxonomy for the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Every candidate read endpoint failed this cycle. Non-fatal: the
    /// driver logs it and the next cycle proceeds normally.
    #[error("no provider read endpoint returned a usable response")]
    SourceUnavailable,

    /// One record could not be normalized. Skipped, never aborts the batch.
    #[error("record could not be normalized: {0}")]
    MalformedRecord(String),

    /// The automation trigger rejected the event.
    #[error("trigger rejected event (status {status}): {body}")]
    DeliveryFailed { status: u16, body: String },

    /// Required configuration absent at startup. Fatal before any loop runs.
    #[error("required configuration value {0} is missing")]
    ConfigMissing(&'static str),

    #[error("configuration value {name} is invalid: {value:?}")]
    ConfigInvalid { name: &'static str, value: String },
}
