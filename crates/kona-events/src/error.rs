use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    /// A subscriber failed while handling an event.
    #[error("Event handler failed: {0}")]
    HandlerFailed(String),

    /// The heartbeat was asked about a subscriber it does not know.
    #[error("Unknown heartbeat subscriber: {id}")]
    UnknownSubscriber { id: String },
}

pub type Result<T> = std::result::Result<T, EventError>;
