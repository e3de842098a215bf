/// Why a request body could not be turned into a [`crate::commands::Command`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty request body")]
    Empty,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing \"{field}\" field for command {command:?}")]
    MissingField { command: String, field: &'static str },

    #[error("invalid value for command {command:?}: {reason}")]
    InvalidValue { command: String, reason: String },

    #[error("malformed base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("image id not found: {0:?}")]
    ImageNotFound(String),

    #[error("image {width}x{height} does not fit a {canvas}x{canvas} canvas at ({x}, {y})")]
    Size {
        width: u32,
        height: u32,
        canvas: u32,
        x: u32,
        y: u32,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("task queue closed (main loop gone)")]
    QueueClosed,

    #[error("task {0:?} panicked")]
    TaskPanicked(String),

    // a mutex got poisoned; nothing more useful to carry
    #[error("lock poisoned")]
    Poison,
}

impl<T> From<std::sync::PoisonError<T>> for DaemonError {
    fn from(_: std::sync::PoisonError<T>) -> DaemonError {
        DaemonError::Poison
    }
}

pub type Result<T, E = DaemonError> = std::result::Result<T, E>;
