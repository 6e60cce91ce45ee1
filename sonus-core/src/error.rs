use thiserror::Error;

/// All errors produced by sonus-core.
#[derive(Debug, Error)]
pub enum SonusError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("capture is already running")]
    AlreadyRunning,

    #[error("capture is not running")]
    NotRunning,

    #[error("session is closed")]
    SessionClosed,

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("wire message error: {0}")]
    Wire(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SonusError>;
