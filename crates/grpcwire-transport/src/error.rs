/// Errors that can occur in stream transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer side of the stream is gone.
    #[error("stream closed")]
    Closed,

    /// The stream was reset locally and accepts no more frames.
    #[error("stream was reset")]
    Reset,

    /// An I/O error occurred on the underlying connection.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
