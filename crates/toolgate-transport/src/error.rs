/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the bound address back from the socket failed.
    #[error("local address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),

    /// The serve loop stopped with an I/O error.
    #[error("serve failed: {0}")]
    Serve(#[source] std::io::Error),
}
