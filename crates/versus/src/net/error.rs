use std::io;

use super::protocol::MessageError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("timed out waiting for the peer")]
    Timeout,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("connection lost")]
    ConnectionLost,
    #[error("outbound queue is full")]
    QueueOverflow,
    #[error("not connected")]
    NotConnected,
    #[error("a session is already active")]
    AlreadyConnected,
    #[error(transparent)]
    Codec(#[from] MessageError),
}

impl NetError {
    /// Classifies a setup-time socket error.
    pub fn from_setup(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => NetError::Timeout,
            _ => NetError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_timeout_classification() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert!(matches!(NetError::from_setup(timed_out), NetError::Timeout));

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "nope");
        assert!(matches!(NetError::from_setup(refused), NetError::Io(_)));
    }
}
