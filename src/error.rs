use thiserror::Error;

#[derive(Error, Debug)]
pub enum AirDropError {
    #[error("interface {0:?} has no usable IPv6 address")]
    InterfaceUnavailable(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("receiver declined the transfer")]
    Declined,

    #[error("transfer failed: {0}")]
    TransferFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Plist(#[from] plist::Error),

    #[error(transparent)]
    Mdns(#[from] mdns_sd::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AirDropError {
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            AirDropError::Timeout | AirDropError::PeerUnreachable(_)
        )
    }

    pub fn should_retry(&self) -> bool {
        self.is_temporary()
    }
}

pub type AirDropResult<T> = Result<T, AirDropError>;
