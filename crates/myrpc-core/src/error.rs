use std::time::Duration;

use thiserror::Error;

/// Errors produced anywhere in the myrpc workspace.
///
/// Display strings double as the on-wire error surface: server-side
/// failures travel back to clients as `Header.error` text, so the
/// prefixes here are part of the protocol and must stay stable.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("connection is shut down")]
    Shutdown,

    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("rpc client: call failed: {0}")]
    CallFailed(String),

    #[error("rpc client err: wrong format '{0}', expect protocol@addr")]
    BadAddress(String),

    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedRequest(String),

    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    #[error("rpc server: request handle timeout: expect within {0:?}")]
    HandleTimeout(Duration),

    #[error("rpc server: service already defined: {0}")]
    DuplicateService(String),

    #[error("rpc server: method already defined: {0}")]
    DuplicateMethod(String),

    #[error("rpc server: {0} is not an exported identifier")]
    NotExported(String),

    #[error("rpc server: invalid magic number {0:#x}")]
    InvalidMagic(u32),

    #[error("rpc codec: frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("rpc registry: {0}")]
    Registry(String),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    /// An application-level error message, surfaced verbatim. Service
    /// handlers use this for their own failures, and clients use it to
    /// carry a non-empty `Header.error` back to the caller unchanged.
    #[error("{0}")]
    Application(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("rpc codec: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_strings_are_stable() {
        assert_eq!(RpcError::Shutdown.to_string(), "connection is shut down");
        assert_eq!(
            RpcError::ConnectTimeout(Duration::from_secs(10)).to_string(),
            "rpc client: connect timeout: expect within 10s"
        );
        assert_eq!(
            RpcError::CallFailed("deadline exceeded".into()).to_string(),
            "rpc client: call failed: deadline exceeded"
        );
        assert_eq!(
            RpcError::ServiceNotFound("Arith".into()).to_string(),
            "rpc server: can't find service Arith"
        );
        assert_eq!(
            RpcError::MethodNotFound("Sum".into()).to_string(),
            "rpc server: can't find method Sum"
        );
        assert_eq!(
            RpcError::IllFormedRequest("ArithSum".into()).to_string(),
            "rpc server: service/method request ill-formed: ArithSum"
        );
    }

    #[test]
    fn application_errors_pass_through_verbatim() {
        let err = RpcError::Application("division by zero".into());
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "early eof");
        let err = RpcError::from(io);
        assert!(matches!(err, RpcError::Io(_)));
    }
}
