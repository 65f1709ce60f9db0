//! Failure kinds for courier clients.
//!
//! [`ErrorKind`] is the coarse classification every client error maps onto.
//! The retry policy and the caller-facing error shape are both derived from it.

use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Classification of a client failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response reached the client (connection refused, reset, DNS...).
    Transport,
    /// A response was received with a non-success status code.
    HttpStatus,
    /// The per-attempt deadline elapsed.
    Timeout,
    /// The request was cancelled by the caller.
    Canceled,
    /// A credential refresh failed or could not start.
    Refresh,
    /// The request body could not be encoded.
    Encode,
    /// The response body could not be decoded.
    Decode,
    /// The request could not be assembled (bad URL, bad header...).
    Protocol,
    /// An interceptor failed while transforming a request or response.
    Interceptor,
}

impl ErrorKind {
    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Refresh => "refresh",
            ErrorKind::Encode => "encode",
            ErrorKind::Decode => "decode",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Interceptor => "interceptor",
        }
    }

    /// The failure name surfaced to callers.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "TransportFailure",
            ErrorKind::HttpStatus => "HttpStatusFailure",
            ErrorKind::Timeout => "TimeoutFailure",
            ErrorKind::Canceled => "CancellationFailure",
            ErrorKind::Refresh => "RefreshFailure",
            ErrorKind::Encode => "EncodeFailure",
            ErrorKind::Decode => "DecodeFailure",
            ErrorKind::Protocol => "ProtocolFailure",
            ErrorKind::Interceptor => "InterceptorFailure",
        }
    }

    /// Returns whether this kind is a cancellation.
    ///
    /// A timeout is a deferred cancel, so both [`Timeout`](ErrorKind::Timeout)
    /// and [`Canceled`](ErrorKind::Canceled) count. Cancellations are never
    /// retried.
    ///
    /// ```
    /// use courier_core::ErrorKind;
    ///
    /// assert!(ErrorKind::Timeout.is_cancellation());
    /// assert!(ErrorKind::Canceled.is_cancellation());
    /// assert!(!ErrorKind::Transport.is_cancellation());
    /// ```
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Canceled)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Error returned when parsing an [`ErrorKind`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseErrorKindError(());

impl std::fmt::Display for ParseErrorKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown error kind")
    }
}

impl std::error::Error for ParseErrorKindError {}

impl FromStr for ErrorKind {
    type Err = ParseErrorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(ErrorKind::Transport),
            "http_status" => Ok(ErrorKind::HttpStatus),
            "timeout" => Ok(ErrorKind::Timeout),
            "canceled" | "cancelled" => Ok(ErrorKind::Canceled),
            "refresh" => Ok(ErrorKind::Refresh),
            "encode" => Ok(ErrorKind::Encode),
            "decode" => Ok(ErrorKind::Decode),
            "protocol" => Ok(ErrorKind::Protocol),
            "interceptor" => Ok(ErrorKind::Interceptor),
            _ => Err(ParseErrorKindError(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorKind; 9] = [
        ErrorKind::Transport,
        ErrorKind::HttpStatus,
        ErrorKind::Timeout,
        ErrorKind::Canceled,
        ErrorKind::Refresh,
        ErrorKind::Encode,
        ErrorKind::Decode,
        ErrorKind::Protocol,
        ErrorKind::Interceptor,
    ];

    #[test]
    fn test_kind_parses_its_own_name() {
        for kind in ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_kind_accepts_british_spelling() {
        assert_eq!("cancelled".parse::<ErrorKind>(), Ok(ErrorKind::Canceled));
        assert!("bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_only_timeout_and_cancel_are_cancellations() {
        let cancellations: Vec<_> = ALL.into_iter().filter(|k| k.is_cancellation()).collect();
        assert_eq!(cancellations, vec![ErrorKind::Timeout, ErrorKind::Canceled]);
    }

    #[test]
    fn test_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::HttpStatus).unwrap();
        assert_eq!(json, "\"http_status\"");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Canceled.name(), "CancellationFailure");
        assert_eq!(ErrorKind::HttpStatus.name(), "HttpStatusFailure");
    }
}
