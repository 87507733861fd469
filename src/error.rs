use crate::proto::ZkError;
use failure::Fail;
use std::io;

/// The error type returned by every operation on a [`ZooKeeper`](crate::ZooKeeper) handle.
///
/// `ConnectionClosed` and `SessionExpired` are the two outcomes a caller is expected to handle
/// specially: the former means the request may or may not have reached the server before the
/// transport died (the session itself survives and the client is reconnecting), while the latter
/// means the server has discarded the session along with its ephemeral nodes and watches.
#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum Error {
    /// The connection to the ensemble was lost before a response arrived, or the handle has been
    /// closed. The request may have been applied by the server.
    #[fail(display = "zookeeper connection closed")]
    ConnectionClosed,

    /// The server has expired this session; ephemeral nodes and watches bound to it are gone.
    #[fail(display = "zookeeper session expired")]
    SessionExpired,

    /// The server list handed to `connect` was empty.
    #[fail(display = "no zookeeper servers were supplied")]
    NoServers,

    /// A socket-level failure, reported by the operating system.
    #[fail(display = "i/o failure: {}", _0)]
    Io(String),

    /// A packet could not be serialized, or an incoming frame could not be decoded.
    #[fail(display = "malformed packet: {}", _0)]
    Marshalling(String),

    /// The server rejected the request with a protocol error.
    #[fail(display = "server error: {:?}", _0)]
    Server(ZkError),

    /// The server attached an error code the protocol table does not know.
    #[fail(display = "server returned unrecognized error code {}", _0)]
    UnknownCode(i32),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e.to_string())
    }
}

impl Error {
    /// Translates the error field of a response header.
    ///
    /// Session expiry and connection loss are promoted to the client-level kinds so that callers
    /// see the same error whether the condition was reported by the server or detected locally.
    pub(crate) fn from_server_code(code: i32) -> Error {
        match ZkError::from_code(code) {
            Some(ZkError::SessionExpired) => Error::SessionExpired,
            Some(ZkError::ConnectionLoss) => Error::ConnectionClosed,
            Some(err) => Error::Server(err),
            None => Error::UnknownCode(code),
        }
    }
}
