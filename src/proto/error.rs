/// Error codes the server may attach to a response header.
///
/// Codes below `SystemError` and above `APIError` are system errors; codes below `APIError` are
/// API errors. The two range markers themselves are never sent.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(i32)]
pub enum ZkError {
    /// Marks the API error range; never returned by the server.
    APIError = -100,
    /// Client authentication failed.
    AuthFailed = -115,
    /// Invalid arguments.
    BadArguments = -8,
    /// Version conflict in a versioned operation such as `set_data` or `delete`.
    BadVersion = -103,
    /// Connection to the server has been lost.
    ConnectionLoss = -4,
    /// A data inconsistency was found.
    DataInconsistency = -3,
    /// Attempt to create an ephemeral node on a local session.
    EphemeralOnLocalSession = -120,
    /// Invalid [`Acl`](crate::Acl) specified.
    InvalidAcl = -114,
    /// Invalid callback specified.
    InvalidCallback = -113,
    /// Error while marshalling or unmarshalling data.
    MarshallingError = -5,
    /// Not authenticated.
    NoAuth = -102,
    /// Ephemeral nodes may not have children.
    NoChildrenForEphemerals = -108,
    /// Request to create a node that already exists.
    NodeExists = -110,
    /// Attempted to read a node that does not exist.
    NoNode = -101,
    /// The node has children and cannot be deleted.
    NotEmpty = -111,
    /// State-changing request was passed to a read-only server.
    NotReadOnly = -119,
    /// Attempt to remove a non-existing watcher.
    NoWatcher = -121,
    /// Operation timed out.
    OperationTimeout = -7,
    /// A runtime inconsistency was found.
    RuntimeInconsistency = -2,
    /// The session has been expired by the server.
    SessionExpired = -112,
    /// Session moved to another server, so the operation is ignored.
    SessionMoved = -118,
    /// Marks the system error range; never returned by the server.
    SystemError = -1,
    /// Operation is unimplemented.
    Unimplemented = -6,
}

impl ZkError {
    /// Looks the code up in the static error table; `None` for codes the table does not know.
    pub(crate) fn from_code(code: i32) -> Option<ZkError> {
        let err = match code {
            -100 => ZkError::APIError,
            -115 => ZkError::AuthFailed,
            -8 => ZkError::BadArguments,
            -103 => ZkError::BadVersion,
            -4 => ZkError::ConnectionLoss,
            -3 => ZkError::DataInconsistency,
            -120 => ZkError::EphemeralOnLocalSession,
            -114 => ZkError::InvalidAcl,
            -113 => ZkError::InvalidCallback,
            -5 => ZkError::MarshallingError,
            -102 => ZkError::NoAuth,
            -108 => ZkError::NoChildrenForEphemerals,
            -110 => ZkError::NodeExists,
            -101 => ZkError::NoNode,
            -111 => ZkError::NotEmpty,
            -119 => ZkError::NotReadOnly,
            -121 => ZkError::NoWatcher,
            -7 => ZkError::OperationTimeout,
            -2 => ZkError::RuntimeInconsistency,
            -112 => ZkError::SessionExpired,
            -118 => ZkError::SessionMoved,
            -1 => ZkError::SystemError,
            -6 => ZkError::Unimplemented,
            _ => return None,
        };
        Some(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_round_trips() {
        for err in [
            ZkError::AuthFailed,
            ZkError::BadArguments,
            ZkError::BadVersion,
            ZkError::ConnectionLoss,
            ZkError::NoAuth,
            ZkError::NoChildrenForEphemerals,
            ZkError::NodeExists,
            ZkError::NoNode,
            ZkError::NotEmpty,
            ZkError::SessionExpired,
        ] {
            assert_eq!(ZkError::from_code(err as i32), Some(err));
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(ZkError::from_code(0), None);
        assert_eq!(ZkError::from_code(-1000), None);
        assert_eq!(ZkError::from_code(17), None);
    }
}
