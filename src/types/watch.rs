use crate::error::Error;

/// An event delivered on the shared event channel or on a watch channel.
///
/// Session events (`event_type == WatchedEventType::Session`) describe state transitions of the
/// client's connection to the ensemble and carry an empty `path`. All other events name the znode
/// that triggered them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// The trigger that caused the event to fire.
    pub event_type: WatchedEventType,
    /// The state of the client's session at the time the event was generated.
    pub state: SessionState,
    /// The path of the znode involved; empty for session events.
    pub path: String,
    /// Why the watch was abandoned; only set for [`WatchedEventType::NotWatching`].
    pub err: Option<Error>,
}

impl WatchedEvent {
    pub(crate) fn session(state: SessionState) -> WatchedEvent {
        WatchedEvent {
            event_type: WatchedEventType::Session,
            state,
            path: String::new(),
            err: None,
        }
    }
}

/// Enumeration of states the client session moves through.
///
/// The values mirror the wire representation; states above 99 are client-side refinements that the
/// server never sends.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The state could not be decoded.
    Unknown = -1,
    /// The client is not currently connected to any server in the ensemble.
    Disconnected = 0,
    /// The client is trying to connect to a server.
    Connecting = 1,
    /// The server reports the session as connected and synchronized.
    SyncConnected = 3,
    /// Authentication has failed.
    AuthFailed = 4,
    /// The client is connected to a read-only server.
    ConnectedReadOnly = 5,
    /// The client has been SASL-authenticated.
    SaslAuthenticated = 6,
    /// A TCP connection to a server is established, but the session handshake has not completed.
    Connected = 100,
    /// The handshake completed and the session is live.
    HasSession = 101,
    /// The serving cluster has expired this session.
    Expired = -112,
}

impl From<i32> for SessionState {
    fn from(code: i32) -> Self {
        match code {
            0 => SessionState::Disconnected,
            1 => SessionState::Connecting,
            3 => SessionState::SyncConnected,
            4 => SessionState::AuthFailed,
            5 => SessionState::ConnectedReadOnly,
            6 => SessionState::SaslAuthenticated,
            100 => SessionState::Connected,
            101 => SessionState::HasSession,
            -112 => SessionState::Expired,
            _ => SessionState::Unknown,
        }
    }
}

/// Enumeration of triggers that produce a [`WatchedEvent`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedEventType {
    /// The session itself changed state; no znode is involved.
    Session = -1,
    /// A watch was abandoned without firing, e.g. because the session expired.
    NotWatching = -2,
    /// A znode at a watched path was created.
    NodeCreated = 1,
    /// A watched znode was deleted.
    NodeDeleted = 2,
    /// The data of a watched znode was set. The server issues this for every *set* operation, so
    /// there is no guarantee the data actually differs.
    NodeDataChanged = 3,
    /// A child of a watched znode was created or deleted. Not issued when the data within a child
    /// changes.
    NodeChildrenChanged = 4,
}

impl WatchedEventType {
    pub(crate) fn from_code(code: i32) -> Option<WatchedEventType> {
        match code {
            -1 => Some(WatchedEventType::Session),
            -2 => Some(WatchedEventType::NotWatching),
            1 => Some(WatchedEventType::NodeCreated),
            2 => Some(WatchedEventType::NodeDeleted),
            3 => Some(WatchedEventType::NodeDataChanged),
            4 => Some(WatchedEventType::NodeChildrenChanged),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::SyncConnected,
            SessionState::AuthFailed,
            SessionState::ConnectedReadOnly,
            SessionState::SaslAuthenticated,
            SessionState::Connected,
            SessionState::HasSession,
            SessionState::Expired,
        ] {
            assert_eq!(SessionState::from(state as i32), state);
        }
        assert_eq!(SessionState::from(42), SessionState::Unknown);
    }

    #[test]
    fn event_type_codes() {
        assert_eq!(
            WatchedEventType::from_code(1),
            Some(WatchedEventType::NodeCreated)
        );
        assert_eq!(
            WatchedEventType::from_code(4),
            Some(WatchedEventType::NodeChildrenChanged)
        );
        assert_eq!(WatchedEventType::from_code(99), None);
    }
}
