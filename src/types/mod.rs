mod acl;
pub use self::acl::*;

mod watch;
pub use self::watch::*;

/// Metadata the server tracks for every znode.
///
/// The zxid fields order changes across the whole ensemble: if one stat's `mzxid` is smaller
/// than another's, the first modification happened before the second. The version counters
/// increase by one on every change to the corresponding aspect of the node and are what the
/// versioned operations (`set_data`, `set_acl`, `delete`) compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Zxid of the change that created this znode.
    pub czxid: i64,
    /// Zxid of the change that last modified this znode's data.
    pub mzxid: i64,
    /// When the znode was created, in milliseconds since the epoch.
    pub ctime: i64,
    /// When the znode's data was last set, in milliseconds since the epoch.
    pub mtime: i64,
    /// How many times the data has been set.
    pub version: i32,
    /// How many times the set of children has changed.
    pub cversion: i32,
    /// How many times the ACL has been replaced.
    pub aversion: i32,
    /// Session id of the owning session if this znode is ephemeral, zero otherwise.
    pub ephemeral_owner: i64,
    /// Size of the data field, in bytes.
    pub data_length: i32,
    /// Number of children.
    pub num_children: i32,
    /// Zxid of the change that last created or deleted a child of this znode.
    pub pzxid: i64,
}

/// How a znode behaves after creation: whether it outlives the session that created it, and
/// whether the server appends a sequence suffix to its name.
///
/// The sequence suffix is a ten-digit, zero-padded counter kept per parent node, so two
/// sequential creates under the same parent never collide.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// The znode stays until somebody deletes it.
    Persistent = 0,
    /// The server removes the znode when the session that created it ends.
    Ephemeral = 1,
    /// Like `Persistent`, with a server-assigned sequence suffix appended to the name.
    PersistentSequential = 2,
    /// Like `Ephemeral`, with a server-assigned sequence suffix appended to the name.
    EphemeralSequential = 3,
}
