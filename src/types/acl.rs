use std::ops;

/// Describes the abilities a client holds on a znode.
///
/// The permission bits combine with `|`, so `Permission::READ | Permission::WRITE` grants both
/// abilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission(u32);

impl Permission {
    /// No permissions are set (server could have been configured without ACL support).
    pub const NONE: Permission = Permission(0b00000);

    /// You can access the data of a node and can list its children.
    pub const READ: Permission = Permission(0b00001);

    /// You can set the data of a node.
    pub const WRITE: Permission = Permission(0b00010);

    /// You can create a child node.
    pub const CREATE: Permission = Permission(0b00100);

    /// You can delete a child node (but not necessarily this one).
    pub const DELETE: Permission = Permission(0b01000);

    /// You can alter permissions on this node.
    pub const ADMIN: Permission = Permission(0b10000);

    /// You can do anything.
    pub const ALL: Permission = Permission(0b11111);

    /// Checks that all flags set in `permission` are also set in `self`.
    pub fn contains(self, permission: Permission) -> bool {
        self.0 & permission.0 == permission.0
    }

    pub(crate) fn code(self) -> u32 {
        self.0
    }

    pub(crate) fn from_code(code: u32) -> Permission {
        Permission(code & Permission::ALL.0)
    }
}

impl ops::BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

/// An access-control entry attached to a znode.
///
/// Entries are interpreted by the server according to their `scheme`; the most common schemes are
/// `world` (everyone, with the single id `anyone`), `auth` (any authenticated identity), and
/// `digest` (a `user:hash` pair added with `add_auth`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    /// The permissions granted by this entry.
    pub perms: Permission,
    /// The authentication scheme this entry applies to.
    pub scheme: String,
    /// The scheme-dependent identity this entry applies to.
    pub id: String,
}

impl Acl {
    /// An entry granting `perms` to everyone.
    pub fn world(perms: Permission) -> Acl {
        Acl {
            perms,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }
    }

    /// This ACL gives the world the ability to do anything.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::world(Permission::ALL)]
    }

    /// This ACL gives the world the ability to read.
    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl::world(Permission::READ)]
    }

    /// This ACL grants the creator of the node all permissions once it has authenticated.
    pub fn creator_all() -> Vec<Acl> {
        vec![Acl {
            perms: Permission::ALL,
            scheme: "auth".to_string(),
            id: String::new(),
        }]
    }
}
