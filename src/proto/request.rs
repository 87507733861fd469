use crate::types::{Acl, CreateMode};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};

/// The request half of every operation the client issues.
///
/// `Connect` is special: it is framed without a request header and only ever written by the
/// session handshake. Everything else travels through the send pipeline behind an `{xid, opcode}`
/// header.
#[derive(Debug)]
pub(crate) enum Request {
    Connect {
        protocol_version: i32,
        last_zxid_seen: i64,
        timeout: i32,
        session_id: i64,
        passwd: Vec<u8>,
    },
    Auth {
        scheme: String,
        auth: Vec<u8>,
    },
    Create {
        path: String,
        data: Vec<u8>,
        acl: Vec<Acl>,
        mode: CreateMode,
    },
    Delete {
        path: String,
        version: i32,
    },
    Exists {
        path: String,
        watch: bool,
    },
    GetData {
        path: String,
        watch: bool,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        version: i32,
    },
    GetAcl {
        path: String,
    },
    SetAcl {
        path: String,
        acl: Vec<Acl>,
        version: i32,
    },
    GetChildren {
        path: String,
        watch: bool,
    },
    SetWatches {
        relative_zxid: i64,
        data_watches: Vec<String>,
        exist_watches: Vec<String>,
        child_watches: Vec<String>,
    },
    Close,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
#[repr(i32)]
pub(crate) enum OpCode {
    Create = 1,
    Delete = 2,
    Exists = 3,
    GetData = 4,
    SetData = 5,
    GetAcl = 6,
    SetAcl = 7,
    Ping = 11,
    GetChildren2 = 12,
    Auth = 100,
    SetWatches = 101,
    CreateSession = -10,
    CloseSession = -11,
}

pub(crate) trait WriteTo {
    fn write_to<W: Write>(&self, writer: W) -> io::Result<()>;
}

impl WriteTo for str {
    fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<BigEndian>(self.len() as i32)?;
        writer.write_all(self.as_bytes())
    }
}

impl WriteTo for [u8] {
    fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<BigEndian>(self.len() as i32)?;
        writer.write_all(self)
    }
}

impl WriteTo for Acl {
    fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.perms.code())?;
        self.scheme.write_to(&mut writer)?;
        self.id.write_to(writer)
    }
}

impl WriteTo for String {
    fn write_to<W: Write>(&self, writer: W) -> io::Result<()> {
        self.as_str().write_to(writer)
    }
}

fn write_list<W, T>(mut writer: W, ts: &[T]) -> io::Result<()>
where
    T: WriteTo,
    W: Write,
{
    writer.write_i32::<BigEndian>(ts.len() as i32)?;
    for elem in ts {
        elem.write_to(&mut writer)?;
    }
    Ok(())
}

impl Request {
    /// Appends the body of this request to `buffer`; the frame length and the `{xid, opcode}`
    /// header are the caller's business.
    pub(crate) fn serialize_into(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        match *self {
            Request::Connect {
                protocol_version,
                last_zxid_seen,
                timeout,
                session_id,
                ref passwd,
            } => {
                buffer.write_i32::<BigEndian>(protocol_version)?;
                buffer.write_i64::<BigEndian>(last_zxid_seen)?;
                buffer.write_i32::<BigEndian>(timeout)?;
                buffer.write_i64::<BigEndian>(session_id)?;
                passwd[..].write_to(&mut *buffer)?;
            }
            Request::Auth {
                ref scheme,
                ref auth,
            } => {
                // the type field is unused by current servers
                buffer.write_i32::<BigEndian>(0)?;
                scheme.write_to(&mut *buffer)?;
                auth[..].write_to(&mut *buffer)?;
            }
            Request::Create {
                ref path,
                ref data,
                ref acl,
                mode,
            } => {
                path.write_to(&mut *buffer)?;
                data[..].write_to(&mut *buffer)?;
                write_list(&mut *buffer, acl)?;
                buffer.write_i32::<BigEndian>(mode as i32)?;
            }
            Request::Delete { ref path, version } => {
                path.write_to(&mut *buffer)?;
                buffer.write_i32::<BigEndian>(version)?;
            }
            Request::Exists { ref path, watch }
            | Request::GetData { ref path, watch }
            | Request::GetChildren { ref path, watch } => {
                path.write_to(&mut *buffer)?;
                buffer.write_u8(watch as u8)?;
            }
            Request::SetData {
                ref path,
                ref data,
                version,
            } => {
                path.write_to(&mut *buffer)?;
                data[..].write_to(&mut *buffer)?;
                buffer.write_i32::<BigEndian>(version)?;
            }
            Request::GetAcl { ref path } => {
                path.write_to(&mut *buffer)?;
            }
            Request::SetAcl {
                ref path,
                ref acl,
                version,
            } => {
                path.write_to(&mut *buffer)?;
                write_list(&mut *buffer, acl)?;
                buffer.write_i32::<BigEndian>(version)?;
            }
            Request::SetWatches {
                relative_zxid,
                ref data_watches,
                ref exist_watches,
                ref child_watches,
            } => {
                buffer.write_i64::<BigEndian>(relative_zxid)?;
                write_list(&mut *buffer, data_watches)?;
                write_list(&mut *buffer, exist_watches)?;
                write_list(&mut *buffer, child_watches)?;
            }
            Request::Close => {}
        }
        Ok(())
    }

    pub(crate) fn opcode(&self) -> OpCode {
        match *self {
            Request::Connect { .. } => OpCode::CreateSession,
            Request::Auth { .. } => OpCode::Auth,
            Request::Create { .. } => OpCode::Create,
            Request::Delete { .. } => OpCode::Delete,
            Request::Exists { .. } => OpCode::Exists,
            Request::GetData { .. } => OpCode::GetData,
            Request::SetData { .. } => OpCode::SetData,
            Request::GetAcl { .. } => OpCode::GetAcl,
            Request::SetAcl { .. } => OpCode::SetAcl,
            Request::GetChildren { .. } => OpCode::GetChildren2,
            Request::SetWatches { .. } => OpCode::SetWatches,
            Request::Close => OpCode::CloseSession,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Permission;

    fn serialized(req: &Request) -> Vec<u8> {
        let mut buf = Vec::new();
        req.serialize_into(&mut buf).unwrap();
        buf
    }

    #[test]
    fn connect_body_layout() {
        let body = serialized(&Request::Connect {
            protocol_version: 0,
            last_zxid_seen: 0x0102,
            timeout: 4000,
            session_id: 0x0a0b,
            passwd: vec![0xde, 0xad],
        });
        #[rustfmt::skip]
        let expected = [
            0, 0, 0, 0, // protocol version
            0, 0, 0, 0, 0, 0, 0x01, 0x02, // last zxid seen
            0, 0, 0x0f, 0xa0, // timeout
            0, 0, 0, 0, 0, 0, 0x0a, 0x0b, // session id
            0, 0, 0, 2, 0xde, 0xad, // passwd
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn exists_sets_the_watch_flag() {
        let watched = serialized(&Request::Exists {
            path: "/a".to_string(),
            watch: true,
        });
        assert_eq!(watched, [0, 0, 0, 2, b'/', b'a', 1]);

        let unwatched = serialized(&Request::Exists {
            path: "/a".to_string(),
            watch: false,
        });
        assert_eq!(unwatched, [0, 0, 0, 2, b'/', b'a', 0]);
    }

    #[test]
    fn create_body_layout() {
        let body = serialized(&Request::Create {
            path: "/j".to_string(),
            data: vec![7],
            acl: vec![Acl::world(Permission::READ)],
            mode: CreateMode::EphemeralSequential,
        });
        #[rustfmt::skip]
        let expected = [
            0, 0, 0, 2, b'/', b'j', // path
            0, 0, 0, 1, 7, // data
            0, 0, 0, 1, // one acl entry
            0, 0, 0, 1, // Permission::READ
            0, 0, 0, 5, b'w', b'o', b'r', b'l', b'd',
            0, 0, 0, 6, b'a', b'n', b'y', b'o', b'n', b'e',
            0, 0, 0, 3, // EphemeralSequential
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn set_watches_body_layout() {
        let body = serialized(&Request::SetWatches {
            relative_zxid: 9,
            data_watches: vec!["/d".to_string()],
            exist_watches: vec![],
            child_watches: vec!["/c".to_string()],
        });
        #[rustfmt::skip]
        let expected = [
            0, 0, 0, 0, 0, 0, 0, 9, // relative zxid
            0, 0, 0, 1, 0, 0, 0, 2, b'/', b'd', // data watches
            0, 0, 0, 0, // exist watches
            0, 0, 0, 1, 0, 0, 0, 2, b'/', b'c', // child watches
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn close_has_an_empty_body() {
        assert!(serialized(&Request::Close).is_empty());
        assert_eq!(Request::Close.opcode(), OpCode::CloseSession);
    }
}
