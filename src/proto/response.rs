use super::request::OpCode;
use crate::types::{Acl, Permission, SessionState, Stat, WatchedEvent, WatchedEventType};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};

/// The decoded body of a response, shaped by the opcode of the request it answers.
#[derive(Debug)]
pub(crate) enum Response {
    Connect {
        protocol_version: i32,
        timeout: i32,
        session_id: i64,
        passwd: Vec<u8>,
    },
    Stat(Stat),
    GetData {
        data: Vec<u8>,
        stat: Stat,
    },
    GetChildren {
        children: Vec<String>,
        stat: Stat,
    },
    GetAcl {
        acl: Vec<Acl>,
        stat: Stat,
    },
    Path(String),
    Empty,
}

pub(crate) trait ReadFrom: Sized {
    fn read_from<R: Read>(read: &mut R) -> io::Result<Self>;
}

impl ReadFrom for Stat {
    fn read_from<R: Read>(read: &mut R) -> io::Result<Stat> {
        Ok(Stat {
            czxid: read.read_i64::<BigEndian>()?,
            mzxid: read.read_i64::<BigEndian>()?,
            ctime: read.read_i64::<BigEndian>()?,
            mtime: read.read_i64::<BigEndian>()?,
            version: read.read_i32::<BigEndian>()?,
            cversion: read.read_i32::<BigEndian>()?,
            aversion: read.read_i32::<BigEndian>()?,
            ephemeral_owner: read.read_i64::<BigEndian>()?,
            data_length: read.read_i32::<BigEndian>()?,
            num_children: read.read_i32::<BigEndian>()?,
            pzxid: read.read_i64::<BigEndian>()?,
        })
    }
}

impl ReadFrom for Acl {
    fn read_from<R: Read>(read: &mut R) -> io::Result<Acl> {
        Ok(Acl {
            perms: Permission::from_code(read.read_u32::<BigEndian>()?),
            scheme: read.read_string()?,
            id: read.read_string()?,
        })
    }
}

impl ReadFrom for WatchedEvent {
    fn read_from<R: Read>(read: &mut R) -> io::Result<WatchedEvent> {
        let type_code = read.read_i32::<BigEndian>()?;
        let state = read.read_i32::<BigEndian>()?;
        let path = read.read_string()?;
        let event_type = WatchedEventType::from_code(type_code).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown watch event type {}", type_code),
            )
        })?;
        Ok(WatchedEvent {
            event_type,
            state: SessionState::from(state),
            path,
            err: None,
        })
    }
}

pub(crate) trait BufferReader: Read {
    fn read_buffer(&mut self) -> io::Result<Vec<u8>>;
}

impl<R: Read> BufferReader for R {
    fn read_buffer(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_i32::<BigEndian>()?;
        // a negative length marks an absent buffer
        let len = if len < 0 { 0 } else { len as usize };
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

trait StringReader: Read {
    fn read_string(&mut self) -> io::Result<String>;
}

impl<R: Read> StringReader for R {
    fn read_string(&mut self) -> io::Result<String> {
        let raw = self.read_buffer()?;
        String::from_utf8(raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad string: {}", e)))
    }
}

fn read_string_list<R: Read>(read: &mut R) -> io::Result<Vec<String>> {
    let len = read.read_i32::<BigEndian>()?;
    let len = if len < 0 { 0 } else { len as usize };
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        items.push(read.read_string()?);
    }
    Ok(items)
}

impl Response {
    /// Decodes a response body according to the opcode of the request it correlates with.
    pub(crate) fn parse(opcode: OpCode, buf: &[u8]) -> io::Result<Response> {
        let mut reader = buf;
        match opcode {
            OpCode::CreateSession => Ok(Response::Connect {
                protocol_version: reader.read_i32::<BigEndian>()?,
                timeout: reader.read_i32::<BigEndian>()?,
                session_id: reader.read_i64::<BigEndian>()?,
                passwd: reader.read_buffer()?,
            }),
            OpCode::Exists | OpCode::SetData | OpCode::SetAcl => {
                Ok(Response::Stat(Stat::read_from(&mut reader)?))
            }
            OpCode::GetData => Ok(Response::GetData {
                data: reader.read_buffer()?,
                stat: Stat::read_from(&mut reader)?,
            }),
            OpCode::GetChildren2 => Ok(Response::GetChildren {
                children: read_string_list(&mut reader)?,
                stat: Stat::read_from(&mut reader)?,
            }),
            OpCode::GetAcl => {
                let len = reader.read_i32::<BigEndian>()?;
                let len = if len < 0 { 0 } else { len as usize };
                let mut acl = Vec::with_capacity(len.min(64));
                for _ in 0..len {
                    acl.push(Acl::read_from(&mut reader)?);
                }
                Ok(Response::GetAcl {
                    acl,
                    stat: Stat::read_from(&mut reader)?,
                })
            }
            OpCode::Create => Ok(Response::Path(reader.read_string()?)),
            OpCode::Delete | OpCode::Auth | OpCode::SetWatches | OpCode::CloseSession => {
                Ok(Response::Empty)
            }
            OpCode::Ping => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "pings are answered outside the correlation table",
            )),
        }
    }
}
