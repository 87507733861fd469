//! Maps raw [`Response`] values onto the typed results of the public operations.
//!
//! Anything that decodes to an unexpected shape is reported as a marshalling failure: the frame
//! was well-formed, but it was not the answer the opcode promised.

use crate::error::Error;
use crate::proto::{Response, ZkError};
use crate::types::{Acl, Stat};

fn unexpected<T>(op: &str, response: Response) -> Result<T, Error> {
    Err(Error::Marshalling(format!(
        "unexpected response to {}: {:?}",
        op, response
    )))
}

pub(crate) fn create(res: Result<Response, Error>) -> Result<String, Error> {
    match res? {
        Response::Path(path) => Ok(path),
        other => unexpected("create", other),
    }
}

pub(crate) fn delete(res: Result<Response, Error>) -> Result<(), Error> {
    match res? {
        Response::Empty => Ok(()),
        other => unexpected("delete", other),
    }
}

/// `NoNode` is the "no" in the question `exists` asks, not a failure.
pub(crate) fn exists(res: Result<Response, Error>) -> Result<Option<Stat>, Error> {
    match res {
        Ok(Response::Stat(stat)) => Ok(Some(stat)),
        Ok(other) => unexpected("exists", other),
        Err(Error::Server(ZkError::NoNode)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) fn get_data(res: Result<Response, Error>) -> Result<(Vec<u8>, Stat), Error> {
    match res? {
        Response::GetData { data, stat } => Ok((data, stat)),
        other => unexpected("get_data", other),
    }
}

pub(crate) fn set_data(res: Result<Response, Error>) -> Result<Stat, Error> {
    match res? {
        Response::Stat(stat) => Ok(stat),
        other => unexpected("set_data", other),
    }
}

pub(crate) fn get_children(res: Result<Response, Error>) -> Result<(Vec<String>, Stat), Error> {
    match res? {
        Response::GetChildren { children, stat } => Ok((children, stat)),
        other => unexpected("get_children", other),
    }
}

pub(crate) fn get_acl(res: Result<Response, Error>) -> Result<(Vec<Acl>, Stat), Error> {
    match res? {
        Response::GetAcl { acl, stat } => Ok((acl, stat)),
        other => unexpected("get_acl", other),
    }
}

pub(crate) fn set_acl(res: Result<Response, Error>) -> Result<Stat, Error> {
    match res? {
        Response::Stat(stat) => Ok(stat),
        other => unexpected("set_acl", other),
    }
}

pub(crate) fn empty(op: &'static str, res: Result<Response, Error>) -> Result<(), Error> {
    match res? {
        Response::Empty => Ok(()),
        other => unexpected(op, other),
    }
}
