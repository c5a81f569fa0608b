//! Request envelope codec.
//!
//! A request that fits under [`MULTI_PART`](crate::MULTI_PART) travels as
//! one frame; anything larger becomes a header frame followed by
//! fixed-size continuation frames that the receiving side reassembles by
//! session.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::{ProtoError, MULTI_PART};

// Wire discriminants inherited from the reference framework — these must
// match it bit-for-bit.
const REQUEST_SINGLE_NUMBER: u8 = 0x00;
const REQUEST_MULTI_NUMBER: u8 = 0x01;
const REQUEST_MULTI_PART: u8 = 0x02;
const REQUEST_MULTI_PART_END: u8 = 0x03;
const REQUEST_MULTI_NUMBER_PUSH: u8 = 0x41;
const REQUEST_SINGLE_STRING: u8 = 0x80;
const REQUEST_MULTI_STRING: u8 = 0x81;
const REQUEST_MULTI_STRING_PUSH: u8 = 0xc1;

/// Wire address of a service: a registered name or a raw numeric handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Name(String),
    Number(u32),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Name(name) => f.write_str(name),
            Address::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Address {
    fn from(name: &str) -> Address {
        Address::Name(name.to_string())
    }
}

impl From<u32> for Address {
    fn from(n: u32) -> Address {
        Address::Number(n)
    }
}

/// A logical request before packing / after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub address: Address,
    /// Correlation id, scoped to one connection. Zero is reserved on the
    /// wire for push and rejected by the packer.
    pub session: u32,
    /// Fire-and-forget: no response is expected or emitted.
    pub is_push: bool,
    /// Serialized argument sequence.
    pub msg: Vec<u8>,
}

/// One decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    /// Single-frame request, ready to execute.
    Full(Request),
    /// Multi-frame header: address and session, empty `msg`.
    Header(Request),
    /// Continuation fragment, matched to its header by session.
    Part {
        session: u32,
        msg: Vec<u8>,
        /// Set on the final fragment.
        last: bool,
    },
}

/// The frames of one packed request: a head frame plus, for multi-frame
/// requests, ordered continuation frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRequest {
    pub head: Vec<u8>,
    pub parts: Vec<Vec<u8>>,
}

pub fn pack_request(req: &Request) -> Result<PackedRequest, ProtoError> {
    if req.session == 0 {
        return Err(ProtoError::ZeroSession);
    }
    if req.msg.is_empty() {
        return Err(ProtoError::EmptyMessage);
    }
    if let Address::Name(name) = &req.address {
        if name.is_empty() || name.len() > 255 {
            return Err(ProtoError::NameLength(name.len()));
        }
    }
    if req.msg.len() < MULTI_PART {
        Ok(pack_single(req))
    } else {
        Ok(pack_multi(req))
    }
}

fn pack_single(req: &Request) -> PackedRequest {
    let mut head = BytesMut::with_capacity(req.msg.len() + 16);
    match &req.address {
        Address::Number(addr) => {
            head.put_u8(REQUEST_SINGLE_NUMBER);
            head.put_u32_le(*addr);
        }
        Address::Name(name) => {
            head.put_u8(REQUEST_SINGLE_STRING);
            head.put_u8(name.len() as u8);
            head.put_slice(name.as_bytes());
        }
    }
    // session 0 on the wire marks a push
    head.put_u32_le(if req.is_push { 0 } else { req.session });
    head.put_slice(&req.msg);
    PackedRequest {
        head: head.to_vec(),
        parts: Vec::new(),
    }
}

fn pack_multi(req: &Request) -> PackedRequest {
    let mut head = BytesMut::with_capacity(270);
    match &req.address {
        Address::Number(addr) => {
            head.put_u8(if req.is_push {
                REQUEST_MULTI_NUMBER_PUSH
            } else {
                REQUEST_MULTI_NUMBER
            });
            head.put_u32_le(*addr);
        }
        Address::Name(name) => {
            head.put_u8(if req.is_push {
                REQUEST_MULTI_STRING_PUSH
            } else {
                REQUEST_MULTI_STRING
            });
            head.put_u8(name.len() as u8);
            head.put_slice(name.as_bytes());
        }
    }
    head.put_u32_le(req.session);
    head.put_u32_le(req.msg.len() as u32);

    let chunks: Vec<&[u8]> = req.msg.chunks(MULTI_PART).collect();
    let last = chunks.len() - 1;
    let parts = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut part = BytesMut::with_capacity(chunk.len() + 5);
            part.put_u8(if i == last {
                REQUEST_MULTI_PART_END
            } else {
                REQUEST_MULTI_PART
            });
            part.put_u32_le(req.session);
            part.put_slice(chunk);
            part.to_vec()
        })
        .collect();

    PackedRequest {
        head: head.to_vec(),
        parts,
    }
}

pub fn unpack_request(frame: &[u8]) -> Result<RequestFrame, ProtoError> {
    let (&typ, rest) = frame.split_first().ok_or(ProtoError::Truncated)?;
    match typ {
        REQUEST_SINGLE_NUMBER | REQUEST_SINGLE_STRING => unpack_single(typ, rest),
        REQUEST_MULTI_NUMBER
        | REQUEST_MULTI_NUMBER_PUSH
        | REQUEST_MULTI_STRING
        | REQUEST_MULTI_STRING_PUSH => unpack_multi_header(typ, rest),
        REQUEST_MULTI_PART | REQUEST_MULTI_PART_END => unpack_part(typ, rest),
        other => Err(ProtoError::UnknownRequestType(other)),
    }
}

fn take_u32_le(data: &[u8], at: usize) -> Result<u32, ProtoError> {
    let bytes: [u8; 4] = data
        .get(at..at + 4)
        .ok_or(ProtoError::Truncated)?
        .try_into()
        .map_err(|_| ProtoError::Truncated)?;
    Ok(u32::from_le_bytes(bytes))
}

fn take_address(typ: u8, data: &[u8]) -> Result<(Address, usize), ProtoError> {
    if typ & 0x80 == 0 {
        // numeric variants
        Ok((Address::Number(take_u32_le(data, 0)?), 4))
    } else {
        let name_len = *data.first().ok_or(ProtoError::Truncated)? as usize;
        let name = data.get(1..1 + name_len).ok_or(ProtoError::Truncated)?;
        // a non-UTF-8 name can't match any registered service; keep it
        // lossy so the caller gets "service not found" instead of a drop
        let name = String::from_utf8_lossy(name).into_owned();
        Ok((Address::Name(name), 1 + name_len))
    }
}

fn unpack_single(typ: u8, rest: &[u8]) -> Result<RequestFrame, ProtoError> {
    let (address, consumed) = take_address(typ, rest)?;
    let session = take_u32_le(rest, consumed)?;
    let msg = rest[consumed + 4..].to_vec();
    Ok(RequestFrame::Full(Request {
        address,
        session,
        is_push: session == 0,
        msg,
    }))
}

fn unpack_multi_header(typ: u8, rest: &[u8]) -> Result<RequestFrame, ProtoError> {
    let (address, consumed) = take_address(typ, rest)?;
    let session = take_u32_le(rest, consumed)?;
    // declared total size; fragments are trusted as they arrive
    let _msg_size = take_u32_le(rest, consumed + 4)?;
    Ok(RequestFrame::Header(Request {
        address,
        session,
        is_push: typ & 0x40 != 0,
        msg: Vec::new(),
    }))
}

fn unpack_part(typ: u8, rest: &[u8]) -> Result<RequestFrame, ProtoError> {
    let session = take_u32_le(rest, 0)?;
    Ok(RequestFrame::Part {
        session,
        msg: rest[4..].to_vec(),
        last: typ == REQUEST_MULTI_PART_END,
    })
}
