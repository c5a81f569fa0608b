//! Response envelope codec.
//!
//! Every response frame starts with the 4-byte little-endian session
//! followed by a type byte. Successful payloads above
//! [`MULTI_PART`](crate::MULTI_PART) split into a begin frame plus
//! continuation frames; error responses are always a single frame.

use bytes::{BufMut, BytesMut};

use crate::{ProtoError, MULTI_PART};

// Wire discriminants inherited from the reference framework — these must
// match it bit-for-bit.
const RESPONSE_ERROR: u8 = 0x00;
const RESPONSE_OK: u8 = 0x01;
const RESPONSE_MULTI_BEGIN: u8 = 0x02;
const RESPONSE_MULTI_PART: u8 = 0x03;
const RESPONSE_MULTI_END: u8 = 0x04;

/// Reassembly tag carried by a decoded response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Complete on its own — single ok or error frame.
    End,
    /// Starts a multi-part reassembly.
    MultiBegin,
    /// Appends to an in-progress reassembly.
    MultiPart,
    /// Appends and completes an in-progress reassembly.
    MultiEnd,
}

/// A logical response before packing / after decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub ok: bool,
    pub session: u32,
    /// Serialized result sequence (ok) or error payload (not ok).
    pub msg: Vec<u8>,
    /// Drives the receiver's reassembly state machine; ignored when
    /// packing.
    pub padding: Padding,
}

impl Response {
    pub fn ok(session: u32, msg: Vec<u8>) -> Response {
        Response {
            ok: true,
            session,
            msg,
            padding: Padding::End,
        }
    }

    pub fn error(session: u32, msg: Vec<u8>) -> Response {
        Response {
            ok: false,
            session,
            msg,
            padding: Padding::End,
        }
    }
}

/// The frames of one packed response: a head frame plus, for multi-part
/// responses, ordered continuation frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedResponse {
    pub head: Vec<u8>,
    pub parts: Vec<Vec<u8>>,
}

pub fn pack_response(resp: &Response) -> PackedResponse {
    if resp.ok && resp.msg.len() > MULTI_PART {
        pack_multi(resp)
    } else {
        pack_single(resp)
    }
}

fn pack_single(resp: &Response) -> PackedResponse {
    // error payloads never fragment; oversize ones are truncated
    let msg = if resp.ok {
        &resp.msg[..]
    } else {
        &resp.msg[..resp.msg.len().min(MULTI_PART)]
    };
    let mut head = BytesMut::with_capacity(msg.len() + 5);
    head.put_u32_le(resp.session);
    head.put_u8(if resp.ok { RESPONSE_OK } else { RESPONSE_ERROR });
    head.put_slice(msg);
    PackedResponse {
        head: head.to_vec(),
        parts: Vec::new(),
    }
}

fn pack_multi(resp: &Response) -> PackedResponse {
    let mut head = BytesMut::with_capacity(9);
    head.put_u32_le(resp.session);
    head.put_u8(RESPONSE_MULTI_BEGIN);
    head.put_u32_le(resp.msg.len() as u32);

    let chunks: Vec<&[u8]> = resp.msg.chunks(MULTI_PART).collect();
    let last = chunks.len() - 1;
    let parts = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut part = BytesMut::with_capacity(chunk.len() + 5);
            part.put_u32_le(resp.session);
            part.put_u8(if i == last {
                RESPONSE_MULTI_END
            } else {
                RESPONSE_MULTI_PART
            });
            part.put_slice(chunk);
            part.to_vec()
        })
        .collect();

    PackedResponse {
        head: head.to_vec(),
        parts,
    }
}

pub fn unpack_response(frame: &[u8]) -> Result<Response, ProtoError> {
    if frame.len() < 5 {
        return Err(ProtoError::Truncated);
    }
    let session = u32::from_le_bytes(
        frame[..4]
            .try_into()
            .map_err(|_| ProtoError::Truncated)?,
    );
    let (ok, msg, padding) = match frame[4] {
        RESPONSE_OK => (true, frame[5..].to_vec(), Padding::End),
        RESPONSE_ERROR => (false, frame[5..].to_vec(), Padding::End),
        // the begin frame's declared size is advisory; reassembly trusts
        // the fragments as they arrive
        RESPONSE_MULTI_BEGIN => (true, Vec::new(), Padding::MultiBegin),
        RESPONSE_MULTI_PART => (true, frame[5..].to_vec(), Padding::MultiPart),
        RESPONSE_MULTI_END => (true, frame[5..].to_vec(), Padding::MultiEnd),
        other => return Err(ProtoError::UnknownResponseType(other)),
    };
    Ok(Response {
        ok,
        session,
        msg,
        padding,
    })
}
