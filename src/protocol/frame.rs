//! Wire codec for a single message frame.
//!
//! ```text
//! [REQ|RSP][32-bit identity][32-bit body length][body][\r\r\n]
//! [   3   ][       4       ][        4        ][ N  ][  3   ]
//! ```
//!
//! The fixed header is serialized with `bincode` using big-endian, fixed-width integers, so the
//! three header fields land on the wire exactly as laid out above. [`Frame::decode`] expects the
//! frame *without* its trailing terminator, which is how
//! [`FrameBuffer`](super::buffer::FrameBuffer) hands frames out.
use std::fmt;

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
};
use thiserror::Error;

/// Size of the fixed frame header: kind tag, identity and body length.
pub const HEADER_SIZE: usize = 11;

/// Byte sequence closing every frame on the wire.
pub const TERMINATOR: [u8; 3] = [b'\r', b'\r', b'\n'];

const REQUEST_TAG: [u8; 3] = *b"REQ";
const RESPONSE_TAG: [u8; 3] = *b"RSP";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown frame kind {:?}", String::from_utf8_lossy(.0))]
    UnknownKind([u8; 3]),

    #[error("bad frame: {0} bytes is not enough for a header")]
    BadFrameLength(usize),

    #[error("bad frame: declared body length {declared}, found {actual}")]
    BadBodyLength { declared: u32, actual: usize },

    #[error("bad frame: missing terminator after body")]
    BadTrailer,

    #[error("body of {0} bytes is too large")]
    BodyTooLarge(usize),

    #[error("failed to encode frame header: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode frame header: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Whether a frame asks for something or answers something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
}

impl FrameKind {
    pub fn tag(self) -> [u8; 3] {
        match self {
            FrameKind::Request => REQUEST_TAG,
            FrameKind::Response => RESPONSE_TAG,
        }
    }

    pub fn from_tag(tag: [u8; 3]) -> Result<Self, FrameError> {
        match tag {
            REQUEST_TAG => Ok(FrameKind::Request),
            RESPONSE_TAG => Ok(FrameKind::Response),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Encode, Decode)]
pub(crate) struct Header {
    tag: [u8; 3],
    identity: u32,
    length: u32,
}

impl Header {
    /// Reads the header at the start of `data`, checking only the kind tag.
    pub(crate) fn peek(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::BadFrameLength(data.len()));
        }
        let (header, _): (Header, usize) =
            bincode::decode_from_slice(&data[..HEADER_SIZE], config())?;
        FrameKind::from_tag(header.tag)?;
        Ok(header)
    }

    pub(crate) fn body_length(&self) -> usize {
        self.length as usize
    }
}

fn config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// One message exchanged over the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub identity: u32,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn request(identity: u32, body: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Request,
            identity,
            body,
        }
    }

    pub fn response(identity: u32, body: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Response,
            identity,
            body,
        }
    }

    /// Encodes the frame including its terminator.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let length =
            u32::try_from(self.body.len()).map_err(|_| FrameError::BodyTooLarge(self.body.len()))?;
        let header = Header {
            tag: self.kind.tag(),
            identity: self.identity,
            length,
        };

        let mut data = Vec::with_capacity(HEADER_SIZE + self.body.len() + TERMINATOR.len());
        bincode::encode_into_std_write(header, &mut data, config())?;
        data.extend_from_slice(&self.body);
        data.extend_from_slice(&TERMINATOR);
        Ok(data)
    }

    /// Decodes a frame whose terminator has already been stripped.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let header = Header::peek(data)?;
        let body = &data[HEADER_SIZE..];
        if body.len() != header.body_length() {
            return Err(FrameError::BadBodyLength {
                declared: header.length,
                actual: body.len(),
            });
        }

        Ok(Self {
            kind: FrameKind::from_tag(header.tag)?,
            identity: header.identity,
            body: body.to_vec(),
        })
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("identity", &self.identity)
            .field("body_size", &self.body.len())
            .finish()
    }
}
