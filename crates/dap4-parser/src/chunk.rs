//! Chunk framing of `.dap` responses.
//!
//! Every chunk starts with a 4-byte header: one flags byte and a 24-bit
//! body length. In network order the bytes are `[flags, len_hi, len_mid,
//! len_lo]`; servers that write little-endian framing emit the same 32-bit
//! word in little-endian byte order. The first chunk carries the DMR text,
//! the remaining bodies concatenate into the data payload.

use tracing::debug;

use dap_model::{DapError, DapResult};

/// Flag: this is the last chunk of the response.
pub const FLAG_LAST: u8 = 0x01;
/// Flag: the body is a server error message instead of data.
pub const FLAG_ERROR: u8 = 0x02;
/// Flag: data values in the payload are little-endian.
pub const FLAG_LITTLE_ENDIAN: u8 = 0x04;

const KNOWN_FLAGS: u8 = FLAG_LAST | FLAG_ERROR | FLAG_LITTLE_ENDIAN;
const HEADER_LEN: usize = 4;

/// Byte order of chunk headers or of data values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub flags: u8,
    pub length: usize,
}

impl ChunkHeader {
    pub fn decode(bytes: [u8; 4], order: ByteOrder) -> Self {
        let word = match order {
            ByteOrder::Big => u32::from_be_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        };
        Self {
            flags: (word >> 24) as u8,
            length: (word & 0x00FF_FFFF) as usize,
        }
    }

    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & FLAG_ERROR != 0
    }

    pub fn is_little_endian(&self) -> bool {
        self.flags & FLAG_LITTLE_ENDIAN != 0
    }

    fn is_plausible(&self) -> bool {
        self.flags & !KNOWN_FLAGS == 0
    }
}

fn header_at(data: &[u8], pos: usize, order: ByteOrder) -> Option<ChunkHeader> {
    let bytes = data.get(pos..pos + HEADER_LEN)?;
    Some(ChunkHeader::decode([bytes[0], bytes[1], bytes[2], bytes[3]], order))
}

/// How well a framing order explains the whole response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Fit {
    None,
    /// The first header is valid and its body fits in the stream.
    FirstChunk,
    /// Every header is valid and the chain ends exactly at the end of
    /// the stream.
    Exact,
}

fn fit(data: &[u8], order: ByteOrder) -> Fit {
    let Some(first) = header_at(data, 0, order) else {
        return Fit::None;
    };
    if !first.is_plausible() || first.length > data.len() - HEADER_LEN {
        return Fit::None;
    }

    let mut pos = 0;
    while let Some(header) = header_at(data, pos, order) {
        if !header.is_plausible() {
            return Fit::FirstChunk;
        }
        pos += HEADER_LEN + header.length;
        if pos > data.len() {
            return Fit::FirstChunk;
        }
        if header.is_last() || header.is_error() {
            break;
        }
    }
    if pos == data.len() {
        Fit::Exact
    } else {
        Fit::FirstChunk
    }
}

/// Determine the byte order of the chunk headers.
///
/// Both orders are tried: an order whose headers chain exactly to the end
/// of the stream wins over one where only the first chunk fits, and network
/// order wins a tie.
pub fn detect_framing(data: &[u8]) -> DapResult<ByteOrder> {
    if data.len() < HEADER_LEN {
        return Err(DapError::protocol(format!(
            "DAP4 response too short for a chunk header ({} bytes)",
            data.len()
        )));
    }
    let big = fit(data, ByteOrder::Big);
    let little = fit(data, ByteOrder::Little);
    debug!(?big, ?little, "Chunk framing candidates");

    match (big, little) {
        (Fit::None, Fit::None) => Err(DapError::protocol(format!(
            "first chunk header {:02x?} is not valid in either byte order for a {}-byte response",
            &data[..HEADER_LEN],
            data.len()
        ))),
        (b, l) if l > b => Ok(ByteOrder::Little),
        _ => Ok(ByteOrder::Big),
    }
}

/// A de-chunked `.dap` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedResponse {
    pub dmr: String,
    pub payload: Vec<u8>,
    pub framing: ByteOrder,
    pub data_order: ByteOrder,
    pub chunk_count: usize,
}

/// Split a `.dap` response into its DMR and concatenated data payload.
///
/// A chunk with the error flag aborts with [`DapError::Protocol`] carrying
/// the server's message. With `verify_chunk_crc`, every data chunk body
/// must end in a CRC32 of the preceding bytes; the CRC is stripped from the
/// payload and a mismatch is a [`DapError::Checksum`].
pub fn read_chunks(data: &[u8], verify_chunk_crc: bool) -> DapResult<ChunkedResponse> {
    let framing = detect_framing(data)?;
    let mut pos = 0;
    let mut index = 0;
    let mut dmr: Option<String> = None;
    let mut payload = Vec::new();
    let mut little_flag = false;
    let mut saw_last = false;

    while pos < data.len() {
        let header = header_at(data, pos, framing).ok_or_else(|| {
            DapError::protocol(format!(
                "truncated chunk header at offset {} ({} bytes left)",
                pos,
                data.len() - pos
            ))
        })?;
        pos += HEADER_LEN;
        if !header.is_plausible() {
            return Err(DapError::protocol(format!(
                "chunk {} has unknown flags 0x{:02x}",
                index, header.flags
            )));
        }
        let body = data.get(pos..pos + header.length).ok_or_else(|| {
            DapError::protocol(format!(
                "chunk {} declares {} bytes but only {} remain",
                index,
                header.length,
                data.len() - pos
            ))
        })?;
        pos += header.length;
        debug!(index, flags = header.flags, length = header.length, "Read chunk");

        if header.is_error() {
            let message = String::from_utf8_lossy(body).trim().to_string();
            return Err(DapError::protocol(format!("server error: {}", message)));
        }
        if index == 0 {
            little_flag = header.is_little_endian();
        }

        match dmr {
            None => {
                let text = std::str::from_utf8(body)
                    .map_err(|e| DapError::protocol(format!("DMR chunk is not valid UTF-8: {}", e)))?;
                dmr = Some(text.to_string());
            }
            Some(_) if verify_chunk_crc => {
                payload.extend_from_slice(verify_chunk(body, index, data_order(little_flag, framing))?);
            }
            Some(_) => payload.extend_from_slice(body),
        }

        index += 1;
        if header.is_last() {
            saw_last = true;
            break;
        }
    }

    if pos != data.len() {
        return Err(DapError::protocol(format!(
            "{} bytes follow the last chunk",
            data.len() - pos
        )));
    }
    if !saw_last {
        debug!("Response ended without a last-chunk flag");
    }
    let dmr = dmr.ok_or_else(|| DapError::protocol("DAP4 response has no DMR chunk"))?;
    let data_order = data_order(little_flag, framing);
    debug!(?framing, ?data_order, chunks = index, payload_bytes = payload.len(), "De-chunked response");

    Ok(ChunkedResponse {
        dmr,
        payload,
        framing,
        data_order,
        chunk_count: index,
    })
}

/// Data order comes from the little-endian flag; servers that frame in
/// little-endian also write little-endian data.
fn data_order(little_flag: bool, framing: ByteOrder) -> ByteOrder {
    if little_flag {
        ByteOrder::Little
    } else {
        framing
    }
}

fn verify_chunk(body: &[u8], index: usize, order: ByteOrder) -> DapResult<&[u8]> {
    if body.len() < 4 {
        return Err(DapError::protocol(format!(
            "chunk {} is too short to carry a checksum ({} bytes)",
            index,
            body.len()
        )));
    }
    let (content, tail) = body.split_at(body.len() - 4);
    let tail = [tail[0], tail[1], tail[2], tail[3]];
    let expected = match order {
        ByteOrder::Big => u32::from_be_bytes(tail),
        ByteOrder::Little => u32::from_le_bytes(tail),
    };
    let actual = crc32fast::hash(content);
    if expected != actual {
        return Err(DapError::Checksum {
            variable: format!("chunk {}", index),
            expected,
            actual,
        });
    }
    Ok(content)
}
