//! Encoders that build DODS and DAP4 responses byte by byte.
//!
//! These mirror what a server writes so decoder tests can describe their
//! input at the level of values instead of hex dumps.

use bytes::Bytes;

/// Chunk flag: this is the last chunk of the response.
pub const CHUNK_LAST: u8 = 0x01;
/// Chunk flag: the body is a server error message.
pub const CHUNK_ERROR: u8 = 0x02;
/// Chunk flag: data in the body is little-endian.
pub const CHUNK_LITTLE_ENDIAN: u8 = 0x04;

/// Builds an XDR payload (DAP2 `.dods` data section).
#[derive(Debug, Default, Clone)]
pub struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// A scalar `Byte`, widened to a full word.
    pub fn byte(&mut self, v: u8) -> &mut Self {
        self.u32(v as u32)
    }

    /// A scalar `Int16`, widened to a full word.
    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.i32(v as i32)
    }

    /// A length-prefixed, padded string.
    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.pad()
    }

    /// The duplicated element count that starts every non-string array.
    pub fn array_header(&mut self, count: usize) -> &mut Self {
        self.u32(count as u32).u32(count as u32)
    }

    pub fn i32_array(&mut self, values: &[i32]) -> &mut Self {
        self.array_header(values.len());
        for v in values {
            self.i32(*v);
        }
        self
    }

    /// `Int16` array elements are widened to words.
    pub fn i16_array(&mut self, values: &[i16]) -> &mut Self {
        self.array_header(values.len());
        for v in values {
            self.i16(*v);
        }
        self
    }

    pub fn f32_array(&mut self, values: &[f32]) -> &mut Self {
        self.array_header(values.len());
        for v in values {
            self.f32(*v);
        }
        self
    }

    pub fn f64_array(&mut self, values: &[f64]) -> &mut Self {
        self.array_header(values.len());
        for v in values {
            self.f64(*v);
        }
        self
    }

    /// `Byte` arrays are packed and padded.
    pub fn byte_array(&mut self, values: &[u8]) -> &mut Self {
        self.array_header(values.len());
        self.buf.extend_from_slice(values);
        self.pad()
    }

    /// String arrays carry a single count word.
    pub fn string_array(&mut self, values: &[&str]) -> &mut Self {
        self.u32(values.len() as u32);
        for v in values {
            self.string(v);
        }
        self
    }

    /// Marker preceding each sequence record.
    pub fn start_record(&mut self) -> &mut Self {
        self.u32(0x5A00_0000)
    }

    /// Marker closing a sequence.
    pub fn end_sequence(&mut self) -> &mut Self {
        self.u32(0xA500_0000)
    }

    /// Raw bytes, no alignment.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    fn pad(&mut self) -> &mut Self {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// A complete `.dods` response: the DDS, the `Data:` marker and the payload.
pub fn dods_response(dds: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = dds.trim_end().as_bytes().to_vec();
    out.extend_from_slice(b"\nData:\n");
    out.extend_from_slice(payload);
    out
}

/// Builds a DAP4 data payload (the bytes after the DMR chunk).
#[derive(Debug, Clone)]
pub struct Dap4Writer {
    little_endian: bool,
    buf: Vec<u8>,
    variable_start: usize,
}

impl Default for Dap4Writer {
    fn default() -> Self {
        Self::new(false)
    }
}

macro_rules! dap4_put {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self, v: $ty) -> &mut Self {
                if self.little_endian {
                    self.buf.extend_from_slice(&v.to_le_bytes());
                } else {
                    self.buf.extend_from_slice(&v.to_be_bytes());
                }
                self
            }
        )*
    };
}

impl Dap4Writer {
    pub fn new(little_endian: bool) -> Self {
        Self {
            little_endian,
            buf: Vec::new(),
            variable_start: 0,
        }
    }

    dap4_put!(
        i8: i8,
        u8: u8,
        i16: i16,
        u16: u16,
        i32: i32,
        u32: u32,
        i64: i64,
        u64: u64,
        f32: f32,
        f64: f64,
    );

    /// A 64-bit count followed by the UTF-8 bytes.
    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u64(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    /// A 64-bit count followed by the raw bytes.
    pub fn opaque(&mut self, bytes: &[u8]) -> &mut Self {
        self.u64(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Record count that starts a sequence.
    pub fn record_count(&mut self, n: u64) -> &mut Self {
        self.u64(n)
    }

    pub fn f32_values(&mut self, values: &[f32]) -> &mut Self {
        for v in values {
            self.f32(*v);
        }
        self
    }

    pub fn f64_values(&mut self, values: &[f64]) -> &mut Self {
        for v in values {
            self.f64(*v);
        }
        self
    }

    pub fn i32_values(&mut self, values: &[i32]) -> &mut Self {
        for v in values {
            self.i32(*v);
        }
        self
    }

    /// Start a top-level variable (for per-variable checksums).
    pub fn begin_variable(&mut self) -> &mut Self {
        self.variable_start = self.buf.len();
        self
    }

    /// Append the CRC32 of everything written since [`begin_variable`].
    ///
    /// [`begin_variable`]: Dap4Writer::begin_variable
    pub fn end_variable_with_checksum(&mut self) -> &mut Self {
        let crc = crc32fast::hash(&self.buf[self.variable_start..]);
        self.u32(crc);
        self.variable_start = self.buf.len();
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Frames a DMR and a data payload into a DAP4 chunked response.
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    little_endian_framing: bool,
    little_endian_data: bool,
    chunk_size: usize,
    chunk_checksums: bool,
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkWriter {
    /// Network-order framing, big-endian data, 64 KiB chunks.
    pub fn new() -> Self {
        Self {
            little_endian_framing: false,
            little_endian_data: false,
            chunk_size: 64 * 1024,
            chunk_checksums: false,
        }
    }

    /// Little-endian headers and little-endian data.
    pub fn little_endian() -> Self {
        Self {
            little_endian_framing: true,
            little_endian_data: true,
            ..Self::new()
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Append a CRC32 of the body to every data chunk.
    pub fn with_chunk_checksums(mut self) -> Self {
        self.chunk_checksums = true;
        self
    }

    /// Four header bytes for `flags` and a 24-bit body length.
    pub fn header(&self, flags: u8, len: usize) -> [u8; 4] {
        let word = ((flags as u32) << 24) | (len as u32 & 0x00FF_FFFF);
        if self.little_endian_framing {
            word.to_le_bytes()
        } else {
            word.to_be_bytes()
        }
    }

    fn data_flags(&self) -> u8 {
        if self.little_endian_data {
            CHUNK_LITTLE_ENDIAN
        } else {
            0
        }
    }

    /// DMR chunk followed by the payload split into data chunks.
    pub fn response(&self, dmr: &str, payload: &[u8]) -> Bytes {
        let mut out = Vec::new();
        let flags = self.data_flags();

        let dmr_flags = if payload.is_empty() { flags | CHUNK_LAST } else { flags };
        out.extend_from_slice(&self.header(dmr_flags, dmr.len()));
        out.extend_from_slice(dmr.as_bytes());

        let chunks: Vec<&[u8]> = payload.chunks(self.chunk_size).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let last = i + 1 == chunks.len();
            let chunk_flags = if last { flags | CHUNK_LAST } else { flags };
            let extra = if self.chunk_checksums { 4 } else { 0 };
            out.extend_from_slice(&self.header(chunk_flags, chunk.len() + extra));
            out.extend_from_slice(chunk);
            if self.chunk_checksums {
                let crc = crc32fast::hash(chunk);
                if self.little_endian_data {
                    out.extend_from_slice(&crc.to_le_bytes());
                } else {
                    out.extend_from_slice(&crc.to_be_bytes());
                }
            }
        }
        Bytes::from(out)
    }

    /// A single error chunk carrying `message`.
    pub fn error_response(&self, message: &str) -> Bytes {
        let mut out = Vec::new();
        out.extend_from_slice(&self.header(CHUNK_ERROR | CHUNK_LAST, message.len()));
        out.extend_from_slice(message.as_bytes());
        Bytes::from(out)
    }
}
