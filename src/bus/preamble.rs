//! Head of an HTTP-proxy response.
//!
//! Fragment 0 of every proxy response starts with two little-endian words:
//! ```text
//! 0  u32  status word: bits 0-15 HTTP status, bit 16 JSON body, bit 17 keep-open
//! 4  u32  declared total content length
//! ```

/// Size of the preamble at the start of response fragment 0.
pub const PREAMBLE_LEN: usize = 8;

const STATUS_MASK: u32 = 0x0000_FFFF;
const JSON_FLAG: u32 = 1 << 16;
const KEEP_OPEN_FLAG: u32 = 1 << 17;

/// Status word and declared content length heading a proxied response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePreamble {
    pub status: u16,
    pub json: bool,
    /// Reserved by the peer; never acted on.
    pub keep_open: bool,
    pub content_length: u32,
}

impl ResponsePreamble {
    /// Parse the first [`PREAMBLE_LEN`] bytes, `None` if there are fewer.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let word = |at: usize| -> Option<u32> {
            let bytes = data.get(at..at + 4)?;
            Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        };
        let status = word(0)?;
        let content_length = word(4)?;
        Some(Self {
            status: (status & STATUS_MASK) as u16,
            json: status & JSON_FLAG != 0,
            keep_open: status & KEEP_OPEN_FLAG != 0,
            content_length,
        })
    }

    pub fn encode(&self) -> [u8; PREAMBLE_LEN] {
        let mut status = u32::from(self.status);
        if self.json {
            status |= JSON_FLAG;
        }
        if self.keep_open {
            status |= KEEP_OPEN_FLAG;
        }
        let mut out = [0u8; PREAMBLE_LEN];
        out[..4].copy_from_slice(&status.to_le_bytes());
        out[4..].copy_from_slice(&self.content_length.to_le_bytes());
        out
    }
}
