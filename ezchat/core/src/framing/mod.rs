//! Frame Decoder
//!
//! Splits an incrementally-arriving text stream into delimiter-bounded
//! records.
//!
//! # Frame Format
//!
//! ```text
//! SSE-style:  data: Hello\n\ndata: World\n\n      delimiter "\n\n"
//! NDJSON:     {"message":{...}}\n{"message":{...}}\n   delimiter "\n"
//! Raw:        any text                              no framing
//! ```
//!
//! The last segment of every split is held back as the remainder, because a
//! network read may end at any byte. Only [`FrameDecoder::finish`] releases it,
//! once the transport has reported end-of-stream.
//!
//! # Invariants
//!
//! - A record never contains the delimiter.
//! - The remainder never contains a complete frame.
//! - Every record followed by the delimiter, then the remainder, reproduces the
//!   input exactly.

mod utf8;

pub use utf8::Utf8Decoder;

/// Default upper bound on a single unterminated frame (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// How a wire format separates records
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delimiter {
    /// Records end at the given separator
    Text(&'static str),
    /// No framing: every chunk is a record
    Passthrough,
}

impl Delimiter {
    /// Blank-line separator used by SSE-style streams
    pub const BLANK_LINE: Self = Self::Text("\n\n");

    /// Line separator used by NDJSON streams
    pub const NEWLINE: Self = Self::Text("\n");
}

/// Output of a single [`decode`] step
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Complete records, in arrival order, without their delimiters
    pub records: Vec<String>,
    /// Trailing text that is not yet known to be a complete frame
    pub remainder: String,
}

/// Split `buffer + chunk` into complete records and a remainder
///
/// Pure: the result depends only on the arguments. Calling it again with the
/// returned remainder and an empty chunk yields no records.
#[must_use]
pub fn decode(buffer: &str, chunk: &str, delimiter: Delimiter) -> Decoded {
    let mut joined = String::with_capacity(buffer.len() + chunk.len());
    joined.push_str(buffer);
    joined.push_str(chunk);

    match delimiter {
        Delimiter::Passthrough => {
            let records = if joined.is_empty() { Vec::new() } else { vec![joined] };
            Decoded {
                records,
                remainder: String::new(),
            }
        }
        Delimiter::Text(separator) => split_records(joined, separator),
    }
}

fn split_records(joined: String, separator: &str) -> Decoded {
    // An empty separator would never advance.
    if separator.is_empty() {
        return Decoded {
            records: Vec::new(),
            remainder: joined,
        };
    }

    let mut records = Vec::new();
    let mut start = 0;
    while let Some(offset) = joined[start..].find(separator) {
        let end = start + offset;
        records.push(joined[start..end].to_string());
        start = end + separator.len();
    }

    let remainder = if start == 0 {
        joined
    } else {
        joined[start..].to_string()
    };

    Decoded { records, remainder }
}

/// Stateful wrapper around [`decode`] that owns the trailing buffer
#[derive(Debug)]
pub struct FrameDecoder {
    delimiter: Delimiter,
    buffer: String,
    max_frame_bytes: usize,
}

/// The trailing buffer outgrew the configured frame limit
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Frame exceeds {limit} bytes without a delimiter")]
pub struct FrameTooLarge {
    /// Configured limit in bytes
    pub limit: usize,
}

/// Output of [`FrameDecoder::push`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pushed {
    /// Complete records, in arrival order
    pub records: Vec<String>,
    /// Set when the unterminated tail outgrew the frame limit
    pub overflow: Option<FrameTooLarge>,
}

impl FrameDecoder {
    /// Create a decoder with the default frame limit
    #[must_use]
    pub fn new(delimiter: Delimiter) -> Self {
        Self::with_limit(delimiter, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a decoder with an explicit frame limit
    #[must_use]
    pub fn with_limit(delimiter: Delimiter, max_frame_bytes: usize) -> Self {
        Self {
            delimiter,
            buffer: String::new(),
            max_frame_bytes,
        }
    }

    /// The delimiter this decoder splits on
    #[must_use]
    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    /// Feed a chunk and collect every record it completes
    ///
    /// Records completed by this chunk are always returned. If the trailing
    /// buffer is then over the frame limit it is dropped and
    /// [`Pushed::overflow`] is set.
    pub fn push(&mut self, chunk: &str) -> Pushed {
        let buffer = std::mem::take(&mut self.buffer);
        let Decoded { records, remainder } = decode(&buffer, chunk, self.delimiter);

        let overflow = if remainder.len() > self.max_frame_bytes {
            Some(FrameTooLarge {
                limit: self.max_frame_bytes,
            })
        } else {
            self.buffer = remainder;
            None
        };

        Pushed { records, overflow }
    }

    /// Release the trailing buffer as a final record
    ///
    /// Called once the transport reports end-of-stream, for a last frame that
    /// arrived without its terminating delimiter. Returns `None` when nothing
    /// is buffered.
    pub fn finish(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.buffer);
        if remainder.is_empty() {
            None
        } else {
            Some(remainder)
        }
    }

    /// Bytes currently held back
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
