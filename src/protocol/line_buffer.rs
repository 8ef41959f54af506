//! Line buffer for accumulating partial reads.
//!
//! Raw socket bytes are decoded as UTF-8 and appended to a text buffer.
//! Complete records are newline-terminated; whatever follows the last
//! newline stays in the buffer until more data arrives.
//!
//! Only two operations mutate the buffer:
//! - [`LineBuffer::append`]: add freshly received bytes
//! - [`LineBuffer::extract_frames`]: remove and return every complete record
//!
//! # Example
//!
//! ```
//! use cellwire_client::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//!
//! buffer.append(b"Sheet1\nShe");
//! assert_eq!(buffer.extract_frames(), vec!["Sheet1".to_string()]);
//! assert_eq!(buffer.as_str(), "She");
//!
//! buffer.append(b"et2\n");
//! assert_eq!(buffer.extract_frames(), vec!["Sheet2".to_string()]);
//! assert!(buffer.is_empty());
//! ```

use bytes::BytesMut;

/// Record terminator on the wire.
pub const RECORD_TERMINATOR: char = '\n';

/// Buffer for accumulating incoming bytes and extracting complete records.
///
/// Bytes that end in the middle of a UTF-8 sequence are held back in a
/// small side buffer and completed by the next `append`, so a code point
/// split across two reads is never corrupted.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Decoded, not yet consumed text.
    text: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: BytesMut,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from a socket read.
    ///
    /// Invalid UTF-8 is replaced with U+FFFD; an incomplete sequence at the
    /// end of `data` is kept for the next call.
    pub fn append(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    let head = self.pending.split_to(valid_up_to);
                    // Prefix is valid, so this borrows without replacing anything.
                    self.text.push_str(&String::from_utf8_lossy(&head));

                    match e.error_len() {
                        Some(invalid) => {
                            let _ = self.pending.split_to(invalid);
                            self.text.push(char::REPLACEMENT_CHARACTER);
                        }
                        // Sequence cut short by the end of the read.
                        None => return,
                    }
                }
            }
        }
    }

    /// Remove and return all complete records.
    ///
    /// Returns an empty vector when the buffer holds no newline; in that
    /// case the buffer is left untouched. Text after the final newline is
    /// retained verbatim. Records do not include their terminator, and an
    /// empty line yields an empty record.
    pub fn extract_frames(&mut self) -> Vec<String> {
        let Some(last) = self.text.rfind(RECORD_TERMINATOR) else {
            return Vec::new();
        };

        let consumed: String = self.text.drain(..=last).collect();
        consumed[..consumed.len() - 1]
            .split(RECORD_TERMINATOR)
            .map(str::to_owned)
            .collect()
    }

    /// Whether the unconsumed text ends with a blank line (`"\n\n"`).
    ///
    /// A buffer holding exactly one `"\n"` also counts: that is a roster
    /// with no names followed by its blank terminator line.
    pub fn ends_with_blank_line(&self) -> bool {
        self.text.ends_with("\n\n") || self.text == "\n"
    }

    /// Unconsumed decoded text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of unconsumed bytes, including any held-back partial sequence.
    pub fn len(&self) -> usize {
        self.text.len() + self.pending.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
