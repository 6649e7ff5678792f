//! Payload conversions at interface boundaries
//!
//! Binary payloads cross text-only interfaces as base64; text payloads cross
//! binary-only interfaces as their UTF-8 encoding. The iterator adapters
//! convert sequences lazily; callers materialize a batch before handing it
//! to an asynchronous consumer.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

/// Encodes a binary payload as base64 text.
#[must_use]
pub fn binary_to_text(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decodes base64 text back into a binary payload.
///
/// # Errors
/// Returns the underlying decode error when `text` is not valid base64.
pub fn text_to_binary_b64(text: &str) -> Result<Bytes, base64::DecodeError> {
    STANDARD.decode(text).map(Bytes::from)
}

/// Converts a text payload to its UTF-8 byte encoding.
#[must_use]
pub fn text_to_binary(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

/// Converts UTF-8 bytes to text, replacing invalid sequences.
#[must_use]
pub fn binary_to_text_utf8(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Lazily base64-encodes a sequence of binary payloads.
pub struct EncodeIter<I> {
    inner: I,
}

impl<I> Iterator for EncodeIter<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| STANDARD.encode(item.as_ref()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Wraps a binary sequence in a lazy base64-encoding adapter.
pub fn encode_seq<I>(items: I) -> EncodeIter<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    EncodeIter {
        inner: items.into_iter(),
    }
}

/// Lazily base64-decodes a sequence of text payloads.
pub struct DecodeIter<I> {
    inner: I,
}

impl<I> Iterator for DecodeIter<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = Result<Bytes, base64::DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|item| STANDARD.decode(item.as_ref()).map(Bytes::from))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Wraps a text sequence in a lazy base64-decoding adapter.
pub fn decode_seq<I>(items: I) -> DecodeIter<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    DecodeIter {
        inner: items.into_iter(),
    }
}
