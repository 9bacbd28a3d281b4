use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::types::ApiError;

pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Incremental UTF-8 decoder. Bytes of a character split across reads are
/// held back until the rest arrives.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        // Malformed sequence: replace it and keep going
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                        // Incomplete tail: wait for the next read
                        None => {
                            self.pending.drain(..valid_up_to);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Lazy, single-pass sequence of decoded text pieces from a chat response body.
///
/// The cancellation token is checked every time the consumer asks for the
/// next piece; once it fires the sequence ends without an error.
pub struct TextChunks<S = ByteStream> {
    inner: S,
    decoder: Utf8ChunkDecoder,
    cancel: CancellationToken,
    finished: bool,
}

impl<S> TextChunks<S>
where
    S: Stream<Item = Result<Bytes, ApiError>> + Unpin,
{
    pub fn new(inner: S, cancel: CancellationToken) -> Self {
        Self {
            inner,
            decoder: Utf8ChunkDecoder::new(),
            cancel,
            finished: false,
        }
    }
}

impl<S> Stream for TextChunks<S>
where
    S: Stream<Item = Result<Bytes, ApiError>> + Unpin,
{
    type Item = Result<String, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            if this.cancel.is_cancelled() {
                tracing::debug!("Chat stream cancelled by consumer");
                this.finished = true;
                return Poll::Ready(None);
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(bytes)) => {
                    let text = this.decoder.decode(&bytes);
                    if !text.is_empty() {
                        return Poll::Ready(Some(Ok(text)));
                    }
                }
                Some(Err(e)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.finished = true;
                    let tail = this.decoder.finish();
                    if !tail.is_empty() {
                        return Poll::Ready(Some(Ok(tail)));
                    }
                }
            }
        }
    }
}

/// Wrap a fixed list of byte chunks as a chat stream.
pub fn chunks_from_bytes<I>(chunks: I, cancel: CancellationToken) -> TextChunks
where
    I: IntoIterator<Item = Result<Bytes, ApiError>>,
    I::IntoIter: Send + 'static,
{
    TextChunks::new(futures::stream::iter(chunks).boxed(), cancel)
}
