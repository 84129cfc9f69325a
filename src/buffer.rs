//! Growable response accumulator for transport callbacks.

/// Byte accumulator for response headers and bodies.
///
/// `append` reports how many bytes it consumed; a return of 0 with a
/// non-empty chunk means the reservation failed and the transport should
/// treat the transfer as aborted. There is no size cap: buffers grow by
/// amortized reallocation as chunks arrive.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    data: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk`, returning the number of bytes consumed.
    /// Returns 0 when the underlying reservation fails.
    pub fn append(&mut self, chunk: &[u8]) -> usize {
        if self.data.try_reserve(chunk.len()).is_err() {
            tracing::error!(len = chunk.len(), "response buffer reservation failed");
            return 0;
        }
        self.data.extend_from_slice(chunk);
        chunk.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Discards everything accumulated so far.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Consumes the buffer, yielding the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
