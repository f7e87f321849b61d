use crate::TransferError;

/// In-memory accumulator for one anonymous blob (`memcpy` transfer).
///
/// Chunks must arrive strictly in sequence: the first `data` event carries
/// index 1, each following one the previous index plus one. The declared
/// size is advisory and only used for progress reporting.
#[derive(Debug)]
pub struct ChunkAssembler {
    session: String,
    declared_size: u64,
    received: u64,
    index: u64,
    chunks: Vec<Vec<u8>>,
}

impl ChunkAssembler {
    /// Starts a new blob (`begin`).
    pub fn new(session: impl Into<String>, declared_size: u64) -> Self {
        Self {
            session: session.into(),
            declared_size,
            received: 0,
            index: 0,
            chunks: Vec::new(),
        }
    }

    /// Appends the chunk with sequence number `index`.
    ///
    /// An out-of-order index fails with [`TransferError::SequenceViolation`]
    /// and leaves the assembler unchanged.
    pub fn feed(&mut self, index: u64, data: Vec<u8>) -> Result<(), TransferError> {
        let expected = self.index + 1;
        if index != expected {
            return Err(TransferError::SequenceViolation {
                session: self.session.clone(),
                expected,
                got: index,
            });
        }
        self.received += data.len() as u64;
        self.index = index;
        self.chunks.push(data);
        Ok(())
    }

    /// Concatenates all accepted chunks in arrival order.
    ///
    /// Consumes the assembler, so a blob can only be finished once.
    pub fn finish(self) -> Vec<u8> {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }
        let mut buf = Vec::with_capacity(self.received as usize);
        for chunk in self.chunks {
            buf.extend_from_slice(&chunk);
        }
        buf
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Bytes accepted so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Index of the last accepted chunk (0 before the first one).
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
