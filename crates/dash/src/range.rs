#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Inclusive position of the last byte, if the range is bounded.
    pub fn last_byte(&self) -> Option<u64> {
        self.length
            .map(|length| self.offset + length.saturating_sub(1))
    }

    pub fn to_http_range(&self) -> String {
        match self.last_byte() {
            Some(last) => format!("bytes={}-{last}", self.offset),
            None => format!("bytes={}-", self.offset),
        }
    }
}
