//! Outcome of a chunked notification push

/// What happened to one `send_large_data` call
///
/// A chunk counts as failed when any subscriber's notify was refused. A send
/// that found nobody subscribed, or a payload that could not be chunked,
/// fails as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Chunks the payload was split into
    pub chunks: usize,
    pub failed_chunks: usize,
    /// Notify calls issued across all chunks and subscribers
    pub notifications: usize,
    /// Nobody was subscribed when the send started
    pub no_subscribers: bool,
    /// The payload could not be split; nothing was sent
    pub rejected: bool,
}

impl DeliveryReport {
    /// Report for a send skipped because the subscriber set was empty
    pub fn unsubscribed(chunks: usize) -> Self {
        Self {
            chunks,
            failed_chunks: chunks,
            no_subscribers: true,
            ..Self::default()
        }
    }

    /// Report for a payload the chunker refused
    pub fn rejected() -> Self {
        Self {
            rejected: true,
            ..Self::default()
        }
    }

    /// Every chunk reached every subscriber present when it was sent
    pub fn is_success(&self) -> bool {
        !self.no_subscribers && !self.rejected && self.failed_chunks == 0
    }

    /// Nothing was sent because nobody was subscribed
    pub fn had_no_subscribers(&self) -> bool {
        self.no_subscribers
    }
}
