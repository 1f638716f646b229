/*!
STX/ETX telegram framing over a TCP byte stream.

Bytes arrive in arbitrary chunks. The assembler buffers them and hands out each
complete `STX payload ETX` span in arrival order, keeping any incomplete tail
for the next read.
*/

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};
use crate::protocol::{ETX, STX};

/// Incremental telegram assembler for one connection
pub struct FrameAssembler {
    buffer: BytesMut,
    /// Position of the STX that opens the telegram being collected
    pending_start: Option<usize>,
    /// Everything before this offset has already been searched
    scanned: usize,
    max_buffered: Option<usize>,
    telegrams: u64,
    resyncs: u64,
}

impl FrameAssembler {
    /// Create an assembler with an unbounded buffer
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            pending_start: None,
            scanned: 0,
            max_buffered: None,
            telegrams: 0,
            resyncs: 0,
        }
    }

    /// Create an assembler that resynchronises once more than `max_buffered`
    /// bytes are waiting without a complete telegram
    pub fn with_limit(max_buffered: Option<usize>) -> Self {
        Self {
            max_buffered,
            ..Self::new()
        }
    }

    /// Append received bytes and return every telegram payload completed by them
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);

        let mut payloads = Vec::new();
        loop {
            let start = match self.pending_start {
                Some(start) => start,
                None => match find(&self.buffer[self.scanned..], STX) {
                    Some(offset) => {
                        let start = self.scanned + offset;
                        self.pending_start = Some(start);
                        self.scanned = start + 1;
                        start
                    }
                    None => {
                        self.scanned = self.buffer.len();
                        break;
                    }
                },
            };

            let Some(offset) = find(&self.buffer[self.scanned..], ETX) else {
                self.scanned = self.buffer.len();
                break;
            };
            let end = self.scanned + offset;

            // Drop anything before the STX, then split off "payload ETX"
            self.buffer.advance(start + 1);
            let mut telegram = self.buffer.split_to(end - start);
            telegram.truncate(telegram.len() - 1);
            payloads.push(telegram.freeze());

            self.pending_start = None;
            self.scanned = 0;
            self.telegrams += 1;
        }

        self.enforce_limit();

        if !payloads.is_empty() {
            debug!("Assembled {} telegram(s), {} bytes still buffered", payloads.len(), self.buffer.len());
        }
        payloads
    }

    /// Discard stale bytes when the buffer outgrows its limit
    fn enforce_limit(&mut self) {
        let Some(limit) = self.max_buffered else {
            return;
        };
        if self.buffer.len() <= limit {
            return;
        }

        let before = self.buffer.len();
        // Keep the newest STX onwards; it is the most likely real telegram start
        let keep_from = self.pending_start.map(|start| {
            rfind(&self.buffer[start + 1..], STX).map_or(start, |offset| start + 1 + offset)
        });

        match keep_from {
            Some(start) if self.buffer.len() - start <= limit => {
                self.buffer.advance(start);
                self.pending_start = Some(0);
                self.scanned = self.buffer.len();
            }
            _ => {
                self.buffer.clear();
                self.pending_start = None;
                self.scanned = 0;
            }
        }

        self.resyncs += 1;
        warn!("⚠️ Telegram buffer exceeded {} bytes without an end marker, discarded {} bytes",
              limit, before - self.buffer.len());
    }

    /// Number of bytes waiting for a complete telegram
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Get statistics (telegrams assembled, forced resyncs)
    pub fn stats(&self) -> (u64, u64) {
        (self.telegrams, self.resyncs)
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn rfind(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().rposition(|&b| b == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Vec<u8> {
        b"\x02sRA first\x03junk\x02sSN LMDscandata 1 2\x03\x02third telegram\x03".to_vec()
    }

    fn collect(payloads: Vec<Bytes>) -> Vec<Vec<u8>> {
        payloads.into_iter().map(|p| p.to_vec()).collect()
    }

    #[test]
    fn test_back_to_back_telegrams() {
        let mut assembler = FrameAssembler::new();
        let payloads = collect(assembler.push(&stream()));

        assert_eq!(payloads, vec![
            b"sRA first".to_vec(),
            b"sSN LMDscandata 1 2".to_vec(),
            b"third telegram".to_vec(),
        ]);
        assert_eq!(assembler.buffered_len(), 0);
        assert_eq!(assembler.stats(), (3, 0));
    }

    #[test]
    fn test_every_two_way_split_matches_single_read() {
        let data = stream();
        let expected = collect(FrameAssembler::new().push(&data));

        for split in 0..=data.len() {
            let mut assembler = FrameAssembler::new();
            let mut payloads = collect(assembler.push(&data[..split]));
            payloads.extend(collect(assembler.push(&data[split..])));

            assert_eq!(payloads, expected, "split at {}", split);
            assert_eq!(assembler.buffered_len(), 0, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let data = stream();
        let mut assembler = FrameAssembler::new();
        let mut payloads = Vec::new();
        for byte in &data {
            payloads.extend(collect(assembler.push(std::slice::from_ref(byte))));
        }
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[2], b"third telegram".to_vec());
    }

    #[test]
    fn test_unmatched_start_is_retained() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(b"lead\x02partial payload").is_empty());
        assert_eq!(assembler.buffered_len(), 20);

        let payloads = collect(assembler.push(b" continues\x03"));
        assert_eq!(payloads, vec![b"partial payload continues".to_vec()]);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_end_marker_without_start_is_ignored() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(b"noise\x03more").is_empty());
        assert_eq!(assembler.buffered_len(), 10);

        let payloads = collect(assembler.push(b"\x02ok\x03"));
        assert_eq!(payloads, vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_empty_payload() {
        let mut assembler = FrameAssembler::new();
        let payloads = collect(assembler.push(b"\x02\x03"));
        assert_eq!(payloads, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_limit_resyncs_to_newest_start() {
        let mut assembler = FrameAssembler::with_limit(Some(16));
        assert!(assembler.push(b"\x02stray start with no end \x02real").is_empty());

        assert_eq!(assembler.buffered_len(), 5);
        assert_eq!(assembler.stats(), (0, 1));

        let payloads = collect(assembler.push(b" telegram\x03"));
        assert_eq!(payloads, vec![b"real telegram".to_vec()]);
    }

    #[test]
    fn test_limit_keeps_pending_start_after_noise() {
        let mut assembler = FrameAssembler::with_limit(Some(16));
        assert!(assembler.push(b"twenty bytes noise..\x02real start").is_empty());
        assert_eq!(assembler.buffered_len(), 11);
        assert_eq!(assembler.stats(), (0, 1));

        let payloads = collect(assembler.push(b" end\x03"));
        assert_eq!(payloads, vec![b"real start end".to_vec()]);
    }

    #[test]
    fn test_limit_clears_oversized_pending_telegram() {
        let mut assembler = FrameAssembler::with_limit(Some(8));
        assert!(assembler.push(b"\x02this telegram never ends").is_empty());
        assert_eq!(assembler.buffered_len(), 0);

        let payloads = collect(assembler.push(b"\x02ok\x03"));
        assert_eq!(payloads, vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_limit_clears_buffer_without_start() {
        let mut assembler = FrameAssembler::with_limit(Some(4));
        assert!(assembler.push(b"garbage bytes").is_empty());
        assert_eq!(assembler.buffered_len(), 0);
        assert_eq!(assembler.stats(), (0, 1));
    }
}
