use tracing::warn;

/// Upper bound on how much unterminated Annex-B data the splitter will
/// accumulate before it starts discarding the oldest half to cap memory
/// (§4.4: "the scan window is bounded; when the accumulation buffer
/// exceeds 128 KiB without finding a boundary, the oldest half is
/// discarded"). This is a memory cap, not an error — a producer that never
/// emits a start code for a long stretch just loses the stale prefix
/// rather than hanging the demux task on an unbounded allocation.
pub const MAX_ACCUMULATOR_BYTES: usize = 128 * 1024;

/// Splits a raw Annex-B byte stream into access units, delimited by
/// `00 00 01` / `00 00 00 01` start codes.
///
/// Fed chunks of arbitrary size (as read off a pipe) via [`push`]; emits
/// one access unit each time a new start code is found after an existing
/// one, i.e. it always yields complete units, never a dangling prefix.
pub struct NalSplitter {
    buf: Vec<u8>,
}

impl NalSplitter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends `chunk` and returns every complete access unit that can now
    /// be extracted. The last (possibly partial) unit always remains
    /// buffered for the next call, unless it has grown past
    /// [`MAX_ACCUMULATOR_BYTES`], in which case its oldest half is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let starts = start_code_offsets(&self.buf);
        let units = if starts.len() < 2 {
            Vec::new()
        } else {
            let mut units = Vec::with_capacity(starts.len() - 1);
            for window in starts.windows(2) {
                let (start, end) = (window[0], window[1]);
                units.push(self.buf[start..end].to_vec());
            }
            let tail_start = *starts.last().unwrap();
            self.buf.drain(..tail_start);
            units
        };

        if self.buf.len() > MAX_ACCUMULATOR_BYTES {
            let half = self.buf.len() / 2;
            warn!(
                accumulated = self.buf.len(),
                bound = MAX_ACCUMULATOR_BYTES,
                "NAL accumulator exceeded its bound with no start code; discarding oldest half"
            );
            self.buf.drain(..half);
        }

        units
    }

    /// Flushes whatever remains buffered, treating it as a final access
    /// unit (used when the producer exits and no further start code will
    /// ever arrive to close it off).
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

impl Default for NalSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds the byte offset of every Annex-B start code in `buf`, preferring
/// the 4-byte form when a 3-byte match is immediately preceded by a zero.
fn start_code_offsets(buf: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut i = 0;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
            let start = if i > 0 && buf[i - 1] == 0 { i - 1 } else { i };
            offsets.push(start);
            i += 3;
        } else {
            i += 1;
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nal(marker: u8) -> Vec<u8> {
        let mut unit = vec![0, 0, 0, 1];
        unit.extend_from_slice(&[marker; 8]);
        unit
    }

    #[test]
    fn splits_two_back_to_back_units() {
        let mut splitter = NalSplitter::new();
        let mut stream = nal(1);
        stream.extend_from_slice(&nal(2));

        let units = splitter.push(&stream);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0], nal(1));

        let tail = splitter.flush().unwrap();
        assert_eq!(tail, nal(2));
    }

    #[test]
    fn handles_unit_split_across_pushes() {
        let mut splitter = NalSplitter::new();
        let mut stream = nal(1);
        stream.extend_from_slice(&nal(2));
        let (first_half, second_half) = stream.split_at(6);

        assert!(splitter.push(first_half).is_empty());
        let units = splitter.push(second_half);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0], nal(1));
    }

    #[test]
    fn overflow_discards_the_oldest_half_instead_of_erroring() {
        let mut splitter = NalSplitter::new();
        let junk = vec![0xffu8; MAX_ACCUMULATOR_BYTES + 1];
        let units = splitter.push(&junk);
        assert!(units.is_empty());
        assert!(splitter.buf.len() <= MAX_ACCUMULATOR_BYTES);

        // The splitter keeps working afterward: a start code fed next is
        // still found and flushed out normally.
        let mut stream = nal(1);
        stream.extend_from_slice(&nal(2));
        let units = splitter.push(&stream);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0], nal(1));
    }

    #[test]
    fn three_byte_start_code_is_recognized() {
        let mut splitter = NalSplitter::new();
        let mut stream = vec![0, 0, 1, 9, 9, 9];
        stream.extend_from_slice(&[0, 0, 1, 8, 8, 8]);
        let units = splitter.push(&stream);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0], vec![0, 0, 1, 9, 9, 9]);
    }
}
