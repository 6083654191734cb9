//! The accumulation-buffer parser: turns a byte stream into `CMD ARGS` records.

/// Accumulation buffer hard limit (spec §3 invariant 5 / §4.3).
pub const MAX_BUFFER_LEN: usize = 1024;

/// The literal CMD token that marks a line as a secure envelope
/// (`_: <base64-ciphertext>`).
pub const SECURE_CMD: &str = "_:";

/// One parsed `CMD ARGS` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub cmd: String,
    pub args: String,
}

impl Record {
    /// `true` if this record is the secure-envelope wrapper (`_: <base64>`).
    pub fn is_secure_envelope(&self) -> bool {
        self.cmd == SECURE_CMD
    }
}

/// Result of attempting to parse one record out of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Not enough data buffered yet; keep reading.
    Wait,
    /// A full record was parsed and consumed.
    Record(Record),
    /// Malformed framing (missing/misplaced space or LF). Close the connection.
    ProtocolError,
    /// Buffered length exceeded [`MAX_BUFFER_LEN`] before a record completed. Close the connection.
    Overflow,
}

fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Growable byte buffer implementing the parser rules of spec §4.3.
///
/// Bytes arrive via [`AccumulationBuffer::push`]; call
/// [`AccumulationBuffer::try_parse`] in a loop (it may yield more than one
/// record per push) until it returns [`ParseOutcome::Wait`].
#[derive(Default)]
pub struct AccumulationBuffer {
    buf: Vec<u8>,
}

impl AccumulationBuffer {
    /// A fresh, empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append newly-read bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Current buffered length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Attempt to parse and consume one record from the front of the buffer.
    pub fn try_parse(&mut self) -> ParseOutcome {
        if self.buf.len() < 4 {
            return ParseOutcome::Wait;
        }
        if self.buf.len() > MAX_BUFFER_LEN {
            return ParseOutcome::Overflow;
        }

        let space_idx = self.buf.iter().position(|&b| b == b' ');
        let lf_idx = self.buf.iter().position(|&b| b == b'\n');

        if space_idx.is_none() && lf_idx.is_some() {
            return ParseOutcome::ProtocolError;
        }
        if let Some(s) = space_idx {
            if s <= 1 {
                return ParseOutcome::ProtocolError;
            }
        }
        let Some(lf) = lf_idx else {
            return ParseOutcome::Wait;
        };
        let space = space_idx.expect("space present: ruled out above when lf is Some and space is None");
        if lf < space {
            return ParseOutcome::ProtocolError;
        }

        let cmd = latin1_decode(&self.buf[..space]).trim().to_string();
        let args = latin1_decode(&self.buf[space + 1..lf]).trim().to_string();

        let mut consumed = lf + 1;
        while consumed < self.buf.len() && matches!(self.buf[consumed], b'\n' | b'\r' | b' ') {
            consumed += 1;
        }
        self.buf.drain(..consumed);

        ParseOutcome::Record(Record { cmd, args })
    }
}

/// Encode a plain (non-secure) reply line: the text plus a trailing `\n`.
///
/// Callers in secure mode instead encrypt the text and pass the result to
/// [`encode_secure_envelope`].
pub fn encode_record(text: &str) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.push(b'\n');
    out
}

/// Frame an already-base64-encoded ciphertext as a secure-envelope line.
pub fn encode_secure_envelope(base64_ciphertext: &str) -> Vec<u8> {
    encode_record(&format!("{SECURE_CMD} {base64_ciphertext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_prefix_waits() {
        let mut b = AccumulationBuffer::new();
        b.push(b"ab");
        assert_eq!(b.try_parse(), ParseOutcome::Wait);
    }

    #[test]
    fn no_lf_waits() {
        let mut b = AccumulationBuffer::new();
        b.push(b"login abcdef");
        assert_eq!(b.try_parse(), ParseOutcome::Wait);
    }

    #[test]
    fn overflow_past_1024_closes() {
        let mut b = AccumulationBuffer::new();
        b.push(&vec![b'a'; 2000]);
        assert_eq!(b.try_parse(), ParseOutcome::Overflow);
    }

    #[test]
    fn missing_space_with_lf_is_protocol_error() {
        let mut b = AccumulationBuffer::new();
        b.push(b"justacommand\n");
        assert_eq!(b.try_parse(), ParseOutcome::ProtocolError);
    }

    #[test]
    fn lf_before_space_is_protocol_error() {
        let mut b = AccumulationBuffer::new();
        b.push(b"abc\ndef ghi\n");
        assert_eq!(b.try_parse(), ParseOutcome::ProtocolError);
    }

    #[test]
    fn space_at_index_zero_or_one_is_protocol_error() {
        let mut b = AccumulationBuffer::new();
        b.push(b" args\n");
        assert_eq!(b.try_parse(), ParseOutcome::ProtocolError);

        let mut b2 = AccumulationBuffer::new();
        b2.push(b"x args\n");
        assert_eq!(b2.try_parse(), ParseOutcome::ProtocolError);
    }

    #[test]
    fn well_formed_record_parses_and_consumes() {
        let mut b = AccumulationBuffer::new();
        b.push(b"block 2223\nmore");
        match b.try_parse() {
            ParseOutcome::Record(r) => {
                assert_eq!(r.cmd, "block");
                assert_eq!(r.args, "2223");
            }
            other => panic!("expected Record, got {other:?}"),
        }
        assert_eq!(b.len(), 4); // "more" left over
    }

    #[test]
    fn trailing_lf_cr_sp_run_is_skipped() {
        let mut b = AccumulationBuffer::new();
        b.push(b"block 2223\n\r\n \nlist ports\n");
        let first = b.try_parse();
        assert!(matches!(first, ParseOutcome::Record(_)));
        match b.try_parse() {
            ParseOutcome::Record(r) => {
                assert_eq!(r.cmd, "list");
                assert_eq!(r.args, "ports");
            }
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn secure_envelope_round_trips_through_the_framer() {
        let mut b = AccumulationBuffer::new();
        let line = encode_secure_envelope("Y2lwaGVydGV4dA==");
        b.push(&line);
        match b.try_parse() {
            ParseOutcome::Record(r) => {
                assert!(r.is_secure_envelope());
                assert_eq!(r.args, "Y2lwaGVydGV4dA==");
            }
            other => panic!("expected Record, got {other:?}"),
        }
    }
}
