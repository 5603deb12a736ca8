//! ClientHello extraction from raw TLS records.
//!
//! The input is whatever the peer sent before the handshake callback fired:
//! one or more handshake records carrying the ClientHello, possibly followed
//! by more bytes. Only the parsed view is derived here; the raw bytes stay
//! untouched so a reaction can replay them verbatim.

use thiserror::Error;

const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const RECORD_HEADER_LEN: usize = 5;
const MAX_RECORD_PAYLOAD: usize = 1 << 14;

/// Extension carrying the host name (RFC 6066).
pub const EXT_SERVER_NAME: u16 = 0;
/// Extension carrying the session ticket (RFC 5077).
pub const EXT_SESSION_TICKET: u16 = 35;

/// Why the captured bytes are not a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("record stream ends before the ClientHello is complete")]
    Incomplete,

    #[error("record content type {0} is not handshake")]
    NotHandshake(u8),

    #[error("handshake message type {0} is not ClientHello")]
    NotClientHello(u8),

    #[error("record payload of {0} bytes exceeds the TLS limit")]
    RecordTooLarge(usize),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("unexpected trailing bytes in {0}")]
    Trailing(&'static str),

    #[error("oversized {0}")]
    Oversized(&'static str),
}

/// One extension as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: u16,
    pub data: Vec<u8>,
}

/// Parsed view over a captured ClientHello.
#[derive(Debug, Clone)]
pub struct ParsedClientHello {
    pub legacy_version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
    pub server_name: Option<String>,
    /// The session ticket extension was present, even if empty.
    pub ticket_supported: bool,
    /// Contents of the session ticket extension; empty when absent or offered empty.
    pub session_ticket: Vec<u8>,
    raw: Vec<u8>,
    records_len: usize,
}

impl ParsedClientHello {
    /// Parse the ClientHello at the start of `raw`.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let (message, records_len) = reassemble(raw)?;
        let mut r = Reader::new(&message);

        let msg_type = r.u8("handshake type")?;
        if msg_type != HANDSHAKE_CLIENT_HELLO {
            return Err(ParseError::NotClientHello(msg_type));
        }
        let body_len = r.u24("handshake length")?;
        let mut body = Reader::new(r.take(body_len, "handshake body")?);

        let legacy_version = body.u16("client version")?;
        let mut random = [0u8; 32];
        random.copy_from_slice(body.take(32, "random")?);

        let session_id = body.vec_u8("session id")?.to_vec();
        if session_id.len() > 32 {
            return Err(ParseError::Oversized("session id"));
        }

        let suites = body.vec_u16("cipher suites")?;
        if suites.len() % 2 != 0 {
            return Err(ParseError::Truncated("cipher suites"));
        }
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        let compression_methods = body.vec_u8("compression methods")?.to_vec();

        let mut extensions = Vec::new();
        if !body.is_empty() {
            let mut block = Reader::new(body.vec_u16("extensions")?);
            while !block.is_empty() {
                let extension_type = block.u16("extension type")?;
                let data = block.vec_u16("extension data")?.to_vec();
                extensions.push(Extension {
                    extension_type,
                    data,
                });
            }
        }
        if !body.is_empty() {
            return Err(ParseError::Trailing("ClientHello"));
        }

        let ticket = extensions
            .iter()
            .find(|ext| ext.extension_type == EXT_SESSION_TICKET);
        let ticket_supported = ticket.is_some();
        let session_ticket = ticket.map(|ext| ext.data.clone()).unwrap_or_default();

        let server_name = extensions
            .iter()
            .find(|ext| ext.extension_type == EXT_SERVER_NAME)
            .and_then(|ext| parse_server_name(&ext.data));

        Ok(Self {
            legacy_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
            server_name,
            ticket_supported,
            session_ticket,
            raw: raw.to_vec(),
            records_len,
        })
    }

    /// The exact records that carried the ClientHello.
    pub fn record_bytes(&self) -> &[u8] {
        &self.raw[..self.records_len]
    }

    /// Everything captured, including bytes that followed the ClientHello.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Join handshake fragments until one full handshake message is available.
///
/// Returns the message and the number of raw bytes its records occupied.
fn reassemble(raw: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut message = Vec::new();
    let mut offset = 0;

    loop {
        if raw.len() < offset + RECORD_HEADER_LEN {
            return Err(ParseError::Incomplete);
        }
        let header = &raw[offset..offset + RECORD_HEADER_LEN];
        if header[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(ParseError::NotHandshake(header[0]));
        }
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if len > MAX_RECORD_PAYLOAD {
            return Err(ParseError::RecordTooLarge(len));
        }
        let start = offset + RECORD_HEADER_LEN;
        let end = start + len;
        if raw.len() < end {
            return Err(ParseError::Incomplete);
        }
        message.extend_from_slice(&raw[start..end]);
        offset = end;

        if message.len() >= 4 {
            let needed = 4 + u32::from_be_bytes([0, message[1], message[2], message[3]]) as usize;
            if message.len() >= needed {
                if message.len() > needed {
                    return Err(ParseError::Trailing("handshake record"));
                }
                return Ok((message, offset));
            }
        }
    }
}

fn parse_server_name(data: &[u8]) -> Option<String> {
    let mut list = Reader::new(data);
    let mut names = Reader::new(list.vec_u16("server name list").ok()?);
    while !names.is_empty() {
        let name_type = names.u8("name type").ok()?;
        let name = names.vec_u16("host name").ok()?;
        if name_type == 0 {
            return String::from_utf8(name.to_vec()).ok();
        }
    }
    None
}

/// Big-endian cursor over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ParseError> {
        if self.buf.len() < n {
            return Err(ParseError::Truncated(what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ParseError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ParseError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, what: &'static str) -> Result<usize, ParseError> {
        let b = self.take(3, what)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]) as usize)
    }

    fn vec_u8(&mut self, what: &'static str) -> Result<&'a [u8], ParseError> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    fn vec_u16(&mut self, what: &'static str) -> Result<&'a [u8], ParseError> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }
}
