//! xinfc tag record - Wi-Fi Simple Config credential wrapped in NDEF
//!
//! The layout is what Android and iOS expect when reading a Wi-Fi tag, so it is
//! reproduced byte for byte:
//!
//! ```text
//! 03 <30+P>                        NDEF message TLV
//! D2 17 <4+P>                      record header (MB|ME|SR, MIME), type length 23
//! "application/vnd.wfa.wsc"        record type
//! 10 0E <P:u16>                    credential, P = 35 + ssid + key
//!   10 26 00 01 01                 network index
//!   10 45 <len:u16> <ssid>         network name
//!   10 03 00 02 <auth:u16>         authentication type
//!   10 0F 00 02 <crypt:u16>        encryption type
//!   10 27 <len:u16> <key>          network key
//!   10 20 00 06 FF FF FF FF FF FE  MAC address
//! ```

use std::io;

pub mod wifi;

pub use wifi::{
    Auth, CredentialError, Crypt, ModeError, ModeSupport, WifiMode, lookup_mode, usable_modes,
    validate_passphrase, validate_ssid, MODES, PASS_MAX, PASS_MIN, SSID_MAX, SSID_MIN,
};

/// Largest NDEF area read from or written to the tag
pub const NDEF_CAPACITY: usize = 160;

// NDEF framing
pub const NDEF_MESSAGE_TLV: u8 = 0x03;
pub const NDEF_RECORD_HEADER: u8 = 0xD2;
pub const WSC_MIME_TYPE: &[u8] = b"application/vnd.wfa.wsc";

// WSC attribute tags
pub const ATTR_CREDENTIAL: u16 = 0x100E;
pub const ATTR_NETWORK_INDEX: u16 = 0x1026;
pub const ATTR_SSID: u16 = 0x1045;
pub const ATTR_AUTH_TYPE: u16 = 0x1003;
pub const ATTR_ENCR_TYPE: u16 = 0x100F;
pub const ATTR_NETWORK_KEY: u16 = 0x1027;
pub const ATTR_MAC_ADDRESS: u16 = 0x1020;

/// Placeholder MAC announced in the credential
pub const BROADCAST_MAC: [u8; 6] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE];

/// Bytes of the credential body besides SSID and key
const CREDENTIAL_OVERHEAD: usize = 35;
/// Bytes between the NDEF length byte and the credential body
const NDEF_OVERHEAD: usize = 30;
/// Capacity guard: the record never needs more than this plus SSID and key
const ENCODE_GUARD: usize = 69;

/// Fixed-capacity NDEF area
#[derive(Clone, PartialEq, Eq)]
pub struct NdefBuffer {
    bytes: [u8; NDEF_CAPACITY],
    len: usize,
}

impl NdefBuffer {
    pub fn new() -> Self {
        Self { bytes: [0u8; NDEF_CAPACITY], len: 0 }
    }

    /// Copy `data` into a new buffer, `None` if it does not fit
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > NDEF_CAPACITY {
            return None;
        }
        let mut buf = Self::new();
        buf.bytes[..data.len()].copy_from_slice(data);
        buf.len = data.len();
        Some(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        NDEF_CAPACITY
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Whole backing array, for use as a read destination
    pub fn as_mut_array(&mut self) -> &mut [u8; NDEF_CAPACITY] {
        &mut self.bytes
    }

    /// Mark the first `len` bytes of the backing array as valid
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(NDEF_CAPACITY);
    }

    /// Zero the backing array and reset the length
    pub fn clear(&mut self) {
        self.bytes = [0u8; NDEF_CAPACITY];
        self.len = 0;
    }
}

impl Default for NdefBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NdefBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdefBuffer").field("len", &self.len).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("NDEF record needs more than {capacity} bytes")]
    TooLarge { capacity: usize },
}

/// Write the WSC record into `out`
///
/// Returns the number of bytes written, or 0 when the record would not fit.
/// Length bounds of `ssid` and `passphrase` are the caller's concern.
pub fn encode_wsc(ssid: &[u8], passphrase: &[u8], crypt: Crypt, auth: Auth, out: &mut [u8]) -> usize {
    if ENCODE_GUARD + ssid.len() + passphrase.len() > out.len() {
        return 0;
    }

    let payload_len = CREDENTIAL_OVERHEAD + ssid.len() + passphrase.len();
    // short record: every length byte must fit in a u8
    if NDEF_OVERHEAD + payload_len > u8::MAX as usize {
        return 0;
    }
    let mut w = Writer { buf: out, pos: 0 };

    w.put(&[NDEF_MESSAGE_TLV, (NDEF_OVERHEAD + payload_len) as u8]);
    w.put(&[NDEF_RECORD_HEADER, WSC_MIME_TYPE.len() as u8, (4 + payload_len) as u8]);
    w.put(WSC_MIME_TYPE);

    w.attr_header(ATTR_CREDENTIAL, payload_len);
    w.attr(ATTR_NETWORK_INDEX, &[0x01]);
    w.attr(ATTR_SSID, ssid);
    w.attr(ATTR_AUTH_TYPE, &auth.as_u16().to_be_bytes());
    w.attr(ATTR_ENCR_TYPE, &crypt.as_u16().to_be_bytes());
    w.attr(ATTR_NETWORK_KEY, passphrase);
    w.attr(ATTR_MAC_ADDRESS, &BROADCAST_MAC);

    w.pos
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn put(&mut self, data: &[u8]) {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    fn attr_header(&mut self, tag: u16, len: usize) {
        self.put(&tag.to_be_bytes());
        self.put(&(len as u16).to_be_bytes());
    }

    fn attr(&mut self, tag: u16, value: &[u8]) {
        self.attr_header(tag, value.len());
        self.put(value);
    }
}

/// Wi-Fi credential as stored on the tag
#[derive(Clone, PartialEq, Eq)]
pub struct WscRecord {
    pub ssid: Vec<u8>,
    pub passphrase: Vec<u8>,
    pub crypt: Crypt,
    pub auth: Auth,
}

impl WscRecord {
    pub fn new(ssid: &[u8], passphrase: &[u8], crypt: Crypt, auth: Auth) -> Self {
        Self {
            ssid: ssid.to_vec(),
            passphrase: passphrase.to_vec(),
            crypt,
            auth,
        }
    }

    /// Build a record from a mode table entry, checking the length bounds
    pub fn with_mode(ssid: &str, passphrase: &str, mode: &WifiMode) -> Result<Self, CredentialError> {
        validate_ssid(ssid.as_bytes())?;
        validate_passphrase(passphrase.as_bytes())?;
        Ok(Self::new(ssid.as_bytes(), passphrase.as_bytes(), mode.crypt, mode.auth))
    }

    /// Number of bytes `encode_into` writes
    pub fn encoded_len(&self) -> usize {
        2 + NDEF_OVERHEAD + CREDENTIAL_OVERHEAD + self.ssid.len() + self.passphrase.len()
    }

    pub fn encode_into(&self, out: &mut [u8]) -> usize {
        encode_wsc(&self.ssid, &self.passphrase, self.crypt, self.auth, out)
    }

    pub fn encode(&self) -> Result<NdefBuffer, EncodeError> {
        let mut buf = NdefBuffer::new();
        let len = self.encode_into(buf.as_mut_array());
        if len == 0 {
            return Err(EncodeError::TooLarge { capacity: NDEF_CAPACITY });
        }
        buf.set_len(len);
        Ok(buf)
    }

    /// Parse a record in the layout written by `encode_into`
    ///
    /// Trailing bytes after the NDEF message (old tag content) are ignored.
    pub fn decode(data: &[u8]) -> io::Result<Self> {
        let mut r = Reader { data, pos: 0 };

        if r.u8("NDEF TLV")? != NDEF_MESSAGE_TLV {
            return Err(invalid("not an NDEF message TLV"));
        }
        let ndef_len = r.u8("NDEF length")? as usize;
        if data.len() < 2 + ndef_len {
            return Err(invalid("NDEF message truncated"));
        }

        if r.u8("record header")? != NDEF_RECORD_HEADER {
            return Err(invalid("unsupported NDEF record header"));
        }
        let type_len = r.u8("type length")? as usize;
        let record_len = r.u8("payload length")? as usize;
        if r.take(type_len, "record type")? != WSC_MIME_TYPE {
            return Err(invalid("record type is not application/vnd.wfa.wsc"));
        }

        let (tag, credential) = r.attr()?;
        if tag != ATTR_CREDENTIAL || credential.len() + 4 != record_len {
            return Err(invalid("missing WSC credential"));
        }

        let mut ssid = None;
        let mut passphrase = None;
        let mut crypt = None;
        let mut auth = None;

        let mut c = Reader { data: credential, pos: 0 };
        while c.pos < credential.len() {
            let (tag, value) = c.attr()?;
            match tag {
                ATTR_SSID => ssid = Some(value.to_vec()),
                ATTR_NETWORK_KEY => passphrase = Some(value.to_vec()),
                ATTR_AUTH_TYPE => {
                    let raw = be_u16(value).ok_or_else(|| invalid("bad auth type length"))?;
                    auth = Some(Auth::from_u16(raw).ok_or_else(|| invalid("unknown auth type"))?);
                }
                ATTR_ENCR_TYPE => {
                    let raw = be_u16(value).ok_or_else(|| invalid("bad encryption type length"))?;
                    crypt = Some(Crypt::from_u16(raw).ok_or_else(|| invalid("unknown encryption type"))?);
                }
                // network index, MAC address
                _ => {}
            }
        }

        Ok(Self {
            ssid: ssid.ok_or_else(|| invalid("credential has no SSID"))?,
            passphrase: passphrase.ok_or_else(|| invalid("credential has no network key"))?,
            crypt: crypt.ok_or_else(|| invalid("credential has no encryption type"))?,
            auth: auth.ok_or_else(|| invalid("credential has no auth type"))?,
        })
    }
}

impl std::fmt::Debug for WscRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WscRecord")
            .field("ssid", &String::from_utf8_lossy(&self.ssid))
            .field("passphrase", &"<redacted>")
            .field("crypt", &self.crypt)
            .field("auth", &self.auth)
            .finish()
    }
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn be_u16(value: &[u8]) -> Option<u16> {
    let bytes: [u8; 2] = value.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> io::Result<&'a [u8]> {
        if self.data.len() < self.pos + n {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("{what} truncated")));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> io::Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn attr(&mut self) -> io::Result<(u16, &'a [u8])> {
        let header = self.take(4, "attribute header")?;
        let tag = u16::from_be_bytes([header[0], header[1]]);
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let value = self.take(len, "attribute value")?;
        Ok((tag, value))
    }
}
