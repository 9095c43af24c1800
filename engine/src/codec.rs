//! Binary entry wire format.
//!
//! Every entry is framed independently: a fixed 40-byte little-endian
//! header, the encoded key bytes, then the encoded value bytes. The header
//! carries the frame's `total_size`, so a concatenation of frames is
//! self-delimiting and streamable without an outer length prefix.
//!
//! Header layout (offsets in bytes):
//!
//! ```text
//!  0  total_size        u64
//!  8  header_version    u16
//! 10  key_size          u16
//! 12  key_encoding      u8
//! 13  value_encoding    u8
//! 14  encryption_method u8 (low nibble)
//! 15  flags             u8
//! 16  update_time       u64
//! 24  commit_time       u64   (0 = not committed)
//! 32  header_checksum   u32   (CRC32C over bytes 0..32)
//! 36  payload_checksum  u32   (CRC32C over key + value bytes)
//! ```
//!
//! Keys are encoded as the JSON string literal of the canonical path
//! string. Values pick the most specific encoding: raw bytes for top-level
//! byte sequences, UTF-8 for top-level strings, JSON when plain JSON can
//! round-trip the value, extended JSON otherwise.
//!
//! With encryption enabled (AES-CBC-128), key bytes are encrypted under a
//! fixed all-zero IV so equal keys produce equal ciphertext (the server can
//! group frames by key without decrypting), while value bytes get a fresh
//! random IV prepended to the ciphertext.

use std::collections::HashMap;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::entry::{Entry, EntryMetadata};
use crate::error::{Error, Result};
use crate::value::Value;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Size of the fixed entry header.
pub const HEADER_SIZE: usize = 40;

/// Current header version.
pub const HEADER_VERSION: u16 = 1;

const FLAG_TOMBSTONE: u8 = 0b0000_0001;
const FLAG_HEAD_ENTRY: u8 = 0b0000_0010;
const FLAG_CHECKSUMMED: u8 = 0b0000_0100;

const IV_SIZE: usize = 16;
const ZERO_IV: [u8; IV_SIZE] = [0u8; IV_SIZE];

/// Payload encodings for keys and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadEncoding {
    /// Raw bytes, passed through untouched
    Binary = 0,
    /// UTF-8 text
    Utf8 = 1,
    /// Plain JSON
    Json = 2,
    /// Extended JSON for values plain JSON cannot round-trip
    ExtendedJson = 3,
}

impl TryFrom<u8> for PayloadEncoding {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(PayloadEncoding::Binary),
            1 => Ok(PayloadEncoding::Utf8),
            2 => Ok(PayloadEncoding::Json),
            3 => Ok(PayloadEncoding::ExtendedJson),
            other => Err(Error::EntryCorrupted(format!("unknown encoding {other}"))),
        }
    }
}

/// Cipher ids carried in the header's encryption nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CipherMethod {
    None = 0,
    AesCbc128 = 1,
}

/// A 128-bit AES key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 16]);

impl EncryptionKey {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl From<[u8; 16]> for EncryptionKey {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

/// Serialize one entry into a self-delimiting frame.
pub fn serialize_entry(
    entry: &Entry,
    encryption_key: Option<&EncryptionKey>,
    add_checksums: bool,
) -> Result<Vec<u8>> {
    let mut key_bytes = serde_json::to_vec(&entry.key)?;
    let (value_encoding, mut value_bytes) = encode_value(entry.value.as_ref())?;

    let method = match encryption_key {
        Some(key) => {
            key_bytes = encrypt_zero_iv(key, &key_bytes);
            if !value_bytes.is_empty() {
                value_bytes = encrypt_random_iv(key, &value_bytes);
            }
            CipherMethod::AesCbc128
        }
        None => CipherMethod::None,
    };

    if key_bytes.len() > u16::MAX as usize {
        return Err(Error::KeyTooLong(key_bytes.len()));
    }

    let mut flags = 0u8;
    if entry.value.is_none() {
        flags |= FLAG_TOMBSTONE;
    }
    if entry.metadata.is_head_entry {
        flags |= FLAG_HEAD_ENTRY;
    }
    if add_checksums {
        flags |= FLAG_CHECKSUMMED;
    }

    let total_size = (HEADER_SIZE + key_bytes.len() + value_bytes.len()) as u64;
    let mut frame = Vec::with_capacity(total_size as usize);
    frame.extend_from_slice(&total_size.to_le_bytes());
    frame.extend_from_slice(&HEADER_VERSION.to_le_bytes());
    frame.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
    frame.push(PayloadEncoding::Json as u8);
    frame.push(value_encoding as u8);
    frame.push(method as u8);
    frame.push(flags);
    frame.extend_from_slice(&entry.metadata.update_time.to_le_bytes());
    frame.extend_from_slice(&entry.metadata.commit_time.unwrap_or(0).to_le_bytes());

    if add_checksums {
        let header_checksum = crc32c::crc32c(&frame[..32]);
        frame.extend_from_slice(&header_checksum.to_le_bytes());
        let mut payload_checksum = crc32c::crc32c(&key_bytes);
        payload_checksum = crc32c::crc32c_append(payload_checksum, &value_bytes);
        frame.extend_from_slice(&payload_checksum.to_le_bytes());
    } else {
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
    }

    frame.extend_from_slice(&key_bytes);
    frame.extend_from_slice(&value_bytes);
    Ok(frame)
}

/// Serialize a list of entries as a concatenation of frames.
pub fn serialize_entries(
    entries: &[Entry],
    encryption_key: Option<&EncryptionKey>,
    add_checksums: bool,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(&serialize_entry(entry, encryption_key, add_checksums)?);
    }
    Ok(out)
}

/// Deserialize a stream of frames back into entries.
///
/// With `verify_checksums` set, every frame must both carry checksums and
/// pass them; a frame without checksums is rejected as corrupt.
pub fn deserialize_entries(
    bytes: &[u8],
    decryption_key: Option<&EncryptionKey>,
    verify_checksums: bool,
) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let frame = Frame::read(bytes, offset)?;
        entries.push(frame.decode(bytes, decryption_key, verify_checksums)?);
        offset += frame.total_size;
    }
    Ok(entries)
}

/// Single-pass compaction: decode only the **last** occurrence of each
/// distinct key, in the original relative byte order of the survivors.
///
/// Keys are compared by their raw (possibly encrypted) bytes, so frames
/// superseded later in the stream are never decrypted or checksummed.
pub fn compact_and_deserialize_entries(
    bytes: &[u8],
    decryption_key: Option<&EncryptionKey>,
    verify_checksums: bool,
) -> Result<Vec<Entry>> {
    let mut survivors: HashMap<&[u8], usize> = HashMap::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let frame = Frame::read(bytes, offset)?;
        survivors.insert(frame.key_bytes(bytes), offset);
        offset += frame.total_size;
    }

    let mut offsets: Vec<usize> = survivors.into_values().collect();
    offsets.sort_unstable();

    let mut entries = Vec::with_capacity(offsets.len());
    for offset in offsets {
        let frame = Frame::read(bytes, offset)?;
        entries.push(frame.decode(bytes, decryption_key, verify_checksums)?);
    }
    Ok(entries)
}

/// A parsed header plus its position in the stream.
struct Frame {
    offset: usize,
    total_size: usize,
    key_size: usize,
    value_encoding: PayloadEncoding,
    encryption_method: u8,
    flags: u8,
    update_time: u64,
    commit_time: u64,
    header_checksum: u32,
    payload_checksum: u32,
}

impl Frame {
    fn read(bytes: &[u8], offset: usize) -> Result<Frame> {
        let header = bytes
            .get(offset..offset + HEADER_SIZE)
            .ok_or_else(|| Error::EntryCorrupted("truncated header".into()))?;

        let total_size = u64::from_le_bytes(header[0..8].try_into().expect("sized")) as usize;
        let header_version = u16::from_le_bytes(header[8..10].try_into().expect("sized"));
        let key_size = u16::from_le_bytes(header[10..12].try_into().expect("sized")) as usize;

        if header_version != HEADER_VERSION {
            return Err(Error::EntryCorrupted(format!(
                "unsupported header version {header_version}"
            )));
        }
        // The header slice above pins `offset + HEADER_SIZE <= bytes.len()`,
        // so the subtraction cannot underflow and a hostile `total_size`
        // cannot overflow the comparison.
        if total_size < HEADER_SIZE + key_size || total_size > bytes.len() - offset {
            return Err(Error::EntryCorrupted(format!(
                "total size {total_size} out of bounds"
            )));
        }

        Ok(Frame {
            offset,
            total_size,
            key_size,
            value_encoding: PayloadEncoding::try_from(header[13])?,
            encryption_method: header[14] & 0x0f,
            flags: header[15],
            update_time: u64::from_le_bytes(header[16..24].try_into().expect("sized")),
            commit_time: u64::from_le_bytes(header[24..32].try_into().expect("sized")),
            header_checksum: u32::from_le_bytes(header[32..36].try_into().expect("sized")),
            payload_checksum: u32::from_le_bytes(header[36..40].try_into().expect("sized")),
        })
    }

    fn key_bytes<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.offset + HEADER_SIZE..self.offset + HEADER_SIZE + self.key_size]
    }

    fn value_bytes<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.offset + HEADER_SIZE + self.key_size..self.offset + self.total_size]
    }

    fn decode(
        &self,
        bytes: &[u8],
        decryption_key: Option<&EncryptionKey>,
        verify_checksums: bool,
    ) -> Result<Entry> {
        if verify_checksums {
            // A frame claiming to carry no checksums cannot satisfy a caller
            // demanding verification; otherwise one flipped flag bit would
            // silence all checking.
            if self.flags & FLAG_CHECKSUMMED == 0 {
                return Err(Error::EntryCorrupted("frame carries no checksums".into()));
            }
            self.verify(bytes)?;
        }

        let mut key_bytes = self.key_bytes(bytes).to_vec();
        let mut value_bytes = self.value_bytes(bytes).to_vec();

        match self.encryption_method {
            m if m == CipherMethod::None as u8 => {}
            m if m == CipherMethod::AesCbc128 as u8 => {
                let key = decryption_key.ok_or(Error::NoDecryptionKey)?;
                key_bytes = decrypt_zero_iv(key, &key_bytes)?;
                if !value_bytes.is_empty() {
                    value_bytes = decrypt_random_iv(key, &value_bytes)?;
                }
            }
            other => return Err(Error::UnsupportedCipher(other)),
        }

        let key: String = serde_json::from_slice(&key_bytes)
            .map_err(|e| Error::EntryCorrupted(format!("bad key: {e}")))?;
        let value = if self.flags & FLAG_TOMBSTONE != 0 {
            None
        } else {
            Some(decode_value(self.value_encoding, &value_bytes)?)
        };

        Ok(Entry {
            key,
            value,
            metadata: EntryMetadata {
                update_time: self.update_time,
                commit_time: (self.commit_time != 0).then_some(self.commit_time),
                is_head_entry: self.flags & FLAG_HEAD_ENTRY != 0,
            },
        })
    }

    fn verify(&self, bytes: &[u8]) -> Result<()> {
        let header = &bytes[self.offset..self.offset + 32];
        if crc32c::crc32c(header) != self.header_checksum {
            return Err(Error::EntryCorrupted("header checksum mismatch".into()));
        }
        let payload = &bytes[self.offset + HEADER_SIZE..self.offset + self.total_size];
        if crc32c::crc32c(payload) != self.payload_checksum {
            return Err(Error::EntryCorrupted("payload checksum mismatch".into()));
        }
        Ok(())
    }
}

fn encode_value(value: Option<&Value>) -> Result<(PayloadEncoding, Vec<u8>)> {
    Ok(match value {
        None => (PayloadEncoding::Binary, Vec::new()),
        Some(Value::Bytes(bytes)) => (PayloadEncoding::Binary, bytes.clone()),
        Some(Value::String(text)) => (PayloadEncoding::Utf8, text.clone().into_bytes()),
        Some(value) => match value.to_plain_json() {
            Some(json) => (PayloadEncoding::Json, serde_json::to_vec(&json)?),
            None => (
                PayloadEncoding::ExtendedJson,
                serde_json::to_vec(&value.to_extended_json())?,
            ),
        },
    })
}

fn decode_value(encoding: PayloadEncoding, bytes: &[u8]) -> Result<Value> {
    Ok(match encoding {
        PayloadEncoding::Binary => Value::Bytes(bytes.to_vec()),
        PayloadEncoding::Utf8 => Value::String(
            String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::EntryCorrupted(format!("bad utf8 value: {e}")))?,
        ),
        PayloadEncoding::Json => Value::from_plain_json(
            &serde_json::from_slice(bytes)
                .map_err(|e| Error::EntryCorrupted(format!("bad json value: {e}")))?,
        ),
        PayloadEncoding::ExtendedJson => Value::from_extended_json(
            &serde_json::from_slice(bytes)
                .map_err(|e| Error::EntryCorrupted(format!("bad json value: {e}")))?,
        )?,
    })
}

fn encrypt_zero_iv(key: &EncryptionKey, plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(&key.0.into(), &ZERO_IV.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn encrypt_random_iv(key: &EncryptionKey, plaintext: &[u8]) -> Vec<u8> {
    let iv: [u8; IV_SIZE] = rand::random();
    let mut out = iv.to_vec();
    out.extend_from_slice(
        &Aes128CbcEnc::new(&key.0.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    );
    out
}

fn decrypt_zero_iv(key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    Aes128CbcDec::new(&key.0.into(), &ZERO_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::EntryCorrupted("decryption failed".into()))
}

fn decrypt_random_iv(key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < IV_SIZE {
        return Err(Error::EntryCorrupted("value ciphertext too short".into()));
    }
    let (iv, body) = ciphertext.split_at(IV_SIZE);
    let iv: [u8; IV_SIZE] = iv.try_into().expect("sized");
    Aes128CbcDec::new(&key.0.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| Error::EntryCorrupted("decryption failed".into()))
}
