//! Minimal CAR v1 reader.
//!
//! A commit's block bundle is a CARv1 byte string: a varint-prefixed DAG-CBOR
//! header `{version: 1, roots: [...]}` followed by sections of
//! `varint(length) || CID || block bytes`. The service only ever needs to
//! look blocks up by the CIDs named in commit operations, so this parses just
//! enough CID structure to know where the block bytes start.

use std::collections::HashMap;
use std::fmt;

use ciborium::value::Value;

use symmsync_core::SyncError;

/// Binary content identifier, kept as raw bytes. Equality and hashing are
/// over the exact byte representation, which is how commit operations
/// reference bundle entries.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Cid(Vec<u8>);

impl Cid {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// From a DAG-CBOR tag-42 payload: a multibase identity prefix (0x00)
    /// followed by the binary CID.
    pub fn from_tagged(bytes: &[u8]) -> Result<Self, SyncError> {
        match bytes.split_first() {
            Some((0x00, rest)) if !rest.is_empty() => Ok(Self(rest.to_vec())),
            _ => Err(SyncError::Decode("malformed tag-42 CID".into())),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        write!(f, "Cid({}…)", &hex[..hex.len().min(16)])
    }
}

/// Decoded CAR bundle: root CIDs and a block lookup table.
pub struct CarFile {
    pub roots: Vec<Cid>,
    pub blocks: HashMap<Cid, Vec<u8>>,
}

impl CarFile {
    pub fn decode(data: &[u8]) -> Result<Self, SyncError> {
        let mut reader = ByteReader::new(data);

        let header_len = reader.read_varint()? as usize;
        let header_bytes = reader.read_exact(header_len)?;
        let header: Value = ciborium::de::from_reader(header_bytes)
            .map_err(|e| SyncError::Decode(format!("CAR header: {e}")))?;
        let roots = parse_roots(&header)?;

        let mut blocks = HashMap::new();
        while !reader.is_empty() {
            let section_len = reader.read_varint()? as usize;
            let section = reader.read_exact(section_len)?;
            let mut section_reader = ByteReader::new(section);
            let cid = read_cid(&mut section_reader)?;
            blocks.insert(cid, section_reader.rest().to_vec());
        }

        Ok(Self { roots, blocks })
    }

    pub fn get(&self, cid: &Cid) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }
}

fn parse_roots(header: &Value) -> Result<Vec<Cid>, SyncError> {
    let Value::Map(entries) = header else {
        return Err(SyncError::Decode("CAR header is not a map".into()));
    };
    let roots = entries
        .iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == "roots"))
        .map(|(_, v)| v);
    let Some(Value::Array(items)) = roots else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .map(|item| match item {
            Value::Tag(42, inner) => match inner.as_ref() {
                Value::Bytes(bytes) => Cid::from_tagged(bytes),
                _ => Err(SyncError::Decode("CAR root tag without bytes".into())),
            },
            _ => Err(SyncError::Decode("CAR root is not a CID".into())),
        })
        .collect()
}

/// Parse one binary CID, consuming exactly its bytes from the reader.
fn read_cid(reader: &mut ByteReader<'_>) -> Result<Cid, SyncError> {
    let start = reader.pos;

    // CIDv0 is a bare sha2-256 multihash (0x12 0x20 + 32 bytes); everything
    // the relay emits today is CIDv1, but both shapes are cheap to accept.
    if reader.peek() == Some(0x12) {
        reader.read_exact(2)?;
        reader.read_exact(32)?;
        return Ok(Cid::from_bytes(reader.slice_from(start).to_vec()));
    }

    let version = reader.read_varint()?;
    if version != 1 {
        return Err(SyncError::Decode(format!("unsupported CID version {version}")));
    }
    let _codec = reader.read_varint()?;
    let _hash_code = reader.read_varint()?;
    let hash_len = reader.read_varint()? as usize;
    reader.read_exact(hash_len)?;
    Ok(Cid::from_bytes(reader.slice_from(start).to_vec()))
}

// ── Byte-level plumbing ──────────────────────────────────────────────────────

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn slice_from(&self, start: usize) -> &'a [u8] {
        &self.data[start..self.pos]
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], SyncError> {
        if self.pos + n > self.data.len() {
            return Err(SyncError::Decode("truncated CAR data".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Unsigned LEB128.
    fn read_varint(&mut self) -> Result<u64, SyncError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self
                .data
                .get(self.pos)
                .copied()
                .ok_or_else(|| SyncError::Decode("truncated varint".into()))?;
            self.pos += 1;
            if shift >= 64 {
                return Err(SyncError::Decode("varint overflow".into()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}

/// Unsigned LEB128 encoder, the inverse of `ByteReader::read_varint`.
pub(crate) fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
