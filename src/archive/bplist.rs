//! Binary property list container.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ magic "bplist00" (8 bytes)                   │
//! ├──────────────────────────────────────────────┤
//! │ object records, each starting with a marker  │
//! │   high nibble = type, low nibble = size/len  │
//! ├──────────────────────────────────────────────┤
//! │ offset table: object_count × offset_size     │
//! ├──────────────────────────────────────────────┤
//! │ trailer (32 bytes, big-endian)               │
//! │   unused[5], sort_version u8,                │
//! │   offset_size u8, ref_size u8,               │
//! │   object_count u64, top_object u64,          │
//! │   offset_table_offset u64                    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Records are parsed into [`RawObject`]s whose container members are plain
//! indices into the same table. Every index is checked against the object
//! count after all records are read, since records may point forward.

use super::error::DecodeError;

pub const MAGIC: &[u8; 8] = b"bplist00";
pub const TRAILER_SIZE: usize = 32;
pub const MIN_LEN: usize = MAGIC.len() + 1 + TRAILER_SIZE;

/// One record from the container, before keyed-archive interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawObject {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    /// Seconds since 2001-01-01.
    Date(f64),
    Data(Vec<u8>),
    String(String),
    Uid(u64),
    Array(Vec<usize>),
    Set(Vec<usize>),
    Dict(Vec<(usize, usize)>),
}

impl RawObject {
    pub fn is_container(&self) -> bool {
        matches!(self, RawObject::Array(_) | RawObject::Set(_) | RawObject::Dict(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub offset_size: usize,
    pub ref_size: usize,
    pub object_count: usize,
    pub top_object: usize,
    pub offset_table_offset: usize,
}

/// Parsed container: the flat record table and the index of the top record.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub objects: Vec<RawObject>,
    pub top: usize,
}

impl Container {
    pub fn top_object(&self) -> &RawObject {
        &self.objects[self.top]
    }

    pub fn get(&self, index: usize) -> Option<&RawObject> {
        self.objects.get(index)
    }

    /// Look up a string-keyed entry in a dictionary record.
    pub fn dict_get(&self, entries: &[(usize, usize)], key: &str) -> Option<usize> {
        entries.iter().find_map(|(k, v)| match self.objects.get(*k) {
            Some(RawObject::String(s)) if s == key => Some(*v),
            _ => None,
        })
    }
}

pub fn parse(bytes: &[u8]) -> Result<Container, DecodeError> {
    if bytes.len() < MIN_LEN {
        return Err(DecodeError::malformed(format!(
            "buffer is {} bytes, minimum is {}",
            bytes.len(),
            MIN_LEN
        )));
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(DecodeError::malformed("missing bplist00 header"));
    }

    let trailer = read_trailer(bytes)?;
    let offsets = read_offset_table(bytes, &trailer)?;

    let reader = RecordReader {
        bytes,
        end: bytes.len() - TRAILER_SIZE,
        ref_size: trailer.ref_size,
    };

    let mut objects = Vec::with_capacity(offsets.len());
    for offset in offsets {
        objects.push(reader.read_object(offset)?);
    }

    // Second pass: references may point forward, so check them once all records exist
    let count = objects.len();
    let check = |index: usize| -> Result<(), DecodeError> {
        if index < count {
            Ok(())
        } else {
            Err(DecodeError::malformed(format!(
                "object reference {} outside table of {}",
                index, count
            )))
        }
    };
    for object in &objects {
        match object {
            RawObject::Array(items) | RawObject::Set(items) => {
                items.iter().try_for_each(|i| check(*i))?;
            }
            RawObject::Dict(entries) => {
                entries.iter().try_for_each(|(k, v)| {
                    check(*k)?;
                    check(*v)
                })?;
            }
            _ => {}
        }
    }

    Ok(Container {
        objects,
        top: trailer.top_object,
    })
}

fn read_trailer(bytes: &[u8]) -> Result<Trailer, DecodeError> {
    let t = &bytes[bytes.len() - TRAILER_SIZE..];
    let offset_size = t[6] as usize;
    let ref_size = t[7] as usize;
    let object_count = be_u64(&t[8..16]);
    let top_object = be_u64(&t[16..24]);
    let offset_table_offset = be_u64(&t[24..32]);

    if !(1..=8).contains(&offset_size) || !(1..=8).contains(&ref_size) {
        return Err(DecodeError::malformed(format!(
            "invalid offset size {} or reference size {}",
            offset_size, ref_size
        )));
    }

    let table_end = bytes.len() - TRAILER_SIZE;
    let object_count = usize::try_from(object_count)
        .map_err(|_| DecodeError::malformed("object count overflows"))?;
    let offset_table_offset = usize::try_from(offset_table_offset)
        .map_err(|_| DecodeError::malformed("offset table offset overflows"))?;
    let table_len = object_count
        .checked_mul(offset_size)
        .ok_or_else(|| DecodeError::malformed("offset table size overflows"))?;

    if object_count == 0 {
        return Err(DecodeError::malformed("archive has no objects"));
    }
    if offset_table_offset < MAGIC.len()
        || offset_table_offset
            .checked_add(table_len)
            .map_or(true, |end| end > table_end)
    {
        return Err(DecodeError::malformed(format!(
            "offset table at {} (+{} bytes) lies outside buffer of {}",
            offset_table_offset,
            table_len,
            bytes.len()
        )));
    }
    let top_object = usize::try_from(top_object)
        .ok()
        .filter(|top| *top < object_count)
        .ok_or_else(|| DecodeError::malformed(format!("top object {} out of range", top_object)))?;

    Ok(Trailer {
        offset_size,
        ref_size,
        object_count,
        top_object,
        offset_table_offset,
    })
}

fn read_offset_table(bytes: &[u8], trailer: &Trailer) -> Result<Vec<usize>, DecodeError> {
    let start = trailer.offset_table_offset;
    let table = &bytes[start..start + trailer.object_count * trailer.offset_size];
    table
        .chunks_exact(trailer.offset_size)
        .map(|chunk| {
            let offset = be_uint(chunk) as usize;
            if offset < MAGIC.len() || offset >= trailer.offset_table_offset {
                Err(DecodeError::malformed(format!(
                    "object offset {} outside object region",
                    offset
                )))
            } else {
                Ok(offset)
            }
        })
        .collect()
}

struct RecordReader<'a> {
    bytes: &'a [u8],
    /// First byte past the object region (start of the trailer).
    end: usize,
    ref_size: usize,
}

impl<'a> RecordReader<'a> {
    fn take(&self, offset: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.end.saturating_sub(offset);
        if len > available {
            return Err(DecodeError::TruncatedRecord {
                offset,
                needed: len,
                available,
            });
        }
        Ok(&self.bytes[offset..offset + len])
    }

    /// Decode the length nibble of a variable-length record. Returns the
    /// length and the offset of the record body.
    fn length(&self, offset: usize, nibble: u8) -> Result<(usize, usize), DecodeError> {
        if nibble != 0x0F {
            return Ok((nibble as usize, offset + 1));
        }
        let marker = self.take(offset + 1, 1)?[0];
        if marker >> 4 != 0x1 {
            return Err(DecodeError::UnknownTag {
                tag: marker,
                offset: offset + 1,
            });
        }
        let width = 1usize << (marker & 0x0F);
        if width > 8 {
            return Err(DecodeError::malformed(format!(
                "length integer of {} bytes at offset {}",
                width,
                offset + 1
            )));
        }
        let raw = be_uint(self.take(offset + 2, width)?);
        let len = usize::try_from(raw)
            .map_err(|_| DecodeError::malformed(format!("length {} overflows", raw)))?;
        Ok((len, offset + 2 + width))
    }

    fn refs(&self, offset: usize, count: usize) -> Result<Vec<usize>, DecodeError> {
        let total = count
            .checked_mul(self.ref_size)
            .ok_or_else(|| DecodeError::malformed("reference list overflows"))?;
        let body = self.take(offset, total)?;
        Ok(body
            .chunks_exact(self.ref_size)
            .map(|chunk| be_uint(chunk) as usize)
            .collect())
    }

    fn read_object(&self, offset: usize) -> Result<RawObject, DecodeError> {
        let marker = self.take(offset, 1)?[0];
        let nibble = marker & 0x0F;

        match marker >> 4 {
            0x0 => match marker {
                0x00 | 0x0F => Ok(RawObject::Null),
                0x08 => Ok(RawObject::Bool(false)),
                0x09 => Ok(RawObject::Bool(true)),
                _ => Err(DecodeError::UnknownTag { tag: marker, offset }),
            },
            0x1 => {
                let width = 1usize << nibble;
                let body = self.take(offset + 1, width)?;
                Ok(RawObject::Int(read_int(body, offset)?))
            }
            0x2 => match nibble {
                2 => {
                    let body = self.take(offset + 1, 4)?;
                    Ok(RawObject::Real(f32::from_be_bytes([body[0], body[1], body[2], body[3]]) as f64))
                }
                3 => Ok(RawObject::Real(be_f64(self.take(offset + 1, 8)?))),
                _ => Err(DecodeError::UnknownTag { tag: marker, offset }),
            },
            0x3 if marker == 0x33 => Ok(RawObject::Date(be_f64(self.take(offset + 1, 8)?))),
            0x4 => {
                let (len, body) = self.length(offset, nibble)?;
                Ok(RawObject::Data(self.take(body, len)?.to_vec()))
            }
            0x5 => {
                let (len, body) = self.length(offset, nibble)?;
                let raw = self.take(body, len)?;
                Ok(RawObject::String(String::from_utf8_lossy(raw).into_owned()))
            }
            0x6 => {
                let (len, body) = self.length(offset, nibble)?;
                let byte_len = len
                    .checked_mul(2)
                    .ok_or_else(|| DecodeError::malformed("UTF-16 length overflows"))?;
                let raw = self.take(body, byte_len)?;
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(RawObject::String(String::from_utf16_lossy(&units)))
            }
            0x8 => {
                let body = self.take(offset + 1, nibble as usize + 1)?;
                if body.len() > 8 {
                    return Err(DecodeError::malformed(format!("UID wider than 8 bytes at offset {}", offset)));
                }
                Ok(RawObject::Uid(be_uint(body)))
            }
            0xA => {
                let (len, body) = self.length(offset, nibble)?;
                Ok(RawObject::Array(self.refs(body, len)?))
            }
            0xC => {
                let (len, body) = self.length(offset, nibble)?;
                Ok(RawObject::Set(self.refs(body, len)?))
            }
            0xD => {
                let (len, body) = self.length(offset, nibble)?;
                let keys = self.refs(body, len)?;
                let values = self.refs(body + len * self.ref_size, len)?;
                Ok(RawObject::Dict(keys.into_iter().zip(values).collect()))
            }
            _ => Err(DecodeError::UnknownTag { tag: marker, offset }),
        }
    }
}

/// Integers of 1, 2 and 4 bytes are unsigned; 8 and 16 bytes are signed.
fn read_int(body: &[u8], offset: usize) -> Result<i64, DecodeError> {
    match body.len() {
        1 | 2 | 4 => Ok(be_uint(body) as i64),
        8 => Ok(be_uint(body) as i64),
        16 => {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(body);
            i64::try_from(i128::from_be_bytes(buf)).map_err(|_| {
                DecodeError::malformed(format!("128-bit integer at offset {} does not fit in 64 bits", offset))
            })
        }
        n => Err(DecodeError::malformed(format!("integer of {} bytes at offset {}", n, offset))),
    }
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

fn be_u64(bytes: &[u8]) -> u64 {
    be_uint(&bytes[..8])
}

fn be_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    f64::from_be_bytes(buf)
}
