use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Cursor, Read, Write};

pub const FRAME_MAGIC: u32 = 0x4B564C47; // "KVLG"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordKind {
  Put = 0x00,
  Delete = 0x01,
}

impl TryFrom<u8> for RecordKind {
  type Error = Error;
  fn try_from(v: u8) -> Result<Self> {
    match v {
      0x00 => Ok(RecordKind::Put),
      0x01 => Ok(RecordKind::Delete),
      _ => Err(Error::Corruption(format!("Unknown record kind: {}", v))),
    }
  }
}

/// One mutation stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
  Put { key: Vec<u8>, value: Vec<u8> },
  Delete { key: Vec<u8> },
}

impl Record {
  /// Bytes this record contributes to a batch's buffered size.
  pub fn size(&self) -> usize {
    match self {
      Record::Put { key, value } => key.len() + value.len(),
      Record::Delete { key } => key.len(),
    }
  }
}

/// The binary layout of a Frame Header on disk (16 bytes).
///
/// [Magic: 4]
/// [CRC32: 4]
/// [Count: 4]
/// [Payload Size: 4]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub crc: u32,
  pub record_count: u32,
  pub payload_size: u32,
}

impl FrameHeader {
  pub const SIZE: usize = 4 + 4 + 4 + 4;

  pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(FRAME_MAGIC)?;
    writer.write_u32::<LittleEndian>(self.crc)?;
    writer.write_u32::<LittleEndian>(self.record_count)?;
    writer.write_u32::<LittleEndian>(self.payload_size)?;
    Ok(())
  }

  pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != FRAME_MAGIC {
      return Err(Error::Corruption(format!("Invalid Frame Magic: {:#x}", magic)));
    }

    let crc = reader.read_u32::<LittleEndian>()?;
    let record_count = reader.read_u32::<LittleEndian>()?;
    let payload_size = reader.read_u32::<LittleEndian>()?;

    Ok(Self {
      crc,
      record_count,
      payload_size,
    })
  }

  /// Total on-disk length of the frame this header starts.
  pub fn frame_len(&self) -> u64 {
    Self::SIZE as u64 + self.payload_size as u64
  }
}

/// Serializes records into a raw payload.
/// Format per record: [Kind: 1][Key Len: 4][Key: N] then, for puts, [Val Len: 4][Val: M]
fn serialize_records(records: &[Record]) -> io::Result<Vec<u8>> {
  let total_len: usize = records.iter().map(|r| 9 + r.size()).sum();
  let mut buffer = Vec::with_capacity(total_len);

  for record in records {
    match record {
      Record::Put { key, value } => {
        buffer.write_u8(RecordKind::Put as u8)?;
        buffer.write_u32::<LittleEndian>(key.len() as u32)?;
        buffer.write_all(key)?;
        buffer.write_u32::<LittleEndian>(value.len() as u32)?;
        buffer.write_all(value)?;
      }
      Record::Delete { key } => {
        buffer.write_u8(RecordKind::Delete as u8)?;
        buffer.write_u32::<LittleEndian>(key.len() as u32)?;
        buffer.write_all(key)?;
      }
    }
  }
  Ok(buffer)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
  let len = cursor.read_u32::<LittleEndian>()? as usize;
  let remaining = cursor.get_ref().len() as u64 - cursor.position();
  if len as u64 > remaining {
    return Err(Error::Corruption(format!(
      "Record length {} exceeds remaining payload {}",
      len, remaining
    )));
  }
  let mut out = vec![0u8; len];
  cursor.read_exact(&mut out)?;
  Ok(out)
}

/// Deserializes a raw payload back into records.
fn deserialize_records(payload: &[u8]) -> Result<Vec<Record>> {
  let mut cursor = Cursor::new(payload);
  let mut records = Vec::new();
  let len = payload.len() as u64;

  while cursor.position() < len {
    let kind = RecordKind::try_from(cursor.read_u8()?)?;
    let key = read_bytes(&mut cursor)?;
    let record = match kind {
      RecordKind::Put => Record::Put {
        key,
        value: read_bytes(&mut cursor)?,
      },
      RecordKind::Delete => Record::Delete { key },
    };
    records.push(record);
  }
  Ok(records)
}

/// CRC32 over the frame content, excluding the Magic and CRC fields.
fn calculate_checksum(count: u32, payload: &[u8]) -> u32 {
  let mut hasher = Hasher::new();
  hasher.update(&count.to_le_bytes());
  hasher.update(&(payload.len() as u32).to_le_bytes());
  hasher.update(payload);
  hasher.finalize()
}

/// Encodes records into one complete frame (header + payload).
pub fn encode_frame(records: &[Record]) -> io::Result<Vec<u8>> {
  let payload = serialize_records(records)?;
  let count = records.len() as u32;

  let header = FrameHeader {
    crc: calculate_checksum(count, &payload),
    record_count: count,
    payload_size: payload.len() as u32,
  };

  let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
  header.write(&mut frame)?;
  frame.extend_from_slice(&payload);
  Ok(frame)
}

/// Reads the next frame. Returns `Ok(None)` on a clean end of file.
pub fn read_frame<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(FrameHeader, Vec<Record>)>> {
  let header = match FrameHeader::read(reader) {
    Ok(h) => h,
    Err(Error::Io(ref io_e)) if io_e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(e) => return Err(e),
  };

  let mut payload = vec![0u8; header.payload_size as usize];
  reader.read_exact(&mut payload)?;

  let calc_crc = calculate_checksum(header.record_count, &payload);
  if calc_crc != header.crc {
    return Err(Error::CrcMismatch {
      expected: header.crc,
      actual: calc_crc,
      offset,
    });
  }

  let records = deserialize_records(&payload)?;
  if records.len() != header.record_count as usize {
    return Err(Error::Corruption(format!(
      "Frame at offset {} declares {} records, found {}",
      offset,
      header.record_count,
      records.len()
    )));
  }

  Ok(Some((header, records)))
}
