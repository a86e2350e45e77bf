//! Binary encoding of persisted target signatures.
//!
//! Signatures use the protobuf wire format so the layout stays stable and
//! forward-compatible:
//!
//! ```text
//! TargetSignature: 1 name (string), 2 hash (string), 3 inputs (repeated FileSignature)
//! FileSignature:   1 name (string), 2 info_hash (string), 3 content_hash (string)
//! ```
//!
//! Fields with unrecognized tags are captured verbatim and re-emitted on
//! encode, so records written by a newer kiln survive a rewrite by an older
//! one.

use bytes::{Buf, BufMut};
use prost::DecodeError;
use prost::encoding::{
  self, DecodeContext, WireType, decode_key, decode_varint, encode_key, encode_varint,
  encoded_len_varint, key_len,
};

/// Persisted record of a target's last successful build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSignature {
  /// Target name.
  pub name: String,

  /// Hash over the target's declared inputs and command sequence.
  pub hash: String,

  /// Snapshots of the input files observed during the build.
  pub inputs: Vec<FileSignature>,

  /// Fields with tags this version does not know about.
  pub unknown: Vec<UnknownField>,
}

/// Persisted state of a single input file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSignature {
  /// Project-relative file name.
  pub name: String,

  /// Metadata hash: mode, mtime, and size for files; mode and membership
  /// for directories.
  pub info_hash: String,

  /// Content hash; empty for directories.
  pub content_hash: String,

  /// Fields with tags this version does not know about.
  pub unknown: Vec<UnknownField>,
}

impl TargetSignature {
  /// Encode the record into a fresh buffer.
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = Vec::with_capacity(self.encoded_len());
    self.encode_raw(&mut buf);
    buf
  }

  fn encode_raw(&self, buf: &mut impl BufMut) {
    if !self.name.is_empty() {
      encoding::string::encode(1, &self.name, buf);
    }
    if !self.hash.is_empty() {
      encoding::string::encode(2, &self.hash, buf);
    }
    for input in &self.inputs {
      encode_key(3, WireType::LengthDelimited, buf);
      encode_varint(input.encoded_len() as u64, buf);
      input.encode_raw(buf);
    }
    for field in &self.unknown {
      field.encode(buf);
    }
  }

  fn encoded_len(&self) -> usize {
    let mut len = 0;
    if !self.name.is_empty() {
      len += encoding::string::encoded_len(1, &self.name);
    }
    if !self.hash.is_empty() {
      len += encoding::string::encoded_len(2, &self.hash);
    }
    for input in &self.inputs {
      let inner = input.encoded_len();
      len += key_len(3) + encoded_len_varint(inner as u64) + inner;
    }
    len + self.unknown.iter().map(UnknownField::encoded_len).sum::<usize>()
  }

  /// Decode a record from its serialized bytes.
  pub fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
    let ctx = DecodeContext::default();
    let mut record = Self::default();

    while buf.has_remaining() {
      let (tag, wire_type) = decode_key(&mut buf)?;
      match tag {
        1 => encoding::string::merge(wire_type, &mut record.name, &mut buf, ctx.clone())?,
        2 => encoding::string::merge(wire_type, &mut record.hash, &mut buf, ctx.clone())?,
        3 if wire_type == WireType::LengthDelimited => {
          let len = decode_varint(&mut buf)? as usize;
          if len > buf.remaining() {
            return Err(DecodeError::new("input record length exceeds buffer"));
          }
          let (chunk, rest) = buf.split_at(len);
          record.inputs.push(FileSignature::decode(chunk)?);
          buf = rest;
        }
        _ => record.unknown.push(UnknownField::decode(tag, wire_type, &mut buf)?),
      }
    }

    Ok(record)
  }
}

impl FileSignature {
  fn encode_raw(&self, buf: &mut impl BufMut) {
    if !self.name.is_empty() {
      encoding::string::encode(1, &self.name, buf);
    }
    if !self.info_hash.is_empty() {
      encoding::string::encode(2, &self.info_hash, buf);
    }
    if !self.content_hash.is_empty() {
      encoding::string::encode(3, &self.content_hash, buf);
    }
    for field in &self.unknown {
      field.encode(buf);
    }
  }

  fn encoded_len(&self) -> usize {
    let mut len = 0;
    if !self.name.is_empty() {
      len += encoding::string::encoded_len(1, &self.name);
    }
    if !self.info_hash.is_empty() {
      len += encoding::string::encoded_len(2, &self.info_hash);
    }
    if !self.content_hash.is_empty() {
      len += encoding::string::encoded_len(3, &self.content_hash);
    }
    len + self.unknown.iter().map(UnknownField::encoded_len).sum::<usize>()
  }

  fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
    let ctx = DecodeContext::default();
    let mut record = Self::default();

    while buf.has_remaining() {
      let (tag, wire_type) = decode_key(&mut buf)?;
      match tag {
        1 => encoding::string::merge(wire_type, &mut record.name, &mut buf, ctx.clone())?,
        2 => encoding::string::merge(wire_type, &mut record.info_hash, &mut buf, ctx.clone())?,
        3 => encoding::string::merge(wire_type, &mut record.content_hash, &mut buf, ctx.clone())?,
        _ => record.unknown.push(UnknownField::decode(tag, wire_type, &mut buf)?),
      }
    }

    Ok(record)
  }
}

/// A field whose tag is not part of the current schema, kept so rewrites
/// preserve it.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownField {
  pub tag: u32,
  pub value: UnknownValue,
}

/// The raw payload of an unknown field, by wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownValue {
  Varint(u64),
  ThirtyTwoBit([u8; 4]),
  SixtyFourBit([u8; 8]),
  LengthDelimited(Vec<u8>),
}

impl UnknownField {
  fn decode(tag: u32, wire_type: WireType, buf: &mut impl Buf) -> Result<Self, DecodeError> {
    let value = match wire_type {
      WireType::Varint => UnknownValue::Varint(decode_varint(buf)?),
      WireType::ThirtyTwoBit => {
        if buf.remaining() < 4 {
          return Err(DecodeError::new("buffer underflow"));
        }
        let mut bytes = [0u8; 4];
        buf.copy_to_slice(&mut bytes);
        UnknownValue::ThirtyTwoBit(bytes)
      }
      WireType::SixtyFourBit => {
        if buf.remaining() < 8 {
          return Err(DecodeError::new("buffer underflow"));
        }
        let mut bytes = [0u8; 8];
        buf.copy_to_slice(&mut bytes);
        UnknownValue::SixtyFourBit(bytes)
      }
      WireType::LengthDelimited => {
        let len = decode_varint(buf)? as usize;
        if len > buf.remaining() {
          return Err(DecodeError::new("field length exceeds buffer"));
        }
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        UnknownValue::LengthDelimited(bytes)
      }
      WireType::StartGroup | WireType::EndGroup => {
        return Err(DecodeError::new("group wire types are not supported"));
      }
    };

    Ok(Self { tag, value })
  }

  fn encode(&self, buf: &mut impl BufMut) {
    match &self.value {
      UnknownValue::Varint(v) => {
        encode_key(self.tag, WireType::Varint, buf);
        encode_varint(*v, buf);
      }
      UnknownValue::ThirtyTwoBit(bytes) => {
        encode_key(self.tag, WireType::ThirtyTwoBit, buf);
        buf.put_slice(bytes);
      }
      UnknownValue::SixtyFourBit(bytes) => {
        encode_key(self.tag, WireType::SixtyFourBit, buf);
        buf.put_slice(bytes);
      }
      UnknownValue::LengthDelimited(bytes) => {
        encode_key(self.tag, WireType::LengthDelimited, buf);
        encode_varint(bytes.len() as u64, buf);
        buf.put_slice(bytes);
      }
    }
  }

  fn encoded_len(&self) -> usize {
    key_len(self.tag)
      + match &self.value {
        UnknownValue::Varint(v) => encoded_len_varint(*v),
        UnknownValue::ThirtyTwoBit(_) => 4,
        UnknownValue::SixtyFourBit(_) => 8,
        UnknownValue::LengthDelimited(bytes) => encoded_len_varint(bytes.len() as u64) + bytes.len(),
      }
  }
}
