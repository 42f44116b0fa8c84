//! Protocol error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  /// Declared payload length fails the sanity bound. Fatal to the
  /// connection: a corrupt length means the stream cannot be
  /// resynchronized.
  #[error("declared frame length {length} exceeds maximum {max}")]
  LengthOutOfRange { length: u32, max: u32 },
  #[error("bad frame magic: {0:02x?}")]
  BadMagic([u8; 4]),
  #[error("unsupported frame kind: {0:#06x}")]
  UnsupportedKind(u32),
  #[error("unsupported OFT frame type: {0:#06x}")]
  UnsupportedFrameType(u16),
  #[error("OFT header length {0:#06x}, expected 0x0100")]
  BadHeaderLength(u16),
  #[error("truncated field in frame payload")]
  Truncated,
}
