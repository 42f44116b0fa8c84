//! Wire protocol implementation for the retro IM core.
//!
//! Covers the legacy control-channel framing (`{type, length}` header +
//! payload), the OFT rendezvous/file-transfer header, and the Yahoo-style
//! fixed-width raw packet. All multi-byte integers are little-endian on the
//! wire; conversion happens only inside the codecs, never in protocol logic.

pub mod consts;
pub mod error;
pub mod hash;
pub mod oft;
pub mod packets;
pub mod tlv;
pub mod yahoo;
mod codec;
mod codec_helpers;

// Re-export commonly used types
pub use codec::{RawCodec, RawPacket};
pub use codec_helpers::{decode_cp1252, encode_cp1252};
pub use consts::{frame_kind, Uin, UserStatus, MAX_FRAME_LEN};
pub use error::ProtocolError;
pub use hash::legacy_login_hash;
pub use oft::{oft_checksum, FileHeader, OftCodec, OftFrame, OftMagic, OftType, OFT_CHECKSUM_SEED};
pub use packets::{LoginRequest, Packet, RendezvousKind, RendezvousPropose};
