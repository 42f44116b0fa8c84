//! OFT rendezvous/file-transfer framing.
//!
//! Every OFT frame is a fixed 256-byte (0x100) header: a 4-byte ASCII magic,
//! the header length, the frame type, and the file-header region. The layout
//! is bit-for-bit fixed for interoperability with historical clients,
//! including the reserved padding regions. The file payload itself follows
//! the `Prompt`/`Ack` exchange as an unframed byte stream of the declared
//! length.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::codec_helpers::{get_fixed_str, put_fixed_str};
use crate::error::ProtocolError;

/// Total serialized size of an OFT frame.
pub const OFT_HEADER_LEN: usize = 0x100;

/// Identification string every historical peer expects, zero-padded to 32
/// bytes on the wire.
pub const OFT_IDSTRING: &str = "OFT_Windows ICBMFT V1.1 32";

/// Initial value for the rolling file checksum.
pub const OFT_CHECKSUM_SEED: u32 = 0xffff_0000;

/// Frame magic distinguishing file-transfer from direct-IM channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OftMagic {
  /// File transfer ("OFT2").
  #[default]
  Oft2,
  /// Direct IM ("ODC2").
  Odc2,
}

impl OftMagic {
  pub fn bytes(self) -> [u8; 4] {
    match self {
      OftMagic::Oft2 => *b"OFT2",
      OftMagic::Odc2 => *b"ODC2",
    }
  }

  pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, ProtocolError> {
    match &bytes {
      b"OFT2" => Ok(OftMagic::Oft2),
      b"ODC2" => Ok(OftMagic::Odc2),
      _ => Err(ProtocolError::BadMagic(bytes)),
    }
  }
}

/// OFT frame types. Closed enum so the transfer state machine's transition
/// table is exhaustive and compiler-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OftType {
  /// Sender announces the file it is about to stream.
  Prompt = 0x0101,
  /// Receiver accepts the prompt; cookie must echo the rendezvous cookie.
  Ack = 0x0202,
  /// Receiver confirms it drained the declared byte count.
  Done = 0x0204,
  /// Directory-listing payload announcement.
  Listing = 0x1108,
  /// Listing received and parsed.
  ListingAck = 0x1209,
  /// Listing exchange finished.
  ListingDone = 0x120b,
  /// Peer requests a file named in a previous listing.
  Request = 0x120c,
}

impl TryFrom<u16> for OftType {
  type Error = ProtocolError;

  fn try_from(value: u16) -> Result<Self, Self::Error> {
    match value {
      0x0101 => Ok(OftType::Prompt),
      0x0202 => Ok(OftType::Ack),
      0x0204 => Ok(OftType::Done),
      0x1108 => Ok(OftType::Listing),
      0x1209 => Ok(OftType::ListingAck),
      0x120b => Ok(OftType::ListingDone),
      0x120c => Ok(OftType::Request),
      other => Err(ProtocolError::UnsupportedFrameType(other)),
    }
  }
}

/// The 248-byte file-header region of an OFT frame (everything after magic,
/// length and type). Field order, widths and the reserved regions are part
/// of the wire contract.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
  /// Echo of the rendezvous cookie that negotiated this channel.
  pub cookie: [u8; 8],
  pub encrypt: u16,
  pub compress: u16,
  pub totfiles: u16,
  pub filesleft: u16,
  pub totparts: u16,
  pub partsleft: u16,
  pub totsize: u32,
  pub size: u32,
  pub modtime: u32,
  pub checksum: u32,
  pub rfrcsum: u32,
  pub rfsize: u32,
  pub cretime: u32,
  pub rfcsum: u32,
  pub nrecvd: u32,
  pub recvcsum: u32,
  /// 32-byte fixed-width identification string.
  pub idstring: String,
  pub flags: u8,
  pub lnameoffset: u8,
  pub lsizeoffset: u8,
  /// Reserved region, zero in practice but echoed verbatim.
  pub dummy: [u8; 69],
  pub macfileinfo: [u8; 16],
  pub nencode: u16,
  pub nlanguage: u16,
  /// 64-byte fixed-width file name.
  pub name: String,
}

impl Default for FileHeader {
  fn default() -> Self {
    Self {
      cookie: [0; 8],
      encrypt: 0,
      compress: 0,
      totfiles: 1,
      filesleft: 1,
      totparts: 1,
      partsleft: 1,
      totsize: 0,
      size: 0,
      modtime: 0,
      checksum: OFT_CHECKSUM_SEED,
      rfrcsum: OFT_CHECKSUM_SEED,
      rfsize: 0,
      cretime: 0,
      rfcsum: OFT_CHECKSUM_SEED,
      nrecvd: 0,
      recvcsum: OFT_CHECKSUM_SEED,
      idstring: OFT_IDSTRING.to_string(),
      flags: 0,
      lnameoffset: 0x1a,
      lsizeoffset: 0x10,
      dummy: [0; 69],
      macfileinfo: [0; 16],
      nencode: 0,
      nlanguage: 0,
      name: String::new(),
    }
  }
}

impl FileHeader {
  /// Header for a real file about to be streamed.
  pub fn for_file(cookie: [u8; 8], name: &str, size: u32, modtime: u32) -> Self {
    Self {
      cookie,
      totsize: size,
      size,
      modtime,
      name: name.to_string(),
      ..Default::default()
    }
  }

  /// Synthesize the single-entry directory listing sent when the peer asked
  /// for file metadata only.
  pub fn listing(cookie: [u8; 8], name: &str, size: u32, modtime: u32) -> Self {
    Self {
      flags: 0x02,
      ..Self::for_file(cookie, name, size, modtime)
    }
  }

  pub fn encode_to(&self, dst: &mut BytesMut) {
    dst.put_slice(&self.cookie);
    dst.put_u16_le(self.encrypt);
    dst.put_u16_le(self.compress);
    dst.put_u16_le(self.totfiles);
    dst.put_u16_le(self.filesleft);
    dst.put_u16_le(self.totparts);
    dst.put_u16_le(self.partsleft);
    dst.put_u32_le(self.totsize);
    dst.put_u32_le(self.size);
    dst.put_u32_le(self.modtime);
    dst.put_u32_le(self.checksum);
    dst.put_u32_le(self.rfrcsum);
    dst.put_u32_le(self.rfsize);
    dst.put_u32_le(self.cretime);
    dst.put_u32_le(self.rfcsum);
    dst.put_u32_le(self.nrecvd);
    dst.put_u32_le(self.recvcsum);
    put_fixed_str(dst, &self.idstring, 32);
    dst.put_u8(self.flags);
    dst.put_u8(self.lnameoffset);
    dst.put_u8(self.lsizeoffset);
    dst.put_slice(&self.dummy);
    dst.put_slice(&self.macfileinfo);
    dst.put_u16_le(self.nencode);
    dst.put_u16_le(self.nlanguage);
    put_fixed_str(dst, &self.name, 64);
  }

  pub fn decode_from(src: &mut BytesMut) -> Result<Self, ProtocolError> {
    if src.len() < OFT_HEADER_LEN - 8 {
      return Err(ProtocolError::Truncated);
    }

    let mut cookie = [0u8; 8];
    cookie.copy_from_slice(&src.split_to(8));

    let encrypt = src.get_u16_le();
    let compress = src.get_u16_le();
    let totfiles = src.get_u16_le();
    let filesleft = src.get_u16_le();
    let totparts = src.get_u16_le();
    let partsleft = src.get_u16_le();
    let totsize = src.get_u32_le();
    let size = src.get_u32_le();
    let modtime = src.get_u32_le();
    let checksum = src.get_u32_le();
    let rfrcsum = src.get_u32_le();
    let rfsize = src.get_u32_le();
    let cretime = src.get_u32_le();
    let rfcsum = src.get_u32_le();
    let nrecvd = src.get_u32_le();
    let recvcsum = src.get_u32_le();
    let idstring = get_fixed_str(src, 32);
    let flags = src.get_u8();
    let lnameoffset = src.get_u8();
    let lsizeoffset = src.get_u8();

    let mut dummy = [0u8; 69];
    dummy.copy_from_slice(&src.split_to(69));
    let mut macfileinfo = [0u8; 16];
    macfileinfo.copy_from_slice(&src.split_to(16));

    let nencode = src.get_u16_le();
    let nlanguage = src.get_u16_le();
    let name = get_fixed_str(src, 64);

    Ok(Self {
      cookie,
      encrypt,
      compress,
      totfiles,
      filesleft,
      totparts,
      partsleft,
      totsize,
      size,
      modtime,
      checksum,
      rfrcsum,
      rfsize,
      cretime,
      rfcsum,
      nrecvd,
      recvcsum,
      idstring,
      flags,
      lnameoffset,
      lsizeoffset,
      dummy,
      macfileinfo,
      nencode,
      nlanguage,
      name,
    })
  }
}

/// One complete OFT frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OftFrame {
  pub magic: OftMagic,
  pub kind: OftType,
  pub header: FileHeader,
}

impl OftFrame {
  pub fn new(kind: OftType, header: FileHeader) -> Self {
    Self { magic: OftMagic::Oft2, kind, header }
  }
}

/// Codec for the fixed-size OFT header frames. The data phase between
/// `Ack` and `Done` is raw bytes and is handled outside the codec (see the
/// transfer engine), so a framed connection must be dismantled with
/// `Framed::into_parts` before streaming.
#[derive(Debug, Default)]
pub struct OftCodec;

impl Encoder<OftFrame> for OftCodec {
  type Error = ProtocolError;

  fn encode(&mut self, item: OftFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
    dst.reserve(OFT_HEADER_LEN);
    dst.put_slice(&item.magic.bytes());
    dst.put_u16_le(OFT_HEADER_LEN as u16);
    dst.put_u16_le(item.kind as u16);
    item.header.encode_to(dst);
    Ok(())
  }
}

impl Decoder for OftCodec {
  type Item = OftFrame;
  type Error = ProtocolError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
    if src.len() < 8 {
      return Ok(None);
    }

    // A bad magic or length is stream corruption; fail before buffering
    let magic = OftMagic::from_bytes([src[0], src[1], src[2], src[3]])?;
    let hdrlen = u16::from_le_bytes([src[4], src[5]]);
    if hdrlen as usize != OFT_HEADER_LEN {
      return Err(ProtocolError::BadHeaderLength(hdrlen));
    }

    if src.len() < OFT_HEADER_LEN {
      return Ok(None);
    }

    src.advance(6);
    let kind = OftType::try_from(src.get_u16_le())?;
    let header = FileHeader::decode_from(src)?;

    Ok(Some(OftFrame { magic, kind, header }))
  }
}

/// Fold a chunk of file data into the rolling 16-bit checksum. `odd` is true
/// when the chunk starts at an odd offset within the file, which swaps the
/// high/low byte weighting.
pub fn oft_checksum_chunk(data: &[u8], prev: u32, odd: bool) -> u32 {
  let mut check = (prev >> 16) & 0xffff;
  let start = usize::from(odd);

  for (i, byte) in data.iter().enumerate() {
    let old = check;
    let val = if (i + start) & 1 == 0 {
      u32::from(*byte) << 8
    } else {
      u32::from(*byte)
    };
    check = check.wrapping_sub(val);
    if check > old {
      check = check.wrapping_sub(1);
    }
  }

  check = (check & 0xffff) + (check >> 16);
  check = (check & 0xffff) + (check >> 16);
  check << 16
}

/// Checksum of a complete buffer.
pub fn oft_checksum(data: &[u8]) -> u32 {
  oft_checksum_chunk(data, OFT_CHECKSUM_SEED, false)
}
