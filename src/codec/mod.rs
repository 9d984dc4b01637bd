//! Streaming decoder registry: one [`Codec`] per compressed [`FormatKind`].
//!
//! # Streaming contract
//! Every codec wraps its input in a pull-based decompressor and hands back a
//! plain `Read`.  Nothing here ever calls `read_to_end`; the caller pulls
//! decoded bytes in bounded chunks, which is what keeps peak memory flat no
//! matter how large a payload expands to.
//!
//! # Dispatch
//! [`decode`] looks a kind up in the registry ([`get_codec`]).  Containers
//! (`ar`, `tar`) pass through the identity codec.  A kind with no codec in
//! this build (`Unknown`, or a codec whose cargo feature is off) yields
//! [`Decoded::Unsupported`] carrying the untouched input back, so the caller
//! can record the member and move on.
//!
//! # Multi-stream inputs
//! gzip, xz and bzip2 all permit concatenated streams (`cat a.gz b.gz`).  The
//! multi-member decoder variants are used so such payloads decode completely
//! instead of stopping silently after the first stream.

use std::io::{self, BufReader, Read};

use crate::sniff::FormatKind;

/// Memory cap handed to liblzma for legacy `.lzma` streams.
#[cfg(feature = "xz")]
pub const LZMA_MEMLIMIT: u64 = 256 * 1024 * 1024;

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn kind(&self) -> FormatKind;

    /// Wrap `input` in this codec's streaming decoder.
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>>;
}

// ── Built-in codecs ──────────────────────────────────────────────────────────

/// Containers: bytes are already in their final form.
pub struct IdentityCodec(pub FormatKind);
impl Codec for IdentityCodec {
    fn kind(&self) -> FormatKind { self.0 }
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(input)
    }
}

pub struct GzipCodec;
impl Codec for GzipCodec {
    fn kind(&self) -> FormatKind { FormatKind::Gzip }
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(input)))
    }
}

#[cfg(feature = "xz")]
pub struct XzCodec;
#[cfg(feature = "xz")]
impl Codec for XzCodec {
    fn kind(&self) -> FormatKind { FormatKind::Xz }
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(input)))
    }
}

#[cfg(feature = "xz")]
pub struct LzmaCodec;
#[cfg(feature = "xz")]
impl Codec for LzmaCodec {
    fn kind(&self) -> FormatKind { FormatKind::Lzma }
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        let stream = xz2::stream::Stream::new_lzma_decoder(LZMA_MEMLIMIT)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Box::new(xz2::read::XzDecoder::new_stream(input, stream)))
    }
}

#[cfg(feature = "zstd")]
pub struct ZstdCodec;
#[cfg(feature = "zstd")]
impl Codec for ZstdCodec {
    fn kind(&self) -> FormatKind { FormatKind::Zstd }
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(zstd::stream::read::Decoder::with_buffer(BufReader::new(input))?))
    }
}

#[cfg(feature = "bzip2")]
pub struct Bzip2Codec;
#[cfg(feature = "bzip2")]
impl Codec for Bzip2Codec {
    fn kind(&self) -> FormatKind { FormatKind::Bzip2 }
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(bzip2::read::MultiBzDecoder::new(input)))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a kind to a codec available in this build.
pub fn get_codec(kind: FormatKind) -> Option<Box<dyn Codec>> {
    match kind {
        FormatKind::Ar | FormatKind::Tar => Some(Box::new(IdentityCodec(kind))),
        FormatKind::Gzip => Some(Box::new(GzipCodec)),
        #[cfg(feature = "xz")]
        FormatKind::Xz => Some(Box::new(XzCodec)),
        #[cfg(feature = "xz")]
        FormatKind::Lzma => Some(Box::new(LzmaCodec)),
        #[cfg(feature = "zstd")]
        FormatKind::Zstd => Some(Box::new(ZstdCodec)),
        #[cfg(feature = "bzip2")]
        FormatKind::Bzip2 => Some(Box::new(Bzip2Codec)),
        _ => None,
    }
}

/// Outcome of [`decode`].
pub enum Decoded<'a, R> {
    /// Decoded byte stream.
    Stream(Box<dyn Read + 'a>),
    /// No codec for this kind; the input is returned untouched.
    Unsupported { kind: FormatKind, input: R },
}

/// Wrap `input` with the streaming decoder for `kind`.
///
/// `Err` is reserved for decoder construction failures (zstd allocates its
/// context eagerly); an unknown or disabled kind is not an error.
pub fn decode<'a, R: Read + 'a>(kind: FormatKind, input: R) -> io::Result<Decoded<'a, R>> {
    match get_codec(kind) {
        Some(codec) => codec
            .decoder(Box::new(input))
            .map(Decoded::Stream)
            .map_err(|e| io::Error::new(e.kind(), format!("{} decoder: {e}", codec.kind()))),
        None => Ok(Decoded::Unsupported { kind, input }),
    }
}

/// Whether `kind`'s decoder fails on the first bytes of `window`.
///
/// Used to discard weak signature matches.  A kind with no codec in this
/// build is never rejected, so the caller still reports it as unsupported.
pub fn rejects_window(kind: FormatKind, window: &[u8]) -> bool {
    match decode(kind, window) {
        Ok(Decoded::Stream(mut stream)) => stream.read(&mut [0u8; 1]).is_err(),
        Ok(Decoded::Unsupported { .. }) => false,
        Err(_) => true,
    }
}

// ── Output naming ────────────────────────────────────────────────────────────

/// Suffixes that name a whole archive, longest first.
const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tar.xz", ".tar.zst", ".tar.bz2", ".tar.lzma",
    ".tgz", ".txz", ".tzst", ".tbz2", ".tbz", ".tlz",
    ".tar", ".deb", ".udeb", ".ar",
];

/// Suffixes that name a single compressed stream.
const COMPRESSION_SUFFIXES: &[&str] = &[".gz", ".xz", ".zst", ".bz2", ".lzma"];

/// Directory name an expanded archive unpacks into:
/// `control.tar.gz` → `control`, `bundle.deb` → `bundle`.
pub fn archive_stem(name: &str) -> &str {
    strip_any(name, ARCHIVE_SUFFIXES)
        .or_else(|| strip_any(name, COMPRESSION_SUFFIXES))
        .unwrap_or(name)
}

/// File name a decompressed single stream is written as:
/// `changelog.gz` → `changelog`.  Names without a known suffix are kept.
pub fn decoded_name(name: &str) -> &str {
    strip_any(name, COMPRESSION_SUFFIXES).unwrap_or(name)
}

fn strip_any<'n>(name: &'n str, suffixes: &[&str]) -> Option<&'n str> {
    let lower = name.to_ascii_lowercase();
    suffixes
        .iter()
        .find(|s| lower.ends_with(*s) && lower.len() > s.len())
        .map(|s| &name[..name.len() - s.len()])
}
