//! Magic-byte format classification.
//!
//! [`sniff`] maps a byte prefix to exactly one [`FormatKind`].  File names and
//! extensions are never consulted: a member called `notes.txt` that starts
//! with `1F 8B` is gzip, and a member called `data.tar.xz` that starts with
//! garbage is [`FormatKind::Unknown`].
//!
//! # Priority
//! Strong signatures are tested first; LZMA, whose "alone" header has no real
//! magic, is tested last so it can never shadow another format.
//!
//! | Order | Kind   | Signature                                         |
//! |-------|--------|---------------------------------------------------|
//! | 1     | ar     | `!<arch>\n`                                       |
//! | 2     | gzip   | `1F 8B`                                           |
//! | 3     | xz     | `FD 37 7A 58 5A 00`                               |
//! | 4     | zstd   | `28 B5 2F FD`                                     |
//! | 5     | bzip2  | `42 5A 68` + block-size digit `1`..=`9`           |
//! | 6     | tar    | `ustar` at 257, or a valid v7 header checksum     |
//! | 7     | lzma   | props `5D`, plausible dictionary + size fields    |

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

/// Bytes a caller should buffer before calling [`sniff`].  One full tar
/// header block, which also covers every shorter signature.
pub const PEEK_WINDOW: usize = 512;

/// Below this many bytes every input is [`FormatKind::Unknown`].
pub const MIN_SNIFF_LEN: usize = 6;

const AR_MAGIC:    &[u8; 8] = b"!<arch>\n";
const GZIP_MAGIC:  &[u8; 2] = &[0x1F, 0x8B];
const XZ_MAGIC:    &[u8; 6] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const ZSTD_MAGIC:  &[u8; 4] = &[0x28, 0xB5, 0x2F, 0xFD];
const BZIP2_MAGIC: &[u8; 3] = b"BZh";

const TAR_BLOCK:       usize = 512;
const TAR_MAGIC_OFF:   usize = 257;
const TAR_CHKSUM_OFF:  usize = 148;
const TAR_CHKSUM_LEN:  usize = 8;

/// Properties byte written by every mainstream LZMA-alone encoder
/// (lc=3, lp=0, pb=2).
const LZMA_DEFAULT_PROPS: u8 = 0x5D;
const LZMA_HEADER_LEN:    usize = 13;

// ── FormatKind ───────────────────────────────────────────────────────────────

/// Classification of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Ar,
    Tar,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
    Lzma,
    Unknown,
}

impl FormatKind {
    /// Human-readable name (diagnostics and manifest only).
    pub fn name(self) -> &'static str {
        match self {
            FormatKind::Ar      => "ar",
            FormatKind::Tar     => "tar",
            FormatKind::Gzip    => "gzip",
            FormatKind::Xz      => "xz",
            FormatKind::Zstd    => "zstd",
            FormatKind::Bzip2   => "bzip2",
            FormatKind::Lzma    => "lzma",
            FormatKind::Unknown => "unknown",
        }
    }

    /// Containers whose members are iterated directly.
    #[inline]
    pub fn is_container(self) -> bool {
        matches!(self, FormatKind::Ar | FormatKind::Tar)
    }

    /// Compression codecs that wrap a single stream.
    #[inline]
    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            FormatKind::Gzip | FormatKind::Xz | FormatKind::Zstd | FormatKind::Bzip2 | FormatKind::Lzma
        )
    }

    /// Anything the extractor recurses into instead of writing verbatim.
    #[inline]
    pub fn is_archive(self) -> bool {
        self != FormatKind::Unknown
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Sniffing ─────────────────────────────────────────────────────────────────

/// Classify `bytes` by magic signature.
///
/// Total and pure: every input maps to exactly one kind, shorter-than-
/// [`MIN_SNIFF_LEN`] inputs map to [`FormatKind::Unknown`], and there is no
/// hidden state.
pub fn sniff(bytes: &[u8]) -> FormatKind {
    if bytes.len() < MIN_SNIFF_LEN {
        return FormatKind::Unknown;
    }
    if bytes.starts_with(AR_MAGIC) {
        return FormatKind::Ar;
    }
    if bytes.starts_with(GZIP_MAGIC) {
        return FormatKind::Gzip;
    }
    if bytes.starts_with(XZ_MAGIC) {
        return FormatKind::Xz;
    }
    if bytes.starts_with(ZSTD_MAGIC) {
        return FormatKind::Zstd;
    }
    if bytes.starts_with(BZIP2_MAGIC) && matches!(bytes[3], b'1'..=b'9') {
        return FormatKind::Bzip2;
    }
    if is_tar_header(bytes) {
        return FormatKind::Tar;
    }
    if is_lzma_header(bytes) {
        return FormatKind::Lzma;
    }
    FormatKind::Unknown
}

/// `ustar` magic (POSIX `ustar\0` and GNU `ustar `), falling back to the
/// header checksum so pre-POSIX v7 archives are recognised too.
fn is_tar_header(bytes: &[u8]) -> bool {
    if bytes.len() < TAR_BLOCK {
        return false;
    }
    let block = &bytes[..TAR_BLOCK];
    if &block[TAR_MAGIC_OFF..TAR_MAGIC_OFF + 5] == b"ustar" {
        return true;
    }
    match parse_octal(&block[TAR_CHKSUM_OFF..TAR_CHKSUM_OFF + TAR_CHKSUM_LEN]) {
        Some(stored) => stored == tar_checksum(block) && block[0] != 0,
        None         => false,
    }
}

/// Unsigned sum of the header with the checksum field read as spaces.
fn tar_checksum(block: &[u8]) -> u64 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (TAR_CHKSUM_OFF..TAR_CHKSUM_OFF + TAR_CHKSUM_LEN).contains(&i) {
                u64::from(b' ')
            } else {
                u64::from(b)
            }
        })
        .sum()
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|&b| b == b' ')
        .take_while(|&b| (b'0'..=b'7').contains(&b))
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits
        .iter()
        .try_fold(0u64, |acc, &d| acc.checked_mul(8)?.checked_add(u64::from(d - b'0')))
}

/// LZMA-alone: props byte, u32 LE dictionary size, u64 LE uncompressed size.
fn is_lzma_header(bytes: &[u8]) -> bool {
    if bytes[0] != LZMA_DEFAULT_PROPS {
        return false;
    }
    let dict = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    if !plausible_dict_size(dict) {
        return false;
    }
    if bytes.len() >= LZMA_HEADER_LEN {
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[5..LZMA_HEADER_LEN]);
        let size = u64::from_le_bytes(size);
        // Unknown size is all ones; anything else must be sane.
        return size == u64::MAX || size < (1 << 40);
    }
    true
}

/// Encoders emit 2^n or 2^n + 2^(n-1), between 4 KiB and 1.5 GiB.
fn plausible_dict_size(dict: u32) -> bool {
    if !(1 << 12..=3 << 29).contains(&dict) {
        return false;
    }
    if dict.is_power_of_two() {
        return true;
    }
    let high = 1u32 << (31 - dict.leading_zeros());
    dict == high + (high >> 1)
}

// ── Peeking ──────────────────────────────────────────────────────────────────

/// Read up to `window` bytes from `reader`, retrying short reads until the
/// window is full or the stream ends.
///
/// The returned prefix must be replayed in front of the rest of the stream,
/// e.g. `io::Cursor::new(prefix).chain(reader)`.
pub fn peek<R: Read>(reader: &mut R, window: usize) -> io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(window);
    reader.by_ref().take(window as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}
