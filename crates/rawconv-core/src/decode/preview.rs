//! Container sniffing and embedded preview extraction.
//!
//! Nearly every RAW format embeds one or more camera-rendered JPEG previews
//! next to the sensor data. TIFF-based formats (CR2, NEF, ARW, DNG, PEF, ORF,
//! RW2, ...) reference them from IFD0, its chained IFDs or SubIFDs. Fuji RAF
//! stores the offset of its preview in a fixed header. Anything else falls
//! back to a scan for a large JPEG start/end marker pair.
//!
//! When a file carries several previews the largest one is returned. Only
//! baseline and progressive JPEGs count: CR2 and some DNGs store the raw
//! sensor strip itself as lossless JPEG, which is not a preview.

use tracing::debug;

use super::{DecodeError, Orientation};

const TIFF_LE: [u8; 4] = [0x49, 0x49, 0x2A, 0x00];
const TIFF_BE: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A];
// Olympus and Panasonic ship TIFF layouts under their own magic numbers.
const ORF_RO: [u8; 4] = [0x49, 0x49, 0x52, 0x4F];
const ORF_RS: [u8; 4] = [0x49, 0x49, 0x52, 0x53];
const RW2: [u8; 4] = [0x49, 0x49, 0x55, 0x00];

const RAF_MAGIC: &[u8] = b"FUJIFILMCCD-RAW";
const RAF_JPEG_OFFSET: usize = 84;
const CR3_BRAND: &[u8] = b"ftypcrx ";
const CRW_MAGIC: &[u8] = b"HEAPCCDR";

const TAG_COMPRESSION: u16 = 0x0103;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_ORIENTATION: u16 = 0x0112;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_SUBIFDS: u16 = 0x014A;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

const COMPRESSION_OLD_JPEG: u32 = 6;
const COMPRESSION_JPEG: u32 = 7;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;

/// Upper bound on IFD entries; anything larger is treated as corruption.
const MAX_IFD_ENTRIES: u16 = 1000;
/// Upper bound on IFDs visited, guards against offset cycles.
const MAX_IFDS: usize = 32;
/// Marker-scan hits smaller than this are assumed to be false positives.
const MIN_SCANNED_PREVIEW: usize = 50_000;
const SCAN_START: usize = 8192;

/// RAW container families recognised by [`sniff_container`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// TIFF structure, including vendor magic variants.
    Tiff { little_endian: bool },
    /// Fujifilm RAF.
    Raf,
    /// Canon CR3 (ISO base media file).
    Cr3,
    /// Canon CRW (CIFF).
    Crw,
}

/// Identify the RAW container family from the leading bytes.
pub fn sniff_container(bytes: &[u8]) -> Option<Container> {
    let head = bytes.get(..4)?;
    if head == TIFF_LE || head == ORF_RO || head == ORF_RS || head == RW2 {
        return Some(Container::Tiff {
            little_endian: true,
        });
    }
    if head == TIFF_BE {
        return Some(Container::Tiff {
            little_endian: false,
        });
    }
    if bytes.starts_with(RAF_MAGIC) {
        return Some(Container::Raf);
    }
    if bytes.get(4..12) == Some(CR3_BRAND) {
        return Some(Container::Cr3);
    }
    if bytes.get(6..14) == Some(CRW_MAGIC) {
        return Some(Container::Crw);
    }
    None
}

/// Quick check that the bytes look like a RAW container.
pub fn is_raw_file(bytes: &[u8]) -> bool {
    sniff_container(bytes).is_some()
}

/// Extract the largest embedded JPEG preview.
///
/// # Errors
///
/// - `DecodeError::InvalidFormat` - not a recognised RAW container
/// - `DecodeError::CorruptedFile` - the primary IFD cannot be read
/// - `DecodeError::NoThumbnail` - the container has no usable preview
pub fn extract_preview(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let container = sniff_container(bytes).ok_or(DecodeError::InvalidFormat)?;

    let found = match container {
        Container::Tiff { little_endian } => {
            let tiff = TiffReader::new(bytes, little_endian);
            let candidates = tiff.preview_candidates()?;
            debug!(count = candidates.len(), "preview candidates in IFD tree");
            candidates.into_iter().max_by_key(|c| c.len())
        }
        Container::Raf => raf_preview(bytes),
        Container::Cr3 | Container::Crw => None,
    };

    found
        .map(<[u8]>::to_vec)
        .or_else(|| scan_for_jpeg(bytes).map(<[u8]>::to_vec))
        .ok_or(DecodeError::NoThumbnail)
}

/// Orientation recorded in the primary IFD of a TIFF-based container.
pub fn container_orientation(bytes: &[u8]) -> Orientation {
    match sniff_container(bytes) {
        Some(Container::Tiff { little_endian }) => {
            let tiff = TiffReader::new(bytes, little_endian);
            tiff.first_ifd()
                .ok()
                .and_then(|ifd| ifd.find(TAG_ORIENTATION))
                .map(|e| Orientation::from(e.value))
                .unwrap_or_default()
        }
        _ => Orientation::Normal,
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    tag: u16,
    typ: u16,
    count: u32,
    /// Inline value (SHORT/LONG with count 1) or offset to the value array.
    value: u32,
}

#[derive(Debug, Default)]
struct Ifd {
    entries: Vec<Entry>,
    next: u32,
}

impl Ifd {
    fn find(&self, tag: u16) -> Option<Entry> {
        self.entries.iter().copied().find(|e| e.tag == tag)
    }
}

/// Bounds-checked reader over an in-memory TIFF structure.
struct TiffReader<'a> {
    bytes: &'a [u8],
    little_endian: bool,
}

impl<'a> TiffReader<'a> {
    fn new(bytes: &'a [u8], little_endian: bool) -> Self {
        Self {
            bytes,
            little_endian,
        }
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        let b: [u8; 2] = self.bytes.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
        Some(if self.little_endian {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        })
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let b: [u8; 4] = self.bytes.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn corrupted(what: &str, offset: usize) -> DecodeError {
        DecodeError::CorruptedFile(format!("Failed to read {} at offset {}", what, offset))
    }

    fn first_ifd(&self) -> Result<Ifd, DecodeError> {
        let offset = self.u32_at(4).ok_or_else(|| Self::corrupted("IFD0 pointer", 4))?;
        self.ifd_at(offset as usize)
    }

    fn ifd_at(&self, offset: usize) -> Result<Ifd, DecodeError> {
        let count = self
            .u16_at(offset)
            .ok_or_else(|| Self::corrupted("IFD entry count", offset))?;
        if count > MAX_IFD_ENTRIES {
            return Err(DecodeError::CorruptedFile(format!(
                "Too many IFD entries ({}) at offset {}",
                count, offset
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let at = offset + 2 + i * 12;
            let (Some(tag), Some(typ), Some(n)) =
                (self.u16_at(at), self.u16_at(at + 2), self.u32_at(at + 4))
            else {
                return Err(Self::corrupted("IFD entry", at));
            };
            // SHORT values are left-justified in the 4-byte field.
            let value = if typ == TYPE_SHORT && n == 1 {
                self.u16_at(at + 8).map(u32::from)
            } else {
                self.u32_at(at + 8)
            }
            .ok_or_else(|| Self::corrupted("IFD value", at + 8))?;
            entries.push(Entry {
                tag,
                typ,
                count: n,
                value,
            });
        }

        let next = self.u32_at(offset + 2 + count as usize * 12).unwrap_or(0);
        Ok(Ifd { entries, next })
    }

    /// Offsets of the SubIFDs referenced by `entry`.
    fn sub_ifd_offsets(&self, entry: Entry) -> Vec<u32> {
        if entry.count <= 1 {
            return vec![entry.value];
        }
        let width = if entry.typ == TYPE_SHORT { 2 } else { 4 };
        (0..entry.count.min(MAX_IFDS as u32) as usize)
            .filter_map(|i| {
                let at = entry.value as usize + i * width;
                if width == 2 {
                    self.u16_at(at).map(u32::from)
                } else {
                    self.u32_at(at)
                }
            })
            .collect()
    }

    /// Walk IFD0, its chain and all SubIFDs collecting valid JPEG slices.
    ///
    /// Only a failure to read IFD0 is an error; damaged secondary IFDs are
    /// skipped.
    fn preview_candidates(&self) -> Result<Vec<&'a [u8]>, DecodeError> {
        let first = self.first_ifd()?;
        let mut pending: Vec<u32> = Vec::new();
        let mut visited: Vec<u32> = Vec::new();
        let mut candidates = Vec::new();

        let mut visit = |ifd: &Ifd, pending: &mut Vec<u32>| {
            if let Some(jpeg) = self.jpeg_from_entries(ifd) {
                candidates.push(jpeg);
            }
            if let Some(sub) = ifd.find(TAG_SUBIFDS) {
                pending.extend(self.sub_ifd_offsets(sub));
            }
            if ifd.next != 0 {
                pending.push(ifd.next);
            }
        };

        visit(&first, &mut pending);
        while let Some(offset) = pending.pop() {
            if visited.len() >= MAX_IFDS || visited.contains(&offset) {
                continue;
            }
            visited.push(offset);
            match self.ifd_at(offset as usize) {
                Ok(ifd) => visit(&ifd, &mut pending),
                Err(e) => debug!(offset, error = %e, "skipping unreadable IFD"),
            }
        }

        Ok(candidates)
    }

    fn jpeg_from_entries(&self, ifd: &Ifd) -> Option<&'a [u8]> {
        let value_of = |tag| ifd.find(tag).filter(|e| e.typ == TYPE_LONG || e.typ == TYPE_SHORT).map(|e| e.value);

        if let (Some(offset), Some(length)) = (value_of(TAG_JPEG_OFFSET), value_of(TAG_JPEG_LENGTH)) {
            if let Some(jpeg) = jpeg_slice(self.bytes, offset as usize, length as usize) {
                return Some(jpeg);
            }
        }

        // Strip-based previews: only single-strip JPEG-compressed images.
        let compression = value_of(TAG_COMPRESSION)?;
        if compression != COMPRESSION_OLD_JPEG && compression != COMPRESSION_JPEG {
            return None;
        }
        let offsets = ifd.find(TAG_STRIP_OFFSETS).filter(|e| e.count == 1)?;
        let counts = ifd.find(TAG_STRIP_BYTE_COUNTS).filter(|e| e.count == 1)?;
        jpeg_slice(self.bytes, offsets.value as usize, counts.value as usize)
    }
}

/// The slice at `offset..offset+length` if in bounds and a viewable JPEG.
fn jpeg_slice(bytes: &[u8], offset: usize, length: usize) -> Option<&[u8]> {
    if length < 2 {
        return None;
    }
    let data = bytes.get(offset..offset.checked_add(length)?)?;
    if !data.starts_with(&JPEG_SOI) {
        return None;
    }
    match frame_marker(data) {
        Some(0xC0..=0xC2) => Some(data),
        marker => {
            debug!(offset, length, ?marker, "skipping JPEG that is not baseline or progressive");
            None
        }
    }
}

/// The first start-of-frame marker of a JPEG stream.
///
/// Walks the marker segments after SOI and stops at the first SOFn, or
/// gives up at SOS, EOI or anything that is not a marker.
fn frame_marker(data: &[u8]) -> Option<u8> {
    let mut at = 2;
    loop {
        if *data.get(at)? != 0xFF {
            return None;
        }
        while *data.get(at + 1)? == 0xFF {
            at += 1;
        }
        let marker = data[at + 1];
        match marker {
            // C4 (DHT), C8 (JPG) and CC (DAC) share the range but are not frames.
            0xC4 | 0xC8 | 0xCC => {}
            0xC0..=0xCF => return Some(marker),
            MARKER_SOS | MARKER_EOI => return None,
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => {
                at += 2;
                continue;
            }
            _ => {}
        }
        let length = u16::from_be_bytes([*data.get(at + 2)?, *data.get(at + 3)?]) as usize;
        if length < 2 {
            return None;
        }
        at += 2 + length;
    }
}

fn raf_preview(bytes: &[u8]) -> Option<&[u8]> {
    let field = |at: usize| -> Option<usize> {
        let b: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(u32::from_be_bytes(b) as usize)
    };
    let offset = field(RAF_JPEG_OFFSET)?;
    let length = field(RAF_JPEG_OFFSET + 4)?;
    jpeg_slice(bytes, offset, length)
}

/// Find the first SOI..EOI span past the header region that is large
/// enough to be a real preview.
fn scan_for_jpeg(bytes: &[u8]) -> Option<&[u8]> {
    let mut start = SCAN_START.min(bytes.len());
    while let Some(soi) = find_marker(bytes, start, JPEG_SOI) {
        let mut search = soi + 2;
        while let Some(eoi) = find_marker(bytes, search, JPEG_EOI) {
            let span = &bytes[soi..eoi + 2];
            if span.len() > MIN_SCANNED_PREVIEW {
                return Some(span);
            }
            search = eoi + 2;
        }
        start = soi + 2;
    }
    None
}

fn find_marker(bytes: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}
