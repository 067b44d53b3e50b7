//! TrueType font parsing and glyph-level subsetting.
//!
//! Reads just the tables embedding needs: the table directory, `head`,
//! `maxp`, `hhea`/`hmtx` for metrics, `cmap` (formats 4 and 12) for the
//! char-to-glyph map, `loca`/`glyf` for subsetting, and `name` for the
//! PostScript name. All multi-byte values are big-endian.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Result, TranslateError};

const MORE_COMPONENTS: u16 = 0x0020;
const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
const WE_HAVE_A_SCALE: u16 = 0x0008;
const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;

fn err(msg: impl Into<String>) -> TranslateError {
    TranslateError::FontEmbed(msg.into())
}

/// A parsed TrueType face, keeping the raw bytes for embedding.
#[derive(Debug, Clone)]
pub struct TrueTypeFace {
    data: Vec<u8>,
    tables: FxHashMap<[u8; 4], (u32, u32)>,
    pub units_per_em: u16,
    pub num_glyphs: u16,
    pub ascender: i16,
    pub descender: i16,
    /// Font bounding box (xMin, yMin, xMax, yMax) in font units.
    pub bbox: (i16, i16, i16, i16),
    pub postscript_name: String,
    index_to_loc_long: bool,
    cmap: FxHashMap<u32, u16>,
    advances: Vec<u16>,
    loca: Vec<u32>,
}

impl TrueTypeFace {
    pub fn parse(data: Vec<u8>) -> Result<TrueTypeFace> {
        let mut cur = Cursor::new(&data[..]);
        let version = cur.read_u32::<BigEndian>().map_err(|e| err(e.to_string()))?;
        if version != 0x0001_0000 && version != 0x7472_7565 {
            return Err(err(format!("not a TrueType font (sfnt {version:#x})")));
        }
        let num_tables = cur.read_u16::<BigEndian>().map_err(|e| err(e.to_string()))?;
        cur.seek(SeekFrom::Current(6)).map_err(|e| err(e.to_string()))?;

        let mut tables = FxHashMap::default();
        for _ in 0..num_tables {
            let mut tag = [0u8; 4];
            cur.read_exact(&mut tag).map_err(|e| err(e.to_string()))?;
            let _checksum = cur.read_u32::<BigEndian>().map_err(|e| err(e.to_string()))?;
            let offset = cur.read_u32::<BigEndian>().map_err(|e| err(e.to_string()))?;
            let length = cur.read_u32::<BigEndian>().map_err(|e| err(e.to_string()))?;
            if (offset as usize).saturating_add(length as usize) > data.len() {
                return Err(err(format!(
                    "table {} extends past end of font",
                    String::from_utf8_lossy(&tag)
                )));
            }
            tables.insert(tag, (offset, length));
        }

        let mut face = TrueTypeFace {
            data,
            tables,
            units_per_em: 1000,
            num_glyphs: 0,
            ascender: 800,
            descender: -200,
            bbox: (0, -200, 1000, 800),
            postscript_name: String::new(),
            index_to_loc_long: false,
            cmap: FxHashMap::default(),
            advances: Vec::new(),
            loca: Vec::new(),
        };
        face.parse_head()?;
        face.parse_maxp()?;
        face.parse_hhea_hmtx()?;
        face.parse_cmap()?;
        face.parse_loca()?;
        face.parse_name();
        Ok(face)
    }

    /// The raw font bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn table(&self, tag: &[u8; 4]) -> Option<&[u8]> {
        let &(offset, length) = self.tables.get(tag)?;
        self.data.get(offset as usize..(offset + length) as usize)
    }

    fn require(&self, tag: &[u8; 4]) -> Result<&[u8]> {
        self.table(tag)
            .ok_or_else(|| err(format!("missing table {}", String::from_utf8_lossy(tag))))
    }

    fn parse_head(&mut self) -> Result<()> {
        let head = self.require(b"head")?;
        if head.len() < 54 {
            return Err(err("head table too short"));
        }
        let units_per_em = read_u16(head, 18);
        let bbox = (
            read_u16(head, 36) as i16,
            read_u16(head, 38) as i16,
            read_u16(head, 40) as i16,
            read_u16(head, 42) as i16,
        );
        let index_to_loc_long = read_u16(head, 50) as i16 != 0;
        self.units_per_em = if units_per_em == 0 { 1000 } else { units_per_em };
        self.bbox = bbox;
        self.index_to_loc_long = index_to_loc_long;
        Ok(())
    }

    fn parse_maxp(&mut self) -> Result<()> {
        let maxp = self.require(b"maxp")?;
        if maxp.len() < 6 {
            return Err(err("maxp table too short"));
        }
        self.num_glyphs = read_u16(maxp, 4);
        Ok(())
    }

    fn parse_hhea_hmtx(&mut self) -> Result<()> {
        let hhea = self.require(b"hhea")?;
        if hhea.len() < 36 {
            return Err(err("hhea table too short"));
        }
        let ascender = read_u16(hhea, 4) as i16;
        let descender = read_u16(hhea, 6) as i16;
        let num_hmetrics = read_u16(hhea, 34) as usize;
        let hmtx = self.require(b"hmtx")?;
        let mut advances = Vec::with_capacity(self.num_glyphs as usize);
        let mut last = 0u16;
        for i in 0..num_hmetrics.min(self.num_glyphs as usize) {
            let pos = i * 4;
            if pos + 2 > hmtx.len() {
                break;
            }
            last = read_u16(hmtx, pos);
            advances.push(last);
        }
        while advances.len() < self.num_glyphs as usize {
            advances.push(last);
        }
        self.ascender = ascender;
        self.descender = descender;
        self.advances = advances;
        Ok(())
    }

    fn parse_cmap(&mut self) -> Result<()> {
        let cmap = self.require(b"cmap")?;
        if cmap.len() < 4 {
            return Err(err("cmap table too short"));
        }
        let num_subtables = read_u16(cmap, 2) as usize;
        // Prefer a full Unicode subtable, then the Windows BMP one.
        let mut best: Option<(u32, u32)> = None;
        for i in 0..num_subtables {
            let rec = 4 + i * 8;
            if rec + 8 > cmap.len() {
                break;
            }
            let platform = read_u16(cmap, rec);
            let encoding = read_u16(cmap, rec + 2);
            let offset = read_u32(cmap, rec + 4);
            let rank = match (platform, encoding) {
                (3, 10) | (0, 4) | (0, 6) => 3,
                (3, 1) | (0, 3) => 2,
                (0, _) => 1,
                _ => 0,
            };
            if rank > 0 && best.map(|(r, _)| rank > r).unwrap_or(true) {
                best = Some((rank, offset));
            }
        }
        let (_, offset) = best.ok_or_else(|| err("no usable cmap subtable"))?;
        let sub = cmap
            .get(offset as usize..)
            .ok_or_else(|| err("cmap subtable offset out of range"))?;
        if sub.len() < 2 {
            return Err(err("cmap subtable truncated"));
        }
        let mut map = FxHashMap::default();
        match read_u16(sub, 0) {
            4 => parse_cmap_format4(sub, &mut map)?,
            12 => parse_cmap_format12(sub, &mut map)?,
            other => return Err(err(format!("unsupported cmap format {other}"))),
        }
        self.cmap = map;
        Ok(())
    }

    fn parse_loca(&mut self) -> Result<()> {
        let Some(loca) = self.table(b"loca") else {
            // CFF-flavored fonts have no loca/glyf; subsetting is skipped.
            return Ok(());
        };
        let count = self.num_glyphs as usize + 1;
        let mut out = Vec::with_capacity(count);
        if self.index_to_loc_long {
            for i in 0..count {
                if i * 4 + 4 > loca.len() {
                    break;
                }
                out.push(read_u32(loca, i * 4));
            }
        } else {
            for i in 0..count {
                if i * 2 + 2 > loca.len() {
                    break;
                }
                out.push(read_u16(loca, i * 2) as u32 * 2);
            }
        }
        self.loca = out;
        Ok(())
    }

    fn parse_name(&mut self) {
        self.postscript_name = self
            .table(b"name")
            .and_then(read_postscript_name)
            .unwrap_or_else(|| "EmbeddedFont".to_string());
    }

    /// Glyph id for a character, if the font covers it.
    pub fn glyph_id(&self, ch: char) -> Option<u16> {
        self.cmap.get(&(ch as u32)).copied()
    }

    pub fn has_glyph(&self, ch: char) -> bool {
        self.glyph_id(ch).is_some()
    }

    /// Advance width in font units.
    pub fn advance(&self, gid: u16) -> u16 {
        self.advances.get(gid as usize).copied().unwrap_or(0)
    }

    /// Advance width scaled to a 1000-unit em.
    pub fn advance_1000(&self, gid: u16) -> i64 {
        self.advance(gid) as i64 * 1000 / self.units_per_em as i64
    }

    /// Produces a subset copy of the font: glyph outlines not reachable
    /// from `used` are blanked in place. Glyph ids are untouched, so
    /// CIDToGIDMap entries and composite references stay valid.
    pub fn subset(&self, used: &FxHashSet<u16>) -> Result<Vec<u8>> {
        let &(glyf_off, glyf_len) = self
            .tables
            .get(b"glyf")
            .ok_or_else(|| err("no glyf table to subset"))?;
        if self.loca.len() != self.num_glyphs as usize + 1 {
            return Err(err("loca table incomplete"));
        }

        let keep = self.closure_with_components(used)?;
        let mut out = self.data.clone();
        let glyf_start = glyf_off as usize;
        for gid in 0..self.num_glyphs {
            if keep.contains(&gid) {
                continue;
            }
            let (start, end) = (
                self.loca[gid as usize] as usize,
                self.loca[gid as usize + 1] as usize,
            );
            if end <= start || end > glyf_len as usize {
                continue;
            }
            out[glyf_start + start..glyf_start + end].fill(0);
        }

        update_checksums(&mut out);
        Ok(out)
    }

    /// Expands a glyph set with every component referenced by composite
    /// glyphs in the set. The notdef glyph is always kept.
    fn closure_with_components(&self, used: &FxHashSet<u16>) -> Result<FxHashSet<u16>> {
        let glyf = self.require(b"glyf")?;
        let mut keep: FxHashSet<u16> = used.clone();
        keep.insert(0);
        let mut work: Vec<u16> = keep.iter().copied().collect();
        while let Some(gid) = work.pop() {
            let (idx, next) = (gid as usize, gid as usize + 1);
            if next >= self.loca.len() {
                continue;
            }
            let (start, end) = (self.loca[idx] as usize, self.loca[next] as usize);
            if end <= start || end > glyf.len() || end - start < 10 {
                continue;
            }
            let num_contours = read_u16(glyf, start) as i16;
            if num_contours >= 0 {
                continue;
            }
            // Composite glyph: walk the component records.
            let mut pos = start + 10;
            loop {
                if pos + 4 > end {
                    break;
                }
                let flags = read_u16(glyf, pos);
                let component = read_u16(glyf, pos + 2);
                if keep.insert(component) {
                    work.push(component);
                }
                pos += 4;
                pos += if flags & ARG_1_AND_2_ARE_WORDS != 0 { 4 } else { 2 };
                if flags & WE_HAVE_A_SCALE != 0 {
                    pos += 2;
                } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
                    pos += 4;
                } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
                    pos += 8;
                }
                if flags & MORE_COMPONENTS == 0 {
                    break;
                }
            }
        }
        Ok(keep)
    }
}

fn parse_cmap_format4(sub: &[u8], map: &mut FxHashMap<u32, u16>) -> Result<()> {
    if sub.len() < 16 {
        return Err(err("cmap format 4 too short"));
    }
    let seg_count = (read_u16(sub, 6) / 2) as usize;
    let end_codes = 14;
    let start_codes = 16 + seg_count * 2;
    let deltas = 16 + seg_count * 4;
    let range_offsets = 16 + seg_count * 6;
    if range_offsets + seg_count * 2 > sub.len() {
        return Err(err("cmap format 4 truncated"));
    }
    for i in 0..seg_count {
        let end = read_u16(sub, end_codes + i * 2);
        let start = read_u16(sub, start_codes + i * 2);
        let delta = read_u16(sub, deltas + i * 2);
        let range_offset = read_u16(sub, range_offsets + i * 2);
        if start == 0xFFFF {
            continue;
        }
        for code in start..=end.min(0xFFFE) {
            let gid = if range_offset == 0 {
                code.wrapping_add(delta)
            } else {
                let pos = range_offsets
                    + i * 2
                    + range_offset as usize
                    + 2 * (code - start) as usize;
                if pos + 2 > sub.len() {
                    continue;
                }
                let raw = read_u16(sub, pos);
                if raw == 0 {
                    continue;
                }
                raw.wrapping_add(delta)
            };
            if gid != 0 {
                map.insert(code as u32, gid);
            }
        }
    }
    Ok(())
}

fn parse_cmap_format12(sub: &[u8], map: &mut FxHashMap<u32, u16>) -> Result<()> {
    if sub.len() < 16 {
        return Err(err("cmap format 12 too short"));
    }
    let n_groups = read_u32(sub, 12) as usize;
    for i in 0..n_groups {
        let rec = 16 + i * 12;
        if rec + 12 > sub.len() {
            break;
        }
        let start = read_u32(sub, rec);
        let end = read_u32(sub, rec + 4).min(0x10FFFF);
        let start_gid = read_u32(sub, rec + 8);
        for (k, code) in (start..=end).enumerate() {
            let gid = start_gid as usize + k;
            if gid != 0 && gid <= u16::MAX as usize {
                map.insert(code, gid as u16);
            }
        }
    }
    Ok(())
}

#[inline]
fn read_u16(data: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([data[pos], data[pos + 1]])
}

#[inline]
fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn read_postscript_name(name: &[u8]) -> Option<String> {
    if name.len() < 6 {
        return None;
    }
    let count = read_u16(name, 2) as usize;
    let string_offset = read_u16(name, 4) as usize;
    for i in 0..count {
        let rec = 6 + i * 12;
        if rec + 12 > name.len() {
            break;
        }
        let platform = read_u16(name, rec);
        let name_id = read_u16(name, rec + 6);
        let length = read_u16(name, rec + 8) as usize;
        let offset = read_u16(name, rec + 10) as usize;
        if name_id != 6 {
            continue;
        }
        let bytes = name.get(string_offset + offset..string_offset + offset + length)?;
        let value = if platform == 3 || platform == 0 {
            // UTF-16BE
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        } else {
            bytes.iter().map(|&b| b as char).collect()
        };
        let trimmed: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        if !trimmed.is_empty() {
            return Some(trimmed);
        }
    }
    None
}

/// Recomputes each directory entry's checksum and the whole-font
/// adjustment in `head` after glyph data was rewritten.
fn update_checksums(data: &mut [u8]) {
    if data.len() < 12 {
        return;
    }
    let num_tables = read_u16(data, 4) as usize;
    let mut head_offset = None;
    for i in 0..num_tables {
        let rec = 12 + i * 16;
        if rec + 16 > data.len() {
            break;
        }
        let tag = [data[rec], data[rec + 1], data[rec + 2], data[rec + 3]];
        let offset = read_u32(data, rec + 8) as usize;
        let length = read_u32(data, rec + 12) as usize;
        if offset + length > data.len() {
            continue;
        }
        if &tag == b"head" {
            head_offset = Some(offset);
            // checkSumAdjustment must be zero while summing.
            if offset + 12 <= data.len() {
                data[offset + 8..offset + 12].fill(0);
            }
        }
        let sum = table_checksum(&data[offset..offset + length]);
        data[rec + 4..rec + 8].copy_from_slice(&sum.to_be_bytes());
    }
    if let Some(head) = head_offset {
        let total = table_checksum(data);
        let adjustment = 0xB1B0_AFBAu32.wrapping_sub(total);
        if head + 12 <= data.len() {
            data[head + 8..head + 12].copy_from_slice(&adjustment.to_be_bytes());
        }
    }
}

fn table_checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    sum
}
