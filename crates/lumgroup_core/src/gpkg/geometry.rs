//! GeoPackage binary geometry decoding and canonical WKT rendering.
//!
//! # Responsibility
//! - Parse the `GP` blob header (version, flags, srs id, envelope).
//! - Decode the WKB payload (ISO and extended type codes, both byte orders).
//! - Render geometries as OGC WKT, which doubles as the grouping key.
//!
//! # Invariants
//! - Equal decoded geometries always render to equal WKT strings.
//! - Decoding never panics on malformed input; it returns `GeometryError`.

use std::error::Error;
use std::fmt::{Display, Formatter, Write};

const GPKG_MAGIC: &[u8; 2] = b"GP";
const HEADER_LEN: usize = 8;
const MAX_NESTING: usize = 32;

const FLAG_HEADER_LE: u8 = 0b0000_0001;
const FLAG_EMPTY: u8 = 0b0001_0000;
const FLAG_EXTENDED: u8 = 0b0010_0000;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

pub type GeometryResult<T> = Result<T, GeometryError>;

/// Decoding failure for GeoPackage geometry blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    Truncated { offset: usize, needed: usize },
    BadMagic,
    InvalidEnvelope(u8),
    ExtendedGeometry,
    InvalidByteOrder(u8),
    UnknownType(u32),
    UnexpectedMember { expected: &'static str, found: &'static str },
    NestingTooDeep,
}

impl Display for GeometryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { offset, needed } => {
                write!(f, "geometry blob truncated at byte {offset} (needed {needed} more)")
            }
            Self::BadMagic => write!(f, "geometry blob does not start with `GP`"),
            Self::InvalidEnvelope(code) => write!(f, "invalid envelope indicator {code}"),
            Self::ExtendedGeometry => write!(f, "extended GeoPackage geometries are not supported"),
            Self::InvalidByteOrder(value) => write!(f, "invalid WKB byte order marker {value}"),
            Self::UnknownType(code) => write!(f, "unknown WKB geometry type {code}"),
            Self::UnexpectedMember { expected, found } => {
                write!(f, "collection member must be {expected}, found {found}")
            }
            Self::NestingTooDeep => write!(f, "geometry collection nesting too deep"),
        }
    }
}

impl Error for GeometryError {}

/// Coordinate dimensionality of one geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensions {
    Xy,
    Xyz,
    Xym,
    Xyzm,
}

impl Dimensions {
    fn from_flags(has_z: bool, has_m: bool) -> Self {
        match (has_z, has_m) {
            (false, false) => Self::Xy,
            (true, false) => Self::Xyz,
            (false, true) => Self::Xym,
            (true, true) => Self::Xyzm,
        }
    }

    pub fn has_z(self) -> bool {
        matches!(self, Self::Xyz | Self::Xyzm)
    }

    pub fn has_m(self) -> bool {
        matches!(self, Self::Xym | Self::Xyzm)
    }

    fn wkt_suffix(self) -> &'static str {
        match self {
            Self::Xy => "",
            Self::Xyz => " Z",
            Self::Xym => " M",
            Self::Xyzm => " ZM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            z: None,
            m: None,
        }
    }
}

/// A ring or line string.
pub type CoordSeq = Vec<Coord>;

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryValue {
    /// `None` is the empty point.
    Point(Option<Coord>),
    LineString(CoordSeq),
    Polygon(Vec<CoordSeq>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<CoordSeq>),
    MultiPolygon(Vec<Vec<CoordSeq>>),
    GeometryCollection(Vec<Geometry>),
}

impl GeometryValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Point(_) => "POINT",
            Self::LineString(_) => "LINESTRING",
            Self::Polygon(_) => "POLYGON",
            Self::MultiPoint(_) => "MULTIPOINT",
            Self::MultiLineString(_) => "MULTILINESTRING",
            Self::MultiPolygon(_) => "MULTIPOLYGON",
            Self::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub dimensions: Dimensions,
    pub value: GeometryValue,
}

impl Geometry {
    pub fn is_empty(&self) -> bool {
        match &self.value {
            GeometryValue::Point(coord) => coord.is_none(),
            GeometryValue::LineString(coords) | GeometryValue::MultiPoint(coords) => {
                coords.is_empty()
            }
            GeometryValue::Polygon(rings) | GeometryValue::MultiLineString(rings) => {
                rings.is_empty()
            }
            GeometryValue::MultiPolygon(polygons) => polygons.is_empty(),
            GeometryValue::GeometryCollection(members) => members.iter().all(Geometry::is_empty),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }
}

/// Header fields of a GeoPackage geometry blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub version: u8,
    pub srs_id: i32,
    pub empty: bool,
    /// Offset of the WKB payload inside the blob.
    pub wkb_offset: usize,
}

/// Parses the `GP` header of a GeoPackage geometry blob.
pub fn parse_header(blob: &[u8]) -> GeometryResult<BlobHeader> {
    if blob.len() < HEADER_LEN {
        return Err(GeometryError::Truncated {
            offset: blob.len(),
            needed: HEADER_LEN - blob.len(),
        });
    }
    if &blob[..2] != GPKG_MAGIC {
        return Err(GeometryError::BadMagic);
    }

    let flags = blob[3];
    if flags & FLAG_EXTENDED != 0 {
        return Err(GeometryError::ExtendedGeometry);
    }

    let envelope_code = (flags >> 1) & 0b111;
    let envelope_len = match envelope_code {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(GeometryError::InvalidEnvelope(other)),
    };

    let srs_bytes = [blob[4], blob[5], blob[6], blob[7]];
    let srs_id = if flags & FLAG_HEADER_LE != 0 {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };

    let wkb_offset = HEADER_LEN + envelope_len;
    if blob.len() < wkb_offset {
        return Err(GeometryError::Truncated {
            offset: blob.len(),
            needed: wkb_offset - blob.len(),
        });
    }

    Ok(BlobHeader {
        version: blob[2],
        srs_id,
        empty: flags & FLAG_EMPTY != 0,
        wkb_offset,
    })
}

/// Decodes a full GeoPackage geometry blob.
pub fn decode_gpkg_blob(blob: &[u8]) -> GeometryResult<Geometry> {
    let header = parse_header(blob)?;
    let wkb = &blob[header.wkb_offset..];
    if wkb.is_empty() && header.empty {
        return Ok(Geometry {
            dimensions: Dimensions::Xy,
            value: GeometryValue::GeometryCollection(Vec::new()),
        });
    }
    decode_wkb(wkb)
}

/// Decodes a bare WKB geometry.
pub fn decode_wkb(wkb: &[u8]) -> GeometryResult<Geometry> {
    WkbReader { bytes: wkb, pos: 0 }.read_geometry(0)
}

/// Returns the grouping key for an optional geometry blob.
///
/// `NULL` geometries share the empty key.
pub fn geometry_key(blob: Option<&[u8]>) -> GeometryResult<String> {
    match blob {
        None => Ok(String::new()),
        Some(bytes) => Ok(decode_gpkg_blob(bytes)?.to_string()),
    }
}

struct WkbReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl WkbReader<'_> {
    fn take(&mut self, len: usize) -> GeometryResult<&[u8]> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return Err(GeometryError::Truncated {
                offset: self.pos,
                needed: end - self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> GeometryResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self, little_endian: bool) -> GeometryResult<u32> {
        let raw = self.take(4)?;
        let bytes = [raw[0], raw[1], raw[2], raw[3]];
        Ok(if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_f64(&mut self, little_endian: bool) -> GeometryResult<f64> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(if little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    fn read_coord(&mut self, dims: Dimensions, le: bool) -> GeometryResult<Coord> {
        let x = self.read_f64(le)?;
        let y = self.read_f64(le)?;
        let z = if dims.has_z() {
            Some(self.read_f64(le)?)
        } else {
            None
        };
        let m = if dims.has_m() {
            Some(self.read_f64(le)?)
        } else {
            None
        };
        Ok(Coord { x, y, z, m })
    }

    fn read_coords(&mut self, dims: Dimensions, le: bool) -> GeometryResult<CoordSeq> {
        let count = self.read_u32(le)? as usize;
        // Cap the preallocation; a corrupt count must not allocate gigabytes.
        let mut coords = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            coords.push(self.read_coord(dims, le)?);
        }
        Ok(coords)
    }

    fn read_rings(&mut self, dims: Dimensions, le: bool) -> GeometryResult<Vec<CoordSeq>> {
        let count = self.read_u32(le)? as usize;
        let mut rings = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            rings.push(self.read_coords(dims, le)?);
        }
        Ok(rings)
    }

    fn read_members(&mut self, le: bool, depth: usize) -> GeometryResult<Vec<Geometry>> {
        let count = self.read_u32(le)? as usize;
        let mut members = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            members.push(self.read_geometry(depth + 1)?);
        }
        Ok(members)
    }

    fn read_geometry(&mut self, depth: usize) -> GeometryResult<Geometry> {
        if depth > MAX_NESTING {
            return Err(GeometryError::NestingTooDeep);
        }

        let le = match self.read_u8()? {
            0 => false,
            1 => true,
            other => return Err(GeometryError::InvalidByteOrder(other)),
        };
        let raw_type = self.read_u32(le)?;
        if raw_type & EWKB_SRID != 0 {
            self.read_u32(le)?;
        }

        let iso_code = raw_type & 0x0FFF_FFFF;
        let base = iso_code % 1000;
        let (iso_z, iso_m) = match iso_code / 1000 {
            0 => (false, false),
            1 => (true, false),
            2 => (false, true),
            3 => (true, true),
            _ => return Err(GeometryError::UnknownType(raw_type)),
        };
        let dims = Dimensions::from_flags(
            iso_z || raw_type & EWKB_Z != 0,
            iso_m || raw_type & EWKB_M != 0,
        );

        let value = match base {
            1 => {
                let coord = self.read_coord(dims, le)?;
                if coord.x.is_nan() && coord.y.is_nan() {
                    GeometryValue::Point(None)
                } else {
                    GeometryValue::Point(Some(coord))
                }
            }
            2 => GeometryValue::LineString(self.read_coords(dims, le)?),
            3 => GeometryValue::Polygon(self.read_rings(dims, le)?),
            4 => {
                let mut points = Vec::new();
                for member in self.read_members(le, depth)? {
                    match member.value {
                        GeometryValue::Point(Some(coord)) => points.push(coord),
                        GeometryValue::Point(None) => {}
                        other => return Err(unexpected("POINT", &other)),
                    }
                }
                GeometryValue::MultiPoint(points)
            }
            5 => {
                let mut lines = Vec::new();
                for member in self.read_members(le, depth)? {
                    match member.value {
                        GeometryValue::LineString(coords) => lines.push(coords),
                        other => return Err(unexpected("LINESTRING", &other)),
                    }
                }
                GeometryValue::MultiLineString(lines)
            }
            6 => {
                let mut polygons = Vec::new();
                for member in self.read_members(le, depth)? {
                    match member.value {
                        GeometryValue::Polygon(rings) => polygons.push(rings),
                        other => return Err(unexpected("POLYGON", &other)),
                    }
                }
                GeometryValue::MultiPolygon(polygons)
            }
            7 => GeometryValue::GeometryCollection(self.read_members(le, depth)?),
            _ => return Err(GeometryError::UnknownType(raw_type)),
        };

        Ok(Geometry {
            dimensions: dims,
            value,
        })
    }
}

fn unexpected(expected: &'static str, found: &GeometryValue) -> GeometryError {
    GeometryError::UnexpectedMember {
        expected,
        found: found.type_name(),
    }
}

impl Display for Geometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())?;
        f.write_str(self.dimensions.wkt_suffix())?;
        if self.is_empty() {
            return f.write_str(" EMPTY");
        }
        f.write_char(' ')?;

        match &self.value {
            GeometryValue::Point(Some(coord)) => {
                f.write_char('(')?;
                write_coord(f, coord)?;
                f.write_char(')')
            }
            GeometryValue::Point(None) => Ok(()),
            GeometryValue::LineString(coords) => write_seq(f, coords),
            GeometryValue::Polygon(rings) => write_rings(f, rings),
            GeometryValue::MultiPoint(points) => {
                f.write_char('(')?;
                for (index, coord) in points.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_char('(')?;
                    write_coord(f, coord)?;
                    f.write_char(')')?;
                }
                f.write_char(')')
            }
            GeometryValue::MultiLineString(lines) => write_rings(f, lines),
            GeometryValue::MultiPolygon(polygons) => {
                f.write_char('(')?;
                for (index, rings) in polygons.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write_rings(f, rings)?;
                }
                f.write_char(')')
            }
            GeometryValue::GeometryCollection(members) => {
                f.write_char('(')?;
                for (index, member) in members.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_char(')')
            }
        }
    }
}

fn write_coord(f: &mut Formatter<'_>, coord: &Coord) -> std::fmt::Result {
    write!(f, "{} {}", coord.x, coord.y)?;
    if let Some(z) = coord.z {
        write!(f, " {z}")?;
    }
    if let Some(m) = coord.m {
        write!(f, " {m}")?;
    }
    Ok(())
}

fn write_seq(f: &mut Formatter<'_>, coords: &[Coord]) -> std::fmt::Result {
    f.write_char('(')?;
    for (index, coord) in coords.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write_coord(f, coord)?;
    }
    f.write_char(')')
}

fn write_rings(f: &mut Formatter<'_>, rings: &[CoordSeq]) -> std::fmt::Result {
    f.write_char('(')?;
    for (index, ring) in rings.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write_seq(f, ring)?;
    }
    f.write_char(')')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(flags: u8, srs_id: i32) -> Vec<u8> {
        let mut blob = vec![b'G', b'P', 0, flags];
        blob.extend_from_slice(&srs_id.to_le_bytes());
        blob
    }

    fn wkb_point_le(type_code: u32, values: &[f64]) -> Vec<u8> {
        let mut wkb = vec![1];
        wkb.extend_from_slice(&type_code.to_le_bytes());
        for value in values {
            wkb.extend_from_slice(&value.to_le_bytes());
        }
        wkb
    }

    #[test]
    fn decodes_little_endian_point() {
        let mut blob = header(FLAG_HEADER_LE, 4326);
        blob.extend(wkb_point_le(1, &[1.5, -2.0]));

        let parsed = parse_header(&blob).unwrap();
        assert_eq!(parsed.srs_id, 4326);
        assert_eq!(parsed.wkb_offset, 8);
        assert_eq!(geometry_key(Some(&blob)).unwrap(), "POINT (1.5 -2)");
    }

    #[test]
    fn decodes_big_endian_point_with_envelope() {
        let mut blob = vec![b'G', b'P', 0, 0b0000_0010];
        blob.extend_from_slice(&3857i32.to_be_bytes());
        blob.extend(std::iter::repeat(0u8).take(32));
        blob.push(0);
        blob.extend_from_slice(&1u32.to_be_bytes());
        blob.extend_from_slice(&10.0f64.to_be_bytes());
        blob.extend_from_slice(&20.25f64.to_be_bytes());

        let parsed = parse_header(&blob).unwrap();
        assert_eq!(parsed.srs_id, 3857);
        assert_eq!(parsed.wkb_offset, 40);
        assert_eq!(decode_gpkg_blob(&blob).unwrap().to_string(), "POINT (10 20.25)");
    }

    #[test]
    fn renders_z_points_for_iso_and_extended_codes() {
        let iso = wkb_point_le(1001, &[1.0, 2.0, 3.0]);
        let ewkb = wkb_point_le(EWKB_Z | 1, &[1.0, 2.0, 3.0]);

        assert_eq!(decode_wkb(&iso).unwrap().to_string(), "POINT Z (1 2 3)");
        assert_eq!(decode_wkb(&iso).unwrap(), decode_wkb(&ewkb).unwrap());
    }

    #[test]
    fn nan_point_is_empty() {
        let wkb = wkb_point_le(1, &[f64::NAN, f64::NAN]);
        let geometry = decode_wkb(&wkb).unwrap();
        assert!(geometry.is_empty());
        assert_eq!(geometry.to_string(), "POINT EMPTY");
    }

    #[test]
    fn renders_polygon_and_multipolygon() {
        let mut polygon = vec![1];
        polygon.extend_from_slice(&3u32.to_le_bytes());
        polygon.extend_from_slice(&1u32.to_le_bytes());
        polygon.extend_from_slice(&4u32.to_le_bytes());
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)] {
            polygon.extend_from_slice(&f64::to_le_bytes(x));
            polygon.extend_from_slice(&f64::to_le_bytes(y));
        }
        assert_eq!(
            decode_wkb(&polygon).unwrap().to_string(),
            "POLYGON ((0 0, 1 0, 1 1, 0 0))"
        );

        let mut multi = vec![1];
        multi.extend_from_slice(&6u32.to_le_bytes());
        multi.extend_from_slice(&2u32.to_le_bytes());
        multi.extend_from_slice(&polygon);
        multi.extend_from_slice(&polygon);
        assert_eq!(
            decode_wkb(&multi).unwrap().to_string(),
            "MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((0 0, 1 0, 1 1, 0 0)))"
        );
    }

    #[test]
    fn multipoint_rejects_non_point_members() {
        let mut line = vec![1];
        line.extend_from_slice(&2u32.to_le_bytes());
        line.extend_from_slice(&0u32.to_le_bytes());

        let mut multi = vec![1];
        multi.extend_from_slice(&4u32.to_le_bytes());
        multi.extend_from_slice(&1u32.to_le_bytes());
        multi.extend_from_slice(&line);

        assert_eq!(
            decode_wkb(&multi).unwrap_err(),
            GeometryError::UnexpectedMember {
                expected: "POINT",
                found: "LINESTRING"
            }
        );
    }

    #[test]
    fn malformed_blobs_return_errors() {
        assert_eq!(parse_header(b"XP\0\x01\0\0\0\0").unwrap_err(), GeometryError::BadMagic);
        assert!(matches!(
            parse_header(b"GP\0").unwrap_err(),
            GeometryError::Truncated { .. }
        ));
        assert_eq!(
            parse_header(b"GP\0\x0b\0\0\0\0").unwrap_err(),
            GeometryError::InvalidEnvelope(5)
        );

        let mut blob = header(FLAG_HEADER_LE, 0);
        blob.extend(wkb_point_le(1, &[1.0]));
        assert!(matches!(
            decode_gpkg_blob(&blob).unwrap_err(),
            GeometryError::Truncated { .. }
        ));
    }

    #[test]
    fn null_geometry_key_is_empty_string() {
        assert_eq!(geometry_key(None).unwrap(), "");
    }

    #[test]
    fn empty_flag_without_payload_decodes_to_empty_collection() {
        let blob = header(FLAG_HEADER_LE | FLAG_EMPTY, 0);
        assert_eq!(
            decode_gpkg_blob(&blob).unwrap().to_string(),
            "GEOMETRYCOLLECTION EMPTY"
        );
    }
}
