//! Shapefile export of a reconciled layer.
//!
//! # Responsibility
//! - Map layer columns to dBase fields and geometries to ESRI shapes.
//! - Write `.shp/.shx/.dbf` (and `.prj` when the SRS is known).
//! - Report writer status and verify the output independently of it.
//!
//! # Invariants
//! - The target path always ends in `.shp`.
//! - Export never mutates the layer and never panics on bad rows; rows whose
//!   geometry cannot be represented are skipped and counted.

use crate::gpkg::geometry::{decode_gpkg_blob, Coord, Geometry, GeometryValue};
use crate::model::layer::{AttributeValue, ColumnInfo, LayerRow};
use crate::repo::layer_repo::{LayerRepository, RepoError};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::record::EsriShape;
use shapefile::{
    Multipoint, MultipointZ, Point, PointZ, Polygon, PolygonRing, PolygonZ, Polyline, PolylineZ,
    Writer, NO_DATA,
};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Instant;

const SHP_EXTENSION: &str = "shp";
const SIDECAR_EXTENSIONS: [&str; 3] = ["shx", "dbf", "prj"];
const DBF_NAME_MAX_CHARS: usize = 10;
const DBF_CHAR_MAX_BYTES: usize = 254;
const DBF_INTEGER_LENGTH: u8 = 18;
const DBF_REAL_LENGTH: u8 = 20;
const DBF_REAL_DECIMALS: u8 = 8;

static DBF_INVALID_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid dbf name regex"));

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug)]
pub enum ExportError {
    Repo(RepoError),
    Shapefile(shapefile::Error),
    Io(std::io::Error),
    FieldName { column: String, reason: String },
    NoSupportedGeometry,
}

impl Display for ExportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Shapefile(err) => write!(f, "shapefile writer failed: {err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::FieldName { column, reason } => {
                write!(f, "column `{column}` cannot be exported: {reason}")
            }
            Self::NoSupportedGeometry => {
                write!(f, "layer has no geometry representable as a shapefile shape")
            }
        }
    }
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Shapefile(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::FieldName { .. } | Self::NoSupportedGeometry => None,
        }
    }
}

impl From<RepoError> for ExportError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<shapefile::Error> for ExportError {
    fn from(value: shapefile::Error) -> Self {
        Self::Shapefile(value)
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Result of one export attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub features_written: usize,
    pub features_skipped: usize,
    /// Writer-reported failure, if any.
    pub writer_error: Option<String>,
    /// Whether the `.shp` file exists after the attempt.
    pub verified: bool,
}

impl ExportReport {
    /// True when the writer reported an error but the output exists anyway.
    pub fn is_suspect_failure(&self) -> bool {
        self.writer_error.is_some() && self.verified
    }
}

/// Appends `.shp` unless the path already ends with it (case-insensitive).
pub fn ensure_shp_extension(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let has_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SHP_EXTENSION));
    if has_extension {
        return path.to_path_buf();
    }
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".");
    raw.push(SHP_EXTENSION);
    PathBuf::from(raw)
}

/// Default output: `<input dir>/<input stem>_<layer>.shp`.
pub fn default_output_path(input: impl AsRef<Path>, layer: &str) -> PathBuf {
    let input = input.as_ref();
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "layer".to_string());
    input.with_file_name(format!("{stem}_{layer}.{SHP_EXTENSION}"))
}

/// Exports the repository's layer to a shapefile at `target`.
///
/// Writer failures are captured in the report rather than returned; callers
/// should trust `verified` over `writer_error`. Files left at `target` by an
/// earlier export are removed first, so `verified` only reflects this run.
pub fn export_layer<R: LayerRepository + ?Sized>(
    repo: &R,
    target: impl AsRef<Path>,
) -> ExportReport {
    let path = ensure_shp_extension(target);
    let started_at = Instant::now();
    let layer = repo.layer().name.clone();
    info!(
        "event=shapefile_export module=export status=start layer={} path={}",
        layer,
        path.display()
    );

    let cleared = clear_previous_output(&path);
    let fresh = cleared.is_ok();
    let (written, skipped, writer_error) = match cleared.and_then(|()| write_layer(repo, &path)) {
        Ok((written, skipped)) => (written, skipped, None),
        Err(err) => {
            error!(
                "event=shapefile_export module=export status=error layer={} duration_ms={} error_code=export_failed error={}",
                layer,
                started_at.elapsed().as_millis(),
                err
            );
            (0, 0, Some(err.to_string()))
        }
    };

    let verified = fresh && path.is_file();
    if writer_error.is_some() && verified {
        warn!(
            "event=shapefile_export module=export status=warn layer={} reason=writer_error_but_output_exists",
            layer
        );
    } else if writer_error.is_none() {
        info!(
            "event=shapefile_export module=export status=ok layer={} duration_ms={} written={} skipped={} verified={}",
            layer,
            started_at.elapsed().as_millis(),
            written,
            skipped,
            verified
        );
    }

    ExportReport {
        path,
        features_written: written,
        features_skipped: skipped,
        writer_error,
        verified,
    }
}

/// Removes a previous `.shp` and its sidecars so stale files cannot pass verification.
fn clear_previous_output(path: &Path) -> ExportResult<()> {
    let sidecars = SIDECAR_EXTENSIONS.iter().map(|ext| path.with_extension(ext));
    for file in std::iter::once(path.to_path_buf()).chain(sidecars) {
        if file.is_file() {
            std::fs::remove_file(&file)?;
        }
    }
    Ok(())
}

fn write_layer<R: LayerRepository + ?Sized>(
    repo: &R,
    path: &Path,
) -> ExportResult<(usize, usize)> {
    let columns = repo.attribute_columns()?;
    let fields = plan_fields(&columns);
    let rows = repo.scan_rows()?;

    let prepared: Vec<PreparedRow> = rows
        .into_iter()
        .map(|row| prepare_row(row, &fields))
        .collect();
    let kind = detect_kind(&prepared)
        .or_else(|| declared_kind(repo.layer().geometry_type.as_deref()))
        .ok_or(ExportError::NoSupportedGeometry)?;

    let table = fields
        .iter()
        .try_fold(TableWriterBuilder::new(), |builder, field| {
            let name =
                FieldName::try_from(field.key.as_str()).map_err(|err| ExportError::FieldName {
                    column: field.column.clone(),
                    reason: format!("{err:?}"),
                })?;
            Ok::<_, ExportError>(match field.kind {
                DbfKind::Integer => builder.add_numeric_field(name, DBF_INTEGER_LENGTH, 0),
                DbfKind::Real => {
                    builder.add_numeric_field(name, DBF_REAL_LENGTH, DBF_REAL_DECIMALS)
                }
                DbfKind::Character => builder.add_character_field(name, DBF_CHAR_MAX_BYTES as u8),
            })
        })?;

    let counts = match (kind.family, kind.has_z) {
        (ShapeFamily::Point, false) => write_shapes(path, table, &prepared, to_point)?,
        (ShapeFamily::Point, true) => write_shapes(path, table, &prepared, to_point_z)?,
        (ShapeFamily::Multipoint, false) => write_shapes(path, table, &prepared, to_multipoint)?,
        (ShapeFamily::Multipoint, true) => {
            write_shapes(path, table, &prepared, to_multipoint_z)?
        }
        (ShapeFamily::Polyline, false) => write_shapes(path, table, &prepared, to_polyline)?,
        (ShapeFamily::Polyline, true) => write_shapes(path, table, &prepared, to_polyline_z)?,
        (ShapeFamily::Polygon, false) => write_shapes(path, table, &prepared, to_polygon)?,
        (ShapeFamily::Polygon, true) => write_shapes(path, table, &prepared, to_polygon_z)?,
    };

    if let Some(definition) = repo.srs_definition()? {
        std::fs::write(path.with_extension("prj"), definition)?;
    }

    Ok(counts)
}

fn write_shapes<S, F>(
    path: &Path,
    table: TableWriterBuilder,
    rows: &[PreparedRow],
    convert: F,
) -> ExportResult<(usize, usize)>
where
    S: EsriShape,
    F: Fn(&Geometry) -> Option<S>,
{
    let mut writer = Writer::from_path(path, table)?;
    let mut written = 0;
    let mut skipped = 0;
    for row in rows {
        match row.geometry.as_ref().and_then(&convert) {
            Some(shape) => {
                writer.write_shape_and_record(&shape, &row.record)?;
                written += 1;
            }
            None => {
                warn!(
                    "event=shapefile_export module=export status=warn reason=geometry_skipped internal_id={}",
                    row.internal_id
                );
                skipped += 1;
            }
        }
    }
    Ok((written, skipped))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbfKind {
    Integer,
    Real,
    Character,
}

struct DbfField {
    column_index: usize,
    column: String,
    key: String,
    kind: DbfKind,
}

struct PreparedRow {
    internal_id: i64,
    geometry: Option<Geometry>,
    record: Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeFamily {
    Point,
    Multipoint,
    Polyline,
    Polygon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExportKind {
    family: ShapeFamily,
    has_z: bool,
}

fn dbf_kind(declared_type: &str) -> DbfKind {
    if declared_type.contains("INT") || declared_type == "BOOLEAN" {
        DbfKind::Integer
    } else if ["REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|needle| declared_type.contains(needle))
    {
        DbfKind::Real
    } else {
        DbfKind::Character
    }
}

/// Produces unique dBase field names of at most 10 characters.
fn dbf_field_names(columns: &[ColumnInfo]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    columns
        .iter()
        .map(|column| {
            let sanitized = DBF_INVALID_CHARS_RE.replace_all(&column.name, "_");
            let base: String = if sanitized.is_empty() {
                "FIELD".to_string()
            } else {
                sanitized.chars().take(DBF_NAME_MAX_CHARS).collect()
            };

            let mut candidate = base.clone();
            let mut suffix = 1;
            while used.contains(&candidate.to_ascii_uppercase()) {
                let tail = format!("_{suffix}");
                let keep = DBF_NAME_MAX_CHARS.saturating_sub(tail.len());
                candidate = format!("{}{}", base.chars().take(keep).collect::<String>(), tail);
                suffix += 1;
            }
            used.insert(candidate.to_ascii_uppercase());
            candidate
        })
        .collect()
}

fn plan_fields(columns: &[ColumnInfo]) -> Vec<DbfField> {
    dbf_field_names(columns)
        .into_iter()
        .zip(columns)
        .enumerate()
        .map(|(column_index, (key, column))| DbfField {
            column_index,
            column: column.name.clone(),
            key,
            kind: dbf_kind(&column.declared_type),
        })
        .collect()
}

fn prepare_row(row: LayerRow, fields: &[DbfField]) -> PreparedRow {
    let geometry = row.geometry.as_deref().and_then(|blob| match decode_gpkg_blob(blob) {
        Ok(geometry) if !geometry.is_empty() => Some(geometry),
        Ok(_) => None,
        Err(err) => {
            warn!(
                "event=shapefile_export module=export status=warn reason=invalid_geometry internal_id={} error={}",
                row.internal_id, err
            );
            None
        }
    });

    let mut record = Record::default();
    for field in fields {
        let value = row
            .attributes
            .get(field.column_index)
            .unwrap_or(&AttributeValue::Null);
        record.insert(field.key.clone(), to_field_value(value, field.kind));
    }

    PreparedRow {
        internal_id: row.internal_id,
        geometry,
        record,
    }
}

fn to_field_value(value: &AttributeValue, kind: DbfKind) -> FieldValue {
    match kind {
        DbfKind::Integer | DbfKind::Real => FieldValue::Numeric(match value {
            AttributeValue::Integer(v) => Some(*v as f64),
            AttributeValue::Real(v) => Some(*v),
            AttributeValue::Text(text) => text.trim().parse().ok(),
            AttributeValue::Null | AttributeValue::Blob(_) => None,
        }),
        DbfKind::Character => FieldValue::Character(match value {
            AttributeValue::Integer(v) => Some(v.to_string()),
            AttributeValue::Real(v) => Some(v.to_string()),
            AttributeValue::Text(text) => Some(truncate_bytes(text, DBF_CHAR_MAX_BYTES)),
            AttributeValue::Null | AttributeValue::Blob(_) => None,
        }),
    }
}

fn truncate_bytes(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

fn family_of(geometry: &Geometry) -> Option<ShapeFamily> {
    match geometry.value {
        GeometryValue::Point(_) => Some(ShapeFamily::Point),
        GeometryValue::MultiPoint(_) => Some(ShapeFamily::Multipoint),
        GeometryValue::LineString(_) | GeometryValue::MultiLineString(_) => {
            Some(ShapeFamily::Polyline)
        }
        GeometryValue::Polygon(_) | GeometryValue::MultiPolygon(_) => Some(ShapeFamily::Polygon),
        GeometryValue::GeometryCollection(_) => None,
    }
}

/// Picks the shape family of the first usable geometry; a mix of points and
/// multipoints is promoted to multipoint. Z is kept when any geometry has it.
fn detect_kind(rows: &[PreparedRow]) -> Option<ExportKind> {
    let geometries: Vec<&Geometry> = rows.iter().filter_map(|row| row.geometry.as_ref()).collect();
    let first = geometries.iter().find_map(|geometry| family_of(geometry))?;
    let family = if first == ShapeFamily::Point
        && geometries
            .iter()
            .any(|geometry| family_of(geometry) == Some(ShapeFamily::Multipoint))
    {
        ShapeFamily::Multipoint
    } else {
        first
    };
    Some(ExportKind {
        family,
        has_z: geometries.iter().any(|geometry| geometry.dimensions.has_z()),
    })
}

/// Shape family from `gpkg_geometry_columns.geometry_type_name`, used when no
/// row carries a usable geometry.
fn declared_kind(geometry_type: Option<&str>) -> Option<ExportKind> {
    let family = match geometry_type?.trim().to_ascii_uppercase().as_str() {
        "POINT" => ShapeFamily::Point,
        "MULTIPOINT" => ShapeFamily::Multipoint,
        "LINESTRING" | "MULTILINESTRING" | "CIRCULARSTRING" | "COMPOUNDCURVE" | "CURVE"
        | "MULTICURVE" => ShapeFamily::Polyline,
        "POLYGON" | "MULTIPOLYGON" | "CURVEPOLYGON" | "SURFACE" | "MULTISURFACE" => {
            ShapeFamily::Polygon
        }
        _ => return None,
    };
    Some(ExportKind {
        family,
        has_z: false,
    })
}

fn xy(coord: &Coord) -> Point {
    Point::new(coord.x, coord.y)
}

fn xyz(coord: &Coord) -> PointZ {
    PointZ::new(
        coord.x,
        coord.y,
        coord.z.unwrap_or(0.0),
        coord.m.unwrap_or(NO_DATA),
    )
}

fn points<P>(geometry: &Geometry, make: impl Fn(&Coord) -> P) -> Vec<P> {
    match &geometry.value {
        GeometryValue::Point(Some(coord)) => vec![make(coord)],
        GeometryValue::MultiPoint(coords) => coords.iter().map(make).collect(),
        _ => Vec::new(),
    }
}

fn line_parts<P>(geometry: &Geometry, make: impl Fn(&Coord) -> P) -> Vec<Vec<P>> {
    let lines: Vec<&Vec<Coord>> = match &geometry.value {
        GeometryValue::LineString(coords) => vec![coords],
        GeometryValue::MultiLineString(lines) => lines.iter().collect(),
        _ => Vec::new(),
    };
    lines
        .into_iter()
        .filter(|line| line.len() >= 2)
        .map(|line| line.iter().map(&make).collect())
        .collect()
}

fn polygon_rings<P>(geometry: &Geometry, make: impl Fn(&Coord) -> P) -> Vec<PolygonRing<P>> {
    let polygons: Vec<&Vec<Vec<Coord>>> = match &geometry.value {
        GeometryValue::Polygon(rings) => vec![rings],
        GeometryValue::MultiPolygon(polygons) => polygons.iter().collect(),
        _ => Vec::new(),
    };
    let mut result = Vec::new();
    for rings in polygons {
        // A polygon without a usable shell is dropped along with its holes.
        if rings.first().map_or(true, |shell| shell.len() < 3) {
            continue;
        }
        for (index, ring) in rings.iter().enumerate() {
            if ring.len() < 3 {
                continue;
            }
            let coords: Vec<P> = ring.iter().map(&make).collect();
            result.push(if index == 0 {
                PolygonRing::Outer(coords)
            } else {
                PolygonRing::Inner(coords)
            });
        }
    }
    result
}

fn to_point(geometry: &Geometry) -> Option<Point> {
    match &geometry.value {
        GeometryValue::Point(Some(coord)) => Some(xy(coord)),
        _ => None,
    }
}

fn to_point_z(geometry: &Geometry) -> Option<PointZ> {
    match &geometry.value {
        GeometryValue::Point(Some(coord)) => Some(xyz(coord)),
        _ => None,
    }
}

fn to_multipoint(geometry: &Geometry) -> Option<Multipoint> {
    let points = points(geometry, xy);
    (!points.is_empty()).then(|| Multipoint::new(points))
}

fn to_multipoint_z(geometry: &Geometry) -> Option<MultipointZ> {
    let points = points(geometry, xyz);
    (!points.is_empty()).then(|| MultipointZ::new(points))
}

fn to_polyline(geometry: &Geometry) -> Option<Polyline> {
    let parts = line_parts(geometry, xy);
    (!parts.is_empty()).then(|| Polyline::with_parts(parts))
}

fn to_polyline_z(geometry: &Geometry) -> Option<PolylineZ> {
    let parts = line_parts(geometry, xyz);
    (!parts.is_empty()).then(|| PolylineZ::with_parts(parts))
}

fn to_polygon(geometry: &Geometry) -> Option<Polygon> {
    let rings = polygon_rings(geometry, xy);
    (!rings.is_empty()).then(|| Polygon::with_rings(rings))
}

fn to_polygon_z(geometry: &Geometry) -> Option<PolygonZ> {
    let rings = polygon_rings(geometry, xyz);
    (!rings.is_empty()).then(|| PolygonZ::with_rings(rings))
}
