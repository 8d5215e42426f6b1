//! PCD v0.7 files.
//!
//! Frames are written as `binary_compressed`: the point data is stored one
//! field at a time (all `x`, then all `y`, ...) and LZF-compressed, preceded
//! by the compressed and uncompressed sizes as little-endian `u32`. When LZF
//! cannot shrink the data the file falls back to plain `binary`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::frame::{pack_rgba, unpack_rgba, FrameError, PointCloudFrame};

const MAX_POINTS: usize = 50_000_000;

#[derive(Debug, thiserror::Error)]
pub enum PcdError {
    #[error("PCD I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("LZF compression failed: {0}")]
    Compression(String),
    #[error("malformed PCD header: {0}")]
    MalformedHeader(String),
    #[error("unsupported PCD layout: {0}")]
    Unsupported(String),
    #[error("PCD data section is truncated")]
    Truncated,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Encoding of the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncoding {
    Binary,
    BinaryCompressed,
}

impl DataEncoding {
    fn keyword(self) -> &'static str {
        match self {
            DataEncoding::Binary => "binary",
            DataEncoding::BinaryCompressed => "binary_compressed",
        }
    }
}

fn header(frame: &PointCloudFrame, encoding: DataEncoding) -> String {
    let (fields, size, kind, count) = if frame.colors.is_some() {
        ("x y z rgba", "4 4 4 4", "F F F U", "1 1 1 1")
    } else {
        ("x y z", "4 4 4", "F F F", "1 1 1")
    };
    format!(
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS {fields}\n\
         SIZE {size}\n\
         TYPE {kind}\n\
         COUNT {count}\n\
         WIDTH {width}\n\
         HEIGHT {height}\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {points}\n\
         DATA {data}\n",
        width = frame.width,
        height = frame.height,
        points = frame.len(),
        data = encoding.keyword(),
    )
}

/// Field-major layout used by `binary_compressed`.
fn columns(frame: &PointCloudFrame) -> Vec<u8> {
    let fields = if frame.colors.is_some() { 4 } else { 3 };
    let mut buf = Vec::with_capacity(frame.len() * fields * 4);
    for axis in 0..3 {
        for p in &frame.points {
            buf.extend_from_slice(&p[axis].to_le_bytes());
        }
    }
    if let Some(colors) = &frame.colors {
        for c in colors {
            buf.extend_from_slice(&pack_rgba(*c).to_le_bytes());
        }
    }
    buf
}

/// Point-major layout used by `binary`.
fn rows(frame: &PointCloudFrame) -> Vec<u8> {
    let fields = if frame.colors.is_some() { 4 } else { 3 };
    let mut buf = Vec::with_capacity(frame.len() * fields * 4);
    for (i, p) in frame.points.iter().enumerate() {
        for v in p {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(colors) = &frame.colors {
            buf.extend_from_slice(&pack_rgba(colors[i]).to_le_bytes());
        }
    }
    buf
}

/// Write `frame` to `path` as a compressed PCD file.
///
/// Returns the encoding actually used.
pub fn write_pcd_binary_compressed(
    path: impl AsRef<Path>,
    frame: &PointCloudFrame,
) -> Result<DataEncoding, PcdError> {
    let raw = columns(frame);
    let compressed = if raw.is_empty() {
        Some(Vec::new())
    } else {
        match lzf::compress(&raw) {
            Ok(c) => Some(c),
            Err(lzf::LzfError::NoCompressionPossible) => None,
            Err(e) => return Err(PcdError::Compression(format!("{e:?}"))),
        }
    };

    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    let encoding = match compressed {
        Some(compressed) => {
            writer.write_all(header(frame, DataEncoding::BinaryCompressed).as_bytes())?;
            writer.write_all(&(compressed.len() as u32).to_le_bytes())?;
            writer.write_all(&(raw.len() as u32).to_le_bytes())?;
            writer.write_all(&compressed)?;
            DataEncoding::BinaryCompressed
        }
        None => {
            debug!(path = %path.as_ref().display(), "LZF gave no gain, writing binary PCD");
            writer.write_all(header(frame, DataEncoding::Binary).as_bytes())?;
            writer.write_all(&rows(frame))?;
            DataEncoding::Binary
        }
    };
    writer.flush()?;
    Ok(encoding)
}

struct Layout {
    fields: Vec<String>,
    width: u32,
    height: u32,
    points: usize,
    encoding: DataEncoding,
}

fn parse_layout<R: BufRead>(reader: &mut R) -> Result<Layout, PcdError> {
    let mut fields = Vec::new();
    let mut sizes = Vec::new();
    let mut width = None;
    let mut height = 1u32;
    let mut points = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(PcdError::MalformedHeader("missing DATA line".into()));
        }
        let line = line.trim();
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        let mut it = line.split_whitespace();
        let parse_u = |v: Option<&str>, key: &str| -> Result<usize, PcdError> {
            v.and_then(|s| s.parse().ok())
                .ok_or_else(|| PcdError::MalformedHeader(format!("bad {key}")))
        };
        match it.next() {
            Some("FIELDS") => fields = it.map(String::from).collect(),
            Some("SIZE") => {
                sizes = it
                    .map(|s| s.parse::<usize>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| PcdError::MalformedHeader("bad SIZE".into()))?
            }
            Some("WIDTH") => width = Some(parse_u(it.next(), "WIDTH")? as u32),
            Some("HEIGHT") => height = parse_u(it.next(), "HEIGHT")? as u32,
            Some("POINTS") => points = Some(parse_u(it.next(), "POINTS")?),
            Some("DATA") => {
                let encoding = match it.next() {
                    Some("binary") => DataEncoding::Binary,
                    Some("binary_compressed") => DataEncoding::BinaryCompressed,
                    other => {
                        return Err(PcdError::Unsupported(format!(
                            "DATA {}",
                            other.unwrap_or("")
                        )))
                    }
                };
                let points = points.ok_or_else(|| PcdError::MalformedHeader("no POINTS".into()))?;
                let width = width.unwrap_or(points as u32);
                if sizes.iter().any(|s| *s != 4) || sizes.len() != fields.len() {
                    return Err(PcdError::Unsupported("only 4-byte fields are read".into()));
                }
                if points > MAX_POINTS {
                    return Err(PcdError::MalformedHeader(format!("{points} points")));
                }
                return Ok(Layout {
                    fields,
                    width,
                    height,
                    points,
                    encoding,
                });
            }
            _ => {}
        }
    }
}

/// Read an `x y z [rgba]` PCD file written as `binary` or `binary_compressed`.
pub fn read_pcd(path: impl AsRef<Path>) -> Result<PointCloudFrame, PcdError> {
    let mut reader = BufReader::new(File::open(path)?);
    let layout = parse_layout(&mut reader)?;
    let names: Vec<&str> = layout.fields.iter().map(String::as_str).collect();
    let has_rgba = match names.as_slice() {
        ["x", "y", "z"] => false,
        ["x", "y", "z", "rgba"] => true,
        _ => return Err(PcdError::Unsupported(layout.fields.join(" "))),
    };
    let nfields = layout.fields.len();
    let n = layout.points;

    let word = |buf: &[u8], idx: usize| -> Result<[u8; 4], PcdError> {
        let slice = buf.get(idx * 4..idx * 4 + 4).ok_or(PcdError::Truncated)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(slice);
        Ok(bytes)
    };

    let mut points = Vec::with_capacity(n);
    let mut colors = has_rgba.then(|| Vec::with_capacity(n));

    match layout.encoding {
        DataEncoding::Binary => {
            let mut data = vec![0u8; n * nfields * 4];
            reader.read_exact(&mut data).map_err(|_| PcdError::Truncated)?;
            for i in 0..n {
                let base = i * nfields;
                points.push([
                    f32::from_le_bytes(word(&data, base)?),
                    f32::from_le_bytes(word(&data, base + 1)?),
                    f32::from_le_bytes(word(&data, base + 2)?),
                ]);
                if let Some(colors) = colors.as_mut() {
                    colors.push(unpack_rgba(u32::from_le_bytes(word(&data, base + 3)?)));
                }
            }
        }
        DataEncoding::BinaryCompressed => {
            let mut sizes = [0u8; 8];
            reader.read_exact(&mut sizes).map_err(|_| PcdError::Truncated)?;
            let compressed_len = u32::from_le_bytes([sizes[0], sizes[1], sizes[2], sizes[3]]) as usize;
            let raw_len = u32::from_le_bytes([sizes[4], sizes[5], sizes[6], sizes[7]]) as usize;
            if raw_len != n * nfields * 4 {
                return Err(PcdError::MalformedHeader(format!(
                    "uncompressed size {raw_len} does not match {n} points"
                )));
            }
            let mut compressed = vec![0u8; compressed_len];
            reader.read_exact(&mut compressed).map_err(|_| PcdError::Truncated)?;
            let data = if raw_len == 0 {
                Vec::new()
            } else {
                lzf::decompress(&compressed, raw_len)
                    .map_err(|e| PcdError::Compression(format!("{e:?}")))?
            };
            for i in 0..n {
                points.push([
                    f32::from_le_bytes(word(&data, i)?),
                    f32::from_le_bytes(word(&data, n + i)?),
                    f32::from_le_bytes(word(&data, 2 * n + i)?),
                ]);
                if let Some(colors) = colors.as_mut() {
                    colors.push(unpack_rgba(u32::from_le_bytes(word(&data, 3 * n + i)?)));
                }
            }
        }
    }

    let frame = if layout.height > 1 {
        PointCloudFrame::organized(points, layout.width, layout.height, 0, 0)?
    } else {
        PointCloudFrame::unorganized(points, 0, 0)
    };
    match colors {
        Some(colors) => Ok(frame.with_colors(colors)?),
        None => Ok(frame),
    }
}
