//! Beat activation functions and their file formats.
//!
//! Binary files are NumPy `.npy` (v1.0, little-endian `f4`, 1-D); the frame
//! rate is not part of the file and comes from the configuration. Text files
//! carry a `# FPS:<fps>` header followed by one value per line.

use crate::error::{FormatError, Result};
use crate::traits::Processor;
use ndarray::Array1;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// NPY headers are padded so the data starts on this boundary
const NPY_ALIGNMENT: usize = 64;

const FPS_HEADER: &str = "FPS:";

/// Per-frame beat activation with its frame rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Activations {
    pub data: Array1<f32>,
    pub fps: f32,
}

impl Activations {
    pub fn new(data: Array1<f32>, fps: f32) -> Self {
        Self { data, fps }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

}

/// Activation file options.
#[derive(clap::Args, Clone, Debug, Default, PartialEq, Serialize)]
pub struct ActivationsConfig {
    /// Read and write activations as text with this separator instead of binary .npy
    #[arg(long, value_name = "SEP")]
    pub sep: Option<String>,
}

/// On-disk representation of an activation function.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ActivationsFormat {
    Npy,
    Text { sep: String },
}

impl From<&ActivationsConfig> for ActivationsFormat {
    fn from(config: &ActivationsConfig) -> Self {
        match &config.sep {
            Some(sep) => ActivationsFormat::Text { sep: sep.clone() },
            None => ActivationsFormat::Npy,
        }
    }
}

impl ActivationsFormat {
    /// Serialize `activations` to `writer`.
    pub fn write(&self, activations: &Activations, writer: &mut impl Write) -> Result<()> {
        match self {
            ActivationsFormat::Npy => write_npy(&activations.data, writer),
            ActivationsFormat::Text { .. } => write_text(activations, writer),
        }
    }

    /// Parse activations from raw file content, using `fps` unless the file names its own.
    pub fn parse(&self, bytes: &[u8], fps: f32) -> Result<Activations> {
        match self {
            ActivationsFormat::Npy => Ok(Activations::new(read_npy(bytes)?, fps)),
            ActivationsFormat::Text { sep } => read_text(bytes, sep, fps),
        }
    }
}

fn write_npy(data: &Array1<f32>, writer: &mut impl Write) -> Result<()> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        data.len()
    );
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (NPY_ALIGNMENT - unpadded % NPY_ALIGNMENT) % NPY_ALIGNMENT;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');

    writer.write_all(NPY_MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for value in data {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;

    Ok(())
}

/// Value of `'key': ...` inside an NPY header dict, up to the next delimiter.
fn header_value<'h>(header: &'h str, key: &str) -> Option<&'h str> {
    let start = header.find(&format!("'{key}'"))? + key.len() + 2;
    let rest = header[start..].trim_start().strip_prefix(':')?.trim_start();

    if let Some(tuple) = rest.strip_prefix('(') {
        tuple.split_once(')').map(|(inner, _)| inner)
    } else if let Some(quoted) = rest.strip_prefix('\'') {
        quoted.split_once('\'').map(|(inner, _)| inner)
    } else {
        rest.split([',', '}']).next().map(str::trim)
    }
}

fn read_npy(bytes: &[u8]) -> Result<Array1<f32>> {
    let rest = bytes.strip_prefix(NPY_MAGIC).ok_or(FormatError::BadMagic)?;

    let truncated = |expected: usize| FormatError::Truncated {
        expected,
        got: bytes.len(),
    };

    let (header_len, offset) = match rest.first() {
        Some(1) => {
            let len = rest.get(2..4).ok_or_else(|| truncated(10))?;
            (u16::from_le_bytes([len[0], len[1]]) as usize, NPY_MAGIC.len() + 4)
        }
        Some(2 | 3) => {
            let len = rest.get(2..6).ok_or_else(|| truncated(12))?;
            (
                u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize,
                NPY_MAGIC.len() + 6,
            )
        }
        Some(version) => {
            return Err(FormatError::UnsupportedHeader(format!("version {version}")).into());
        }
        None => return Err(truncated(NPY_MAGIC.len() + 2).into()),
    };

    let header = bytes
        .get(offset..offset + header_len)
        .ok_or_else(|| truncated(offset + header_len))?;
    let header = String::from_utf8_lossy(header);

    let descr = header_value(&header, "descr")
        .ok_or_else(|| FormatError::UnsupportedHeader(header.to_string()))?;
    let shape: Vec<usize> = header_value(&header, "shape")
        .ok_or_else(|| FormatError::UnsupportedHeader(header.to_string()))?
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.parse()
                .map_err(|_| FormatError::UnsupportedHeader(format!("shape dimension {dim:?}")))
        })
        .collect::<std::result::Result<_, _>>()?;

    let not_1d = || FormatError::UnsupportedHeader(format!("shape {shape:?} is not 1-D"));
    let trailing = shape
        .iter()
        .skip(1)
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(not_1d)?;
    if trailing != 1 {
        return Err(not_1d().into());
    }
    let len = shape.first().copied().unwrap_or(1);

    let item_size = match descr {
        "<f4" => 4,
        "<f8" => 8,
        other => return Err(FormatError::UnsupportedHeader(format!("dtype {other}")).into()),
    };

    let data_start = offset + header_len;
    let data_end = len
        .checked_mul(item_size)
        .and_then(|size| size.checked_add(data_start))
        .ok_or_else(|| FormatError::UnsupportedHeader(format!("shape {shape:?} is too large")))?;
    let data = bytes
        .get(data_start..data_end)
        .ok_or_else(|| truncated(data_end))?;

    let values: Array1<f32> = match item_size {
        4 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        _ => data
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
    };

    Ok(values)
}

fn write_text(activations: &Activations, writer: &mut impl Write) -> Result<()> {
    writeln!(writer, "# {FPS_HEADER}{}", activations.fps)?;
    for value in activations.data.iter() {
        writeln!(writer, "{value}")?;
    }
    writer.flush()?;
    Ok(())
}

fn read_text(bytes: &[u8], sep: &str, fps: f32) -> Result<Activations> {
    let text = String::from_utf8_lossy(bytes);
    let sep = sep.trim();
    let mut fps = fps;
    let mut values = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(value) = comment.trim().strip_prefix(FPS_HEADER) {
                fps = value.trim().parse().map_err(|_| FormatError::Parse {
                    line: index + 1,
                    value: value.to_string(),
                })?;
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }

        let first = if sep.is_empty() {
            line.split_whitespace().next()
        } else {
            line.split(sep).next().map(str::trim)
        }
        .unwrap_or(line);

        let value = first.parse::<f32>().map_err(|_| FormatError::Parse {
            line: index + 1,
            value: first.to_string(),
        })?;
        values.push(value);
    }

    Ok(Activations::new(Array1::from(values), fps))
}

/// Loads a persisted activation function.
#[derive(Clone, Debug)]
pub struct ActivationsReader {
    format: ActivationsFormat,
    fps: f32,
}

impl ActivationsReader {
    pub fn new(format: ActivationsFormat, fps: f32) -> Self {
        Self { format, fps }
    }
}

impl Processor for ActivationsReader {
    type Input = PathBuf;
    type Output = Activations;

    fn process(&mut self, path: PathBuf) -> Result<Activations> {
        let mut bytes = Vec::new();
        std::fs::File::open(&path)?.read_to_end(&mut bytes)?;

        let activations = self.format.parse(&bytes, self.fps)?;
        tracing::debug!(
            path = %path.display(),
            frames = activations.len(),
            fps = activations.fps,
            "activations loaded"
        );

        Ok(activations)
    }
}
