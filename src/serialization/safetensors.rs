//! `SafeTensors` format implementation for checkpoint I/O.
//!
//! Implements the `SafeTensors` format:
//! ```text
//! [8-byte header: u64 metadata length (little-endian)]
//! [JSON metadata: tensor names, dtypes, shapes, data_offsets]
//! [Raw tensor data: little-endian values]
//! ```
//!
//! Reads `F32`, `F16` and `BF16` tensors (widened to `f32`) and `I32` /
//! `I64` tensors (tagged with their [`ElementKind`]); writes floating
//! tensors as `F32` or `F16`. A pruned detector is usually shipped in half
//! precision, so `F16` output is a first-class option. Integer tensors
//! such as `num_batches_tracked` keep their integer dtype either way.

use crate::checkpoint::Checkpoint;
use crate::error::{PruneError, Result};
use crate::tensor::{ElementKind, Tensor};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Maximum accepted JSON header size (100 MB), matching the reference format limit.
const MAX_HEADER_LEN: usize = 100 * 1024 * 1024;

/// Element type of a stored tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafeTensorsDType {
    /// 32-bit float
    F32,
    /// 16-bit float (IEEE 754 half-precision)
    F16,
    /// Brain float 16
    BF16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
}

impl SafeTensorsDType {
    /// Bytes per element
    #[must_use]
    pub fn bytes_per_element(self) -> usize {
        match self {
            Self::I64 => 8,
            Self::F32 | Self::I32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    fn parse(name: &str, tensor: &str) -> Result<Self> {
        match name {
            "F32" => Ok(Self::F32),
            "F16" => Ok(Self::F16),
            "BF16" => Ok(Self::BF16),
            "I32" => Ok(Self::I32),
            "I64" => Ok(Self::I64),
            other => Err(PruneError::Serialization(format!(
                "Unsupported dtype for '{tensor}': {other}"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "F32",
            Self::F16 => "F16",
            Self::BF16 => "BF16",
            Self::I32 => "I32",
            Self::I64 => "I64",
        }
    }

    fn element_kind(self) -> ElementKind {
        match self {
            Self::I32 => ElementKind::Int32,
            Self::I64 => ElementKind::Int64,
            Self::F32 | Self::F16 | Self::BF16 => ElementKind::Float,
        }
    }

    /// Dtype a tensor is written with when `self` is the requested output.
    fn for_tensor(self, tensor: &Tensor) -> Self {
        match tensor.kind() {
            ElementKind::Float => self,
            ElementKind::Int32 => Self::I32,
            ElementKind::Int64 => Self::I64,
        }
    }
}

/// Metadata for a single tensor in `SafeTensors` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorMetadata {
    /// Data type of the tensor (e.g., "F32").
    pub dtype: String,
    /// Shape of the tensor.
    pub shape: Vec<usize>,
    /// Data offsets `[start, end]` in the raw data section.
    pub data_offsets: [usize; 2],
}

/// User metadata from the `__metadata__` header section.
pub type UserMetadata = BTreeMap<String, String>;

/// Loads a checkpoint from a `SafeTensors` file.
///
/// # Errors
///
/// Returns an error if the file is missing, the header is invalid or
/// truncated, or a tensor has an unsupported dtype.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<(Checkpoint, UserMetadata)> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PruneError::FileNotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    checkpoint_from_bytes(&bytes)
}

/// Parses a checkpoint from in-memory `SafeTensors` bytes.
///
/// # Errors
///
/// Returns an error if the header or any tensor payload is invalid.
pub fn checkpoint_from_bytes(bytes: &[u8]) -> Result<(Checkpoint, UserMetadata)> {
    let metadata_len = validate_and_read_header(bytes)?;
    let (metadata, user_metadata) = parse_metadata(bytes, metadata_len)?;
    let data = &bytes[8 + metadata_len..];

    let mut checkpoint = Checkpoint::new();
    for (name, meta) in metadata {
        let dtype = SafeTensorsDType::parse(&meta.dtype, &name)?;
        let [start, end] = meta.data_offsets;
        if start > end || end > data.len() {
            return Err(PruneError::Serialization(format!(
                "Tensor '{name}' data out of bounds: {end} > {}",
                data.len()
            )));
        }
        let values = decode(&data[start..end], dtype, &name)?;
        let tensor = Tensor::from_vec(values, &meta.shape)
            .map_err(|_| {
                PruneError::Serialization(format!(
                    "Tensor '{name}' payload does not match shape {:?}",
                    meta.shape
                ))
            })?
            .with_kind(dtype.element_kind());
        checkpoint.insert(name, tensor);
    }

    Ok((checkpoint, user_metadata))
}

/// Saves a checkpoint to `SafeTensors` format.
///
/// Tensors are written in sorted name order; `user_metadata` is stored
/// under `__metadata__` when non-empty.
///
/// # Errors
///
/// Returns an error if JSON serialization or the file write fails.
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    checkpoint: &Checkpoint,
    dtype: SafeTensorsDType,
    user_metadata: &UserMetadata,
) -> Result<()> {
    let bytes = checkpoint_to_bytes(checkpoint, dtype, user_metadata)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Serializes a checkpoint to `SafeTensors` bytes.
///
/// # Errors
///
/// Returns an error if JSON serialization fails or `dtype` is not `F32`
/// or `F16`. Integer tensors are written with their own dtype.
pub fn checkpoint_to_bytes(
    checkpoint: &Checkpoint,
    dtype: SafeTensorsDType,
    user_metadata: &UserMetadata,
) -> Result<Vec<u8>> {
    if !matches!(dtype, SafeTensorsDType::F32 | SafeTensorsDType::F16) {
        return Err(PruneError::Serialization(format!(
            "{} output is not supported; use F32 or F16",
            dtype.as_str()
        )));
    }

    let mut header = serde_json::Map::new();
    if !user_metadata.is_empty() {
        let meta_obj: serde_json::Map<String, serde_json::Value> = user_metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        header.insert(
            "__metadata__".to_string(),
            serde_json::Value::Object(meta_obj),
        );
    }

    let mut raw_data = Vec::new();
    for (name, tensor) in checkpoint.iter() {
        let start_offset = raw_data.len();
        let stored = dtype.for_tensor(tensor);
        encode_into(&mut raw_data, tensor.data(), stored);
        let meta = TensorMetadata {
            dtype: stored.as_str().to_string(),
            shape: tensor.shape().to_vec(),
            data_offsets: [start_offset, raw_data.len()],
        };
        header.insert(name.clone(), serde_json::to_value(meta)?);
    }

    let metadata_json = serde_json::to_string(&header)?;
    let metadata_bytes = metadata_json.as_bytes();
    let metadata_len = metadata_bytes.len() as u64;

    let mut output = Vec::with_capacity(8 + metadata_bytes.len() + raw_data.len());
    output.extend_from_slice(&metadata_len.to_le_bytes());
    output.extend_from_slice(metadata_bytes);
    output.extend_from_slice(&raw_data);
    Ok(output)
}

fn validate_and_read_header(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < 8 {
        return Err(PruneError::Serialization(format!(
            "File too small: {} bytes, need at least 8 for header",
            bytes.len()
        )));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[..8]);
    let metadata_len = u64::from_le_bytes(len_bytes) as usize;

    if metadata_len > MAX_HEADER_LEN {
        return Err(PruneError::Serialization(format!(
            "Header length {metadata_len} exceeds limit {MAX_HEADER_LEN}"
        )));
    }
    if bytes.len() < 8 + metadata_len {
        return Err(PruneError::Serialization(format!(
            "Header truncated: declared {metadata_len} bytes, file has {}",
            bytes.len() - 8
        )));
    }
    Ok(metadata_len)
}

fn parse_metadata(
    bytes: &[u8],
    metadata_len: usize,
) -> Result<(BTreeMap<String, TensorMetadata>, UserMetadata)> {
    let header: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&bytes[8..8 + metadata_len])?;

    let mut metadata = BTreeMap::new();
    let mut user_metadata = UserMetadata::new();
    for (name, value) in header {
        if name == "__metadata__" {
            if let serde_json::Value::Object(map) = value {
                for (k, v) in map {
                    if let serde_json::Value::String(s) = v {
                        user_metadata.insert(k, s);
                    }
                }
            }
            continue;
        }
        let meta: TensorMetadata = serde_json::from_value(value)?;
        metadata.insert(name, meta);
    }
    Ok((metadata, user_metadata))
}

fn decode(bytes: &[u8], dtype: SafeTensorsDType, name: &str) -> Result<Vec<f32>> {
    let width = dtype.bytes_per_element();
    if bytes.len() % width != 0 {
        return Err(PruneError::Serialization(format!(
            "Tensor '{name}' byte length {} is not a multiple of {width}",
            bytes.len()
        )));
    }
    let values = match dtype {
        SafeTensorsDType::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        SafeTensorsDType::F16 => bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        SafeTensorsDType::BF16 => bytes
            .chunks_exact(2)
            .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        SafeTensorsDType::I32 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
            .collect(),
        SafeTensorsDType::I64 => bytes
            .chunks_exact(8)
            .map(|c| {
                let mut word = [0u8; 8];
                word.copy_from_slice(c);
                i64::from_le_bytes(word) as f32
            })
            .collect(),
    };
    Ok(values)
}

fn encode_into(out: &mut Vec<u8>, data: &[f32], dtype: SafeTensorsDType) {
    match dtype {
        SafeTensorsDType::F32 => {
            for &value in data {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        SafeTensorsDType::F16 => {
            for &value in data {
                out.extend_from_slice(&f16::from_f32(value).to_le_bytes());
            }
        }
        SafeTensorsDType::BF16 => {
            for &value in data {
                out.extend_from_slice(&bf16::from_f32(value).to_le_bytes());
            }
        }
        SafeTensorsDType::I32 => {
            for &value in data {
                out.extend_from_slice(&(value.round() as i32).to_le_bytes());
            }
        }
        SafeTensorsDType::I64 => {
            for &value in data {
                out.extend_from_slice(&(value.round() as i64).to_le_bytes());
            }
        }
    }
}
