use std::path::Path;

use ndarray::Array3;
use ndarray_npy::{ReadNpyError, ReadableElement};
use vqsce_core::error::DataError;
use vqsce_core::types::Volume;

/// Maps a stored volume to a decoded `[depth, height, width]` array.
///
/// The on-disk codec is pluggable; the index only relies on this contract.
pub trait VolumeDecoder: Send + Sync + 'static {
    /// Whether a scanned file is a candidate volume for this decoder.
    fn accepts(&self, path: &Path) -> bool;

    fn decode(&self, path: &Path) -> Result<Volume, DataError>;
}

/// Reads `.npy` arrays of rank 3.
///
/// float32 is read directly. Other numeric dtypes (i8, u8, i16, u16, i32,
/// f64) are widened or narrowed to f32 on load.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyDecoder;

impl VolumeDecoder for NpyDecoder {
    fn accepts(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("npy")
    }

    fn decode(&self, path: &Path) -> Result<Volume, DataError> {
        let decoded = match ndarray_npy::read_npy::<_, Array3<f32>>(path) {
            Err(ReadNpyError::WrongDescriptor(desc)) => read_converted(path)
                .and_then(|v| v.ok_or(ReadNpyError::WrongDescriptor(desc))),
            other => other,
        };
        decoded.map_err(|e| DataError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// `Ok(None)` when no supported dtype matches the file's descriptor.
fn read_converted(path: &Path) -> Result<Option<Volume>, ReadNpyError> {
    if let Some(v) = read_as::<i16>(path, f32::from)? {
        return Ok(Some(v));
    }
    if let Some(v) = read_as::<u16>(path, f32::from)? {
        return Ok(Some(v));
    }
    if let Some(v) = read_as::<u8>(path, f32::from)? {
        return Ok(Some(v));
    }
    if let Some(v) = read_as::<i8>(path, f32::from)? {
        return Ok(Some(v));
    }
    if let Some(v) = read_as::<i32>(path, |x| x as f32)? {
        return Ok(Some(v));
    }
    read_as::<f64>(path, |x| x as f32)
}

fn read_as<T>(path: &Path, convert: fn(T) -> f32) -> Result<Option<Volume>, ReadNpyError>
where
    T: ReadableElement + Copy,
{
    match ndarray_npy::read_npy::<_, Array3<T>>(path) {
        Ok(raw) => Ok(Some(raw.mapv(convert))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
