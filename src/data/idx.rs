//! IDX-format dataset loading.
//!
//! Parses the big-endian IDX image (magic 2051) and label (magic 2049)
//! file pair used by MNIST-family benchmark datasets. Every malformation
//! is a fatal `DatasetParse` with path and detail; there is no
//! partial-dataset recovery.

use crate::data::{Dataset, Sample};
use crate::{AfinarError, Result};
use ndarray::Array3;
use std::path::Path;

/// Magic number of an IDX3 image file.
pub const IMAGE_MAGIC: u32 = 2051;
/// Magic number of an IDX1 label file.
pub const LABEL_MAGIC: u32 = 2049;

/// Load a labeled image dataset from an IDX image/label file pair.
///
/// Images come out as single-channel `1×rows×cols` tensors with pixel
/// values scaled to `[0, 1]`. Class names are derived from the labels
/// (`class_0..class_{K-1}`); use [`Dataset::with_class_names`] to attach
/// real names afterwards.
///
/// # Errors
///
/// `DatasetNotFound` when either file is missing; `DatasetParse` on bad
/// magic, truncated header or payload, or an image/label count mismatch.
pub fn load_idx_dataset(images: impl AsRef<Path>, labels: impl AsRef<Path>) -> Result<Dataset> {
    let images = images.as_ref();
    let labels = labels.as_ref();

    let (pixels, count, rows, cols) = read_images(images)?;
    let label_bytes = read_labels(labels)?;

    if label_bytes.len() != count {
        return Err(AfinarError::DatasetParse {
            path: labels.to_path_buf(),
            message: format!(
                "label count {} does not match image count {count}",
                label_bytes.len()
            ),
        });
    }

    let plane = rows * cols;
    let samples = (0..count)
        .map(|i| {
            let offset = i * plane;
            let image = Array3::from_shape_fn((1, rows, cols), |(_, r, c)| {
                f32::from(pixels[offset + r * cols + c]) / 255.0
            });
            Sample::new(image, usize::from(label_bytes[i]))
        })
        .collect();

    Ok(Dataset::new(samples))
}

/// Read an IDX3 image file into `(pixels, count, rows, cols)`.
fn read_images(path: &Path) -> Result<(Vec<u8>, usize, usize, usize)> {
    let bytes = read_file(path)?;

    let magic = read_u32_be(&bytes, 0, path)?;
    if magic != IMAGE_MAGIC {
        return Err(AfinarError::DatasetParse {
            path: path.to_path_buf(),
            message: format!("bad magic number {magic} (expected {IMAGE_MAGIC} for an IDX3 image file)"),
        });
    }

    let count = read_u32_be(&bytes, 4, path)? as usize;
    let rows = read_u32_be(&bytes, 8, path)? as usize;
    let cols = read_u32_be(&bytes, 12, path)? as usize;

    // A zero dimension makes the payload length vacuously consistent,
    // so it has to be ruled out on its own.
    if count > 0 && (rows == 0 || cols == 0) {
        return Err(AfinarError::DatasetParse {
            path: path.to_path_buf(),
            message: format!("{count} images of {rows}x{cols}: image dimensions must be nonzero"),
        });
    }

    // u64 arithmetic so a hostile header cannot overflow the size check
    let expected = 16u64 + count as u64 * rows as u64 * cols as u64;
    if bytes.len() as u64 != expected {
        return Err(AfinarError::DatasetParse {
            path: path.to_path_buf(),
            message: format!(
                "payload is {} bytes, expected {} ({count} images of {rows}x{cols})",
                bytes.len().saturating_sub(16),
                expected - 16
            ),
        });
    }

    Ok((bytes[16..].to_vec(), count, rows, cols))
}

/// Read an IDX1 label file into raw label bytes.
fn read_labels(path: &Path) -> Result<Vec<u8>> {
    let bytes = read_file(path)?;

    let magic = read_u32_be(&bytes, 0, path)?;
    if magic != LABEL_MAGIC {
        return Err(AfinarError::DatasetParse {
            path: path.to_path_buf(),
            message: format!("bad magic number {magic} (expected {LABEL_MAGIC} for an IDX1 label file)"),
        });
    }

    let count = read_u32_be(&bytes, 4, path)? as usize;
    let expected = 8u64 + count as u64;
    if bytes.len() as u64 != expected {
        return Err(AfinarError::DatasetParse {
            path: path.to_path_buf(),
            message: format!(
                "payload is {} bytes, expected {count} labels",
                bytes.len().saturating_sub(8)
            ),
        });
    }

    Ok(bytes[8..].to_vec())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AfinarError::DatasetNotFound { path: path.to_path_buf() }
        } else {
            AfinarError::io(format!("reading dataset file {}", path.display()), e)
        }
    })
}

fn read_u32_be(bytes: &[u8], offset: usize, path: &Path) -> Result<u32> {
    let end = offset + 4;
    if bytes.len() < end {
        return Err(AfinarError::DatasetParse {
            path: path.to_path_buf(),
            message: format!("truncated header: {} bytes", bytes.len()),
        });
    }
    Ok(u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]))
}
