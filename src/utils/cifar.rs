use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::DataSet;
use crate::utils::shape::ImageShape;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CIFAR_LABELS: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// Bytes per record in the CIFAR-10 binary batches: one label byte followed
/// by the red, green and blue planes.
const BINARY_RECORD: usize = 1 + 3 * 32 * 32;

/// Per-channel `(v / 255 - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: [0.5; 3],
            std: [0.5; 3],
        }
    }
}

impl Normalization {
    pub fn identity() -> Self {
        Self {
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }

    #[inline]
    pub fn apply(&self, byte: u8, channel: usize) -> f32 {
        (byte as f32 / 255.0 - self.mean[channel]) / self.std[channel]
    }

    #[inline]
    pub fn invert(&self, v: f32, channel: usize) -> u8 {
        ((v * self.std[channel] + self.mean[channel]) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    }
}

/// 3x32x32 colour images with labels, held in memory one image per row.
pub struct CifarData {
    image: Matrix,
    gt: Vec<u8>,
    len: usize,
}

impl CifarData {
    pub const SHAPE: ImageShape = ImageShape::new(3, 32, 32);

    /// Loads a directory of images named `<index>_<label>.<ext>`, where the
    /// label is a class name or a class number. `limit` caps the sample count.
    pub fn from_image_dir(
        source_dir: impl AsRef<Path>,
        limit: Option<usize>,
        norm: &Normalization,
    ) -> Result<Self> {
        let source_dir = source_dir.as_ref();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(source_dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("png") | Some("jpg") | Some("jpeg") | Some("bmp") => files.push(path),
                _ => warn!(path = %path.display(), "skipping non-image file"),
            }
        }
        files.sort();
        if let Some(limit) = limit {
            files.truncate(limit);
        }
        let gt = files
            .iter()
            .map(|p| Self::label_from_path(p))
            .collect::<Result<Vec<_>>>()?;

        let shape = Self::SHAPE;
        let mut image = Matrix::new(files.len(), shape.len());
        image
            .par_rows_mut()
            .zip(files.par_iter())
            .try_for_each(|(row, path)| -> Result<()> {
                let img = image::open(path)?.to_rgb8();
                if img.width() as usize != shape.width || img.height() as usize != shape.height {
                    return Err(StnError::shape(
                        "dataset image",
                        &[shape.height, shape.width],
                        &[img.height() as usize, img.width() as usize],
                    ));
                }
                for (i, byte) in img.as_raw().iter().enumerate() {
                    row[i] = norm.apply(*byte, i % 3);
                }
                Ok(())
            })?;
        debug!(dir = %source_dir.display(), samples = files.len(), "loaded image directory");
        let len = files.len();
        Ok(Self { image, gt, len })
    }

    /// Loads CIFAR-10 binary batch files, converting the planar layout to
    /// one interleaved row per image.
    pub fn from_binary(paths: &[PathBuf], limit: Option<usize>, norm: &Normalization) -> Result<Self> {
        let mut raw = Vec::new();
        for path in paths {
            let bytes = std::fs::read(path)?;
            if bytes.len() % BINARY_RECORD != 0 {
                return Err(StnError::dataset(format!(
                    "{} is not a whole number of {}-byte records",
                    path.display(),
                    BINARY_RECORD
                )));
            }
            debug!(path = %path.display(), records = bytes.len() / BINARY_RECORD, "read binary batch");
            raw.extend(bytes);
        }
        let mut len = raw.len() / BINARY_RECORD;
        if let Some(limit) = limit {
            len = len.min(limit);
        }
        let shape = Self::SHAPE;
        let plane = shape.pixels();
        let mut gt = Vec::with_capacity(len);
        for record in raw.chunks_exact(BINARY_RECORD).take(len) {
            if record[0] as usize >= CIFAR_LABELS.len() {
                return Err(StnError::dataset(format!("bad label byte {}", record[0])));
            }
            gt.push(record[0]);
        }
        let mut image = Matrix::new(len, shape.len());
        image
            .par_rows_mut()
            .zip(raw.par_chunks_exact(BINARY_RECORD))
            .for_each(|(row, record)| {
                let pixels = &record[1..];
                for p in 0..plane {
                    for c in 0..3 {
                        row[p * 3 + c] = norm.apply(pixels[c * plane + p], c);
                    }
                }
            });
        Ok(Self { image, gt, len })
    }

    fn label_from_path(path: &Path) -> Result<u8> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StnError::dataset(format!("bad file name {}", path.display())))?;
        let label = stem
            .split('_')
            .nth(1)
            .ok_or_else(|| StnError::dataset(format!("no label in file name {}", stem)))?;
        Self::generate_label(label)
    }

    pub fn generate_label(x: &str) -> Result<u8> {
        if let Some(idx) = CIFAR_LABELS.iter().position(|name| *name == x) {
            return Ok(idx as u8);
        }
        match x.parse::<u8>() {
            Ok(v) if (v as usize) < CIFAR_LABELS.len() => Ok(v),
            _ => Err(StnError::dataset(format!("bad label {:?}", x))),
        }
    }

    pub fn labels(&self) -> &[u8] {
        &self.gt
    }
}

impl DataSet for CifarData {
    fn dim(&self) -> usize {
        Self::SHAPE.len()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn fetch_item(&self, idx: usize) -> Result<(&[f32], u8)> {
        if idx >= self.len {
            return Err(StnError::dataset(format!(
                "fetch item {} from dataset of {}",
                idx, self.len
            )));
        }
        Ok((self.image.row(idx), self.gt[idx]))
    }
}
