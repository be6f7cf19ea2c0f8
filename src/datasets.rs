//! Loads the MNIST handwritten digits from the IDX archives published at
//! <http://yann.lecun.com/exdb/mnist/> and splits them into training and validation sets.
//!
//! Pixels are scaled to `[0, 1]`. The training archive holds 60 000 images of which the last
//! 10 000 are held out for validation, mirroring the split of the classic `mnist.pkl.gz`.

use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use thiserror::Error;

/// Side length of an MNIST image
pub const IMAGE_SIDE: usize = 28;
/// Number of pixels in a flattened MNIST image
pub const IMAGE_PIXELS: usize = IMAGE_SIDE * IMAGE_SIDE;
/// Number of digit classes
pub const NUM_CLASSES: usize = 10;
/// Size of the held out validation split
pub const VALID_SIZE: usize = 10_000;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";

/// Errors for loading the dataset
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not find '{name}' (optionally gzipped) in '{dir}'")]
    MissingFile { name: &'static str, dir: PathBuf },
    #[error("Bad IDX magic number: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },
    #[error("IDX payload truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("IDX header declares {count} images of {rows}x{cols}, which overflows")]
    HeaderOverflow { count: usize, rows: usize, cols: usize },
    #[error("Expected 28x28 images, got {rows}x{cols}")]
    ImageSize { rows: usize, cols: usize },
    #[error("Found {images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },
    #[error("Cannot hold out {n_valid} validation items from {total}")]
    SplitTooLarge { n_valid: usize, total: usize },
}

/// A single MNIST digit
#[derive(Debug, Clone, PartialEq)]
pub struct MnistItem {
    /// Row-major pixels scaled to `[0, 1]`
    pub image: Vec<f32>,
    pub label: u8,
}

/// Images decoded from an IDX archive
#[derive(Debug, Clone, PartialEq)]
pub struct IdxImages {
    pub rows: usize,
    pub cols: usize,
    /// One flattened, scaled image per entry
    pub images: Vec<Vec<f32>>,
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, DatasetError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(DatasetError::Truncated {
            expected: offset + 4,
            got: bytes.len(),
        })
}

fn check_magic(bytes: &[u8], expected: u32) -> Result<(), DatasetError> {
    let got = read_u32(bytes, 0)?;
    if got != expected {
        return Err(DatasetError::BadMagic { expected, got });
    }
    Ok(())
}

/// Decodes an IDX3 image archive
pub fn parse_idx_images(bytes: &[u8]) -> Result<IdxImages, DatasetError> {
    check_magic(bytes, IMAGES_MAGIC)?;
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    let overflow = || DatasetError::HeaderOverflow { count, rows, cols };
    let pixels = rows.checked_mul(cols).ok_or_else(overflow)?;
    let expected = count
        .checked_mul(pixels)
        .and_then(|n| n.checked_add(16))
        .ok_or_else(overflow)?;
    if bytes.len() < expected {
        return Err(DatasetError::Truncated {
            expected,
            got: bytes.len(),
        });
    }
    let images = bytes[16..expected]
        .chunks_exact(pixels.max(1))
        .take(count)
        .map(|img| img.iter().map(|&p| p as f32 / 255.0).collect())
        .collect();
    Ok(IdxImages { rows, cols, images })
}

/// Decodes an IDX1 label archive
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>, DatasetError> {
    check_magic(bytes, LABELS_MAGIC)?;
    let count = read_u32(bytes, 4)? as usize;
    let expected = count.checked_add(8).ok_or(DatasetError::Truncated {
        expected: usize::MAX,
        got: bytes.len(),
    })?;
    if bytes.len() < expected {
        return Err(DatasetError::Truncated {
            expected,
            got: bytes.len(),
        });
    }
    Ok(bytes[8..expected].to_vec())
}

/// Reads a whole file, gunzipping it if the name ends in `.gz`
pub fn read_idx(path: &Path) -> Result<Vec<u8>, DatasetError> {
    let io_err = |source: io::Error| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut buf = Vec::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(file).read_to_end(&mut buf).map_err(io_err)?;
    } else {
        let mut file = file;
        file.read_to_end(&mut buf).map_err(io_err)?;
    }
    Ok(buf)
}

fn find_archive(dir: &Path, name: &'static str) -> Result<PathBuf, DatasetError> {
    [format!("{name}.gz"), name.to_string()]
        .into_iter()
        .map(|file| dir.join(file))
        .find(|path| path.is_file())
        .ok_or_else(|| DatasetError::MissingFile {
            name,
            dir: dir.to_path_buf(),
        })
}

/// Pairs decoded images with their labels
pub fn zip_items(images: IdxImages, labels: Vec<u8>) -> Result<Vec<MnistItem>, DatasetError> {
    if images.images.len() != labels.len() {
        return Err(DatasetError::CountMismatch {
            images: images.images.len(),
            labels: labels.len(),
        });
    }
    Ok(images
        .images
        .into_iter()
        .zip(labels)
        .map(|(image, label)| MnistItem { image, label })
        .collect())
}

/// Splits off the trailing `n_valid` items as the validation set
pub fn split_validation(
    mut items: Vec<MnistItem>,
    n_valid: usize,
) -> Result<(Vec<MnistItem>, Vec<MnistItem>), DatasetError> {
    if n_valid >= items.len() {
        return Err(DatasetError::SplitTooLarge {
            n_valid,
            total: items.len(),
        });
    }
    let valid = items.split_off(items.len() - n_valid);
    Ok((items, valid))
}

/// Loads the MNIST training archive in `dir` and returns `(train, valid)`
pub fn load_mnist(dir: &Path) -> Result<(Vec<MnistItem>, Vec<MnistItem>), DatasetError> {
    let images_path = find_archive(dir, TRAIN_IMAGES)?;
    let labels_path = find_archive(dir, TRAIN_LABELS)?;
    let images = parse_idx_images(&read_idx(&images_path)?)?;
    let labels = parse_idx_labels(&read_idx(&labels_path)?)?;
    if images.rows != IMAGE_SIDE || images.cols != IMAGE_SIDE {
        return Err(DatasetError::ImageSize {
            rows: images.rows,
            cols: images.cols,
        });
    }
    let items = zip_items(images, labels)?;
    log::info!(
        "Loaded {} MNIST items from '{}'",
        items.len(),
        dir.display()
    );
    split_validation(items, VALID_SIZE)
}

/// Pixel statistics of a set of images
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStats {
    pub mean: f32,
    pub std: f32,
}

impl ImageStats {
    /// Computes the mean and (population) standard deviation over every pixel
    pub fn compute(items: &[MnistItem]) -> Self {
        let n = items.iter().map(|i| i.image.len()).sum::<usize>().max(1) as f64;
        let pixels = || items.iter().flat_map(|i| i.image.iter().map(|&p| p as f64));
        let mean = pixels().sum::<f64>() / n;
        let var = pixels().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean: mean as f32,
            std: var.sqrt() as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};

    use crate::assert_eq_float;

    use super::*;

    fn idx_images(images: &[Vec<u8>], rows: u32, cols: u32) -> Vec<u8> {
        let mut bytes = IMAGES_MAGIC.to_be_bytes().to_vec();
        bytes.extend((images.len() as u32).to_be_bytes());
        bytes.extend(rows.to_be_bytes());
        bytes.extend(cols.to_be_bytes());
        for img in images {
            bytes.extend(img);
        }
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = LABELS_MAGIC.to_be_bytes().to_vec();
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend(labels);
        bytes
    }

    fn items(n: usize) -> Vec<MnistItem> {
        (0..n)
            .map(|i| MnistItem {
                image: vec![i as f32; 4],
                label: (i % NUM_CLASSES) as u8,
            })
            .collect()
    }

    #[test]
    fn test_parse_images() {
        let bytes = idx_images(&[vec![0, 255], vec![51, 102]], 1, 2);
        let parsed = parse_idx_images(&bytes).unwrap();
        assert_eq!(parsed.rows, 1);
        assert_eq!(parsed.cols, 2);
        assert_eq!(parsed.images.len(), 2);
        assert_eq!(parsed.images[0], vec![0.0, 1.0]);
        assert_eq_float!(parsed.images[1][0], 0.2);
        assert_eq_float!(parsed.images[1][1], 0.4);
    }

    #[test]
    fn test_parse_labels() {
        let bytes = idx_labels(&[3, 1, 4]);
        assert_eq!(parse_idx_labels(&bytes).unwrap(), vec![3, 1, 4]);
    }

    #[test]
    fn test_parse_errors() {
        let labels = idx_labels(&[1]);
        assert!(matches!(
            parse_idx_images(&labels),
            Err(DatasetError::BadMagic {
                expected: IMAGES_MAGIC,
                got: LABELS_MAGIC
            })
        ));

        let mut images = idx_images(&[vec![1, 2, 3, 4]], 2, 2);
        images.pop();
        assert!(matches!(
            parse_idx_images(&images),
            Err(DatasetError::Truncated {
                expected: 20,
                got: 19
            })
        ));

        assert!(matches!(
            parse_idx_labels(&[0, 0]),
            Err(DatasetError::Truncated { .. })
        ));
    }

    #[test]
    fn test_parse_header_overflow() {
        // count, rows and cols all u32::MAX
        let mut bytes = idx_images(&[], u32::MAX, u32::MAX);
        bytes[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            parse_idx_images(&bytes),
            Err(DatasetError::HeaderOverflow { .. })
        ));
    }

    #[test]
    fn test_zip_count_mismatch() {
        let images = parse_idx_images(&idx_images(&[vec![0], vec![1]], 1, 1)).unwrap();
        let err = zip_items(images, vec![7]).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::CountMismatch {
                images: 2,
                labels: 1
            }
        ));
    }

    #[test]
    fn test_split_validation() {
        let (train, valid) = split_validation(items(5), 2).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(valid.len(), 2);
        assert_eq!(valid[0].label, 3);
        assert_eq!(valid[1].label, 4);

        assert!(matches!(
            split_validation(items(2), 2),
            Err(DatasetError::SplitTooLarge {
                n_valid: 2,
                total: 2
            })
        ));
    }

    #[test]
    fn test_load_gzipped_archives() {
        let dir = tempfile::tempdir().unwrap();
        let n = VALID_SIZE + 3;
        let images = (0..n)
            .map(|i| vec![(i % 256) as u8; IMAGE_PIXELS])
            .collect::<Vec<_>>();
        let labels = (0..n).map(|i| (i % NUM_CLASSES) as u8).collect::<Vec<_>>();

        let file = File::create(dir.path().join(format!("{TRAIN_IMAGES}.gz"))).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::fast());
        encoder
            .write_all(&idx_images(&images, IMAGE_SIDE as u32, IMAGE_SIDE as u32))
            .unwrap();
        encoder.finish().unwrap();
        // labels stored uncompressed
        std::fs::write(dir.path().join(TRAIN_LABELS), idx_labels(&labels)).unwrap();

        let (train, valid) = load_mnist(dir.path()).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(valid.len(), VALID_SIZE);
        assert_eq!(train[2].label, 2);
        assert_eq!(train[2].image.len(), IMAGE_PIXELS);
        assert_eq_float!(train[1].image[0], 1.0 / 255.0);
    }

    #[test]
    fn test_load_rejects_wrong_image_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(TRAIN_IMAGES),
            idx_images(&[vec![0; 4], vec![1; 4]], 2, 2),
        )
        .unwrap();
        std::fs::write(dir.path().join(TRAIN_LABELS), idx_labels(&[0, 1])).unwrap();
        assert!(matches!(
            load_mnist(dir.path()),
            Err(DatasetError::ImageSize { rows: 2, cols: 2 })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_mnist(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MissingFile {
                name: TRAIN_IMAGES,
                ..
            }
        ));
    }

    #[test]
    fn test_image_stats() {
        let items = vec![
            MnistItem {
                image: vec![0.0, 1.0],
                label: 0,
            },
            MnistItem {
                image: vec![0.0, 1.0],
                label: 1,
            },
        ];
        let stats = ImageStats::compute(&items);
        assert_eq_float!(stats.mean, 0.5);
        assert_eq_float!(stats.std, 0.5);
    }
}
