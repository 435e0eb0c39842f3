// rust/patch-loader/src/materialize.rs

//! Turns resolved records into batch tensors.
//!
//! Pixel decoding and augmentation are pluggable; this module only owns the
//! output layout. Features are batch-major and channel-first (`b, c, y, x`),
//! labels are one row of `num_classes` bits per record, and both follow the
//! order of the input keys.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{LoaderError, Result};
use crate::types::{RawRecord, RowKey};

/// A decoded patch, interleaved `y, x, c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        let image = Self {
            height,
            width,
            channels,
            data,
        };
        image.validate()?;
        Ok(image)
    }

    /// Number of bytes `height x width x channels` pixels occupy.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the size does not fit in `usize`.
    pub fn byte_len(&self) -> Result<usize> {
        self.height
            .checked_mul(self.width)
            .and_then(|n| n.checked_mul(self.channels))
            .ok_or_else(|| {
                LoaderError::decode(format!(
                    "image {}x{}x{} is too large",
                    self.height, self.width, self.channels
                ))
            })
    }

    /// Checks that `data` holds exactly one byte per pixel channel.
    pub fn validate(&self) -> Result<()> {
        let expected = self.byte_len()?;
        if self.data.len() != expected {
            return Err(LoaderError::decode(format!(
                "image {}x{}x{} needs {expected} bytes, got {}",
                self.height,
                self.width,
                self.channels,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn pixel(&self, y: usize, x: usize, c: usize) -> u8 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

/// Decodes the payload of a raw record into pixels.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, record: &RawRecord) -> Result<Image>;
}

/// Augmentation policy applied to one split's images in place.
pub trait Augmentation: Send + Sync {
    fn apply(&self, image: &mut Image) -> Result<()>;
}

const RAW_HEADER_LEN: usize = 12;

/// Decoder for uncompressed payloads: `height`, `width` and `channels` as
/// little-endian `u32`, then the pixels in `y, x, c` order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPixelDecoder;

impl RecordDecoder for RawPixelDecoder {
    fn decode(&self, record: &RawRecord) -> Result<Image> {
        let data = &record.data;
        if data.len() < RAW_HEADER_LEN {
            return Err(LoaderError::decode(format!(
                "raw pixel payload too short: {} bytes",
                data.len()
            )));
        }
        let dim = |i: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&data[i * 4..i * 4 + 4]);
            u32::from_le_bytes(word) as usize
        };
        Image::new(dim(0), dim(1), dim(2), data[RAW_HEADER_LEN..].to_vec())
    }
}

/// Encodes pixels in the layout [`RawPixelDecoder`] reads.
pub fn encode_raw_pixels(height: u32, width: u32, channels: u32, pixels: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(RAW_HEADER_LEN + pixels.len());
    buf.put_u32_le(height);
    buf.put_u32_le(width);
    buf.put_u32_le(channels);
    buf.put_slice(pixels);
    buf.freeze()
}

/// Unpacks a stored label into `num_classes` bits, most significant first.
///
/// Element `j` is bit `num_classes - 1 - j` of `packed`.
pub fn decode_label(packed: i32, num_classes: usize) -> Vec<f32> {
    let bits = packed as u32;
    (0..num_classes)
        .map(|j| {
            let bit = num_classes - 1 - j;
            if bit < 32 && (bits >> bit) & 1 == 1 {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// A materialized batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub split: usize,
    /// `b * c * h * w` values, channel-first per item.
    pub features: Vec<f32>,
    /// `[b, c, h, w]`.
    pub feature_shape: [usize; 4],
    /// `b * num_classes` values.
    pub labels: Vec<f32>,
    /// Keys of the rows in this batch, in batch order.
    pub keys: Vec<RowKey>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.feature_shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label row of item `i`.
    pub fn label(&self, i: usize) -> &[f32] {
        let n = self.labels.len() / self.len().max(1);
        &self.labels[i * n..(i + 1) * n]
    }
}

pub struct Materializer {
    num_classes: usize,
    decoder: Arc<dyn RecordDecoder>,
    augmentations: Vec<Option<Arc<dyn Augmentation>>>,
}

impl Materializer {
    pub fn new(num_classes: usize, decoder: Arc<dyn RecordDecoder>) -> Self {
        Self {
            num_classes,
            decoder,
            augmentations: Vec::new(),
        }
    }

    /// Sets the per-split augmentation policies; splits past the end of
    /// `augmentations` get none.
    #[must_use]
    pub fn with_augmentations(mut self, augmentations: Vec<Option<Arc<dyn Augmentation>>>) -> Self {
        self.augmentations = augmentations;
        self
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn decoder(&self) -> &Arc<dyn RecordDecoder> {
        &self.decoder
    }

    pub fn augmentations(&self) -> &[Option<Arc<dyn Augmentation>>] {
        &self.augmentations
    }

    /// Decodes, augments and stacks `records` for `split`.
    ///
    /// # Errors
    ///
    /// Returns a decode error if a record fails to decode, if an
    /// augmentation leaves an image whose dimensions disagree with its data,
    /// or if images in the batch differ in shape.
    pub fn materialize(&self, split: usize, records: &[RawRecord]) -> Result<Batch> {
        let augmentation = self.augmentations.get(split).and_then(Option::as_ref);
        let mut features = Vec::new();
        let mut labels = Vec::with_capacity(records.len() * self.num_classes);
        let mut shape: Option<(usize, usize, usize)> = None;

        for record in records {
            let mut image = self.decoder.decode(record)?;
            if let Some(augmentation) = augmentation {
                augmentation.apply(&mut image)?;
                image.validate()?;
            }
            let dims = (image.channels, image.height, image.width);
            match shape {
                None => {
                    shape = Some(dims);
                    features.reserve(records.len() * image.data.len());
                }
                Some(expected) if expected != dims => {
                    return Err(LoaderError::decode(format!(
                        "image shape {dims:?} differs from batch shape {expected:?}"
                    )));
                }
                Some(_) => {}
            }
            push_channel_first(&image, &mut features);
            labels.extend(decode_label(record.label, self.num_classes));
        }

        let (c, h, w) = shape.unwrap_or((0, 0, 0));
        Ok(Batch {
            split,
            features,
            feature_shape: [records.len(), c, h, w],
            labels,
            keys: Vec::new(),
        })
    }
}

fn push_channel_first(image: &Image, out: &mut Vec<f32>) {
    for c in 0..image.channels {
        for y in 0..image.height {
            for x in 0..image.width {
                out.push(f32::from(image.pixel(y, x, c)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassLabel;

    fn record(label: i32, h: u32, w: u32, c: u32, fill: impl Fn(usize) -> u8) -> RawRecord {
        let pixels: Vec<u8> = (0..(h * w * c) as usize).map(fill).collect();
        RawRecord {
            label,
            data: encode_raw_pixels(h, w, c, &pixels),
        }
    }

    struct Invert;

    impl Augmentation for Invert {
        fn apply(&self, image: &mut Image) -> Result<()> {
            for p in &mut image.data {
                *p = 255 - *p;
            }
            Ok(())
        }
    }

    #[test]
    fn test_decode_label_bit_order() {
        assert_eq!(decode_label(ClassLabel::new(0).store_value(), 2), vec![0.0, 1.0]);
        assert_eq!(decode_label(ClassLabel::new(1).store_value(), 2), vec![1.0, 0.0]);
        assert_eq!(decode_label(0b0100, 3), vec![1.0, 0.0, 0.0]);
        // Bits above num_classes are dropped.
        assert_eq!(decode_label(0b1001, 2), vec![0.0, 1.0]);
    }

    #[test]
    fn test_raw_pixel_decoder() {
        let rec = record(1, 2, 3, 1, |i| i as u8);
        let image = RawPixelDecoder.decode(&rec).unwrap();
        assert_eq!((image.height, image.width, image.channels), (2, 3, 1));
        assert_eq!(image.pixel(1, 2, 0), 5);

        let short = RawRecord {
            label: 1,
            data: Bytes::from_static(&[1, 2, 3]),
        };
        assert!(RawPixelDecoder.decode(&short).is_err());

        let truncated = RawRecord {
            label: 1,
            data: encode_raw_pixels(4, 4, 3, &[0; 10]),
        };
        assert!(RawPixelDecoder.decode(&truncated).is_err());
    }

    #[test]
    fn test_materialize_is_channel_first() {
        // One 1x2 RGB image: pixels (1,2,3) and (4,5,6).
        let rec = RawRecord {
            label: 2,
            data: encode_raw_pixels(1, 2, 3, &[1, 2, 3, 4, 5, 6]),
        };
        let materializer = Materializer::new(2, Arc::new(RawPixelDecoder));
        let batch = materializer.materialize(0, &[rec]).unwrap();
        assert_eq!(batch.feature_shape, [1, 3, 1, 2]);
        assert_eq!(batch.features, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(batch.label(0), &[1.0, 0.0]);
    }

    #[test]
    fn test_materialize_keeps_record_order() {
        let records: Vec<RawRecord> = (0..4)
            .map(|i| record(1 << (i % 2), 1, 1, 1, move |_| i as u8))
            .collect();
        let materializer = Materializer::new(2, Arc::new(RawPixelDecoder));
        let batch = materializer.materialize(1, &records).unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.features, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(batch.labels, vec![0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_augmentation_only_on_its_split() {
        let rec = record(1, 1, 1, 1, |_| 10);
        let materializer = Materializer::new(1, Arc::new(RawPixelDecoder))
            .with_augmentations(vec![Some(Arc::new(Invert) as Arc<dyn Augmentation>), None]);
        let augmented = materializer.materialize(0, &[rec.clone()]).unwrap();
        let plain = materializer.materialize(1, &[rec.clone()]).unwrap();
        let beyond = materializer.materialize(5, &[rec]).unwrap();
        assert_eq!(augmented.features, vec![245.0]);
        assert_eq!(plain.features, vec![10.0]);
        assert_eq!(beyond.features, vec![10.0]);
    }

    #[test]
    fn test_materialize_rejects_mixed_shapes() {
        let records = vec![record(1, 1, 1, 1, |_| 0), record(1, 2, 1, 1, |_| 0)];
        let materializer = Materializer::new(1, Arc::new(RawPixelDecoder));
        let err = materializer.materialize(0, &records).unwrap_err();
        assert!(matches!(err, LoaderError::Decode { .. }));
    }

    #[test]
    fn test_raw_pixel_decoder_rejects_oversized_header() {
        let rec = RawRecord {
            label: 1,
            data: encode_raw_pixels(u32::MAX, u32::MAX, u32::MAX, &[0; 4]),
        };
        let err = RawPixelDecoder.decode(&rec).unwrap_err();
        assert!(matches!(err, LoaderError::Decode { .. }));

        let overflow = Image::new(usize::MAX, 2, 1, Vec::new()).unwrap_err();
        assert!(matches!(overflow, LoaderError::Decode { .. }));
    }

    struct Crop;

    impl Augmentation for Crop {
        fn apply(&self, image: &mut Image) -> Result<()> {
            // Shrinks the data without touching the dimensions.
            image.data.truncate(1);
            Ok(())
        }
    }

    #[test]
    fn test_materialize_rejects_inconsistent_augmentation() {
        let rec = record(1, 2, 2, 1, |i| i as u8);
        let materializer = Materializer::new(1, Arc::new(RawPixelDecoder))
            .with_augmentations(vec![Some(Arc::new(Crop) as Arc<dyn Augmentation>)]);
        let err = materializer.materialize(0, &[rec]).unwrap_err();
        assert!(matches!(err, LoaderError::Decode { .. }));
    }

    #[test]
    fn test_materialize_empty() {
        let materializer = Materializer::new(2, Arc::new(RawPixelDecoder));
        let batch = materializer.materialize(0, &[]).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.feature_shape, [0, 0, 0, 0]);
    }
}
