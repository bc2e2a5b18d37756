//! Segmentation dataset loading and batching.
//!
//! A split lives under `<root>/<split>/` with paired files: `img/` holds
//! the input images, `lbl/` single-channel PNGs of per-pixel class
//! indices (255 marks ignored pixels). Pairs are matched by file stem;
//! images without a label are skipped with a warning.

use std::path::{Path, PathBuf};

use burn::data::{dataloader::batcher::Batcher, dataset::Dataset};
use burn::prelude::*;
use burn::tensor::{Int, TensorData};

use image::{self, DynamicImage};

use crate::{
    config::{IMAGENET_MEAN, IMAGENET_STD},
    error::{FcnError, FcnResult},
};

/// One preprocessed image/label pair.
#[derive(Debug, Clone)]
pub struct SegmentationItem<B: Backend> {
    /// Normalized image, `[3, H, W]`.
    pub image: Tensor<B, 3>,
    /// Per-pixel class indices, `[H, W]`.
    pub target: Tensor<B, 2, Int>,
}

/// A batch of items stacked along the leading dimension. All items in a
/// batch must share one spatial size; with variable-size datasets that
/// means a batch size of one.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// `[N, 3, H, W]`
    pub images: Tensor<B, 4>,
    /// `[N, H, W]`
    pub targets: Tensor<B, 3, Int>,
}

/// Stacks [`SegmentationItem`]s into a [`SegmentationBatch`].
#[derive(Clone, Default)]
pub struct SegmentationBatcher<B: Backend> {
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SegmentationItem<B>, SegmentationBatch<B>>
    for SegmentationBatcher<B>
{
    fn batch(&self, items: Vec<SegmentationItem<B>>, _device: &B::Device) -> SegmentationBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());
        for item in items {
            images.push(item.image);
            targets.push(item.target);
        }

        SegmentationBatch {
            images: Tensor::stack(images, 0),
            targets: Tensor::stack(targets, 0),
        }
    }
}

/// An on-disk split of image/label pairs.
pub struct SegmentationDataset<B: Backend> {
    items: Vec<(PathBuf, PathBuf)>,
    device: B::Device,
}

impl<B: Backend> SegmentationDataset<B> {
    /// Opens `<root>/<split>`, pairing `img/` files with `lbl/` PNGs by
    /// file stem.
    ///
    /// # Errors
    ///
    /// [`FcnError::Dataset`] when either directory is missing or no pair
    /// could be formed.
    pub fn new(root: &Path, split: &str, device: &B::Device) -> FcnResult<Self> {
        let items = Self::collect_pairs(&root.join(split))?;
        Ok(Self {
            items,
            device: device.clone(),
        })
    }

    /// Number of image/label pairs found.
    pub fn num_pairs(&self) -> usize {
        self.items.len()
    }

    fn collect_pairs(split_root: &Path) -> FcnResult<Vec<(PathBuf, PathBuf)>> {
        let image_root = split_root.join("img");
        let label_root = split_root.join("lbl");

        for dir in [&image_root, &label_root] {
            if !dir.is_dir() {
                return Err(FcnError::Dataset {
                    message: format!("missing dataset directory: {}", dir.display()),
                });
            }
        }

        let valid_extensions = ["png", "jpg", "jpeg", "PNG", "JPG", "JPEG"];

        let entries = std::fs::read_dir(&image_root).map_err(|e| FcnError::Dataset {
            message: format!("failed to read {}: {e}", image_root.display()),
        })?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FcnError::Dataset {
                message: format!("failed to read directory entry: {e}"),
            })?;

            let image_path = entry.path();
            if !image_path.is_file() {
                continue;
            }
            let has_valid_extension = image_path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| valid_extensions.contains(&ext));
            if !has_valid_extension {
                continue;
            }

            let Some(stem) = image_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let label_path = label_root.join(format!("{stem}.png"));
            if label_path.is_file() {
                items.push((image_path, label_path));
            } else {
                tracing::warn!(image = %image_path.display(), "no label for image, skipping");
            }
        }

        if items.is_empty() {
            return Err(FcnError::Dataset {
                message: format!("no image/label pairs under {}", split_root.display()),
            });
        }

        items.sort();
        tracing::info!(
            pairs = items.len(),
            split = %split_root.display(),
            "dataset loaded"
        );
        Ok(items)
    }

    fn image_to_tensor(&self, img: DynamicImage) -> Tensor<B, 3> {
        let img = img.to_rgb32f();
        let (width, height) = img.dimensions();
        let data = TensorData::new(img.into_raw(), [height as usize, width as usize, 3]);
        let tensor = Tensor::<B, 3>::from_data(data, &self.device).permute([2, 0, 1]);
        normalize_image(tensor)
    }

    fn label_to_tensor(&self, img: DynamicImage) -> Tensor<B, 2, Int> {
        let label = img.to_luma8();
        let (width, height) = label.dimensions();
        let values: Vec<i64> = label.into_raw().into_iter().map(i64::from).collect();
        let data = TensorData::new(values, [height as usize, width as usize]);
        Tensor::from_data(data, &self.device)
    }
}

/// ImageNet-statistics normalization of a `[3, H, W]` image tensor.
pub fn normalize_image<B: Backend>(image: Tensor<B, 3>) -> Tensor<B, 3> {
    let device = image.device();
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([3, 1, 1]);
    (image - mean) / std
}

impl<B: Backend> Dataset<SegmentationItem<B>> for SegmentationDataset<B> {
    fn get(&self, index: usize) -> Option<SegmentationItem<B>> {
        let (image_path, label_path) = self.items.get(index)?;

        let image = match image::open(image_path) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(path = %image_path.display(), %err, "unreadable image");
                return None;
            }
        };
        let label = match image::open(label_path) {
            Ok(label) => label,
            Err(err) => {
                tracing::warn!(path = %label_path.display(), %err, "unreadable label");
                return None;
            }
        };

        Some(SegmentationItem {
            image: self.image_to_tensor(image),
            target: self.label_to_tensor(label),
        })
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn batcher_stacks_items() {
        let device = Default::default();
        let batcher = SegmentationBatcher::<TestBackend>::new();

        let item = |fill: i64| SegmentationItem {
            image: Tensor::<TestBackend, 3>::random(
                [3, 32, 48],
                Distribution::Normal(0.0, 1.0),
                &device,
            ),
            target: Tensor::<TestBackend, 2, Int>::full([32, 48], fill, &device),
        };

        let batch = batcher.batch(vec![item(0), item(1)], &device);
        assert_eq!(batch.images.dims(), [2, 3, 32, 48]);
        assert_eq!(batch.targets.dims(), [2, 32, 48]);
    }

    #[test]
    fn normalization_centers_the_channel_means() {
        let device = Default::default();
        let mean = Tensor::<TestBackend, 1>::from_floats(IMAGENET_MEAN, &device)
            .reshape([3, 1, 1])
            .expand([3, 4, 4]);

        let normalized = normalize_image(mean);
        let max_abs = normalized.abs().max().into_scalar();
        assert!(max_abs < 1e-6);
    }

    #[test]
    fn missing_directories_are_rejected() {
        let device = Default::default();
        let result = SegmentationDataset::<TestBackend>::new(
            Path::new("/nonexistent"),
            "train",
            &device,
        );
        assert!(matches!(result, Err(FcnError::Dataset { .. })));
    }

    #[test]
    fn dataset_pairs_by_stem() {
        let device = Default::default();
        let root = std::env::temp_dir().join(format!("fcn-dataset-{}", std::process::id()));
        let split = root.join("train");
        std::fs::create_dir_all(split.join("img")).unwrap();
        std::fs::create_dir_all(split.join("lbl")).unwrap();

        let image = image::RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30]));
        image.save(split.join("img/a.png")).unwrap();
        // No label for "b": skipped, not an error.
        image.save(split.join("img/b.png")).unwrap();
        let label = image::GrayImage::from_pixel(8, 6, image::Luma([255]));
        label.save(split.join("lbl/a.png")).unwrap();

        let dataset = SegmentationDataset::<TestBackend>::new(&root, "train", &device).unwrap();
        assert_eq!(dataset.len(), 1);

        let item = dataset.get(0).unwrap();
        assert_eq!(item.image.dims(), [3, 6, 8]);
        assert_eq!(item.target.dims(), [6, 8]);
        let ignore = item.target.equal_elem(255).int().sum().into_scalar();
        assert_eq!(ignore, 48);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
