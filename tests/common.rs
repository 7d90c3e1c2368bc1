#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use img_fanout::store::{HeadResult, MemoryObjectStore, ObjectStore, StoreError, StoredObject};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const BLACK: [u8; 3] = [0, 0, 0];

pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}

pub fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub fn jpeg_source(width: u32, height: u32) -> Vec<u8> {
    encode(&solid_image(width, height, BLACK), ImageFormat::Jpeg)
}

pub fn png_source(width: u32, height: u32) -> Vec<u8> {
    encode(&solid_image(width, height, BLACK), ImageFormat::Png)
}

/// Writes `<root>/<bucket>/<key>` the way `FsObjectStore` lays objects out.
pub fn write_object(root: &Path, bucket: &str, key: &str, bytes: &[u8]) {
    let path = root.join(bucket).join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Memory store whose `put` fails for keys containing `poison`.
pub struct FlakyStore {
    pub inner: MemoryObjectStore,
    pub poison: String,
    pub rejected: AtomicUsize,
}

impl FlakyStore {
    pub fn new(poison: &str) -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            poison: poison.to_string(),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl ObjectStore for FlakyStore {
    fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        self.inner.get(bucket, key)
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), StoreError> {
        if key.contains(&self.poison) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Backend(format!("simulated outage for {}", key)));
        }
        self.inner.put(bucket, key, bytes, content_type, cache_control)
    }

    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, StoreError> {
        self.inner.head(bucket, key)
    }
}
