//! 贴花加载与纹理保存
//!
//! 与射线网格的行顺序一致：加载时垂直翻转图像，使第 0 行为底部；
//! 保存时再翻转回来。

use image::{imageops, GenericImageView};
use std::path::Path;

use super::{DecalImage, Texture};
use crate::{DecalError, Result};

/// 从文件加载贴花，统一转换为 RGBA8
pub fn load_decal<P: AsRef<Path>>(path: P) -> Result<DecalImage> {
    let img = image::open(path.as_ref())
        .map_err(|e| DecalError::Texture(format!("Failed to load decal: {}", e)))?;
    decal_from_image(img)
}

/// 从内存加载贴花
pub fn load_decal_from_memory(data: &[u8]) -> Result<DecalImage> {
    let img = image::load_from_memory(data)
        .map_err(|e| DecalError::Texture(format!("Failed to load decal from memory: {}", e)))?;
    decal_from_image(img)
}

fn decal_from_image(img: image::DynamicImage) -> Result<DecalImage> {
    let (width, height) = img.dimensions();
    // 没有 alpha 通道的图片转换后为全不透明
    let rgba = img.to_rgba8();
    let flipped = imageops::flip_vertical(&rgba);
    DecalImage::from_rgba8(width, height, flipped.as_raw())
}

/// 将纹理第 0 级保存为 PNG
pub fn save_png<P: AsRef<Path>>(texture: &Texture, path: P) -> Result<()> {
    let img = image::RgbaImage::from_raw(texture.width, texture.height, texture.data.clone())
        .ok_or_else(|| {
            DecalError::Texture("texture data does not match its dimensions".to_string())
        })?;
    let flipped = imageops::flip_vertical(&img);
    flipped
        .save_with_format(path.as_ref(), image::ImageFormat::Png)
        .map_err(|e| DecalError::Texture(format!("Failed to save texture: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::OutputBuffer;

    #[test]
    fn test_png_round_trip_keeps_row_order() {
        let buffer = OutputBuffer::new(2, 2, [0, 0, 0, 0]);
        buffer.store(0, 0, [255, 0, 0, 255]);
        buffer.store(1, 1, [0, 0, 255, 128]);
        let mut texture = Texture::default();
        texture.upload(&buffer);

        let path = std::env::temp_dir().join(format!("skin_decal_rt_{}.png", std::process::id()));
        texture.save_png(&path).unwrap();
        let decal = load_decal(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!((decal.width, decal.height), (2, 2));
        assert_eq!(decal.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(decal.pixel(1, 1), Some([0, 0, 255, 128]));
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(matches!(
            load_decal_from_memory(&[1, 2, 3]),
            Err(DecalError::Texture(_))
        ));
    }
}
