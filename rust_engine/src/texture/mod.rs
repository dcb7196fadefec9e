//! 纹理数据
//!
//! - `DecalImage`：贴花像素缓冲（RGBA8，第 0 行为底部）
//! - `OutputBuffer`：投影输出缓冲，支持多线程按像素写入
//! - `Texture`：发布给材质的实时纹理，带 mip 链

mod loader;
mod output;

pub use loader::{load_decal, load_decal_from_memory, save_png};
pub use output::{pack_rgba, unpack_rgba, OutputBuffer};

use std::path::Path;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::{DecalError, Result};

/// 已发布纹理的共享句柄
pub type TextureHandle = Arc<Texture>;

/// 贴花图像
///
/// 每个像素对应射线场中同下标的一条射线。
#[derive(Clone, Debug)]
pub struct DecalImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl DecalImage {
    /// 从平铺 RGBA8 字节创建
    pub fn from_rgba8(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(DecalError::Texture(format!(
                "decal data length {} does not match {}x{} RGBA8 ({} bytes)",
                data.len(),
                width,
                height,
                expected
            )));
        }
        let pixels = data
            .chunks_exact(4)
            .map(|p| [p[0], p[1], p[2], p[3]])
            .collect();
        Ok(Self { width, height, pixels })
    }

    /// 纯色贴花
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// 获取像素数量
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// 按 (col, row) 取像素
    pub fn pixel(&self, col: u32, row: u32) -> Option<[u8; 4]> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.pixels
            .get(row as usize * self.width as usize + col as usize)
            .copied()
    }

    /// 检查是否存在非透明像素
    pub fn has_visible_pixels(&self) -> bool {
        self.pixels.iter().any(|p| p[3] > 0)
    }
}

/// mip 层级
#[derive(Clone, Debug)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// 实时纹理（RGBA8）
#[derive(Clone, Debug, Default)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// 第 1 级及以下的 mip（第 0 级即 `data`）
    pub mips: Vec<MipLevel>,
}

impl Texture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
            mips: Vec::new(),
        }
    }

    /// 获取纹理字节数
    pub fn byte_count(&self) -> usize {
        self.data.len()
    }

    /// mip 层级数量（包含第 0 级）
    pub fn mip_count(&self) -> usize {
        1 + self.mips.len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// 从输出缓冲复制像素，尺寸不同时重新分配
    pub fn upload(&mut self, buffer: &OutputBuffer) {
        let (width, height) = buffer.dimensions();
        let len = width as usize * height as usize * 4;
        self.width = width;
        self.height = height;
        if self.data.len() != len {
            self.data.resize(len, 0);
        }
        buffer.copy_to(&mut self.data);
    }

    /// 重新生成 mip 链（每级长宽减半，三角滤波）
    pub fn generate_mipmaps(&mut self) {
        self.mips.clear();
        if self.width == 0 || self.height == 0 {
            return;
        }
        let Some(mut level) = RgbaImage::from_raw(self.width, self.height, self.data.clone()) else {
            log::warn!(
                "[纹理] 像素数据与尺寸 {}x{} 不符，跳过 mip 生成",
                self.width,
                self.height
            );
            return;
        };
        while level.width() > 1 || level.height() > 1 {
            let width = (level.width() / 2).max(1);
            let height = (level.height() / 2).max(1);
            level = imageops::resize(&level, width, height, FilterType::Triangle);
            self.mips.push(MipLevel {
                width,
                height,
                data: level.as_raw().clone(),
            });
        }
    }

    /// 保存为 PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_png(self, path)
    }
}
