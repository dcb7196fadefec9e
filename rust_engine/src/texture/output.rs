//! 投影输出缓冲
//!
//! 每个像素存为一个 `AtomicU32`（打包的 RGBA8），多条射线落到同一像素时
//! 最后写入者胜出，四个通道总是来自同一次写入。

use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// RGBA8 打包为 u32（小端，字节顺序与平铺缓冲一致）
#[inline]
pub fn pack_rgba(rgba: [u8; 4]) -> u32 {
    u32::from_le_bytes(rgba)
}

#[inline]
pub fn unpack_rgba(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// 输出纹理缓冲
#[derive(Debug)]
pub struct OutputBuffer {
    width: u32,
    height: u32,
    pixels: Vec<AtomicU32>,
}

impl OutputBuffer {
    /// 分配并填充清除色
    pub fn new(width: u32, height: u32, clear_color: [u8; 4]) -> Self {
        let value = pack_rgba(clear_color);
        let count = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: (0..count).map(|_| AtomicU32::new(value)).collect(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// 重新填充清除色（复用已有分配）
    pub fn clear(&mut self, clear_color: [u8; 4]) {
        let value = pack_rgba(clear_color);
        self.pixels
            .par_iter_mut()
            .for_each(|p| *p.get_mut() = value);
    }

    /// 写入像素，坐标越界时忽略
    #[inline]
    pub fn store(&self, x: u32, y: u32, rgba: [u8; 4]) {
        if x < self.width && y < self.height {
            let index = y as usize * self.width as usize + x as usize;
            self.pixels[index].store(pack_rgba(rgba), Ordering::Relaxed);
        }
    }

    pub fn load(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        Some(unpack_rgba(self.pixels[index].load(Ordering::Relaxed)))
    }

    /// 复制到平铺 RGBA8 字节缓冲，`out` 长度必须为像素数 * 4
    pub fn copy_to(&self, out: &mut [u8]) {
        out.par_chunks_mut(4)
            .zip(self.pixels.par_iter())
            .for_each(|(dst, src)| {
                dst.copy_from_slice(&unpack_rgba(src.load(Ordering::Relaxed)));
            });
    }

    /// 导出为平铺 RGBA8 字节
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.pixels.len() * 4];
        self.copy_to(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_load() {
        let buffer = OutputBuffer::new(4, 2, [0, 0, 0, 0]);
        buffer.store(3, 1, [10, 20, 30, 40]);
        buffer.store(4, 1, [1, 1, 1, 1]);
        assert_eq!(buffer.load(3, 1), Some([10, 20, 30, 40]));
        assert_eq!(buffer.load(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(buffer.load(4, 1), None);

        let bytes = buffer.to_rgba8();
        assert_eq!(&bytes[28..32], &[10, 20, 30, 40]);
    }

    #[test]
    fn test_clear_reuses_allocation() {
        let mut buffer = OutputBuffer::new(2, 2, [9, 9, 9, 9]);
        buffer.store(0, 0, [1, 2, 3, 4]);
        buffer.clear([0, 0, 0, 0]);
        assert!(buffer.to_rgba8().iter().all(|&b| b == 0));
        assert!(buffer.matches(2, 2));
    }
}
