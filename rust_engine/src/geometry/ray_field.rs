//! 隐式圆柱射线场 - 使用 rayon 并行计算

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use super::Ray;

/// 每个工作项块的大小：总数 / 工作线程数，最小为 1
pub fn chunk_size(total: usize, workers: usize) -> usize {
    (total / workers.max(1)).max(1)
}

/// 隐式圆柱参数（角度已转换为弧度）
#[derive(Clone, Copy, Debug)]
pub struct ImplicitCylinder {
    radius: f32,
    angle_start: f32,
    angle_step: f32,
    row_start: f32,
    row_step: f32,
    surface_to_world: Mat4,
}

impl ImplicitCylinder {
    pub fn new(
        width: u32,
        height: u32,
        radius: f32,
        wrap_angle_degrees: f32,
        length: f32,
        surface_to_world: Mat4,
    ) -> Self {
        let wrap = wrap_angle_degrees.to_radians();
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        Self {
            radius,
            // 列以 0 角（局部 +Z）为中心，中间列恰好落在 0 角上
            angle_start: -wrap * 0.5,
            angle_step: wrap / width,
            // 行取纹素中心
            row_start: -length * 0.5,
            row_step: length / height,
            surface_to_world,
        }
    }

    /// 计算 (col, row) 处的射线
    pub fn ray_at(&self, col: u32, row: u32) -> Ray {
        let angle = self.angle_start + col as f32 * self.angle_step;
        let y = self.row_start + (row as f32 + 0.5) * self.row_step;
        let (sin, cos) = angle.sin_cos();

        let local_origin = Vec3::new(self.radius * sin, y, self.radius * cos);
        // 指向轴线，忽略轴向分量
        let local_direction = Vec3::new(-sin, 0.0, -cos);

        Ray {
            origin: self.surface_to_world.transform_point3(local_origin),
            direction: self
                .surface_to_world
                .transform_vector3(local_direction)
                .normalize_or_zero(),
        }
    }
}

/// 计算 `width * height` 的隐式射线场
///
/// 每个纹素一个工作项，按当前 rayon 线程池的线程数分块。
pub fn compute_implicit_ray_field(
    width: u32,
    height: u32,
    radius: f32,
    wrap_angle_degrees: f32,
    length: f32,
    surface_to_world: Mat4,
) -> Vec<Ray> {
    let count = width as usize * height as usize;
    let mut rays = vec![Ray::default(); count];
    if count == 0 {
        return rays;
    }

    let cylinder = ImplicitCylinder::new(
        width,
        height,
        radius,
        wrap_angle_degrees,
        length,
        surface_to_world,
    );
    let chunk = chunk_size(count, rayon::current_num_threads());
    let row_width = width as usize;

    rays.par_chunks_mut(chunk)
        .enumerate()
        .for_each(|(chunk_index, chunk_rays)| {
            let base = chunk_index * chunk;
            for (offset, ray) in chunk_rays.iter_mut().enumerate() {
                let index = base + offset;
                let col = (index % row_width) as u32;
                let row = (index / row_width) as u32;
                *ray = cylinder.ray_at(col, row);
            }
        });

    rays
}
