//! 任务链的三个阶段
//!
//! 阶段 A：构建查询（跳过完全透明的贴花纹素）
//! 阶段 B：批量射线检测
//! 阶段 C：解析重心 UV、预乘 Alpha 并写入输出缓冲
//!
//! 每个阶段按 `总数 / 工作线程数` 分块并行，各下标之间没有交叉读写。

use glam::Vec2;
use rayon::prelude::*;

use super::{RaycastQuery, RaycastResult};
use crate::body::{ColliderGeometrySnapshot, LayerMask, Raycaster};
use crate::geometry::{chunk_size, Ray};
use crate::texture::{DecalImage, OutputBuffer};
use crate::{DecalError, Result};

/// 跳过的射线在活动下标缓冲中的标记
pub const INACTIVE: i32 = -1;

/// 单个样本的合成结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleOutcome {
    Written,
    /// 透明纹素，未发射射线
    Skipped,
    /// 射线未命中
    Missed,
    /// 命中了目标以外的几何体，按未命中处理
    Mismatched,
    /// UV 在 [0, 1] 之外
    OutOfBounds,
}

/// 合成统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompositeStats {
    pub written: usize,
    pub skipped: usize,
    pub missed: usize,
    pub mismatched: usize,
    pub out_of_bounds: usize,
}

impl CompositeStats {
    pub fn record(&mut self, outcome: SampleOutcome) {
        match outcome {
            SampleOutcome::Written => self.written += 1,
            SampleOutcome::Skipped => self.skipped += 1,
            SampleOutcome::Missed => self.missed += 1,
            SampleOutcome::Mismatched => self.mismatched += 1,
            SampleOutcome::OutOfBounds => self.out_of_bounds += 1,
        }
    }

    pub fn merge(self, other: CompositeStats) -> CompositeStats {
        CompositeStats {
            written: self.written + other.written,
            skipped: self.skipped + other.skipped,
            missed: self.missed + other.missed,
            mismatched: self.mismatched + other.mismatched,
            out_of_bounds: self.out_of_bounds + other.out_of_bounds,
        }
    }

    pub fn total(&self) -> usize {
        self.written + self.skipped + self.missed + self.mismatched + self.out_of_bounds
    }
}

/// Alpha 预乘单个通道：`round(c * a / 255)`，`a == 255` 时不变
#[inline]
pub fn premultiply(channel: u8, alpha: u8) -> u8 {
    if alpha == 255 {
        return channel;
    }
    // 255 为奇数，c * a / 255 的小数部分不会恰好是 0.5
    ((channel as u32 * alpha as u32 + 127) / 255) as u8
}

#[inline]
pub fn premultiply_rgba(rgba: [u8; 4]) -> [u8; 4] {
    let a = rgba[3];
    [
        premultiply(rgba[0], a),
        premultiply(rgba[1], a),
        premultiply(rgba[2], a),
        a,
    ]
}

/// UV 转换为输出像素坐标（四舍五入），UV 超出 [0, 1] 时返回 `None`
#[inline]
pub fn uv_to_pixel(uv: Vec2, width: u32, height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
        return None;
    }
    let x = ((uv.x * width as f32).round() as u32).min(width - 1);
    let y = ((uv.y * height as f32).round() as u32).min(height - 1);
    Some((x, y))
}

/// 阶段 A：构建查询
///
/// 返回 (查询, 活动下标)。透明纹素写入零距离查询和 `INACTIVE`。
pub fn build_queries(
    rays: &[Ray],
    decal: &DecalImage,
    collider_filter: LayerMask,
) -> Result<(Vec<RaycastQuery>, Vec<i32>)> {
    if rays.len() != decal.pixel_count() {
        return Err(DecalError::InvalidGeometry(format!(
            "ray field has {} rays but decal has {} pixels",
            rays.len(),
            decal.pixel_count()
        )));
    }

    let count = rays.len();
    let mut queries = vec![RaycastQuery::skipped(collider_filter); count];
    let mut active = vec![INACTIVE; count];
    let chunk = chunk_size(count, rayon::current_num_threads());

    queries
        .par_chunks_mut(chunk)
        .zip(active.par_chunks_mut(chunk))
        .enumerate()
        .for_each(|(chunk_index, (query_chunk, active_chunk))| {
            let base = chunk_index * chunk;
            let slots = query_chunk.iter_mut().zip(active_chunk.iter_mut());
            for (offset, (query, slot)) in slots.enumerate() {
                let i = base + offset;
                if decal.pixels[i][3] > 0 {
                    *query = RaycastQuery::active(&rays[i], collider_filter);
                    *slot = i as i32;
                }
            }
        });

    Ok((queries, active))
}

/// 阶段 B：批量射线检测，结果与查询同下标
pub fn batch_raycast(queries: &[RaycastQuery], raycaster: &dyn Raycaster) -> Vec<RaycastResult> {
    let count = queries.len();
    let mut results = vec![RaycastResult::MISS; count];
    let chunk = chunk_size(count, rayon::current_num_threads());

    results
        .par_chunks_mut(chunk)
        .zip(queries.par_chunks(chunk))
        .for_each(|(result_chunk, query_chunk)| {
            for (result, query) in result_chunk.iter_mut().zip(query_chunk.iter()) {
                if !query.is_skipped() {
                    *result = raycaster.raycast(query);
                }
            }
        });

    results
}

/// 合成单个样本
///
/// 三角形下标或 UV 下标越界说明快照与碰撞体不一致，作为错误返回以中止本次投影。
pub fn composite_sample(
    index: usize,
    result: &RaycastResult,
    active_index: i32,
    decal: &DecalImage,
    snapshot: &ColliderGeometrySnapshot,
    output: &OutputBuffer,
) -> Result<SampleOutcome> {
    if active_index < 0 {
        return Ok(SampleOutcome::Skipped);
    }
    if !result.hit {
        return Ok(SampleOutcome::Missed);
    }
    if result.collider_id != snapshot.collider_id {
        return Ok(SampleOutcome::Mismatched);
    }

    let uv = snapshot
        .interpolate_uv(result.triangle_index, result.barycentric)
        .ok_or_else(|| {
            DecalError::Composite(format!(
                "triangle {} is outside the collider snapshot ({} triangles, {} uvs)",
                result.triangle_index,
                snapshot.triangle_count(),
                snapshot.uv_coords.len()
            ))
        })?;

    let (width, height) = output.dimensions();
    let Some((x, y)) = uv_to_pixel(uv, width, height) else {
        return Ok(SampleOutcome::OutOfBounds);
    };

    let color = decal.pixels.get(index).copied().ok_or_else(|| {
        DecalError::Composite(format!("decal has no pixel at index {}", index))
    })?;
    output.store(x, y, premultiply_rgba(color));
    Ok(SampleOutcome::Written)
}

/// 阶段 C：并行合成全部结果
pub fn composite_results(
    results: &[RaycastResult],
    active_indices: &[i32],
    decal: &DecalImage,
    snapshot: &ColliderGeometrySnapshot,
    output: &OutputBuffer,
) -> Result<CompositeStats> {
    if results.len() != active_indices.len() {
        return Err(DecalError::Composite(format!(
            "{} results but {} active indices",
            results.len(),
            active_indices.len()
        )));
    }

    let chunk = chunk_size(results.len(), rayon::current_num_threads());
    results
        .par_chunks(chunk)
        .zip(active_indices.par_chunks(chunk))
        .enumerate()
        .map(|(chunk_index, (result_chunk, active_chunk))| {
            let base = chunk_index * chunk;
            let mut stats = CompositeStats::default();
            let samples = result_chunk.iter().zip(active_chunk.iter());
            for (offset, (result, &active)) in samples.enumerate() {
                let index = base + offset;
                let outcome = composite_sample(index, result, active, decal, snapshot, output)?;
                stats.record(outcome);
            }
            Ok(stats)
        })
        .try_reduce(CompositeStats::default, |a, b| Ok(a.merge(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ColliderId;
    use glam::Vec3;

    /// 每条射线都命中目标，重心坐标指向 UV = 射线下标对应的网格位置
    struct GridRaycaster {
        id: ColliderId,
    }

    impl Raycaster for GridRaycaster {
        fn raycast(&self, query: &RaycastQuery) -> RaycastResult {
            // origin.x 存放下标
            RaycastResult::hit(self.id, query.origin.x as u32, Vec3::new(1.0, 0.0, 0.0), 1.0)
        }
    }

    fn grid_snapshot(id: ColliderId, width: u32, height: u32) -> ColliderGeometrySnapshot {
        // 每个样本一个退化三角形，三个顶点都是同一个 UV
        let mut uv_coords = Vec::new();
        let mut triangle_indices = Vec::new();
        for row in 0..height {
            for col in 0..width {
                let i = uv_coords.len() as u32;
                uv_coords.push(Vec2::new(col as f32 / width as f32, row as f32 / height as f32));
                triangle_indices.extend_from_slice(&[i, i, i]);
            }
        }
        ColliderGeometrySnapshot {
            collider_id: id,
            uv_coords,
            triangle_indices,
        }
    }

    fn indexed_rays(count: usize) -> Vec<Ray> {
        (0..count)
            .map(|i| Ray::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::NEG_Z))
            .collect()
    }

    #[test]
    fn test_premultiply_identity_at_full_alpha() {
        for c in 0..=255u8 {
            assert_eq!(premultiply(c, 255), c);
        }
    }

    #[test]
    fn test_premultiply_monotonic_in_alpha() {
        for c in 1..=255u8 {
            let mut previous = 0;
            for a in 0..=255u8 {
                let value = premultiply(c, a);
                assert!(value >= previous, "c={} a={}", c, a);
                previous = value;
            }
        }
    }

    #[test]
    fn test_premultiply_rounds_to_nearest() {
        for c in 0..=255u32 {
            for a in 0..255u32 {
                let expected = (c as f64 * a as f64 / 255.0).round() as u8;
                assert_eq!(premultiply(c as u8, a as u8), expected);
            }
        }
    }

    #[test]
    fn test_stage_a_skips_transparent_texels() {
        let mut decal = DecalImage::solid(4, 4, [255, 255, 255, 255]);
        for i in (0..16).step_by(3) {
            decal.pixels[i][3] = 0;
        }
        let rays = indexed_rays(16);
        let (queries, active) = build_queries(&rays, &decal, LayerMask::ALL).unwrap();
        assert_eq!(queries.len(), 16);
        for i in 0..16 {
            if decal.pixels[i][3] == 0 {
                assert_eq!(queries[i].max_distance, 0.0);
                assert_eq!(active[i], INACTIVE);
            } else {
                assert_eq!(queries[i].max_distance, f32::INFINITY);
                assert_eq!(active[i], i as i32);
                assert_eq!(queries[i].origin, rays[i].origin);
            }
        }
    }

    #[test]
    fn test_stage_a_rejects_size_mismatch() {
        let decal = DecalImage::solid(2, 2, [0, 0, 0, 255]);
        assert!(build_queries(&indexed_rays(3), &decal, LayerMask::ALL).is_err());
    }

    #[test]
    fn test_stage_b_preserves_index_correspondence() {
        let id = ColliderId(5);
        let decal = DecalImage::solid(16, 16, [1, 2, 3, 255]);
        let rays = indexed_rays(256);
        let (queries, _) = build_queries(&rays, &decal, LayerMask::ALL).unwrap();
        let results = batch_raycast(&queries, &GridRaycaster { id });
        assert_eq!(results.len(), queries.len());
        for (i, result) in results.iter().enumerate() {
            assert!(result.hit);
            assert_eq!(result.triangle_index, i as u32);
        }
    }

    #[test]
    fn test_stage_b_does_not_cast_skipped_queries() {
        let id = ColliderId(5);
        let decal = DecalImage::solid(4, 1, [1, 2, 3, 0]);
        let (queries, _) = build_queries(&indexed_rays(4), &decal, LayerMask::ALL).unwrap();
        let results = batch_raycast(&queries, &GridRaycaster { id });
        assert!(results.iter().all(|r| !r.hit));
    }

    #[test]
    fn test_stage_c_writes_premultiplied_color() {
        let id = ColliderId(8);
        let (w, h) = (8, 8);
        let decal = DecalImage::solid(w, h, [200, 100, 50, 128]);
        let rays = indexed_rays((w * h) as usize);
        let snapshot = grid_snapshot(id, w, h);
        let output = OutputBuffer::new(w, h, [0, 0, 0, 0]);

        let (queries, active) = build_queries(&rays, &decal, LayerMask::ALL).unwrap();
        let results = batch_raycast(&queries, &GridRaycaster { id });
        let stats = composite_results(&results, &active, &decal, &snapshot, &output).unwrap();

        assert_eq!(stats.written, 64);
        let expected = [
            premultiply(200, 128),
            premultiply(100, 128),
            premultiply(50, 128),
            128,
        ];
        for y in 0..h {
            for x in 0..w {
                assert_eq!(output.load(x, y), Some(expected));
            }
        }
    }

    #[test]
    fn test_stage_c_treats_mismatch_as_miss() {
        let (w, h) = (4, 4);
        let decal = DecalImage::solid(w, h, [255, 0, 0, 255]);
        let rays = indexed_rays(16);
        let snapshot = grid_snapshot(ColliderId(1), w, h);
        let output = OutputBuffer::new(w, h, [0, 0, 0, 0]);

        let (queries, active) = build_queries(&rays, &decal, LayerMask::ALL).unwrap();
        let results = batch_raycast(&queries, &GridRaycaster { id: ColliderId(2) });
        let stats = composite_results(&results, &active, &decal, &snapshot, &output).unwrap();

        assert_eq!(stats.mismatched, 16);
        assert_eq!(stats.written, 0);
        assert!(output.to_rgba8().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_stage_c_bad_triangle_aborts() {
        let id = ColliderId(3);
        let decal = DecalImage::solid(2, 1, [255, 0, 0, 255]);
        let snapshot = ColliderGeometrySnapshot {
            collider_id: id,
            uv_coords: vec![Vec2::ZERO],
            triangle_indices: vec![0, 0, 0],
        };
        let results = vec![
            RaycastResult::hit(id, 0, Vec3::X, 1.0),
            RaycastResult::hit(id, 7, Vec3::X, 1.0),
        ];
        let output = OutputBuffer::new(2, 2, [0, 0, 0, 0]);
        let result = composite_results(&results, &[0, 1], &decal, &snapshot, &output);
        assert!(matches!(result, Err(DecalError::Composite(_))));
    }

    #[test]
    fn test_colliding_writes_keep_a_single_texel() {
        let id = ColliderId(4);
        // 两个不同颜色的纹素落在同一个输出像素
        let decal = DecalImage::from_rgba8(2, 1, &[255, 0, 0, 200, 0, 255, 0, 100]).unwrap();
        let snapshot = ColliderGeometrySnapshot {
            collider_id: id,
            uv_coords: vec![Vec2::new(0.5, 0.5)],
            triangle_indices: vec![0, 0, 0],
        };
        let results = vec![
            RaycastResult::hit(id, 0, Vec3::X, 1.0),
            RaycastResult::hit(id, 0, Vec3::X, 1.0),
        ];
        let output = OutputBuffer::new(4, 4, [0, 0, 0, 0]);
        let stats = composite_results(&results, &[0, 1], &decal, &snapshot, &output).unwrap();
        assert_eq!(stats.written, 2);

        let pixel = output.load(2, 2).unwrap();
        let first = premultiply_rgba([255, 0, 0, 200]);
        let second = premultiply_rgba([0, 255, 0, 100]);
        assert!(pixel == first || pixel == second, "blended pixel {:?}", pixel);
    }

    #[test]
    fn test_uv_to_pixel_rounding() {
        assert_eq!(uv_to_pixel(Vec2::new(0.0, 0.0), 10, 10), Some((0, 0)));
        assert_eq!(uv_to_pixel(Vec2::new(0.26, 0.24), 10, 10), Some((3, 2)));
        assert_eq!(uv_to_pixel(Vec2::new(1.0, 1.0), 10, 10), Some((9, 9)));
        assert_eq!(uv_to_pixel(Vec2::new(1.1, 0.5), 10, 10), None);
        assert_eq!(uv_to_pixel(Vec2::new(-0.1, 0.5), 10, 10), None);
    }
}
