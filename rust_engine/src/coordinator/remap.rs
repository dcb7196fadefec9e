//! 同步重映射策略
//!
//! 不经过任务链，在调用线程上直接完成：
//! - 两角 UV 重映射：只检测左下、右上两条射线，贴花线性铺满两个命中 UV 之间的矩形
//! - 纹理直接重映射：贴花铺满已知的 UV 矩形，不做射线检测

use glam::Vec2;

use crate::body::{ColliderGeometrySnapshot, LayerMask, Raycaster};
use crate::config::UvRect;
use crate::geometry::Ray;
use crate::projection::{premultiply_rgba, CompositeStats, RaycastQuery, SampleOutcome};
use crate::texture::{DecalImage, OutputBuffer};
use crate::{DecalError, Result};

/// 两角 UV 重映射
///
/// 任一角射线未命中目标时返回 `GeometryUnavailable`，本次投影跳过。
pub fn two_corner_uv_remap(
    decal: &DecalImage,
    corners: [Ray; 2],
    raycaster: &dyn Raycaster,
    snapshot: &ColliderGeometrySnapshot,
    collider_filter: LayerMask,
    output: &OutputBuffer,
) -> Result<CompositeStats> {
    let mut uvs = [Vec2::ZERO; 2];
    for (slot, ray) in uvs.iter_mut().zip(corners.iter()) {
        let result = raycaster.raycast(&RaycastQuery::active(ray, collider_filter));
        if !result.hit || result.collider_id != snapshot.collider_id {
            return Err(DecalError::GeometryUnavailable(
                "corner ray did not hit the target collider".to_string(),
            ));
        }
        *slot = snapshot
            .interpolate_uv(result.triangle_index, result.barycentric)
            .ok_or_else(|| {
                DecalError::Composite(format!(
                    "triangle {} is outside the collider snapshot",
                    result.triangle_index
                ))
            })?;
    }
    Ok(remap_region(decal, uvs[0], uvs[1], output))
}

/// 纹理直接重映射
pub fn direct_texture_remap(
    decal: &DecalImage,
    bounds: UvRect,
    output: &OutputBuffer,
) -> CompositeStats {
    remap_region(decal, bounds.min, bounds.max, output)
}

/// 将贴花最近邻采样到 `from`（贴花左下角）与 `to`（贴花右上角）之间的输出区域
///
/// `to` 小于 `from` 的轴按镜像采样。区域超出 [0, 1] 的部分被裁掉。
fn remap_region(decal: &DecalImage, from: Vec2, to: Vec2, output: &OutputBuffer) -> CompositeStats {
    let mut stats = CompositeStats::default();
    let (width, height) = output.dimensions();
    if decal.is_empty() || width == 0 || height == 0 {
        return stats;
    }

    let Some((x0, x1)) = pixel_span(from.x, to.x, width) else {
        return stats;
    };
    let Some((y0, y1)) = pixel_span(from.y, to.y, height) else {
        return stats;
    };
    let span_x = pixel_extent(from.x, to.x, width);
    let span_y = pixel_extent(from.y, to.y, height);
    let start_x = pixel_origin(from.x, to.x, width);
    let start_y = pixel_origin(from.y, to.y, height);

    for y in y0..y1 {
        let row = sample_index(y, start_y, span_y, from.y > to.y, decal.height);
        for x in x0..x1 {
            let col = sample_index(x, start_x, span_x, from.x > to.x, decal.width);
            let outcome = match decal.pixel(col, row) {
                Some(color) if color[3] > 0 => {
                    output.store(x, y, premultiply_rgba(color));
                    SampleOutcome::Written
                }
                _ => SampleOutcome::Skipped,
            };
            stats.record(outcome);
        }
    }
    stats
}

/// 未裁剪区域的起点像素
///
/// 以 f64 计算，超大 UV 不会溢出整数。
fn pixel_origin(a: f32, b: f32, size: u32) -> f64 {
    (f64::from(a.min(b)) * f64::from(size)).round()
}

/// 未裁剪区域的像素宽度（至少 1）
fn pixel_extent(a: f32, b: f32, size: u32) -> f64 {
    let start = pixel_origin(a, b, size);
    let end = (f64::from(a.max(b)) * f64::from(size)).round();
    (end - start).max(1.0)
}

/// 裁剪到输出范围后的像素区间 [start, end)
fn pixel_span(a: f32, b: f32, size: u32) -> Option<(u32, u32)> {
    let start = pixel_origin(a, b, size);
    let end = start + pixel_extent(a, b, size);
    let limit = f64::from(size);
    let start = start.clamp(0.0, limit);
    let end = end.clamp(0.0, limit);
    (start < end).then_some((start as u32, end as u32))
}

/// 输出像素对应的贴花纹素（取像素中心）
fn sample_index(pixel: u32, origin: f64, extent: f64, mirrored: bool, decal_size: u32) -> u32 {
    let t = (f64::from(pixel) - origin + 0.5) / extent;
    let t = if mirrored { 1.0 - t } else { t };
    ((t * f64::from(decal_size)) as u32).min(decal_size.saturating_sub(1))
}
