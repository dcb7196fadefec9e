//! 显式部分圆柱网格
//!
//! 每个径向细分是一个独立的四边形（4 个顶点、2 个三角形），
//! 三角形绕序使计算得到的法线朝向圆柱轴。

use glam::{Mat4, Vec2, Vec3};

use super::Ray;
use crate::{DecalError, Result};

/// 圆柱近似网格
#[derive(Clone, Debug, Default)]
pub struct CylinderMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
    radial_subdivisions: u32,
}

impl CylinderMesh {
    /// 获取顶点数量
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// 获取三角形数量
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// 径向细分数（射线提取的基准细分数）
    pub fn radial_subdivisions(&self) -> u32 {
        self.radial_subdivisions
    }

    /// 第 `quad` 个四边形的面法线
    fn face_normal(&self, quad: usize) -> Vec3 {
        let base = quad * 4;
        let v0 = self.positions[base];
        let v1 = self.positions[base + 1];
        let v2 = self.positions[base + 2];
        (v2 - v0).cross(v1 - v0).normalize_or_zero()
    }
}

/// 构建部分圆柱四边形带
///
/// 轴为局部 Y 轴，径向细分以 0 角（局部 +Z）为中心。
/// UV 沿环绕方向和轴向都在 `[0, 1]` 范围内。
pub fn build_explicit_mesh(
    radius: f32,
    length: f32,
    wrap_angle_degrees: f32,
    radial_subdivisions: u32,
) -> CylinderMesh {
    let quads = radial_subdivisions as usize;
    let mut mesh = CylinderMesh {
        positions: Vec::with_capacity(quads * 4),
        normals: Vec::with_capacity(quads * 4),
        uvs: Vec::with_capacity(quads * 4),
        indices: Vec::with_capacity(quads * 6),
        radial_subdivisions,
    };
    if quads == 0 {
        return mesh;
    }

    let wrap = wrap_angle_degrees.to_radians();
    let step = wrap / quads as f32;
    let start = -wrap * 0.5;
    let y0 = -length * 0.5;
    let y1 = length * 0.5;
    let point = |angle: f32, y: f32| {
        let (sin, cos) = angle.sin_cos();
        Vec3::new(radius * sin, y, radius * cos)
    };

    for i in 0..quads {
        let a0 = start + i as f32 * step;
        let a1 = a0 + step;
        let u0 = i as f32 / quads as f32;
        let u1 = (i + 1) as f32 / quads as f32;

        // 0: 左下, 1: 右下, 2: 左上, 3: 右上
        mesh.positions.extend_from_slice(&[
            point(a0, y0),
            point(a1, y0),
            point(a0, y1),
            point(a1, y1),
        ]);
        mesh.uvs.extend_from_slice(&[
            Vec2::new(u0, 0.0),
            Vec2::new(u1, 0.0),
            Vec2::new(u0, 1.0),
            Vec2::new(u1, 1.0),
        ]);

        let base = (i * 4) as u32;
        mesh.indices.extend_from_slice(&[
            base,
            base + 2,
            base + 1,
            base + 1,
            base + 2,
            base + 3,
        ]);
    }

    // 顶点法线：最左、最右两条边没有相邻四边形，直接使用面法线；
    // 内部边取相邻两个四边形面法线的等权平均
    let face_normals: Vec<Vec3> = (0..quads).map(|q| mesh.face_normal(q)).collect();
    for (i, face) in face_normals.iter().enumerate() {
        let left = if i > 0 {
            (face_normals[i - 1] + *face).normalize_or_zero()
        } else {
            *face
        };
        let right = if i + 1 < quads {
            (*face + face_normals[i + 1]).normalize_or_zero()
        } else {
            *face
        };
        mesh.normals.extend_from_slice(&[left, right, left, right]);
    }

    mesh
}

/// 从网格顶点采样射线场
///
/// `width` 必须是网格径向细分数的整数倍：每个四边形被均分为 `width / base` 列，
/// 列内位置和法线由四边形左右边线性插值，行沿轴向取纹素中心。
pub fn extract_mesh_rays(
    mesh: Option<&CylinderMesh>,
    width: u32,
    height: u32,
    surface_to_world: Mat4,
) -> Result<Vec<Ray>> {
    let Some(mesh) = mesh else {
        log::warn!("采样网格尚未构建，跳过射线提取");
        return Err(DecalError::GeometryUnavailable(
            "sampling mesh is not built".to_string(),
        ));
    };

    let base = mesh.radial_subdivisions();
    if base == 0 || width == 0 || width % base != 0 {
        log::warn!(
            "射线数量 {} 不是基准细分数 {} 的整数倍，跳过射线提取",
            width,
            base
        );
        return Err(DecalError::InvalidSubdivisionRequest {
            requested: width,
            base,
        });
    }

    let per_quad = width / base;
    let mut rays = vec![Ray::default(); width as usize * height as usize];

    for quad in 0..base as usize {
        let corners = quad * 4..quad * 4 + 4;
        let (Some(v), Some(n)) = (
            mesh.positions.get(corners.clone()),
            mesh.normals.get(corners),
        ) else {
            log::warn!(
                "采样网格顶点不足: {} 个顶点, {} 个法线, 需要 {} 个四边形",
                mesh.positions.len(),
                mesh.normals.len(),
                base
            );
            return Err(DecalError::GeometryUnavailable(format!(
                "sampling mesh has no vertices for quad {}",
                quad
            )));
        };

        for sub in 0..per_quad {
            let t = sub as f32 / per_quad as f32;
            let bottom = v[0].lerp(v[1], t);
            let top = v[2].lerp(v[3], t);
            let normal = n[0].lerp(n[1], t).normalize_or_zero();
            let direction = surface_to_world
                .transform_vector3(normal)
                .normalize_or_zero();
            let col = quad * per_quad as usize + sub as usize;

            for row in 0..height as usize {
                let f = (row as f32 + 0.5) / height as f32;
                let origin = surface_to_world.transform_point3(bottom.lerp(top, f));
                rays[row * width as usize + col] = Ray { origin, direction };
            }
        }
    }

    Ok(rays)
}
