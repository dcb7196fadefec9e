//! 线性混合蒙皮 - 使用 rayon 并行加速

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use super::{BodyVertex, BoneWeights};

/// 蒙皮后的顶点数据
#[derive(Clone, Debug, Default)]
pub struct SkinnedPose {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

/// 计算所有顶点的蒙皮结果
///
/// 缺少权重的顶点保持静止姿态。
pub fn skin_vertices(
    vertices: &[BodyVertex],
    weights: &[BoneWeights],
    bone_matrices: &[Mat4],
) -> SkinnedPose {
    let (positions, normals) = vertices
        .par_iter()
        .enumerate()
        .map(|(i, vertex)| match weights.get(i) {
            Some(weight) => {
                skin_single_vertex(vertex.position, vertex.normal, weight, bone_matrices)
            }
            None => (vertex.position, vertex.normal),
        })
        .unzip();

    SkinnedPose { positions, normals }
}

/// 计算单个顶点的蒙皮
fn skin_single_vertex(
    position: Vec3,
    normal: Vec3,
    weight: &BoneWeights,
    matrices: &[Mat4],
) -> (Vec3, Vec3) {
    match weight {
        BoneWeights::One { bone } => {
            let m = get_matrix(matrices, *bone);
            (
                m.transform_point3(position),
                m.transform_vector3(normal).normalize_or_zero(),
            )
        }
        BoneWeights::Two { bones, weight } => {
            let m0 = get_matrix(matrices, bones[0]);
            let m1 = get_matrix(matrices, bones[1]);
            let w0 = *weight;
            let w1 = 1.0 - w0;

            let pos = m0.transform_point3(position) * w0 + m1.transform_point3(position) * w1;
            let norm = (m0.transform_vector3(normal) * w0 + m1.transform_vector3(normal) * w1)
                .normalize_or_zero();
            (pos, norm)
        }
        BoneWeights::Four { bones, weights } => {
            let mut pos = Vec3::ZERO;
            let mut norm = Vec3::ZERO;
            for (bone, w) in bones.iter().zip(weights.iter()) {
                let m = get_matrix(matrices, *bone);
                pos += m.transform_point3(position) * *w;
                norm += m.transform_vector3(normal) * *w;
            }
            (pos, norm.normalize_or_zero())
        }
    }
}

fn get_matrix(matrices: &[Mat4], index: i32) -> Mat4 {
    if index < 0 {
        return Mat4::IDENTITY;
    }
    matrices.get(index as usize).copied().unwrap_or(Mat4::IDENTITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn vertex(position: Vec3) -> BodyVertex {
        BodyVertex {
            position,
            normal: Vec3::Y,
            uv: Vec2::ZERO,
        }
    }

    #[test]
    fn test_two_bone_blend() {
        let vertices = [vertex(Vec3::ZERO)];
        let weights = [BoneWeights::Two { bones: [0, 1], weight: 0.25 }];
        let bones = [
            Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0)),
            Mat4::from_translation(Vec3::new(0.0, 4.0, 0.0)),
        ];
        let pose = skin_vertices(&vertices, &weights, &bones);
        assert!(pose.positions[0].distance(Vec3::new(1.0, 3.0, 0.0)) < 1e-6);
        assert!((pose.normals[0].length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_bone_uses_identity() {
        let vertices = [vertex(Vec3::new(1.0, 2.0, 3.0))];
        let weights = [BoneWeights::One { bone: 7 }];
        let pose = skin_vertices(&vertices, &weights, &[]);
        assert_eq!(pose.positions[0], Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_missing_weights_keep_rest_pose() {
        let vertices = [vertex(Vec3::X), vertex(Vec3::Z)];
        let weights = [BoneWeights::One { bone: 0 }];
        let bones = [Mat4::from_translation(Vec3::Y)];
        let pose = skin_vertices(&vertices, &weights, &bones);
        assert_eq!(pose.positions[0], Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(pose.positions[1], Vec3::Z);
    }
}
