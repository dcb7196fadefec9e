//! 一次投影的任务链
//!
//! 构建查询 → 批量射线检测 → 结果合成，三个阶段顺序依赖，
//! 在同一个后台任务中依次执行，阶段之间检查取消标记。

use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;

use super::compositor::{CompositeInput, CompositeProgress, ParallelCompositor, ResultCompositor};
use super::job::JobHandle;
use super::stages::{batch_raycast, build_queries, CompositeStats};
use crate::body::{ColliderGeometrySnapshot, LayerMask, Raycaster};
use crate::config::CompositeMode;
use crate::geometry::Ray;
use crate::texture::{DecalImage, OutputBuffer};
use crate::{DecalError, Result};

/// 任务链输入
pub struct PassInput {
    pub rays: Arc<Vec<Ray>>,
    pub decal: Arc<DecalImage>,
    pub snapshot: Arc<ColliderGeometrySnapshot>,
    pub raycaster: Arc<dyn Raycaster>,
    pub collider_filter: LayerMask,
    /// 已清除的输出缓冲，任务结束后随结果返回
    pub output: OutputBuffer,
    pub composite_mode: CompositeMode,
    pub debug_log: bool,
}

/// 任务链输出
#[derive(Debug)]
pub struct PassOutput {
    pub output: OutputBuffer,
    /// 已完成合成时的统计
    pub stats: Option<CompositeStats>,
    /// 帧预算模式下留给主线程合成的数据
    pub deferred: Option<CompositeInput>,
}

/// 投影任务链
pub struct ProjectionJob;

impl ProjectionJob {
    /// 在线程池中启动任务链
    pub fn spawn(pool: &ThreadPool, input: PassInput) -> JobHandle<PassOutput> {
        JobHandle::spawn(pool, move |token| {
            let PassInput {
                rays,
                decal,
                snapshot,
                raycaster,
                collider_filter,
                output,
                composite_mode,
                debug_log,
            } = input;

            token.check()?;
            let started = Instant::now();
            let (queries, active_indices) = build_queries(&rays, &decal, collider_filter)?;
            let active = active_indices.iter().filter(|&&i| i >= 0).count();
            if debug_log {
                log::debug!(
                    "[任务链] 构建查询: {} 条射线, {} 条有效, {:?}",
                    queries.len(),
                    active,
                    started.elapsed()
                );
            }

            token.check()?;
            let started = Instant::now();
            let results = batch_raycast(&queries, raycaster.as_ref());
            drop(queries);
            if debug_log {
                let hits = results.iter().filter(|r| r.hit).count();
                log::debug!("[任务链] 射线检测: {} 次命中, {:?}", hits, started.elapsed());
            }

            token.check()?;
            let composite = CompositeInput {
                results,
                active_indices,
                decal,
                snapshot,
            };

            match composite_mode {
                CompositeMode::Parallel => {
                    let started = Instant::now();
                    let progress = ParallelCompositor.step(&composite, &output, None)?;
                    let stats = match progress {
                        CompositeProgress::Done(stats) => stats,
                        CompositeProgress::Pending { processed, total } => {
                            return Err(DecalError::Composite(format!(
                                "parallel composite stopped at {}/{}",
                                processed, total
                            )));
                        }
                    };
                    if debug_log {
                        log::debug!("[任务链] 合成: {:?}, {:?}", stats, started.elapsed());
                    }
                    Ok(PassOutput {
                        output,
                        stats: Some(stats),
                        deferred: None,
                    })
                }
                CompositeMode::FrameBudgeted => Ok(PassOutput {
                    output,
                    stats: None,
                    deferred: Some(composite),
                }),
            }
        })
    }
}
