//! 结果合成策略
//!
//! - `ParallelCompositor`：在工作线程上一次性并行完成阶段 C
//! - `BudgetedCompositor`：在主线程上按帧时间预算分批处理，跨帧推进

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::stages::{composite_results, composite_sample, CompositeStats};
use super::RaycastResult;
use crate::body::ColliderGeometrySnapshot;
use crate::texture::{DecalImage, OutputBuffer};
use crate::{DecalError, Result};

/// 每处理这么多个样本检查一次计时
const BUDGET_CHECK_INTERVAL: usize = 256;

/// 阶段 C 的输入（阶段 B 完成后的全部数据）
#[derive(Clone, Debug)]
pub struct CompositeInput {
    pub results: Vec<RaycastResult>,
    pub active_indices: Vec<i32>,
    pub decal: Arc<DecalImage>,
    pub snapshot: Arc<ColliderGeometrySnapshot>,
}

impl CompositeInput {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// 合成进度
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeProgress {
    /// 还有未处理的结果
    Pending { processed: usize, total: usize },
    Done(CompositeStats),
}

/// 合成策略接口
pub trait ResultCompositor: Send {
    /// 推进合成；`budget` 为 `None` 时处理到结束
    fn step(
        &mut self,
        input: &CompositeInput,
        output: &OutputBuffer,
        budget: Option<Duration>,
    ) -> Result<CompositeProgress>;
}

/// 并行合成（忽略预算）
#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelCompositor;

impl ResultCompositor for ParallelCompositor {
    fn step(
        &mut self,
        input: &CompositeInput,
        output: &OutputBuffer,
        _budget: Option<Duration>,
    ) -> Result<CompositeProgress> {
        let stats = composite_results(
            &input.results,
            &input.active_indices,
            &input.decal,
            &input.snapshot,
            output,
        )?;
        Ok(CompositeProgress::Done(stats))
    }
}

/// 按帧预算分批的顺序合成
#[derive(Clone, Debug, Default)]
pub struct BudgetedCompositor {
    cursor: usize,
    stats: CompositeStats,
}

impl BudgetedCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已处理的样本数
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl ResultCompositor for BudgetedCompositor {
    fn step(
        &mut self,
        input: &CompositeInput,
        output: &OutputBuffer,
        budget: Option<Duration>,
    ) -> Result<CompositeProgress> {
        let total = input.len();
        if input.active_indices.len() != total {
            return Err(DecalError::Composite(format!(
                "{} results but {} active indices",
                total,
                input.active_indices.len()
            )));
        }

        let start = Instant::now();
        while self.cursor < total {
            // 每次至少处理一批，保证前进
            let end = (self.cursor + BUDGET_CHECK_INTERVAL).min(total);
            for i in self.cursor..end {
                let outcome = composite_sample(
                    i,
                    &input.results[i],
                    input.active_indices[i],
                    &input.decal,
                    &input.snapshot,
                    output,
                )?;
                self.stats.record(outcome);
            }
            self.cursor = end;

            if let Some(budget) = budget {
                if self.cursor < total && start.elapsed() >= budget {
                    return Ok(CompositeProgress::Pending {
                        processed: self.cursor,
                        total,
                    });
                }
            }
        }

        Ok(CompositeProgress::Done(self.stats))
    }
}
