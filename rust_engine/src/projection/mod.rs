//! 投影任务链
//!
//! 三个阶段共享定长、同下标的缓冲区：射线 → 查询 → 结果 → 输出像素。

mod compositor;
mod job;
mod pass;
mod query;
mod stages;

pub use compositor::{
    BudgetedCompositor, CompositeInput, CompositeProgress, ParallelCompositor, ResultCompositor,
};
pub use job::{CancelToken, JobHandle};
pub use pass::{PassInput, PassOutput, ProjectionJob};
pub use query::{RaycastQuery, RaycastResult};
pub use stages::{
    batch_raycast, build_queries, composite_results, composite_sample, premultiply,
    premultiply_rgba, uv_to_pixel, CompositeStats, SampleOutcome, INACTIVE,
};
