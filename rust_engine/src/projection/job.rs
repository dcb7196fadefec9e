//! 后台任务句柄
//!
//! 任务在私有 rayon 线程池中运行，结果通过容量为 1 的通道送回。
//! 主线程每帧调用 `is_completed` 轮询，不阻塞。
//! 丢弃句柄会设置取消标记，尚未开始或位于阶段边界的任务随之退出。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

use rayon::ThreadPool;

use crate::{DecalError, Result};

/// 协作式取消标记
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// 已取消时返回 `Err(Cancelled)`，用于阶段边界
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DecalError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 后台任务句柄
pub struct JobHandle<T> {
    rx: Receiver<Result<T>>,
    token: CancelToken,
    result: Option<Result<T>>,
    /// 结果已被取走
    finished: bool,
}

impl<T: Send + 'static> JobHandle<T> {
    /// 在线程池中启动任务
    ///
    /// 任务内的 panic 被捕获并转换为 `WorkerPanicked`。
    pub fn spawn<F>(pool: &ThreadPool, f: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let token = CancelToken::new();
        let worker_token = token.clone();
        let (tx, rx) = mpsc::sync_channel(1);
        pool.spawn(move || {
            if worker_token.is_cancelled() {
                let _ = tx.send(Err(DecalError::Cancelled));
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&worker_token)))
                .unwrap_or_else(|payload| Err(DecalError::WorkerPanicked(panic_message(payload))));
            // 接收端已丢弃时结果直接丢弃
            let _ = tx.send(outcome);
        });
        Self {
            rx,
            token,
            result: None,
            finished: false,
        }
    }
}

impl<T> JobHandle<T> {
    /// 非阻塞检查任务是否结束（成功、失败或取消）
    pub fn is_completed(&mut self) -> bool {
        if self.finished || self.result.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.result = Some(Err(self.disconnected_error()));
                true
            }
        }
    }

    /// 取出已完成的结果，未完成或已取走时返回 `None`
    pub fn take(&mut self) -> Option<Result<T>> {
        if self.finished || !self.is_completed() {
            return None;
        }
        let result = self.result.take();
        self.finished = result.is_some();
        result
    }

    /// 结果是否已被取走
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 阻塞等待结果
    pub fn wait(mut self) -> Result<T> {
        if let Some(result) = self.result.take() {
            return result;
        }
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(self.disconnected_error()),
        }
    }

    /// 请求取消
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn disconnected_error(&self) -> DecalError {
        if self.token.is_cancelled() {
            DecalError::Cancelled
        } else {
            DecalError::WorkerPanicked("worker exited without sending a result".to_string())
        }
    }
}

impl<T> Drop for JobHandle<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
