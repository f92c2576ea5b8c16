//! 会话监管：生命周期、中断管理
//!
//! 每个 thread 一个 SessionSupervisor：持有运行锁（同一 thread 的回合严格串行）与当前运行的 CancellationToken。
//! 每次新消息或暂停都推进代数（generation）并取消当前令牌；排队中的运行拿到锁时若代数已变，
//! 得到的令牌一开始就是已取消的，因此只会提交自己的用户消息，随即暂停。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

/// 单个 thread 的生命周期管理：运行锁、取消令牌与代数
#[derive(Debug)]
pub struct SessionSupervisor {
    run_lock: Arc<Mutex<()>>,
    /// 当前运行的取消令牌；每次开始运行时替换
    cancel_token: RwLock<CancellationToken>,
    /// 每次抢占（新消息 / 暂停）加一
    generation: AtomicU64,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            run_lock: Arc::new(Mutex::new(())),
            cancel_token: RwLock::new(CancellationToken::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// 抢占：推进代数并取消当前运行；返回本次请求持有的代数
    pub async fn preempt(&self) -> u64 {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_token.read().await.cancel();
        ticket
    }

    /// 当前代数（恢复运行不抢占，只认领当前代数）
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 取运行锁并换上新的取消令牌；若排队期间代数已推进，令牌直接处于取消状态
    pub async fn begin_run(&self, ticket: u64) -> (OwnedMutexGuard<()>, CancellationToken) {
        let guard = self.run_lock.clone().lock_owned().await;
        let token = CancellationToken::new();
        *self.cancel_token.write().await = token.clone();
        // 先换令牌再读代数：与 preempt 的"先加代数再取消"配对，两者至少一方能看到对方
        if self.generation() != ticket {
            token.cancel();
        }
        (guard, token)
    }

    /// 是否有运行正在进行
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// thread_id → SessionSupervisor
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionSupervisor>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, thread_id: &str) -> Arc<SessionSupervisor> {
        if let Some(s) = self.sessions.read().await.get(thread_id) {
            return s.clone();
        }
        self.sessions
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn get(&self, thread_id: &str) -> Option<Arc<SessionSupervisor>> {
        self.sessions.read().await.get(thread_id).cloned()
    }

    /// 暂停该 thread：当前运行与所有排队中的运行都会停下；返回是否存在会话
    pub async fn cancel(&self, thread_id: &str) -> bool {
        match self.get(thread_id).await {
            Some(s) => {
                s.preempt().await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_run_replaces_token() {
        let session = SessionSupervisor::new();
        let ticket = session.preempt().await;
        let (guard, first) = session.begin_run(ticket).await;
        assert!(session.is_running());
        assert!(!first.is_cancelled());
        session.preempt().await;
        assert!(first.is_cancelled());
        drop(guard);
        assert!(!session.is_running());

        let ticket = session.preempt().await;
        let (_guard, second) = session.begin_run(ticket).await;
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn test_queued_run_is_superseded_by_later_preempt() {
        let session = Arc::new(SessionSupervisor::new());
        let running = session.preempt().await;
        let (guard, current) = session.begin_run(running).await;

        // 两个请求在锁后排队，后到者推进代数
        let queued = session.preempt().await;
        let newest = session.preempt().await;
        assert!(current.is_cancelled());
        drop(guard);

        let (guard, stale) = session.begin_run(queued).await;
        assert!(stale.is_cancelled());
        drop(guard);
        let (_guard, fresh) = session.begin_run(newest).await;
        assert!(!fresh.is_cancelled());
    }

    #[tokio::test]
    async fn test_resume_claims_current_generation() {
        let session = SessionSupervisor::new();
        session.preempt().await;
        let (guard, token) = session.begin_run(session.generation()).await;
        assert!(!token.is_cancelled());
        drop(guard);

        // 排队中的恢复被随后的暂停取消
        let ticket = session.generation();
        session.preempt().await;
        let (_guard, token) = session.begin_run(ticket).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_registry_shares_session_per_thread() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("t1").await;
        let b = registry.get_or_create("t1").await;
        assert!(Arc::ptr_eq(&a, &b));
        let before = a.generation();
        assert!(registry.cancel("t1").await);
        assert_eq!(a.generation(), before + 1);
        assert!(!registry.cancel("missing").await);
    }
}
