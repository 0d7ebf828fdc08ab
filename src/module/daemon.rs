//! 特权执行器
//!
//! 平台部分操作（模块生命周期钩子、定时任务）需要在提升信任
//! 级别的上下文中执行。本模块提供基于独立工作线程的特权执行
//! 器：每个特权工作单元在守护线程中运行，线程内携带线程局部
//! 的特权标记，工作前后打开和关闭一次数据会话，会话关闭由守
//! 卫保证在成功、失败和 panic 路径上都恰好执行一次。
//!
//! 调用方通过 [`Daemon::run_privileged`] 同步等待工作完成，
//! 错误在调用方原样重现。只有已在特权线程内的代码才能通过
//! [`Daemon::spawn_privileged`] 派生不被等待的特权工作。

use crate::utils::{CoreError, Result};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

thread_local! {
    /// 当前线程是否为特权线程，仅由执行器在自己派生的线程内设置
    static IS_DAEMON_THREAD: Cell<bool> = Cell::new(false);
}

/// 执行器实例序号，用于令牌归属校验
static DAEMON_SEQ: AtomicU64 = AtomicU64::new(1);

/// 当前线程是否运行在特权上下文中
pub fn is_daemon_thread() -> bool {
    IS_DAEMON_THREAD.with(|flag| flag.get())
}

// ============================================================================
// 会话接口
// ============================================================================

/// 特权工作期间持有的数据会话
pub trait Session: Send {
    /// 关闭会话
    fn close(&mut self);
}

/// 会话工厂
///
/// 由嵌入方提供，执行器在每个特权工作单元开始前打开会话。
pub trait SessionFactory: Send + Sync {
    /// 打开新会话
    fn open_session(&self) -> Box<dyn Session>;
}

/// 无操作会话工厂（默认）
#[derive(Debug, Default)]
pub struct NoopSessionFactory;

struct NoopSession;

impl Session for NoopSession {
    fn close(&mut self) {}
}

impl SessionFactory for NoopSessionFactory {
    fn open_session(&self) -> Box<dyn Session> {
        Box::new(NoopSession)
    }
}

/// 会话守卫，丢弃时关闭会话，保证任何退出路径都恰好关闭一次
struct SessionGuard {
    session: Option<Box<dyn Session>>,
}

impl SessionGuard {
    fn open(factory: &dyn SessionFactory) -> Self {
        Self {
            session: Some(factory.open_session()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

// ============================================================================
// 派发令牌
// ============================================================================

/// 定时任务派发令牌
///
/// 每个执行器只签发一次，由平台任务派发器在装配期领取。
/// 令牌不可克隆，持有令牌即代表具备派发定时任务的资格。
#[derive(Debug)]
pub struct DispatchToken {
    daemon_id: u64,
}

// ============================================================================
// 特权执行器
// ============================================================================

/// 未被等待的特权工作句柄
pub struct DaemonHandle<T> {
    handle: thread::JoinHandle<Result<T>>,
}

impl<T> DaemonHandle<T> {
    /// 阻塞等待工作完成并取回结果
    ///
    /// 等待不可被打断。工作中的 panic 以
    /// [`CoreError::PrivilegedWorkPanicked`] 形式返回。
    pub fn join(self) -> Result<T> {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => Err(CoreError::PrivilegedWorkPanicked(panic_message(
                payload.as_ref(),
            ))),
        }
    }
}

/// 特权执行器
pub struct Daemon {
    id: u64,
    session_factory: Arc<dyn SessionFactory>,
    dispatch_token_issued: AtomicBool,
    thread_seq: AtomicU64,
}

impl Daemon {
    /// 使用无操作会话工厂创建执行器
    pub fn new() -> Self {
        Self::with_session_factory(Arc::new(NoopSessionFactory))
    }

    /// 使用指定会话工厂创建执行器
    pub fn with_session_factory(session_factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            id: DAEMON_SEQ.fetch_add(1, Ordering::Relaxed),
            session_factory,
            dispatch_token_issued: AtomicBool::new(false),
            thread_seq: AtomicU64::new(1),
        }
    }

    /// 在特权线程中执行工作并阻塞等待完成
    ///
    /// 工作在新线程中执行：设置特权标记，打开会话，运行工作，
    /// 关闭会话。调用方阻塞到线程结束，工作的错误在调用方原样
    /// 重现，panic 转换为 [`CoreError::PrivilegedWorkPanicked`]。
    /// 等待不可被打断。
    pub fn run_privileged<T, F>(&self, task_name: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        debug!(task_name, "开始特权工作");
        let handle = self.spawn_daemon_thread(work)?;
        match handle.handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(task_name, error_msg = %message, "特权工作 panic");
                Err(CoreError::PrivilegedWorkPanicked(message))
            }
        }
    }

    /// 从特权上下文派生一个不被等待的特权工作
    ///
    /// 仅允许已在特权线程内的调用方使用。非特权调用直接返回
    /// [`CoreError::PrivilegeViolation`]，不创建任何线程。
    pub fn spawn_privileged<T, F>(&self, work: F) -> Result<DaemonHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if !is_daemon_thread() {
            return Err(CoreError::PrivilegeViolation(
                "只有特权线程才能派生新的特权工作".to_string(),
            ));
        }
        self.spawn_daemon_thread(work)
    }

    /// 签发定时任务派发令牌
    ///
    /// 每个执行器只成功一次，重复签发返回
    /// [`CoreError::AuthorizationFailure`]。
    pub fn issue_dispatch_token(&self) -> Result<DispatchToken> {
        if self.dispatch_token_issued.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AuthorizationFailure(
                "派发令牌已被领取".to_string(),
            ));
        }
        Ok(DispatchToken { daemon_id: self.id })
    }

    /// 以提升信任级别执行定时任务
    ///
    /// 在创建任何线程之前校验令牌归属，非本执行器签发的令牌
    /// 被拒绝。校验通过后任务按特权工作执行并阻塞等待。
    pub fn execute_scheduled_task<T, F>(&self, token: &DispatchToken, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if token.daemon_id != self.id {
            return Err(CoreError::AuthorizationFailure(
                "令牌并非本执行器签发".to_string(),
            ));
        }
        self.run_privileged("scheduled-task", task)
    }

    /// 派生特权线程，线程内设置标记、包裹会话并捕获 panic
    fn spawn_daemon_thread<T, F>(&self, work: F) -> Result<DaemonHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let factory = Arc::clone(&self.session_factory);
        let seq = self.thread_seq.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("xinglin-daemon-{}", seq))
            .spawn(move || {
                IS_DAEMON_THREAD.with(|flag| flag.set(true));
                let _session = SessionGuard::open(factory.as_ref());
                match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        // 会话守卫已在栈展开中关闭会话
                        Err(CoreError::PrivilegedWorkPanicked(panic_message(
                            payload.as_ref(),
                        )))
                    }
                }
            })?;
        Ok(DaemonHandle { handle })
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

/// 提取 panic 负载中的文本消息
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知 panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// 记录会话开关次数的工厂
    struct CountingFactory {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    struct CountingSession {
        closed: Arc<AtomicUsize>,
    }

    impl Session for CountingSession {
        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SessionFactory for CountingFactory {
        fn open_session(&self) -> Box<dyn Session> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingSession {
                closed: Arc::clone(&self.closed),
            })
        }
    }

    fn counting_daemon() -> (Daemon, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let daemon = Daemon::with_session_factory(Arc::new(CountingFactory {
            opened: Arc::clone(&opened),
            closed: Arc::clone(&closed),
        }));
        (daemon, opened, closed)
    }

    #[test]
    fn test_run_privileged_returns_value() {
        let daemon = Daemon::new();
        let value = daemon.run_privileged("test", || Ok(41 + 1)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_privileged_propagates_error() {
        let daemon = Daemon::new();
        let result: Result<()> = daemon.run_privileged("test", || {
            Err(CoreError::Internal("工作失败".to_string()))
        });
        assert!(matches!(result, Err(CoreError::Internal(_))));
    }

    #[test]
    fn test_daemon_flag_set_only_inside() {
        assert!(!is_daemon_thread());

        let daemon = Daemon::new();
        let inside = daemon
            .run_privileged("test", || Ok(is_daemon_thread()))
            .unwrap();
        assert!(inside);

        // 标记不泄漏回调用线程
        assert!(!is_daemon_thread());
    }

    #[test]
    fn test_session_closed_on_success_and_error() {
        let (daemon, opened, closed) = counting_daemon();

        let _ = daemon.run_privileged("ok", || Ok(()));
        let _: Result<()> = daemon.run_privileged("err", || {
            Err(CoreError::Internal("失败".to_string()))
        });

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_session_closed_on_panic() {
        let (daemon, opened, closed) = counting_daemon();

        let result: Result<()> = daemon.run_privileged("panic", || panic!("炸了"));
        assert!(matches!(result, Err(CoreError::PrivilegedWorkPanicked(ref m)) if m == "炸了"));

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message_preserved() {
        let daemon = Daemon::new();

        // &str 负载
        let result: Result<()> = daemon.run_privileged("panic-str", || panic!("boom"));
        assert!(matches!(result, Err(CoreError::PrivilegedWorkPanicked(ref m)) if m == "boom"));

        // 格式化 panic 的 String 负载
        let code = 42;
        let result: Result<()> =
            daemon.run_privileged("panic-string", move || panic!("错误码 {}", code));
        assert!(
            matches!(result, Err(CoreError::PrivilegedWorkPanicked(ref m)) if m == "错误码 42")
        );
    }

    #[test]
    fn test_panic_message_preserved_through_join() {
        let daemon = Arc::new(Daemon::new());
        let inner = Arc::clone(&daemon);

        let result: Result<()> = daemon.run_privileged("outer", move || {
            let handle = inner.spawn_privileged(|| -> Result<()> { panic!("内层炸了") })?;
            handle.join()
        });
        assert!(
            matches!(result, Err(CoreError::PrivilegedWorkPanicked(ref m)) if m == "内层炸了")
        );
    }

    #[test]
    fn test_spawn_privileged_rejected_outside_daemon() {
        let daemon = Daemon::new();
        let result = daemon.spawn_privileged(|| Ok(()));
        assert!(matches!(result, Err(CoreError::PrivilegeViolation(_))));
    }

    #[test]
    fn test_spawn_privileged_allowed_inside_daemon() {
        let daemon = Arc::new(Daemon::new());
        let inner = Arc::clone(&daemon);

        let value = daemon
            .run_privileged("outer", move || {
                let handle = inner.spawn_privileged(|| Ok(7))?;
                handle.join()
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_dispatch_token_issued_once() {
        let daemon = Daemon::new();
        let token = daemon.issue_dispatch_token().unwrap();
        assert!(matches!(
            daemon.issue_dispatch_token(),
            Err(CoreError::AuthorizationFailure(_))
        ));

        let value = daemon.execute_scheduled_task(&token, || Ok(3)).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_foreign_token_rejected() {
        let daemon_a = Daemon::new();
        let daemon_b = Daemon::new();

        let token_a = daemon_a.issue_dispatch_token().unwrap();
        let result = daemon_b.execute_scheduled_task(&token_a, || Ok(()));
        assert!(matches!(result, Err(CoreError::AuthorizationFailure(_))));
    }

    #[test]
    fn test_scheduled_task_runs_privileged() {
        let daemon = Daemon::new();
        let token = daemon.issue_dispatch_token().unwrap();
        let inside = daemon
            .execute_scheduled_task(&token, || Ok(is_daemon_thread()))
            .unwrap();
        assert!(inside);
    }
}
