//! 容器刷新协调
//!
//! 模块装载或卸载后，服务容器需要在不重启平台的前提下整体
//! 重建。刷新协议严格按七步执行：通知各模块容器即将刷新，
//! 停止并关闭容器，销毁并重建装载器状态，刷新容器，恢复装
//! 载器快照，重新登记各已启动模块的拦截点，最后按场景执行
//! 模块的刷新完成与启动钩子。
//!
//! 模块钩子逐个故障隔离，单个模块的失败只记录日志；容器自身
//! 的刷新失败没有降级余地，原样上抛。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::module::daemon::Daemon;
use crate::module::metadata::ActivatorHandle;
use crate::module::registry::ModuleRegistry;
use crate::utils::{CoreError, Result};

// ============================================================================
// 装载器状态
// ============================================================================

/// 装载器状态
///
/// 记录各模块登记的包命名空间与服务拦截点。刷新期间整体销毁
/// 重建，旧状态以快照形式保存并在新容器就绪后恢复。
#[derive(Debug, Clone, Default)]
pub struct LoaderState {
    /// module_id -> 包命名空间列表
    namespaces: HashMap<String, Vec<String>>,

    /// module_id -> 服务拦截点列表
    advice_points: HashMap<String, Vec<String>>,
}

impl LoaderState {
    /// 登记模块的包命名空间
    pub fn register_namespaces(&mut self, module_id: &str, namespaces: &[String]) {
        self.namespaces
            .insert(module_id.to_string(), namespaces.to_vec());
    }

    /// 登记模块的服务拦截点
    pub fn register_advice(&mut self, module_id: &str, points: &[String]) {
        self.advice_points
            .insert(module_id.to_string(), points.to_vec());
    }

    /// 注销模块
    pub fn unregister(&mut self, module_id: &str) {
        self.namespaces.remove(module_id);
        self.advice_points.remove(module_id);
    }

    /// 模块登记的命名空间
    pub fn namespaces_for(&self, module_id: &str) -> Option<&[String]> {
        self.namespaces.get(module_id).map(|v| v.as_slice())
    }

    /// 模块登记的拦截点
    pub fn advice_for(&self, module_id: &str) -> Option<&[String]> {
        self.advice_points.get(module_id).map(|v| v.as_slice())
    }

    /// 保存当前状态快照
    pub fn save(&self) -> LoaderState {
        self.clone()
    }

    /// 销毁全部状态
    pub fn destroy(&mut self) {
        self.namespaces.clear();
        self.advice_points.clear();
    }

    /// 从快照恢复
    pub fn restore(&mut self, snapshot: LoaderState) {
        self.namespaces = snapshot.namespaces;
        self.advice_points = snapshot.advice_points;
    }

    /// 状态是否为空
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.advice_points.is_empty()
    }
}

/// 共享装载器句柄
pub type LoaderHandle = Arc<RwLock<LoaderState>>;

// ============================================================================
// 服务容器接口
// ============================================================================

/// 服务容器
///
/// 平台依赖注入容器的刷新面，由嵌入方实现。
#[async_trait]
pub trait ServiceContainer: Send + Sync {
    /// 停止容器
    async fn stop(&self) -> Result<()>;

    /// 关闭容器
    async fn close(&self) -> Result<()>;

    /// 重建容器
    async fn refresh(&self) -> Result<()>;

    /// 安装新的活动装载器
    async fn set_loader(&self, loader: LoaderHandle) -> Result<()>;
}

// ============================================================================
// 刷新协调器
// ============================================================================

/// 容器刷新协调器
pub struct RefreshCoordinator {
    registry: ModuleRegistry,
    daemon: Arc<Daemon>,
    loader: LoaderHandle,
}

impl RefreshCoordinator {
    /// 创建刷新协调器
    pub fn new(registry: ModuleRegistry, daemon: Arc<Daemon>) -> Self {
        Self {
            registry,
            daemon,
            loader: Arc::new(RwLock::new(LoaderState::default())),
        }
    }

    /// 当前活动装载器句柄
    pub fn loader(&self) -> LoaderHandle {
        Arc::clone(&self.loader)
    }

    /// 执行刷新协议
    ///
    /// `is_startup` 为真表示平台启动期的首次刷新，所有已启动模块
    /// 的 `started` 钩子都会执行；否则只有 ID 与 `just_started`
    /// 匹配的模块执行 `started`，无匹配则一个也不执行。
    pub async fn refresh(
        &self,
        container: &dyn ServiceContainer,
        is_startup: bool,
        just_started: Option<&str>,
    ) -> Result<()> {
        let started = self.registry.started_modules().await;
        info!(module_count = started.len(), is_startup, "开始容器刷新");

        // 第 1 步：通知各模块容器即将刷新，逐个故障隔离
        for module in &started {
            if let Some(activator) = module.activator.clone() {
                if let Err(e) = activator.will_refresh_context() {
                    warn!(module_id = %module.id(), error_msg = %e, "模块刷新前置通知失败");
                }
            }
        }

        // 第 2 步：保存装载器快照，停止并关闭容器
        let snapshot = self.loader.read().await.save();
        container.stop().await?;
        container.close().await?;
        debug!(refresh_step = 2, "容器已停止并关闭");

        // 第 3 步：销毁并重建装载器状态，安装为活动装载器
        self.loader.write().await.destroy();
        container.set_loader(Arc::clone(&self.loader)).await?;
        debug!(refresh_step = 3, "装载器状态已重建");

        // 第 4 步：重建容器，失败直接上抛
        container.refresh().await?;
        debug!(refresh_step = 4, "容器已重建");

        // 第 5 步：恢复装载器快照
        self.loader.write().await.restore(snapshot);

        // 第 6 步：重新登记各已启动模块的命名空间与拦截点
        {
            let mut loader = self.loader.write().await;
            for module in &started {
                loader.register_namespaces(module.id(), &module.descriptor.packages);
            }
        }
        debug!(refresh_step = 6, "已启动模块已重新登记");

        // 第 7 步：刷新完成通知与按场景的启动钩子，特权线程中执行
        for module in &started {
            let Some(activator) = module.activator.clone() else {
                continue;
            };

            if let Err(e) = self
                .run_hook(activator.clone(), "context-refreshed", |a| a.context_refreshed())
                .await
            {
                warn!(module_id = %module.id(), error_msg = %e, "模块刷新完成通知失败");
            }

            let run_started = is_startup || just_started == Some(module.id());
            if run_started {
                if let Err(e) = self
                    .run_hook(activator, "module-started", |a| a.started())
                    .await
                {
                    warn!(module_id = %module.id(), error_msg = %e, "模块启动钩子失败");
                }
            }
        }

        info!("容器刷新完成");
        Ok(())
    }

    /// 在特权线程中执行激活器钩子
    async fn run_hook<F>(
        &self,
        activator: ActivatorHandle,
        task_name: &'static str,
        hook: F,
    ) -> Result<()>
    where
        F: FnOnce(&dyn crate::module::metadata::ModuleActivator) -> Result<()> + Send + 'static,
    {
        let daemon = Arc::clone(&self.daemon);
        tokio::task::spawn_blocking(move || {
            daemon.run_privileged(task_name, move || hook(activator.as_ref()))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("特权工作线程异常: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{ModuleActivator, ModuleDescriptor};
    use std::sync::Mutex;

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn log_event(log: &EventLog, event: impl Into<String>) {
        log.lock().unwrap().push(event.into());
    }

    /// 按调用顺序记录容器事件的测试容器
    struct RecordingContainer {
        log: EventLog,
        fail_refresh: bool,
    }

    #[async_trait]
    impl ServiceContainer for RecordingContainer {
        async fn stop(&self) -> Result<()> {
            log_event(&self.log, "container.stop");
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            log_event(&self.log, "container.close");
            Ok(())
        }

        async fn refresh(&self) -> Result<()> {
            log_event(&self.log, "container.refresh");
            if self.fail_refresh {
                Err(CoreError::ContainerRefreshFailed("容器重建失败".to_string()))
            } else {
                Ok(())
            }
        }

        async fn set_loader(&self, _loader: LoaderHandle) -> Result<()> {
            log_event(&self.log, "container.set_loader");
            Ok(())
        }
    }

    /// 记录钩子调用的激活器
    struct RecordingActivator {
        id: String,
        log: EventLog,
        fail_will_refresh: bool,
    }

    impl ModuleActivator for RecordingActivator {
        fn will_refresh_context(&self) -> Result<()> {
            log_event(&self.log, format!("{}.will_refresh", self.id));
            if self.fail_will_refresh {
                Err(CoreError::Internal("前置通知失败".to_string()))
            } else {
                Ok(())
            }
        }

        fn context_refreshed(&self) -> Result<()> {
            log_event(&self.log, format!("{}.context_refreshed", self.id));
            Ok(())
        }

        fn started(&self) -> Result<()> {
            log_event(&self.log, format!("{}.started", self.id));
            Ok(())
        }
    }

    async fn setup(
        log: &EventLog,
        ids: &[&str],
        fail_will_refresh: Option<&str>,
    ) -> (ModuleRegistry, RefreshCoordinator) {
        let daemon = Arc::new(Daemon::new());
        let registry = ModuleRegistry::new("1.9.0", Arc::clone(&daemon));

        for id in ids {
            let activator = Arc::new(RecordingActivator {
                id: id.to_string(),
                log: Arc::clone(log),
                fail_will_refresh: fail_will_refresh == Some(*id),
            });
            registry
                .load(ModuleDescriptor::new(*id, *id, "1.0"), Some(activator))
                .await
                .unwrap();
            registry.start(*id).await.unwrap();
        }
        // 启动钩子的记录不属于刷新协议，清掉
        log.lock().unwrap().clear();

        let coordinator = RefreshCoordinator::new(registry.clone(), daemon);
        (registry, coordinator)
    }

    #[tokio::test]
    async fn test_refresh_step_order() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let (_registry, coordinator) = setup(&log, &["logic"], None).await;

        let container = RecordingContainer {
            log: Arc::clone(&log),
            fail_refresh: false,
        };

        coordinator.refresh(&container, true, None).await.unwrap();

        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "logic.will_refresh",
                "container.stop",
                "container.close",
                "container.set_loader",
                "container.refresh",
                "logic.context_refreshed",
                "logic.started",
            ]
        );
    }

    #[tokio::test]
    async fn test_will_refresh_failure_isolated() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let (_registry, coordinator) = setup(&log, &["logic", "reporting"], Some("logic")).await;

        let container = RecordingContainer {
            log: Arc::clone(&log),
            fail_refresh: false,
        };

        // logic 的前置通知失败不影响整体刷新
        coordinator.refresh(&container, true, None).await.unwrap();

        let events = log.lock().unwrap().clone();
        assert!(events.contains(&"logic.will_refresh".to_string()));
        assert!(events.contains(&"reporting.will_refresh".to_string()));
        assert!(events.contains(&"container.refresh".to_string()));
        assert!(events.contains(&"logic.context_refreshed".to_string()));
        assert!(events.contains(&"reporting.context_refreshed".to_string()));
    }

    #[tokio::test]
    async fn test_container_refresh_failure_propagates() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let (_registry, coordinator) = setup(&log, &["logic"], None).await;

        let container = RecordingContainer {
            log: Arc::clone(&log),
            fail_refresh: true,
        };

        let result = coordinator.refresh(&container, true, None).await;
        assert!(matches!(result, Err(CoreError::ContainerRefreshFailed(_))));

        // 第 7 步钩子未执行
        let events = log.lock().unwrap().clone();
        assert!(!events.contains(&"logic.context_refreshed".to_string()));
        assert!(!events.contains(&"logic.started".to_string()));
    }

    #[tokio::test]
    async fn test_started_hook_only_for_just_started() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let (_registry, coordinator) = setup(&log, &["logic", "reporting"], None).await;

        let container = RecordingContainer {
            log: Arc::clone(&log),
            fail_refresh: false,
        };

        coordinator
            .refresh(&container, false, Some("reporting"))
            .await
            .unwrap();

        let events = log.lock().unwrap().clone();
        assert!(events.contains(&"logic.context_refreshed".to_string()));
        assert!(events.contains(&"reporting.context_refreshed".to_string()));
        assert!(events.contains(&"reporting.started".to_string()));
        assert!(!events.contains(&"logic.started".to_string()));
    }

    #[tokio::test]
    async fn test_no_started_hook_without_match() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let (_registry, coordinator) = setup(&log, &["logic"], None).await;

        let container = RecordingContainer {
            log: Arc::clone(&log),
            fail_refresh: false,
        };

        coordinator
            .refresh(&container, false, Some("nonexistent"))
            .await
            .unwrap();

        let events = log.lock().unwrap().clone();
        assert!(events.contains(&"logic.context_refreshed".to_string()));
        assert!(!events.contains(&"logic.started".to_string()));
    }

    #[tokio::test]
    async fn test_startup_runs_started_for_all() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let (_registry, coordinator) = setup(&log, &["logic", "reporting"], None).await;

        let container = RecordingContainer {
            log: Arc::clone(&log),
            fail_refresh: false,
        };

        coordinator.refresh(&container, true, None).await.unwrap();

        let events = log.lock().unwrap().clone();
        assert!(events.contains(&"logic.started".to_string()));
        assert!(events.contains(&"reporting.started".to_string()));
    }

    #[tokio::test]
    async fn test_loader_rebuilt_and_reregistered() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let daemon = Arc::new(Daemon::new());
        let registry = ModuleRegistry::new("1.9.0", Arc::clone(&daemon));

        let descriptor = {
            let mut d = ModuleDescriptor::new("ui.springmvc", "UI", "1.0");
            d.packages = vec!["ui.springmvc.web".to_string()];
            d
        };
        registry.load(descriptor, None).await.unwrap();
        registry.start("ui.springmvc").await.unwrap();

        let coordinator = RefreshCoordinator::new(registry, daemon);
        // 刷新前装载器里留一个将被重建的旧条目
        coordinator
            .loader()
            .write()
            .await
            .register_advice("ui.springmvc", &["service.save".to_string()]);

        let container = RecordingContainer {
            log: Arc::clone(&log),
            fail_refresh: false,
        };
        coordinator.refresh(&container, true, None).await.unwrap();

        let loader = coordinator.loader();
        let state = loader.read().await;
        // 快照恢复保留了拦截点，命名空间按当前已启动模块重新登记
        assert_eq!(
            state.advice_for("ui.springmvc"),
            Some(&["service.save".to_string()][..])
        );
        assert_eq!(
            state.namespaces_for("ui.springmvc"),
            Some(&["ui.springmvc.web".to_string()][..])
        );
    }

    #[tokio::test]
    async fn test_loader_state_lifecycle() {
        let mut state = LoaderState::default();
        state.register_namespaces("logic", &["logic.rules".to_string()]);
        state.register_advice("logic", &["service.eval".to_string()]);
        assert!(!state.is_empty());

        let snapshot = state.save();
        state.destroy();
        assert!(state.is_empty());

        state.restore(snapshot);
        assert_eq!(
            state.namespaces_for("logic"),
            Some(&["logic.rules".to_string()][..])
        );

        state.unregister("logic");
        assert!(state.is_empty());
    }
}
