//! 模块注册表
//!
//! 平台范围的模块表，负责模块的装载、启动、停止、卸载与查询。
//! 每次生命周期变更在同一把写锁内完成校验、钩子执行与状态落
//! 盘，观察者看到的始终是变更前或变更后的完整状态。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::module::daemon::Daemon;
use crate::module::metadata::{ActivatorHandle, ModuleDescriptor, ModuleHandle, ModuleState};
use crate::module::version::{check_required_version, matches_required_version};
use crate::utils::{CoreError, Result};

/// 模块注册表
pub struct ModuleRegistry {
    /// 已注册的模块：module_id -> ModuleHandle
    modules: Arc<RwLock<HashMap<String, ModuleHandle>>>,

    /// 平台版本，装载模块的 require_version 据此校验
    platform_version: String,

    /// 特权执行器，生命周期钩子经由它执行
    daemon: Arc<Daemon>,
}

impl ModuleRegistry {
    /// 创建新的模块注册表
    pub fn new(platform_version: impl Into<String>, daemon: Arc<Daemon>) -> Self {
        Self {
            modules: Arc::new(RwLock::new(HashMap::new())),
            platform_version: platform_version.into(),
            daemon,
        }
    }

    /// 平台版本
    pub fn platform_version(&self) -> &str {
        &self.platform_version
    }

    /// 装载模块
    ///
    /// 将描述符注册为 Loaded 状态的条目。重复 ID 返回
    /// [`CoreError::ModuleAlreadyLoaded`]，不会覆盖已有条目。
    pub async fn load(
        &self,
        descriptor: ModuleDescriptor,
        activator: Option<ActivatorHandle>,
    ) -> Result<String> {
        let module_id = descriptor.id.clone();
        let mut modules = self.modules.write().await;

        if modules.contains_key(&module_id) {
            return Err(CoreError::ModuleAlreadyLoaded(module_id));
        }

        let mut handle = ModuleHandle::new(descriptor);
        handle.activator = activator;
        modules.insert(module_id.clone(), handle);

        tracing::info!(module_id = %module_id, "模块已装载");
        Ok(module_id)
    }

    /// 为已装载的模块注册激活器
    pub async fn register_activator(
        &self,
        module_id: &str,
        activator: ActivatorHandle,
    ) -> Result<()> {
        let mut modules = self.modules.write().await;
        let handle = modules
            .get_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;
        handle.activator = Some(activator);
        Ok(())
    }

    /// 启动模块
    ///
    /// 校验顺序：
    /// 1. 模块存在且处于可启动状态（重复启动必须先停止）；
    /// 2. 描述符的 `require_version` 对平台版本成立；
    /// 3. 每个 `require_modules` 依赖已启动，且声明了版本要求时
    ///    被启动依赖的版本满足要求。
    ///
    /// 全部通过后才执行激活器 `started` 钩子（特权线程中）。钩子
    /// 失败时模块保持 Loaded 状态并记录错误，启动是原子的。
    pub async fn start(&self, module_id: &str) -> Result<()> {
        let mut modules = self.modules.write().await;

        let activator = {
            let handle = modules
                .get(module_id)
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

            if handle.state == ModuleState::Started {
                return Err(CoreError::ModuleAlreadyStarted(module_id.to_string()));
            }
            if !handle.state.can_start() {
                return Err(CoreError::ModuleStartFailed {
                    module_id: module_id.to_string(),
                    reason: format!("模块处于 {} 状态，需先重新装载", handle.state),
                });
            }

            // 平台版本约束先于任何激活器代码
            if let Err(e) =
                check_required_version(&self.platform_version, &handle.descriptor.require_version)
            {
                return Err(CoreError::ModuleStartFailed {
                    module_id: module_id.to_string(),
                    reason: format!("平台版本不满足要求: {}", e),
                });
            }

            // 依赖模块必须已启动且满足版本要求
            for required in &handle.descriptor.require_modules {
                match modules.get(&required.module_id) {
                    Some(dep) if dep.is_started() => {
                        if let Some(ref requirement) = required.version {
                            if !matches_required_version(dep.version(), requirement) {
                                return Err(CoreError::ModuleStartFailed {
                                    module_id: module_id.to_string(),
                                    reason: format!(
                                        "依赖模块 '{}' 版本 {} 不满足要求 '{}'",
                                        required.module_id,
                                        dep.version(),
                                        requirement
                                    ),
                                });
                            }
                        }
                    }
                    _ => {
                        return Err(CoreError::ModuleStartFailed {
                            module_id: module_id.to_string(),
                            reason: format!("依赖模块 '{}' 未启动", required.module_id),
                        });
                    }
                }
            }

            handle.activator.clone()
        };

        // 激活器钩子在特权线程中执行，写锁保持到状态落盘
        let hook_result = self.run_hook(activator, "module-start", |a| a.started()).await;

        let handle = modules
            .get_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        match hook_result {
            Ok(()) => {
                handle.state = ModuleState::Started;
                handle.started_at = Some(Utc::now());
                handle.last_error = None;
                tracing::info!(module_id = %module_id, version = %handle.descriptor.version, "模块已启动");
                Ok(())
            }
            Err(e) => {
                handle.last_error = Some(e.to_string());
                tracing::warn!(module_id = %module_id, error_msg = %e, "模块启动失败，保持已装载状态");
                Err(CoreError::ModuleStartFailed {
                    module_id: module_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 停止模块
    ///
    /// 激活器 `stopped` 钩子在特权线程中执行。钩子失败时记录
    /// 错误；`force` 为真则照常转入 Stopped 状态，否则模块保持
    /// Started 并返回错误。
    pub async fn stop(&self, module_id: &str, force: bool) -> Result<()> {
        let mut modules = self.modules.write().await;

        let activator = {
            let handle = modules
                .get(module_id)
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;
            if !handle.state.can_stop() {
                return Err(CoreError::ModuleNotStarted(module_id.to_string()));
            }
            handle.activator.clone()
        };

        let hook_result = self.run_hook(activator, "module-stop", |a| a.stopped()).await;

        let handle = modules
            .get_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        if let Err(e) = hook_result {
            handle.last_error = Some(e.to_string());
            tracing::warn!(module_id = %module_id, error_msg = %e, "模块停止钩子失败");
            if !force {
                return Err(CoreError::ModuleStopFailed {
                    module_id: module_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        handle.state = ModuleState::Stopped;
        handle.started_at = None;
        tracing::info!(module_id = %module_id, "模块已停止");
        Ok(())
    }

    /// 将已停止的模块重新装载回 Loaded 状态
    pub async fn reload(&self, module_id: &str) -> Result<()> {
        let mut modules = self.modules.write().await;
        let handle = modules
            .get_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        match handle.state {
            ModuleState::Started => Err(CoreError::ModuleAlreadyStarted(module_id.to_string())),
            ModuleState::Loaded => Err(CoreError::ModuleAlreadyLoaded(module_id.to_string())),
            ModuleState::Stopped => {
                handle.state = ModuleState::Loaded;
                handle.loaded_at = Some(Utc::now());
                handle.last_error = None;
                tracing::debug!(module_id = %module_id, "模块已重新装载");
                Ok(())
            }
        }
    }

    /// 卸载模块，移除注册表条目
    ///
    /// 已启动的模块不能直接卸载，须先停止。
    pub async fn unload(&self, module_id: &str) -> Result<()> {
        let mut modules = self.modules.write().await;

        match modules.get(module_id) {
            None => return Err(CoreError::ModuleNotFound(module_id.to_string())),
            Some(handle) if handle.is_started() => {
                return Err(CoreError::ModuleAlreadyStarted(module_id.to_string()));
            }
            Some(_) => {}
        }

        modules.remove(module_id);
        tracing::info!(module_id = %module_id, "模块已卸载");
        Ok(())
    }

    /// 获取模块条目
    pub async fn get(&self, module_id: &str) -> Option<ModuleHandle> {
        let modules = self.modules.read().await;
        modules.get(module_id).cloned()
    }

    /// 模块是否存在
    pub async fn exists(&self, module_id: &str) -> bool {
        let modules = self.modules.read().await;
        modules.contains_key(module_id)
    }

    /// 所有模块条目
    pub async fn list(&self) -> Vec<ModuleHandle> {
        let modules = self.modules.read().await;
        modules.values().cloned().collect()
    }

    /// 已启动的模块
    pub async fn started_modules(&self) -> Vec<ModuleHandle> {
        let modules = self.modules.read().await;
        modules.values().filter(|m| m.is_started()).cloned().collect()
    }

    /// 已装载但未启动的模块
    pub async fn loaded_modules(&self) -> Vec<ModuleHandle> {
        let modules = self.modules.read().await;
        modules
            .values()
            .filter(|m| m.state == ModuleState::Loaded)
            .cloned()
            .collect()
    }

    /// 已启动模块的 ID 列表
    pub async fn started_ids(&self) -> Vec<String> {
        let modules = self.modules.read().await;
        modules
            .values()
            .filter(|m| m.is_started())
            .map(|m| m.id().to_string())
            .collect()
    }

    /// 已注册模块数量
    pub async fn count(&self) -> usize {
        let modules = self.modules.read().await;
        modules.len()
    }

    /// 清空注册表
    pub async fn clear(&self) {
        let mut modules = self.modules.write().await;
        modules.clear();
        tracing::warn!("已清空模块注册表");
    }

    /// 按资源路径归属查找已启动模块
    ///
    /// 路径形如 `/ui/springmvc/css/ui.css`：去掉首个 `/`，截到最
    /// 后一个 `/` 得到候选 ID `ui.springmvc.css`，再逐段去掉末尾
    /// 的 `.` 段，直到命中某个已启动模块的 ID。无命中返回 None。
    pub async fn lookup_by_path_prefix(&self, path: &str) -> Result<Option<String>> {
        let ind = match path.rfind('/') {
            Some(i) if i > 0 => i,
            _ => {
                return Err(CoreError::InvalidPath(format!(
                    "无法从路径 '{}' 提取模块 ID",
                    path
                )))
            }
        };

        let raw = if let Some(stripped) = path.strip_prefix('/') {
            &stripped[..ind - 1]
        } else {
            &path[..ind]
        };
        let mut candidate = raw.replace('/', ".");

        let modules = self.modules.read().await;
        loop {
            if modules.get(&candidate).map_or(false, |m| m.is_started()) {
                return Ok(Some(candidate));
            }
            match candidate.rfind('.') {
                Some(dot) => candidate.truncate(dot),
                None => return Ok(None),
            }
        }
    }

    /// 资源路径在模块包内的相对路径
    ///
    /// 输入 `/ui/springmvc/css/ui.css` 与模块 `ui.springmvc`，
    /// 返回 `/css/ui.css`。
    pub async fn local_path_for_resource(&self, module_id: &str, path: &str) -> Result<String> {
        let modules = self.modules.read().await;
        let handle = modules
            .get(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let prefix = handle.descriptor.id_as_path();
        if !trimmed.starts_with(&prefix) {
            return Err(CoreError::InvalidPath(format!(
                "路径 '{}' 不属于模块 '{}'",
                path, module_id
            )));
        }
        Ok(trimmed[prefix.len()..].to_string())
    }

    /// 在特权线程中执行激活器钩子，不阻塞异步运行时
    async fn run_hook<F>(
        &self,
        activator: Option<ActivatorHandle>,
        task_name: &'static str,
        hook: F,
    ) -> Result<()>
    where
        F: FnOnce(&dyn crate::module::metadata::ModuleActivator) -> Result<()> + Send + 'static,
    {
        let Some(activator) = activator else {
            return Ok(());
        };
        let daemon = Arc::clone(&self.daemon);
        tokio::task::spawn_blocking(move || {
            daemon.run_privileged(task_name, move || hook(activator.as_ref()))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("特权工作线程异常: {}", e)))?
    }
}

impl Clone for ModuleRegistry {
    fn clone(&self) -> Self {
        Self {
            modules: Arc::clone(&self.modules),
            platform_version: self.platform_version.clone(),
            daemon: Arc::clone(&self.daemon),
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("platform_version", &self.platform_version)
            .finish()
    }
}
