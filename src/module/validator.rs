//! 启动依赖校验
//!
//! 平台启动收尾阶段的两项强制校验：配置为必备的模块必须全部
//! 启动，平台核心模块必须以不低于要求的版本启动。两项校验都
//! 一次性收集全部未满足项再报错，便于运维一次看到完整清单。

use std::cmp::Ordering;

use crate::core::config::{PlatformConfig, CORE_MODULES};
use crate::module::registry::ModuleRegistry;
use crate::module::version::compare_versions;
use crate::utils::{CoreError, Result};

/// 启动依赖校验器
///
/// 核心模块要求表默认取平台的 [`CORE_MODULES`]，测试可通过
/// [`DependencyValidator::with_core_modules`] 替换。
pub struct DependencyValidator {
    core_modules: Vec<(String, String)>,
}

impl DependencyValidator {
    /// 使用平台核心模块表创建校验器
    pub fn new() -> Self {
        Self {
            core_modules: CORE_MODULES
                .iter()
                .map(|(id, version)| (id.to_string(), version.to_string()))
                .collect(),
        }
    }

    /// 使用自定义核心模块表创建校验器
    pub fn with_core_modules(core_modules: Vec<(String, String)>) -> Self {
        Self { core_modules }
    }

    /// 校验所有必备模块均已启动
    ///
    /// 必备模块由配置属性表中 `<moduleId>.mandatory = true` 声明。
    /// 未启动的必备模块全部收集进
    /// [`CoreError::MandatoryModulesMissing`] 一并返回。
    pub async fn check_mandatory_modules_started(
        &self,
        registry: &ModuleRegistry,
        config: &PlatformConfig,
    ) -> Result<()> {
        let started = registry.started_ids().await;

        let missing: Vec<String> = config
            .mandatory_module_ids()
            .into_iter()
            .filter(|id| !started.contains(id))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            tracing::error!(?missing, "必备模块未全部启动");
            Err(CoreError::MandatoryModulesMissing(missing))
        }
    }

    /// 校验平台核心模块均以满足要求的版本启动
    ///
    /// 配置了 `ignore_core_modules` 时整体跳过。逐项检查核心模块
    /// 表：已启动且版本不低于要求的从待查表中移除，剩余项全部
    /// 收集进 [`CoreError::CoreModuleVersionsUnmet`] 一并返回。
    pub async fn check_core_modules_started(
        &self,
        registry: &ModuleRegistry,
        config: &PlatformConfig,
    ) -> Result<()> {
        if config.modules.ignore_core_modules {
            tracing::warn!("已配置跳过核心模块启动校验");
            return Ok(());
        }

        let mut unmet = self.core_modules.clone();
        for module in registry.started_modules().await {
            unmet.retain(|(id, required)| {
                !(id == module.id()
                    && compare_versions(module.version(), required) != Ordering::Less)
            });
        }

        if unmet.is_empty() {
            Ok(())
        } else {
            tracing::error!(?unmet, "核心模块版本要求未满足");
            Err(CoreError::CoreModuleVersionsUnmet(unmet))
        }
    }

    /// 配置声明的必备模块 ID 列表
    pub fn mandatory_module_ids(config: &PlatformConfig) -> Vec<String> {
        config.mandatory_module_ids()
    }
}

impl Default for DependencyValidator {
    fn default() -> Self {
        Self::new()
    }
}
