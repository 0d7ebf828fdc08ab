//! 模块系统门面
//!
//! 整合注册表、特权执行器、仓库装载器、启动校验器与容器刷新
//! 协调器，提供平台级的启动、停机与热装卸入口。

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::daemon::Daemon;
use super::loader::{RepositoryLoader, MODULE_DESCRIPTOR_FILENAME};
use super::metadata::ActivatorHandle;
use super::parser::DescriptorParser;
use super::refresh::{RefreshCoordinator, ServiceContainer};
use super::registry::ModuleRegistry;
use super::validator::DependencyValidator;
use crate::core::config::PlatformConfig;
use crate::utils::Result;

/// 模块系统
pub struct ModuleSystem {
    config: PlatformConfig,
    registry: ModuleRegistry,
    daemon: Arc<Daemon>,
    loader: RepositoryLoader,
    validator: DependencyValidator,
    coordinator: RefreshCoordinator,
}

impl ModuleSystem {
    /// 按配置装配模块系统
    pub async fn new(config: PlatformConfig) -> Result<Self> {
        Self::with_validator(config, DependencyValidator::new()).await
    }

    /// 使用自定义启动校验器装配（测试用）
    pub async fn with_validator(
        config: PlatformConfig,
        validator: DependencyValidator,
    ) -> Result<Self> {
        let daemon = Arc::new(Daemon::new());
        let registry = ModuleRegistry::new(config.platform_version.clone(), Arc::clone(&daemon));
        let loader = RepositoryLoader::resolve(&config).await?;
        let coordinator = RefreshCoordinator::new(registry.clone(), Arc::clone(&daemon));

        Ok(Self {
            config,
            registry,
            daemon,
            loader,
            validator,
            coordinator,
        })
    }

    /// 模块注册表
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 特权执行器
    pub fn daemon(&self) -> Arc<Daemon> {
        Arc::clone(&self.daemon)
    }

    /// 容器刷新协调器
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// 平台配置
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// 为模块注册激活器
    pub async fn register_activator(
        &self,
        module_id: &str,
        activator: ActivatorHandle,
    ) -> Result<()> {
        self.registry.register_activator(module_id, activator).await
    }

    /// 平台启动
    ///
    /// 装载描述文件（配置显式列表优先，否则扫描仓库），逐个启动
    /// 模块。单个模块的装载或启动失败只记录日志，不中断批次；
    /// 批次结束后核心模块校验与必备模块校验不通过则整体失败。
    /// 返回成功启动的模块 ID 列表。
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<Vec<String>> {
        info!(platform_version = %self.config.platform_version, "模块系统启动");

        let descriptor_files = self.collect_descriptor_files().await?;

        let mut loaded_ids = Vec::new();
        for path in descriptor_files {
            match DescriptorParser::parse_file(&path).await {
                Ok(descriptor) => match self.registry.load(descriptor, None).await {
                    Ok(id) => loaded_ids.push(id),
                    Err(e) => error!(path = %path.display(), error_msg = %e, "模块装载失败"),
                },
                Err(e) => error!(path = %path.display(), error_msg = %e, "描述文件解析失败"),
            }
        }

        // 依赖可能晚于依赖方装载，反复过批直到无进展
        let mut pending = loaded_ids;
        loop {
            let mut progress = false;
            let mut remaining = Vec::new();
            for id in pending {
                match self.registry.start(&id).await {
                    Ok(()) => progress = true,
                    Err(e) => remaining.push((id, e)),
                }
            }
            pending = remaining.iter().map(|(id, _)| id.clone()).collect();
            if !progress || pending.is_empty() {
                for (id, e) in &remaining {
                    error!(module_id = %id, error_msg = %e, "模块启动失败");
                }
                break;
            }
        }

        // 两项启动校验都是平台级致命错误
        self.validator
            .check_core_modules_started(&self.registry, &self.config)
            .await?;
        self.validator
            .check_mandatory_modules_started(&self.registry, &self.config)
            .await?;

        let started = self.registry.started_ids().await;
        info!(started_count = started.len(), "模块系统启动完成");
        Ok(started)
    }

    /// 平台停机
    ///
    /// 强制停止所有已启动模块，每个模块都会收到停止通知，单个
    /// 失败只记录日志；随后清空注册表。
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("模块系统停机");

        for id in self.registry.started_ids().await {
            if let Err(e) = self.registry.stop(&id, true).await {
                warn!(module_id = %id, error_msg = %e, "模块停机通知失败");
            }
        }

        self.registry.clear().await;
    }

    /// 热安装模块包
    ///
    /// 安装进仓库、装载、启动，最后只为该模块执行容器刷新。
    pub async fn install(
        &self,
        package_path: &Path,
        container: &dyn ServiceContainer,
    ) -> Result<String> {
        let installed = self.loader.insert_package(package_path).await?;
        let descriptor = DescriptorParser::parse_file(
            &installed.join(MODULE_DESCRIPTOR_FILENAME),
        )
        .await?;

        let module_id = self.registry.load(descriptor, None).await?;
        self.registry.start(&module_id).await?;

        self.coordinator
            .refresh(container, false, Some(&module_id))
            .await?;

        info!(module_id = %module_id, "模块已热安装");
        Ok(module_id)
    }

    /// 热卸载模块
    ///
    /// 停止、移出注册表，然后执行一次不带启动钩子的容器刷新。
    pub async fn uninstall(
        &self,
        module_id: &str,
        container: &dyn ServiceContainer,
    ) -> Result<()> {
        self.registry.stop(module_id, true).await?;
        self.registry.unload(module_id).await?;

        self.coordinator.refresh(container, false, None).await?;

        info!(module_id = %module_id, "模块已热卸载");
        Ok(())
    }

    /// 收集待装载的描述文件列表
    async fn collect_descriptor_files(&self) -> Result<Vec<std::path::PathBuf>> {
        if !self.config.modules.module_list.is_empty() {
            let mut files = Vec::new();
            for path in &self.config.modules.module_list {
                if path.exists() {
                    files.push(path.clone());
                } else {
                    error!(path = %path.display(), "配置的模块描述文件不存在，跳过");
                }
            }
            return Ok(files);
        }

        let packages = self.loader.scan().await?;
        Ok(packages
            .into_iter()
            .map(|p| p.join(MODULE_DESCRIPTOR_FILENAME))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::refresh::LoaderHandle;
    use crate::utils::CoreError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoopContainer;

    #[async_trait]
    impl ServiceContainer for NoopContainer {
        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        async fn refresh(&self) -> Result<()> {
            Ok(())
        }

        async fn set_loader(&self, _loader: LoaderHandle) -> Result<()> {
            Ok(())
        }
    }

    async fn write_package(repo: &Path, id: &str, extra: &str) {
        let dir = repo.join(id);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join(MODULE_DESCRIPTOR_FILENAME),
            format!("id: {}\nname: 模块 {}\nversion: \"1.0\"\n{}", id, id, extra),
        )
        .await
        .unwrap();
    }

    fn test_config(repo: &Path) -> PlatformConfig {
        PlatformConfig::builder()
            .platform_version("1.9.0")
            .repository_folder(repo)
            .build()
    }

    async fn test_system(config: PlatformConfig) -> ModuleSystem {
        ModuleSystem::with_validator(config, DependencyValidator::with_core_modules(vec![]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_startup_from_repository() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "formentry", "").await;
        write_package(temp.path(), "logic", "").await;

        let system = test_system(test_config(temp.path())).await;
        let started = system.startup().await.unwrap();

        assert_eq!(started.len(), 2);
        assert!(system.registry().get("formentry").await.unwrap().is_started());
    }

    #[tokio::test]
    async fn test_startup_resolves_dependency_order() {
        let temp = TempDir::new().unwrap();
        // reporting 依赖 logic，装载顺序与启动顺序无关
        write_package(
            temp.path(),
            "reporting",
            "require_modules:\n  - module_id: logic\n",
        )
        .await;
        write_package(temp.path(), "logic", "").await;

        let system = test_system(test_config(temp.path())).await;
        let started = system.startup().await.unwrap();

        assert_eq!(started.len(), 2);
    }

    #[tokio::test]
    async fn test_startup_skips_bad_package() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "formentry", "").await;
        // 描述文件损坏的包被跳过，不影响其余模块
        let broken = temp.path().join("broken");
        tokio::fs::create_dir_all(&broken).await.unwrap();
        tokio::fs::write(broken.join(MODULE_DESCRIPTOR_FILENAME), "id: [")
            .await
            .unwrap();

        let system = test_system(test_config(temp.path())).await;
        let started = system.startup().await.unwrap();
        assert_eq!(started, vec!["formentry".to_string()]);
    }

    #[tokio::test]
    async fn test_startup_fails_on_missing_mandatory() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "formentry", "").await;

        let config = PlatformConfig::builder()
            .platform_version("1.9.0")
            .repository_folder(temp.path())
            .mandatory_module("reporting")
            .build();

        let system = test_system(config).await;
        let result = system.startup().await;
        assert!(matches!(result, Err(CoreError::MandatoryModulesMissing(_))));
    }

    #[tokio::test]
    async fn test_startup_fails_on_core_module() {
        let temp = TempDir::new().unwrap();

        let system = ModuleSystem::with_validator(
            test_config(temp.path()),
            DependencyValidator::with_core_modules(vec![(
                "logic".to_string(),
                "0.2".to_string(),
            )]),
        )
        .await
        .unwrap();

        let result = system.startup().await;
        assert!(matches!(result, Err(CoreError::CoreModuleVersionsUnmet(_))));
    }

    #[tokio::test]
    async fn test_startup_with_explicit_module_list() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        tokio::fs::create_dir_all(&repo).await.unwrap();
        // 仓库里的包不应被扫描
        write_package(&repo, "ignored", "").await;

        let listed = temp.path().join("listed.yaml");
        tokio::fs::write(&listed, "id: listed\nname: 显式模块\nversion: \"1.0\"\n")
            .await
            .unwrap();

        let config = PlatformConfig::builder()
            .platform_version("1.9.0")
            .repository_folder(&repo)
            .module_file(&listed)
            .module_file(temp.path().join("missing.yaml"))
            .build();

        let system = test_system(config).await;
        let started = system.startup().await.unwrap();
        assert_eq!(started, vec!["listed".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "formentry", "").await;

        let system = test_system(test_config(temp.path())).await;
        system.startup().await.unwrap();

        system.shutdown().await;
        assert_eq!(system.registry().count().await, 0);
    }

    #[tokio::test]
    async fn test_install_and_uninstall() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        tokio::fs::create_dir_all(&repo).await.unwrap();

        let system = test_system(test_config(&repo)).await;
        system.startup().await.unwrap();

        let incoming = temp.path().join("incoming");
        write_package(&incoming, "reporting", "").await;

        let container = NoopContainer;
        let id = system
            .install(&incoming.join("reporting"), &container)
            .await
            .unwrap();
        assert_eq!(id, "reporting");
        assert!(system.registry().get("reporting").await.unwrap().is_started());

        system.uninstall("reporting", &container).await.unwrap();
        assert!(!system.registry().exists("reporting").await);
    }
}
