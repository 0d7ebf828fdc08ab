//! 模块仓库装载
//!
//! 负责模块仓库目录的定位、扫描与模块包的安装。模块包是包含
//! module.yaml 描述文件的目录，归档解包不在本层职责内。

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::config::PlatformConfig;
use crate::utils::{CoreError, Result};

/// 模块描述文件名
pub const MODULE_DESCRIPTOR_FILENAME: &str = "module.yaml";

/// 模块仓库装载器
#[derive(Debug, Clone)]
pub struct RepositoryLoader {
    repository: PathBuf,
}

impl RepositoryLoader {
    /// 按配置解析模块仓库目录
    ///
    /// 目录不存在时创建；路径存在但不是目录时报错。
    pub async fn resolve(config: &PlatformConfig) -> Result<Self> {
        let repository = config.module_repository();

        if !repository.exists() {
            tokio::fs::create_dir_all(&repository).await?;
            info!(path = %repository.display(), "已创建模块仓库目录");
        } else if !repository.is_dir() {
            return Err(CoreError::ConfigLoadFailed(format!(
                "模块仓库路径不是目录: {}",
                repository.display()
            )));
        }

        Ok(Self { repository })
    }

    /// 直接使用指定目录作为仓库
    pub fn with_repository(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
        }
    }

    /// 仓库目录路径
    pub fn repository(&self) -> &Path {
        &self.repository
    }

    /// 扫描仓库，枚举所有模块包目录
    ///
    /// 只收集直接子目录中含有 module.yaml 的目录，其余条目记录
    /// 调试日志后跳过。
    pub async fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut packages = Vec::new();

        if !self.repository.exists() {
            debug!(path = %self.repository.display(), "模块仓库目录不存在");
            return Ok(packages);
        }

        let mut entries = tokio::fs::read_dir(&self.repository).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let descriptor = path.join(MODULE_DESCRIPTOR_FILENAME);
            if descriptor.exists() {
                packages.push(path);
            } else {
                debug!(path = %path.display(), "目录中没有模块描述文件，跳过");
            }
        }

        packages.sort();
        Ok(packages)
    }

    /// 将模块包安装进仓库
    ///
    /// 按源目录名复制，仓库中已存在同名包时拒绝安装。
    pub async fn insert_package(&self, source: &Path) -> Result<PathBuf> {
        if !source.is_dir() {
            return Err(CoreError::InvalidDescriptor(format!(
                "模块包不是目录: {}",
                source.display()
            )));
        }
        if !source.join(MODULE_DESCRIPTOR_FILENAME).exists() {
            return Err(CoreError::InvalidDescriptor(format!(
                "模块包中缺少 {}: {}",
                MODULE_DESCRIPTOR_FILENAME,
                source.display()
            )));
        }

        let package_name = source
            .file_name()
            .ok_or_else(|| CoreError::InvalidDescriptor(format!(
                "无法确定模块包名: {}",
                source.display()
            )))?;

        let target = self.repository.join(package_name);
        if target.exists() {
            return Err(CoreError::ModuleAlreadyLoaded(
                package_name.to_string_lossy().to_string(),
            ));
        }

        copy_dir(source, &target).await?;
        info!(source = %source.display(), target = %target.display(), "模块包已安装");
        Ok(target)
    }

    /// 从仓库移除模块包
    pub async fn remove_package(&self, package_name: &str) -> Result<()> {
        let target = self.repository.join(package_name);
        if !target.exists() {
            warn!(package = package_name, "待移除的模块包不存在");
            return Ok(());
        }
        tokio::fs::remove_dir_all(&target).await?;
        info!(package = package_name, "模块包已移除");
        Ok(())
    }
}

/// 迭代复制目录树
async fn copy_dir(source: &Path, target: &Path) -> Result<()> {
    let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];

    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;

        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let entry_target = dst.join(entry.file_name());
            if entry_path.is_dir() {
                pending.push((entry_path, entry_target));
            } else {
                tokio::fs::copy(&entry_path, &entry_target).await?;
            }
        }
    }

    Ok(())
}
