//! # Xinglin Core - 杏林平台内核
//!
//! 杏林医疗信息平台的内核组件，提供模块生命周期子系统：
//!
//! - **版本约束**: 平台版本比较与模块版本要求匹配
//! - **模块注册表**: 模块的装载、启动、停止与热装卸
//! - **启动校验**: 核心模块与必备模块的启动门禁
//! - **特权执行器**: 工作线程上的提权任务执行
//! - **容器刷新**: 服务容器的严格有序重载
//! - **配置管理**: 统一的配置加载和管理
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use xinglin_core::{ModuleSystem, PlatformConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 装配模块系统
//!     let config = PlatformConfig::default();
//!     let system = ModuleSystem::new(config).await?;
//!
//!     // 平台启动
//!     system.startup().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块生命周期相关类型
//! - `utils` - 工具函数和错误类型
//! - `core` - 核心配置

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    check_required_version, compare_versions, is_daemon_thread, Daemon, DependencyValidator,
    DescriptorParser, DispatchToken, LoaderState, ModuleActivator, ModuleDescriptor, ModuleHandle,
    ModuleRegistry, ModuleState, ModuleSystem, RefreshCoordinator, RepositoryLoader,
    RequiredModule, ServiceContainer,
};

pub use utils::{error_code, CoreError, Result};
pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{
    LogConfig, ModuleConfig, PlatformConfig, PlatformConfigBuilder, CORE_MODULES,
};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
