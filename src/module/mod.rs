//! 模块管理模块
//!
//! 包含模块生命周期系统的核心组件：
//! - 版本比较与版本约束
//! - 模块元数据与激活器接口
//! - 描述文件解析
//! - 模块仓库装载
//! - 注册表与生命周期管理
//! - 启动依赖校验
//! - 特权执行器
//! - 容器刷新协调

pub mod daemon;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod parser;
pub mod refresh;
pub mod registry;
pub mod validator;
pub mod version;

// 重导出常用类型
pub use daemon::{is_daemon_thread, Daemon, DaemonHandle, DispatchToken, Session, SessionFactory};
pub use loader::{RepositoryLoader, MODULE_DESCRIPTOR_FILENAME};
pub use manager::ModuleSystem;
pub use metadata::{
    ActivatorHandle, ModuleActivator, ModuleDescriptor, ModuleHandle, ModuleState, RequiredModule,
};
pub use parser::DescriptorParser;
pub use refresh::{LoaderHandle, LoaderState, RefreshCoordinator, ServiceContainer};
pub use registry::ModuleRegistry;
pub use validator::DependencyValidator;
pub use version::{check_required_version, compare_versions, matches_required_version};
