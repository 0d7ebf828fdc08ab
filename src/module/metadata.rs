//! 模块元数据定义
//!
//! 定义模块描述文件 (module.yaml) 中的数据结构、模块状态机
//! 以及模块激活器接口。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// 依赖声明
///
/// 描述文件中 `require_modules` 列表的一项。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredModule {
    /// 依赖模块 ID
    pub module_id: String,

    /// 版本要求表达式（支持通配符与区间，None 表示任意版本）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RequiredModule {
    /// 创建不限版本的依赖声明
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            version: None,
        }
    }

    /// 附加版本要求
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// 模块描述符
///
/// 对应模块包中 module.yaml 文件的内容。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识（可含 `.` 分隔的命名空间，如 `ui.springmvc`）
    pub id: String,

    /// 模块显示名称
    pub name: String,

    /// 模块版本
    pub version: String,

    /// 要求的平台最低版本或版本区间（空表示无要求）
    #[serde(default)]
    pub require_version: String,

    /// 依赖的其他模块
    #[serde(default)]
    pub require_modules: Vec<RequiredModule>,

    /// 模块描述
    #[serde(default)]
    pub description: String,

    /// 作者信息
    #[serde(default)]
    pub author: String,

    /// 模块提供的包命名空间（用于资源路径归属判定）
    #[serde(default)]
    pub packages: Vec<String>,

    /// 自定义字段
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ModuleDescriptor {
    /// 创建新的模块描述符
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            require_version: String::new(),
            require_modules: vec![],
            description: String::new(),
            author: String::new(),
            packages: vec![],
            extra: HashMap::new(),
        }
    }

    /// 设置平台版本要求
    pub fn with_require_version(mut self, requirement: impl Into<String>) -> Self {
        self.require_version = requirement.into();
        self
    }

    /// 添加模块依赖
    pub fn with_required_module(mut self, required: RequiredModule) -> Self {
        self.require_modules.push(required);
        self
    }

    /// 模块 ID 的路径形式（`.` 替换为 `/`）
    ///
    /// 例如 `ui.springmvc` 对应 `ui/springmvc`。
    pub fn id_as_path(&self) -> String {
        self.id.replace('.', "/")
    }
}

/// 模块生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 已加载（描述符已注册，激活器未运行）
    Loaded,
    /// 已启动（激活器启动钩子已成功执行）
    Started,
    /// 已停止（曾启动过，停止钩子已通知）
    Stopped,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Loaded
    }
}

impl ModuleState {
    /// 是否可以启动（重复启动必须先停止）
    pub fn can_start(&self) -> bool {
        matches!(self, ModuleState::Loaded)
    }

    /// 是否可以停止
    pub fn can_stop(&self) -> bool {
        matches!(self, ModuleState::Started)
    }

    /// 是否可以重新装载回 Loaded 状态
    pub fn can_reload(&self) -> bool {
        matches!(self, ModuleState::Stopped)
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleState::Loaded => write!(f, "loaded"),
            ModuleState::Started => write!(f, "started"),
            ModuleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// 模块激活器
///
/// 模块在生命周期与容器刷新节点收到回调的接口。由嵌入方为
/// 各模块提供实现，以 trait 对象注册到注册表。所有方法均为
/// 同步方法，在特权线程中执行。
pub trait ModuleActivator: Send + Sync {
    /// 容器即将刷新（刷新协议第 1 步）
    fn will_refresh_context(&self) -> crate::utils::Result<()> {
        Ok(())
    }

    /// 容器刷新完成（刷新协议第 7 步）
    fn context_refreshed(&self) -> crate::utils::Result<()> {
        Ok(())
    }

    /// 模块启动
    fn started(&self) -> crate::utils::Result<()> {
        Ok(())
    }

    /// 模块停止
    fn stopped(&self) -> crate::utils::Result<()> {
        Ok(())
    }
}

/// 共享激活器句柄
pub type ActivatorHandle = Arc<dyn ModuleActivator>;

/// 注册表中的模块条目
///
/// 描述符、当前状态、激活器与运行时信息的组合。
#[derive(Clone)]
pub struct ModuleHandle {
    /// 模块描述符
    pub descriptor: ModuleDescriptor,

    /// 当前状态
    pub state: ModuleState,

    /// 模块激活器（未注册时生命周期钩子直接跳过）
    pub activator: Option<ActivatorHandle>,

    /// 模块包所在路径
    pub path: Option<PathBuf>,

    /// 加载时间
    pub loaded_at: Option<DateTime<Utc>>,

    /// 启动时间
    pub started_at: Option<DateTime<Utc>>,

    /// 最后一次生命周期错误
    pub last_error: Option<String>,
}

impl ModuleHandle {
    /// 创建新的模块条目，初始状态为 Loaded
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        Self {
            descriptor,
            state: ModuleState::Loaded,
            activator: None,
            path: None,
            loaded_at: Some(Utc::now()),
            started_at: None,
            last_error: None,
        }
    }

    /// 获取模块 ID
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// 获取模块版本
    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// 模块是否处于已启动状态
    pub fn is_started(&self) -> bool {
        self.state == ModuleState::Started
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("id", &self.descriptor.id)
            .field("version", &self.descriptor.version)
            .field("state", &self.state)
            .field("has_activator", &self.activator.is_some())
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_creation() {
        let descriptor = ModuleDescriptor::new("formentry", "表单录入", "2.5.1");

        assert_eq!(descriptor.id, "formentry");
        assert_eq!(descriptor.name, "表单录入");
        assert_eq!(descriptor.version, "2.5.1");
        assert!(descriptor.require_version.is_empty());
        assert!(descriptor.require_modules.is_empty());
    }

    #[test]
    fn test_id_as_path() {
        let descriptor = ModuleDescriptor::new("ui.springmvc", "UI", "1.0");
        assert_eq!(descriptor.id_as_path(), "ui/springmvc");

        let flat = ModuleDescriptor::new("formentry", "表单录入", "1.0");
        assert_eq!(flat.id_as_path(), "formentry");
    }

    #[test]
    fn test_state_transitions() {
        assert!(ModuleState::Loaded.can_start());
        assert!(!ModuleState::Started.can_start());
        assert!(!ModuleState::Stopped.can_start());

        assert!(ModuleState::Started.can_stop());
        assert!(!ModuleState::Loaded.can_stop());

        assert!(ModuleState::Stopped.can_reload());
        assert!(!ModuleState::Started.can_reload());
    }

    #[test]
    fn test_handle_lifecycle_fields() {
        let handle = ModuleHandle::new(ModuleDescriptor::new("logic", "规则引擎", "0.2"));

        assert_eq!(handle.id(), "logic");
        assert_eq!(handle.state, ModuleState::Loaded);
        assert!(handle.loaded_at.is_some());
        assert!(handle.started_at.is_none());
        assert!(!handle.is_started());
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = ModuleDescriptor::new("reporting", "报表", "1.2.0")
            .with_require_version("1.9.*")
            .with_required_module(RequiredModule::new("logic").with_version("0.2 - 0.5"));

        let yaml = serde_yaml::to_string(&descriptor).unwrap();
        let parsed: ModuleDescriptor = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.id, "reporting");
        assert_eq!(parsed.require_version, "1.9.*");
        assert_eq!(parsed.require_modules.len(), 1);
        assert_eq!(parsed.require_modules[0].module_id, "logic");
        assert_eq!(parsed.require_modules[0].version.as_deref(), Some("0.2 - 0.5"));
    }

    #[test]
    fn test_default_state() {
        assert_eq!(ModuleState::default(), ModuleState::Loaded);
    }
}
