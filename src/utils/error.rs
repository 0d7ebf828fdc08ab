//! 杏林模块内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型。

use thiserror::Error;

/// 杏林内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 模块管理错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块已加载
    #[error("模块已加载: '{0}'")]
    ModuleAlreadyLoaded(String),

    /// 模块已启动（未经停止不能再次启动）
    #[error("模块已启动: '{0}'")]
    ModuleAlreadyStarted(String),

    /// 模块未处于已启动状态
    #[error("模块未启动: '{0}'")]
    ModuleNotStarted(String),

    /// 模块启动失败（激活器失败或依赖未满足，模块保持 Loaded 状态）
    #[error("模块启动失败: '{module_id}' - {reason}")]
    ModuleStartFailed {
        module_id: String,
        reason: String,
    },

    /// 模块停止失败
    #[error("模块停止失败: '{module_id}' - {reason}")]
    ModuleStopFailed {
        module_id: String,
        reason: String,
    },

    /// 无效的模块描述文件
    #[error("无效的模块描述文件: {0}")]
    InvalidDescriptor(String),

    /// 无效的资源路径（必须形如 /moduleId/resource）
    #[error("无效的资源路径: {0}")]
    InvalidPath(String),

    // ==================== 版本约束错误 ====================

    /// 实际版本低于要求的最低版本
    #[error("版本低于最低要求: 要求 {required}, 实际 {actual}")]
    VersionBelowMinimum {
        required: String,
        actual: String,
    },

    /// 实际版本超出要求的版本范围
    #[error("版本超出范围: 要求 [{lower} - {upper}], 实际 {actual}")]
    VersionOutOfBounds {
        lower: String,
        upper: String,
        actual: String,
    },

    // ==================== 启动校验错误 ====================

    /// 配置为必备的模块未全部启动（一次性列出所有缺失的模块）
    #[error("必备模块未启动: {0:?}")]
    MandatoryModulesMissing(Vec<String>),

    /// 平台核心模块未满足最低版本要求（一次性列出所有未满足项）
    #[error("核心模块版本要求未满足: {0:?}")]
    CoreModuleVersionsUnmet(Vec<(String, String)>),

    // ==================== 特权执行错误 ====================

    /// 非特权上下文试图派生无人监管的特权工作
    #[error("特权越界: {0}")]
    PrivilegeViolation(String),

    /// 调用方无权使用受限入口（定时任务派发）
    #[error("鉴权失败: {0}")]
    AuthorizationFailure(String),

    /// 特权工作发生 panic（会话已在守卫中关闭）
    #[error("特权工作异常终止: {0}")]
    PrivilegedWorkPanicked(String),

    // ==================== 容器刷新错误 ====================

    /// 容器重建失败（无容器则平台无法运行，直接上抛）
    #[error("容器刷新失败: {0}")]
    ContainerRefreshFailed(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_ALREADY_LOADED: &str = "MODULE-002";
    pub const MODULE_START_FAILED: &str = "MODULE-003";
    pub const MODULE_STOP_FAILED: &str = "MODULE-004";
    pub const MODULE_INVALID_DESCRIPTOR: &str = "MODULE-005";

    // 版本错误 (VERSION-xxx)
    pub const VERSION_BELOW_MINIMUM: &str = "VERSION-001";
    pub const VERSION_OUT_OF_BOUNDS: &str = "VERSION-002";

    // 启动校验错误 (STARTUP-xxx)
    pub const STARTUP_MANDATORY_MISSING: &str = "STARTUP-001";
    pub const STARTUP_CORE_UNMET: &str = "STARTUP-002";

    // 特权执行错误 (DAEMON-xxx)
    pub const DAEMON_PRIVILEGE_VIOLATION: &str = "DAEMON-001";
    pub const DAEMON_AUTHORIZATION_FAILURE: &str = "DAEMON-002";
    pub const DAEMON_WORK_PANICKED: &str = "DAEMON-003";

    // 容器错误 (CONTAINER-xxx)
    pub const CONTAINER_REFRESH_FAILED: &str = "CONTAINER-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleAlreadyLoaded(_) => error_code::MODULE_ALREADY_LOADED,
            CoreError::ModuleAlreadyStarted(_) => error_code::MODULE_ALREADY_LOADED,
            CoreError::ModuleStartFailed { .. } => error_code::MODULE_START_FAILED,
            CoreError::ModuleStopFailed { .. } => error_code::MODULE_STOP_FAILED,
            CoreError::InvalidDescriptor(_) => error_code::MODULE_INVALID_DESCRIPTOR,
            CoreError::VersionBelowMinimum { .. } => error_code::VERSION_BELOW_MINIMUM,
            CoreError::VersionOutOfBounds { .. } => error_code::VERSION_OUT_OF_BOUNDS,
            CoreError::MandatoryModulesMissing(_) => error_code::STARTUP_MANDATORY_MISSING,
            CoreError::CoreModuleVersionsUnmet(_) => error_code::STARTUP_CORE_UNMET,
            CoreError::PrivilegeViolation(_) => error_code::DAEMON_PRIVILEGE_VIOLATION,
            CoreError::AuthorizationFailure(_) => error_code::DAEMON_AUTHORIZATION_FAILURE,
            CoreError::PrivilegedWorkPanicked(_) => error_code::DAEMON_WORK_PANICKED,
            CoreError::ContainerRefreshFailed(_) => error_code::CONTAINER_REFRESH_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            _ => "UNKNOWN",
        }
    }

    /// 是否为启动阻断性错误（平台级致命）
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::MandatoryModulesMissing(_) | CoreError::CoreModuleVersionsUnmet(_)
        )
    }
}
