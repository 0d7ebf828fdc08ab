//! 平台配置
//!
//! 定义平台的配置结构和加载逻辑，包括模块仓库目录、
//! 必备模块属性与核心模块版本要求表。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// 平台核心模块要求表
///
/// 每项为（模块 ID，最低版本）。平台自身功能依赖这些模块，
/// 启动校验时要求它们已启动且版本不低于表中值。
pub const CORE_MODULES: &[(&str, &str)] = &[("logic", "0.2")];

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 模块管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块仓库目录（未设置时默认为 `<data_dir>/modules`）
    #[serde(default)]
    pub repository_folder: Option<PathBuf>,

    /// 启动时显式加载的模块描述文件列表
    #[serde(default)]
    pub module_list: Vec<PathBuf>,

    /// 是否跳过核心模块启动校验（仅供开发和测试环境使用）
    #[serde(default)]
    pub ignore_core_modules: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            repository_folder: None,
            module_list: vec![],
            ignore_core_modules: false,
        }
    }
}

/// 平台配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 平台版本（用于描述文件中的平台版本约束校验）
    #[serde(default = "default_platform_version")]
    pub platform_version: String,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 平台属性表
    ///
    /// 形如 `<moduleId>.mandatory = "true"` 的属性将该模块标记为必备模块。
    #[serde(default)]
    pub properties: HashMap<String, String>,

    /// 数据目录
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_platform_version() -> String {
    crate::VERSION.to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            platform_version: default_platform_version(),
            logging: LogConfig::default(),
            modules: ModuleConfig::default(),
            properties: HashMap::new(),
            data_dir: None,
        }
    }
}

impl PlatformConfig {
    /// 创建配置构建器
    pub fn builder() -> PlatformConfigBuilder {
        PlatformConfigBuilder::new()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> crate::utils::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;

        let mut config: PlatformConfig = if path.extension().map(|e| e == "json").unwrap_or(false)
        {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        Ok(config)
    }

    /// 解析模块仓库目录
    ///
    /// 优先使用显式配置的 `repository_folder`；未配置时回退到
    /// `<data_dir>/modules`，再回退到当前目录下的 `modules`。
    pub fn module_repository(&self) -> PathBuf {
        if let Some(ref folder) = self.modules.repository_folder {
            return folder.clone();
        }
        match self.data_dir {
            Some(ref data_dir) => data_dir.join("modules"),
            None => PathBuf::from("modules"),
        }
    }

    /// 列出所有被属性表标记为必备的模块 ID
    ///
    /// 扫描属性表中以 `.mandatory` 结尾且值为 `"true"`（忽略大小写）的键。
    pub fn mandatory_module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .properties
            .iter()
            .filter(|(key, value)| {
                key.ends_with(".mandatory") && value.trim().eq_ignore_ascii_case("true")
            })
            .map(|(key, _)| key.trim_end_matches(".mandatory").to_string())
            .collect();
        ids.sort();
        ids
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct PlatformConfigBuilder {
    config: PlatformConfig,
}

impl PlatformConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: PlatformConfig::default(),
        }
    }

    /// 设置配置文件路径
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// 设置平台版本
    pub fn platform_version(mut self, version: impl Into<String>) -> Self {
        self.config.platform_version = version.into();
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置模块仓库目录
    pub fn repository_folder(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.repository_folder = Some(dir.into());
        self
    }

    /// 添加启动时加载的模块描述文件
    pub fn module_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.modules.module_list.push(path.into());
        self
    }

    /// 跳过核心模块启动校验
    pub fn ignore_core_modules(mut self) -> Self {
        self.config.modules.ignore_core_modules = true;
        self
    }

    /// 设置平台属性
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.properties.insert(key.into(), value.into());
        self
    }

    /// 将模块标记为必备模块
    pub fn mandatory_module(self, module_id: &str) -> Self {
        self.property(format!("{}.mandatory", module_id), "true")
    }

    /// 设置数据目录
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = Some(dir.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> PlatformConfig {
        self.config
    }
}
