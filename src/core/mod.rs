//! 核心模块
//!
//! 包含平台配置和核心模块要求表。

pub mod config;

pub use config::{LogConfig, ModuleConfig, PlatformConfig, PlatformConfigBuilder, CORE_MODULES};
