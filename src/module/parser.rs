//! 模块描述文件解析器
//!
//! 负责从 module.yaml 文件解析模块描述符。

use std::path::Path;

use crate::module::metadata::ModuleDescriptor;
use crate::utils::{CoreError, Result};

/// 模块描述文件解析器
///
/// 提供从文件或字符串解析 module.yaml 的功能。
#[derive(Debug, Clone, Default)]
pub struct DescriptorParser;

impl DescriptorParser {
    /// 创建新的解析器实例
    pub fn new() -> Self {
        Self
    }

    /// 从文件解析模块描述符
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 文件内容不符合 YAML 格式时返回 YAML 错误
    /// - 描述符验证失败时返回 `InvalidDescriptor` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleDescriptor> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    /// 从文件同步解析模块描述符
    ///
    /// 供特权线程等非异步上下文使用。
    pub fn parse_file_sync(path: &Path) -> Result<ModuleDescriptor> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_string(&content)
    }

    /// 从字符串解析模块描述符
    pub fn parse_string(content: &str) -> Result<ModuleDescriptor> {
        let descriptor: ModuleDescriptor = serde_yaml::from_str(content)?;
        Self::validate(&descriptor)?;
        Ok(descriptor)
    }

    /// 验证模块描述符
    ///
    /// 执行以下验证：
    /// - 必填字段检查（id, name, version）
    /// - ID 格式校验（允许 `.` 分隔的命名空间）
    /// - 依赖声明的模块 ID 非空
    ///
    /// 版本号与版本要求表达式不在此处做格式校验，由版本约束
    /// 求值按宽松规则处理。
    pub fn validate(descriptor: &ModuleDescriptor) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if descriptor.id.is_empty() {
            errors.push("模块 ID 不能为空".to_string());
        } else if !Self::is_valid_module_id(&descriptor.id) {
            errors.push(format!(
                "模块 ID '{}' 格式无效，须以字母开头，只允许字母、数字、下划线、连字符和点",
                descriptor.id
            ));
        }

        if descriptor.name.is_empty() {
            errors.push("模块名称不能为空".to_string());
        }

        if descriptor.version.is_empty() {
            errors.push("模块版本号不能为空".to_string());
        }

        for (index, required) in descriptor.require_modules.iter().enumerate() {
            if required.module_id.is_empty() {
                errors.push(format!("第 {} 个依赖的模块 ID 不能为空", index + 1));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidDescriptor(errors.join("; ")))
        }
    }

    /// 检查模块 ID 格式是否有效
    ///
    /// 有效格式：字母开头，只包含字母、数字、下划线、连字符和点
    fn is_valid_module_id(id: &str) -> bool {
        let mut chars = id.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {}
            _ => return false,
        }

        id.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    }
}
