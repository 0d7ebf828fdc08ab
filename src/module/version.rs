//! 版本约束求值
//!
//! 实现平台与模块的点分版本号比较，以及描述文件中版本要求
//! 表达式的判定。要求表达式支持以下格式：
//!
//! - `1.2.3`（最低版本）
//! - `1.2.*`（通配）
//! - `1.2.2 - 1.2.3`（闭区间）
//! - `1.2.* - 1.3.*`（通配区间）
//!
//! 版本号按 `.` 分段逐段数值比较，短的一侧补零。非数字段按 0
//! 处理，解析异常时返回相等，维持历史上宽松的比较行为。

use crate::utils::{CoreError, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// 区间上界中 `*` 展开的最大修订号
const WILDCARD_UPPER: &str = "999";

/// 匹配区间边界中点分数字（可含通配符）前缀之外的残余部分
fn bound_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s?\d+[.\d*]+").unwrap_or_else(|_| unreachable!()))
}

/// 匹配区间分隔符右侧合法的开头（可选空白后跟数字）
fn range_rhs_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s?\d").unwrap_or_else(|_| unreachable!()))
}

/// 比较两个点分版本号
///
/// 任一侧版本号中的 `-SNAPSHOT` 后缀按最低修订处理，等价于
/// `.0`，即 `1.8.4-SNAPSHOT` 与 `1.8.4.0` 相等。
pub fn compare_versions(version: &str, value: &str) -> Ordering {
    // SNAPSHOT 视为最低可能版本
    let version = version.replace("-SNAPSHOT", ".0");
    let value = value.replace("-SNAPSHOT", ".0");

    let mut segments: Vec<&str> = version.split('.').collect();
    let mut others: Vec<&str> = value.split('.').collect();

    // 对齐两侧长度，短的一侧补零
    while segments.len() < others.len() {
        segments.push("0");
    }
    while others.len() < segments.len() {
        others.push("0");
    }

    for (seg, other) in segments.iter().zip(others.iter()) {
        let seg_num: i64 = seg.trim().parse().unwrap_or(0);
        let other_num: i64 = other.trim().parse().unwrap_or(0);
        match seg_num.cmp(&other_num) {
            Ordering::Equal => continue,
            unequal => return unequal,
        }
    }

    Ordering::Equal
}

/// 判定版本是否满足要求表达式（谓词形式）
pub fn matches_required_version(version: &str, requirement: &str) -> bool {
    check_required_version(version, requirement).is_ok()
}

/// 校验版本是否满足要求表达式，不满足时返回错误（上抛形式）
///
/// 空表达式视为无要求，总是满足。表达式中的 `-` 仅当右侧以
/// 可选空白加数字开头时才作为区间分隔符，因此 `1.2.3-SNAPSHOT`
/// 之类的限定符不会被误拆。
pub fn check_required_version(version: &str, requirement: &str) -> Result<()> {
    if requirement.is_empty() {
        return Ok(());
    }

    let has_wildcard = requirement.find('*').map_or(false, |i| i > 0);
    let has_separator = requirement.find('-').map_or(false, |i| i > 0);

    if has_wildcard || has_separator {
        let (lower, upper) = split_range(requirement);

        let lower = strip_bound(&lower).replace('*', "0");
        let upper = strip_bound(&upper).replace('*', WILDCARD_UPPER);

        if compare_versions(version, &lower) == Ordering::Less
            || compare_versions(version, &upper) == Ordering::Greater
        {
            return Err(CoreError::VersionOutOfBounds {
                lower,
                upper,
                actual: version.to_string(),
            });
        }
    } else if compare_versions(version, requirement) == Ordering::Less {
        return Err(CoreError::VersionBelowMinimum {
            required: requirement.to_string(),
            actual: version.to_string(),
        });
    }

    Ok(())
}

/// 按第一个合法区间分隔符拆分上下界
///
/// 没有合法分隔符时上下界同为整个表达式。
fn split_range(requirement: &str) -> (String, String) {
    let mut search_from = 0;
    while let Some(offset) = requirement[search_from..].find('-') {
        let index = search_from + offset;
        if index == 0 {
            search_from = index + 1;
            continue;
        }
        let rhs = &requirement[index + 1..];
        if range_rhs_regex().is_match(rhs) {
            return (requirement[..index].to_string(), rhs.to_string());
        }
        search_from = index + 1;
    }
    (requirement.to_string(), requirement.to_string())
}

/// 只保留边界中点分数字（可含通配符）的前缀部分
fn strip_bound(bound: &str) -> String {
    match bound_prefix_regex().find(bound) {
        Some(m) => m.as_str().trim().to_string(),
        None => bound.trim().to_string(),
    }
}
