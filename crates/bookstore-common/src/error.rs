//! 错误处理模块
//!
//! 该模块提供 Bookstore Operator 的统一错误处理机制，
//! 覆盖配置、Helm 调用、Chart 解析以及序列化等错误来源。

use std::io;
use thiserror::Error;

/// Bookstore 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// Helm 命令执行错误
    #[error("Helm 错误: {0}")]
    Helm(String),

    /// Chart 加载或解析错误
    #[error("Chart 错误: {0}")]
    Chart(String),

    /// 序列化/反序列化错误
    #[error("序列化/反序列化错误: {0}")]
    Serialization(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Helm 在发布不存在时输出的错误信息
const RELEASE_NOT_FOUND: &str = "release: not found";

/// Bookstore 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 是否为 Helm 报告的 "release 不存在" 错误
    ///
    /// 只匹配 Helm 的 `release: not found` 哨兵信息，其他包含 "not found" 的错误不算。
    pub fn is_release_not_found(&self) -> bool {
        match self {
            Error::Helm(message) => message.contains(RELEASE_NOT_FOUND),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_not_found_detection() {
        let err = Error::Helm("Error: uninstall: Release not loaded: demo: release: not found".into());
        assert!(err.is_release_not_found());

        let err = Error::Helm("Error: Kubernetes cluster unreachable".into());
        assert!(!err.is_release_not_found());

        let err = Error::Chart("release: not found".into());
        assert!(!err.is_release_not_found());

        // 卸载过程中其他资源缺失不能当作发布已删除
        let err = Error::Helm(
            "Error: uninstall: failed to delete release hook: configmaps \"acme-release-notes\" not found".into(),
        );
        assert!(!err.is_release_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Config("chart_dir 不能为空".into());
        assert_eq!(err.to_string(), "配置错误: chart_dir 不能为空");
    }
}
