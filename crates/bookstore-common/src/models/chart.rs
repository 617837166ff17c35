//! Helm Chart 元数据模型
//!
//! 该模块负责读取 Chart 目录下的 `Chart.yaml`，并提供与已安装发布进行版本比较的功能。
//! Operator 只关心 Chart 的名称、版本和应用版本（appVersion）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::release::HelmRelease;

/// Chart 描述文件名
pub const CHART_FILE: &str = "Chart.yaml";

/// Chart 元数据，对应 `Chart.yaml` 中的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API 版本（v1 或 v2）
    #[serde(default)]
    pub api_version: Option<String>,
    /// Chart 名称
    pub name: String,
    /// Chart 版本（SemVer）
    pub version: String,
    /// 应用版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Chart 描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChartMetadata {
    /// 从 Chart 目录加载元数据
    pub fn load_dir(chart_dir: impl AsRef<Path>) -> Result<Self> {
        let chart_dir = chart_dir.as_ref();
        let chart_file = chart_dir.join(CHART_FILE);

        if !chart_file.is_file() {
            return Err(Error::Chart(format!(
                "Chart 目录 {} 中缺少 {}",
                chart_dir.display(),
                CHART_FILE
            )));
        }

        let content = std::fs::read_to_string(&chart_file)?;
        let metadata = Self::from_yaml(&content)?;

        tracing::debug!(
            "从 {} 加载 Chart {}",
            chart_file.display(),
            metadata
        );

        Ok(metadata)
    }

    /// 从 YAML 文本解析元数据
    pub fn from_yaml(content: &str) -> Result<Self> {
        let metadata: ChartMetadata = serde_yaml::from_str(content)?;
        metadata.validate()?;
        Ok(metadata)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Chart("Chart 名称不能为空".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::Chart(format!("Chart {} 的版本不能为空", self.name)));
        }
        Ok(())
    }

    /// 有效的应用版本（空字符串视为未设置）
    pub fn effective_app_version(&self) -> Option<&str> {
        self.app_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// 判断已安装的发布是否与当前 Chart 一致
    ///
    /// 优先比较 appVersion；Chart 未声明 appVersion 时，改为比较发布中记录的 Chart 版本。
    pub fn matches_release(&self, release: &HelmRelease) -> bool {
        match self.effective_app_version() {
            Some(app_version) => release.app_version.trim() == app_version,
            None => release.chart_version(&self.name) == Some(self.version.as_str()),
        }
    }
}

impl fmt::Display for ChartMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.effective_app_version() {
            Some(app_version) => write!(f, "{}-{} (app {})", self.name, self.version, app_version),
            None => write!(f, "{}-{}", self.name, self.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::release::NamespacedName;

    const CHART_YAML: &str = r#"
apiVersion: v2
name: bookstore
description: A Helm chart for a bookstore tenant
type: application
version: 0.1.0
appVersion: "1.16.0"
"#;

    fn release(chart: &str, app_version: &str) -> HelmRelease {
        HelmRelease::new(&NamespacedName::new("acme", "tenants"), chart, app_version)
    }

    #[test]
    fn test_parse_chart_yaml() {
        let chart = ChartMetadata::from_yaml(CHART_YAML).unwrap();
        assert_eq!(chart.name, "bookstore");
        assert_eq!(chart.version, "0.1.0");
        assert_eq!(chart.effective_app_version(), Some("1.16.0"));
        assert_eq!(chart.to_string(), "bookstore-0.1.0 (app 1.16.0)");
    }

    #[test]
    fn test_parse_rejects_missing_version() {
        let err = ChartMetadata::from_yaml("name: bookstore\nversion: \"\"\n").unwrap_err();
        assert!(matches!(err, Error::Chart(_)));
    }

    #[test]
    fn test_matches_release_by_app_version() {
        let chart = ChartMetadata::from_yaml(CHART_YAML).unwrap();
        assert!(chart.matches_release(&release("bookstore-0.1.0", "1.16.0")));
        // Chart 版本变化但 appVersion 不变时不触发升级
        assert!(chart.matches_release(&release("bookstore-0.0.9", "1.16.0")));
        assert!(!chart.matches_release(&release("bookstore-0.1.0", "1.15.2")));
    }

    #[test]
    fn test_matches_release_falls_back_to_chart_version() {
        let chart = ChartMetadata::from_yaml("name: bookstore\nversion: 0.2.0-rc.1\n").unwrap();
        assert_eq!(chart.effective_app_version(), None);
        assert!(chart.matches_release(&release("bookstore-0.2.0-rc.1", "")));
        assert!(!chart.matches_release(&release("bookstore-0.1.0", "")));
    }

    #[test]
    fn test_load_dir_missing_chart_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChartMetadata::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Chart(_)));
    }
}
