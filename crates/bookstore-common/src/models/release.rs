//! Helm 发布模型
//!
//! 该模块定义了 Helm 发布（release）的数据结构以及 Operator 的发布动作判定逻辑。
//! 每个 Bookstore 资源对应一个同名、同命名空间的 Helm 发布。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::chart::ChartMetadata;

/// 命名空间 + 名称，用于唯一标识 Bookstore 资源及其 Helm 发布
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    /// 资源名称，同时作为 Helm 发布名称
    pub name: String,
    /// 命名空间
    pub namespace: String,
}

impl NamespacedName {
    /// 创建新的 NamespacedName
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// `helm list --output json` 返回的单个发布
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRelease {
    /// 发布名称
    pub name: String,
    /// 发布所在命名空间
    pub namespace: String,
    /// 发布修订号
    #[serde(default)]
    pub revision: String,
    /// 最近更新时间（Helm 原样输出的字符串）
    #[serde(default)]
    pub updated: String,
    /// 发布状态：deployed、failed、pending-install 等
    #[serde(default)]
    pub status: String,
    /// Chart 名称与版本，格式为 `<name>-<version>`
    #[serde(default)]
    pub chart: String,
    /// 应用版本
    #[serde(default)]
    pub app_version: String,
}

impl HelmRelease {
    /// 构造一个已部署的发布（主要用于测试）
    pub fn new(key: &NamespacedName, chart: &str, app_version: &str) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            revision: "1".to_string(),
            updated: String::new(),
            status: "deployed".to_string(),
            chart: chart.to_string(),
            app_version: app_version.to_string(),
        }
    }

    /// 解析 `helm list --output json` 的输出
    pub fn parse_list(output: &str) -> crate::Result<Vec<Self>> {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(trimmed)
            .map_err(|e| crate::Error::Serialization(format!("无法解析 helm list 输出: {}", e)))
    }

    /// 是否属于指定的资源
    pub fn is_for(&self, key: &NamespacedName) -> bool {
        self.name == key.name && self.namespace == key.namespace
    }

    /// 发布是否处于 deployed 状态
    pub fn is_deployed(&self) -> bool {
        self.status == "deployed"
    }

    /// 发布是否仍在进行中（pending-install、pending-upgrade、pending-rollback）
    pub fn is_pending(&self) -> bool {
        self.status.starts_with("pending-")
    }

    /// 修订号（无法解析时返回 None）
    pub fn revision_number(&self) -> Option<i64> {
        self.revision.trim().parse().ok()
    }

    /// 从 `chart` 字段中提取 Chart 版本
    pub fn chart_version(&self, chart_name: &str) -> Option<&str> {
        self.chart
            .strip_prefix(chart_name)
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|version| !version.is_empty())
    }
}

/// 在发布列表中查找与资源匹配的发布
pub fn find_release<'a>(releases: &'a [HelmRelease], key: &NamespacedName) -> Option<&'a HelmRelease> {
    releases.iter().find(|release| release.is_for(key))
}

/// 协调动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseAction {
    /// 安装新发布
    Install,
    /// 升级已有发布
    Upgrade,
    /// 卸载发布
    Uninstall,
    /// 发布已是最新，无需操作
    UpToDate,
}

impl ReleaseAction {
    /// 根据资源是否存在、已安装发布以及 Chart 元数据决定动作
    ///
    /// 资源不存在时总是卸载（即便发布也不存在，卸载是幂等的）。
    pub fn plan(
        resource_exists: bool,
        release: Option<&HelmRelease>,
        chart: &ChartMetadata,
    ) -> Self {
        if !resource_exists {
            return ReleaseAction::Uninstall;
        }

        match release {
            None => ReleaseAction::Install,
            Some(release) if chart.matches_release(release) => ReleaseAction::UpToDate,
            Some(_) => ReleaseAction::Upgrade,
        }
    }

    /// 动作名称，用于日志、事件与指标标签
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseAction::Install => "install",
            ReleaseAction::Upgrade => "upgrade",
            ReleaseAction::Uninstall => "uninstall",
            ReleaseAction::UpToDate => "up_to_date",
        }
    }
}

impl fmt::Display for ReleaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn chart(app_version: Option<&str>) -> ChartMetadata {
        ChartMetadata {
            api_version: Some("v2".to_string()),
            name: "bookstore".to_string(),
            version: "0.1.0".to_string(),
            app_version: app_version.map(str::to_string),
            description: None,
        }
    }

    fn key() -> NamespacedName {
        NamespacedName::new("acme", "tenants")
    }

    #[rstest]
    #[case(false, None, ReleaseAction::Uninstall)]
    #[case(false, Some("1.16.0"), ReleaseAction::Uninstall)]
    #[case(true, None, ReleaseAction::Install)]
    #[case(true, Some("1.16.0"), ReleaseAction::UpToDate)]
    #[case(true, Some("1.15.0"), ReleaseAction::Upgrade)]
    fn test_plan(
        #[case] resource_exists: bool,
        #[case] installed_app_version: Option<&str>,
        #[case] expected: ReleaseAction,
    ) {
        let release = installed_app_version.map(|v| HelmRelease::new(&key(), "bookstore-0.1.0", v));
        let action = ReleaseAction::plan(resource_exists, release.as_ref(), &chart(Some("1.16.0")));
        assert_eq!(action, expected);
    }

    #[test]
    fn test_parse_helm_list_output() {
        let output = r#"[
            {"name":"acme","namespace":"tenants","revision":"3","updated":"2022-05-04 10:12:01.123 +0000 UTC","status":"deployed","chart":"bookstore-0.1.0","app_version":"1.16.0"},
            {"name":"globex","namespace":"tenants","revision":"1","updated":"2022-05-04 10:13:44.001 +0000 UTC","status":"failed","chart":"bookstore-0.1.0","app_version":"1.16.0"}
        ]"#;

        let releases = HelmRelease::parse_list(output).unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].revision_number(), Some(3));
        assert_eq!(releases[1].status, "failed");
        assert!(releases[0].is_deployed());
        assert!(!releases[1].is_deployed());
        assert!(!releases[1].is_pending());

        let found = find_release(&releases, &key()).unwrap();
        assert_eq!(found.chart_version("bookstore"), Some("0.1.0"));
        assert!(find_release(&releases, &NamespacedName::new("acme", "other")).is_none());
    }

    #[test]
    fn test_parse_empty_helm_list_output() {
        assert!(HelmRelease::parse_list("").unwrap().is_empty());
        assert!(HelmRelease::parse_list("[]\n").unwrap().is_empty());
        assert!(matches!(
            HelmRelease::parse_list("not json"),
            Err(crate::Error::Serialization(_))
        ));
    }

    #[test]
    fn test_chart_version_requires_matching_name() {
        let release = HelmRelease::new(&key(), "bookstore-extra-0.3.0", "");
        assert_eq!(release.chart_version("bookstore-extra"), Some("0.3.0"));
        assert_eq!(release.chart_version("other"), None);
    }

    #[rstest]
    #[case("deployed", true, false)]
    #[case("pending-install", false, true)]
    #[case("pending-upgrade", false, true)]
    #[case("failed", false, false)]
    #[case("superseded", false, false)]
    fn test_release_state(#[case] status: &str, #[case] deployed: bool, #[case] pending: bool) {
        let mut release = HelmRelease::new(&key(), "bookstore-0.1.0", "1.16.0");
        release.status = status.to_string();
        assert_eq!(release.is_deployed(), deployed);
        assert_eq!(release.is_pending(), pending);
    }
}
