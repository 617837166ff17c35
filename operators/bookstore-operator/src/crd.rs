//! 自定义资源定义模块
//!
//! 该模块定义了 Bookstore 自定义资源。每个 Bookstore 代表一个租户，
//! Operator 会为其安装、升级或卸载对应的 Helm 发布。

use bookstore_common::{ChartMetadata, HelmRelease, NamespacedName};
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API 组
pub const API_GROUP: &str = "bookstore.livreiro";

/// Bookstore 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "bookstore.livreiro",
    version = "v1beta1",
    kind = "Bookstore",
    namespaced,
    status = "BookstoreStatus",
    shortname = "bs",
    printcolumn = r#"{"name":"Customer", "type":"string", "jsonPath":".spec.customerId"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"App Version", "type":"string", "jsonPath":".status.appVersion"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BookstoreSpec {
    /// 该 Bookstore 关联的客户 ID
    pub customer_id: String,
}

/// 发布阶段
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum BookstorePhase {
    #[default]
    Pending,
    Installed,
    Upgraded,
    Uninstalling,
    Failed,
}

impl fmt::Display for BookstorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bookstore 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookstoreStatus {
    /// 当前阶段
    #[serde(default)]
    pub phase: BookstorePhase,

    /// Helm 发布名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Helm 发布修订号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_revision: Option<i64>,

    /// 已部署的应用版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// 已部署的 Chart 版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_version: Option<String>,

    /// 状态消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 上次更新时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// 已处理的 metadata.generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl BookstoreStatus {
    /// 根据发布结果构建状态
    pub fn from_release(
        phase: BookstorePhase,
        release: Option<&HelmRelease>,
        chart: &ChartMetadata,
        generation: Option<i64>,
    ) -> Self {
        Self {
            phase,
            release_name: release.map(|r| r.name.clone()),
            release_revision: release.and_then(HelmRelease::revision_number),
            app_version: chart.effective_app_version().map(str::to_string),
            chart_version: Some(chart.version.clone()),
            message: None,
            last_updated: Some(Utc::now()),
            observed_generation: generation,
        }
    }

    /// 失败状态
    pub fn failed(message: impl Into<String>, generation: Option<i64>) -> Self {
        Self {
            phase: BookstorePhase::Failed,
            message: Some(message.into()),
            last_updated: Some(Utc::now()),
            observed_generation: generation,
            ..Default::default()
        }
    }
}

impl Bookstore {
    /// 资源与 Helm 发布共用的标识
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(
            self.name_any(),
            self.namespace().unwrap_or_else(|| "default".into()),
        )
    }

    /// 资源是否正在被删除
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
