//! Helm 交互模块
//!
//! 该模块封装了对 Helm 的调用：列出发布、安装、升级和卸载。
//! `HelmClient` 是协调器与 Helm 之间的接缝，`HelmCli` 通过调用 `helm` 可执行文件实现它。

use async_trait::async_trait;
use bookstore_common::{find_release, ChartMetadata, Error, HelmRelease, NamespacedName, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;

/// 传递给 Chart 的租户参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseValues {
    /// 客户 ID
    pub customer_id: String,
}

impl ReleaseValues {
    /// 转换为 `--set-string` 参数
    fn to_set_string(&self) -> String {
        format!("customerId={}", escape_set_value(&self.customer_id))
    }
}

/// `--set` 语法中逗号和反斜杠需要转义
fn escape_set_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace(',', "\\,")
}

/// `--filter` 是正则表达式，发布名中的 `.` 需要转义
fn escape_filter(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Helm 客户端接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// 列出命名空间内的所有发布
    async fn list_releases(&self, namespace: &str) -> Result<Vec<HelmRelease>>;

    /// 安装新发布
    async fn install(&self, key: &NamespacedName, values: &ReleaseValues) -> Result<()>;

    /// 升级已有发布
    async fn upgrade(&self, key: &NamespacedName, values: &ReleaseValues) -> Result<()>;

    /// 卸载发布，发布不存在时视为成功
    async fn uninstall(&self, key: &NamespacedName) -> Result<()>;

    /// 加载 Chart 元数据
    fn load_chart(&self) -> Result<ChartMetadata>;

    /// 查找与资源匹配的发布
    async fn get_release(&self, key: &NamespacedName) -> Result<Option<HelmRelease>> {
        let releases = self.list_releases(&key.namespace).await?;
        Ok(find_release(&releases, key).cloned())
    }
}

/// 基于 `helm` 命令行的客户端
#[derive(Debug, Clone)]
pub struct HelmCli {
    /// helm 可执行文件
    binary: String,
    /// Chart 目录
    chart_dir: PathBuf,
    /// 操作超时
    timeout: Duration,
    /// 是否等待资源就绪
    wait: bool,
}

impl HelmCli {
    /// 创建新的 Helm 客户端
    pub fn new(binary: impl Into<String>, chart_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            chart_dir: chart_dir.into(),
            timeout: Duration::from_secs(300),
            wait: false,
        }
    }

    /// 从 Operator 配置创建
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(config.helm_binary.clone(), config.chart_dir.clone())
            .with_timeout(config.helm_timeout())
            .with_wait(config.helm_wait)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// `--max 0` 取消 helm 默认的 256 条上限，`--all` 包含 pending 等状态的发布
    fn list_args(&self, namespace: &str) -> Vec<String> {
        vec![
            "list".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--all".to_string(),
            "--max".to_string(),
            "0".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ]
    }

    /// 只列出名称完全匹配的发布
    fn get_args(&self, key: &NamespacedName) -> Vec<String> {
        let mut args = self.list_args(&key.namespace);
        args.push("--filter".to_string());
        args.push(format!("^{}$", escape_filter(&key.name)));
        args
    }

    fn deploy_args(&self, verb: &str, key: &NamespacedName, values: &ReleaseValues) -> Vec<String> {
        let mut args = vec![
            verb.to_string(),
            key.name.clone(),
            self.chart_dir.to_string_lossy().into_owned(),
            "--namespace".to_string(),
            key.namespace.clone(),
            "--set-string".to_string(),
            values.to_set_string(),
            "--timeout".to_string(),
            format!("{}s", self.timeout.as_secs()),
        ];
        if self.wait {
            args.push("--wait".to_string());
        }
        args
    }

    fn uninstall_args(&self, key: &NamespacedName) -> Vec<String> {
        vec![
            "uninstall".to_string(),
            key.name.clone(),
            "--namespace".to_string(),
            key.namespace.clone(),
            "--timeout".to_string(),
            format!("{}s", self.timeout.as_secs()),
        ]
    }

    /// 执行 helm 命令并返回标准输出
    async fn run(&self, args: Vec<String>) -> Result<String> {
        debug!("执行 {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Helm(format!("无法执行 {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Helm(format!(
                "helm {} 失败 ({}): {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl HelmClient for HelmCli {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<HelmRelease>> {
        let stdout = self.run(self.list_args(namespace)).await?;
        HelmRelease::parse_list(&stdout)
    }

    async fn get_release(&self, key: &NamespacedName) -> Result<Option<HelmRelease>> {
        let stdout = self.run(self.get_args(key)).await?;
        let releases = HelmRelease::parse_list(&stdout)?;
        Ok(find_release(&releases, key).cloned())
    }

    async fn install(&self, key: &NamespacedName, values: &ReleaseValues) -> Result<()> {
        self.run(self.deploy_args("install", key, values)).await?;
        info!("已安装发布 {}", key);
        Ok(())
    }

    async fn upgrade(&self, key: &NamespacedName, values: &ReleaseValues) -> Result<()> {
        self.run(self.deploy_args("upgrade", key, values)).await?;
        info!("已升级发布 {}", key);
        Ok(())
    }

    async fn uninstall(&self, key: &NamespacedName) -> Result<()> {
        match self.run(self.uninstall_args(key)).await {
            Ok(_) => {
                info!("已卸载发布 {}", key);
                Ok(())
            }
            Err(e) if e.is_release_not_found() => {
                warn!("发布 {} 不存在，跳过卸载", key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn load_chart(&self) -> Result<ChartMetadata> {
        ChartMetadata::load_dir(&self.chart_dir)
    }
}
