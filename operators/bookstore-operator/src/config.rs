//! 配置管理模块
//!
//! 该模块负责加载 Operator 的配置：内置默认值、可选的 YAML/JSON 配置文件、
//! 以 `BOOKSTORE_` 为前缀的环境变量，优先级依次升高。命令行参数在此之上覆盖。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "BOOKSTORE";

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Operator 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// 租户 Chart 所在目录
    pub chart_dir: PathBuf,
    /// helm 可执行文件
    pub helm_binary: String,
    /// helm 操作超时时间（秒）
    pub helm_timeout_secs: u64,
    /// 安装/升级时是否等待资源就绪
    pub helm_wait: bool,
    /// 监听的命名空间，为空表示所有命名空间
    pub watch_namespace: Option<String>,
    /// 成功协调后的重新同步间隔（秒）
    pub resync_interval_secs: u64,
    /// 协调失败后的重试间隔（秒）
    pub error_requeue_secs: u64,
    /// 指标服务器监听地址
    pub metrics_address: String,
    /// 健康检查服务器监听地址
    pub health_probe_address: String,
    /// 日志级别
    pub log_level: String,
    /// 日志格式
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            chart_dir: PathBuf::from("/charts/bookstore"),
            helm_binary: "helm".to_string(),
            helm_timeout_secs: 300,
            helm_wait: false,
            watch_namespace: None,
            resync_interval_secs: 300,
            error_requeue_secs: 30,
            metrics_address: "0.0.0.0:8080".to_string(),
            health_probe_address: "0.0.0.0:8081".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl OperatorConfig {
    /// 加载配置：默认值 → 配置文件（可选）→ 环境变量
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&OperatorConfig::default()).context("构建默认配置失败")?);

        if let Some(path) = config_path {
            let file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;
            builder = builder.add_source(File::with_name(file).format(Self::file_format(path)?));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("构建配置失败")?;

        let operator_config = config
            .try_deserialize::<OperatorConfig>()
            .context("配置格式错误")?;

        operator_config.validate()?;
        Ok(operator_config)
    }

    /// 根据扩展名确定配置文件格式
    fn file_format(path: &Path) -> Result<FileFormat> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
            Some("json") => Ok(FileFormat::Json),
            _ => Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.chart_dir.as_os_str().is_empty() {
            return Err(bookstore_common::Error::Config("chart_dir 不能为空".into()).into());
        }
        if self.helm_binary.trim().is_empty() {
            return Err(bookstore_common::Error::Config("helm_binary 不能为空".into()).into());
        }
        if self.resync_interval_secs == 0 || self.error_requeue_secs == 0 {
            return Err(bookstore_common::Error::Config("重新同步与重试间隔必须大于 0".into()).into());
        }
        self.metrics_addr()?;
        self.health_probe_addr()?;
        Ok(())
    }

    /// 指标服务器地址
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics_address
            .parse()
            .with_context(|| format!("无效的指标服务器地址: {}", self.metrics_address))
    }

    /// 健康检查服务器地址
    pub fn health_probe_addr(&self) -> Result<SocketAddr> {
        self.health_probe_address
            .parse()
            .with_context(|| format!("无效的健康检查地址: {}", self.health_probe_address))
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    pub fn helm_timeout(&self) -> Duration {
        Duration::from_secs(self.helm_timeout_secs)
    }

    /// 监听的命名空间（空字符串视为所有命名空间）
    pub fn namespace(&self) -> Option<&str> {
        self.watch_namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.metrics_addr().unwrap().port(), 8080);
        assert_eq!(config.health_probe_addr().unwrap().port(), 8081);
        assert_eq!(config.namespace(), None);
    }

    #[test]
    fn test_load_yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "chart_dir: /opt/charts/bookstore\nwatch_namespace: tenants\nresync_interval_secs: 60\nlog_format: json"
        )
        .unwrap();

        let config = OperatorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.chart_dir, PathBuf::from("/opt/charts/bookstore"));
        assert_eq!(config.namespace(), Some("tenants"));
        assert_eq!(config.resync_interval(), Duration::from_secs(60));
        assert_eq!(config.log_format, LogFormat::Json);
        // 未设置的字段保留默认值
        assert_eq!(config.helm_binary, "helm");
        assert_eq!(config.error_requeue_secs, 30);
    }

    #[test]
    fn test_unsupported_file_format() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(OperatorConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = OperatorConfig {
            resync_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = OperatorConfig {
            metrics_address: "not-an-address".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = OperatorConfig {
            chart_dir: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
