//! Bookstore Operator - 通过 Helm 管理 Bookstore 租户
//!
//! 该模块实现了 Bookstore 的 Kubernetes Operator：为每个 Bookstore 资源安装 Helm 发布，
//! 在 Chart 的应用版本变化时升级发布，并在资源删除时卸载发布。

pub mod config;
pub mod controller;
pub mod crd;
pub mod event_handler;
pub mod health_check;
pub mod helm;
pub mod metrics;
pub mod reconcile;

use anyhow::{Context as _, Result};
use kube::Client;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::health_check::HealthChecker;
use crate::helm::{HelmCli, HelmClient};
use crate::metrics::Metrics;
use crate::reconcile::{Context, Reconciler};

/// API Server 连通性检查间隔
const API_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Operator 主结构体
pub struct BookstoreOperator {
    /// Kubernetes 客户端
    client: Client,
    /// Operator 配置
    config: OperatorConfig,
    /// 指标
    metrics: Metrics,
    /// 健康检查器
    health: HealthChecker,
    /// Helm 客户端
    helm: Arc<dyn HelmClient>,
}

impl BookstoreOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        config.validate()?;

        // 创建 Kubernetes 客户端
        let client = Client::try_default()
            .await
            .context("创建 Kubernetes 客户端失败")?;

        let helm: Arc<dyn HelmClient> = Arc::new(HelmCli::from_config(&config));
        let chart = helm.load_chart().context("加载租户 Chart 失败")?;
        info!("使用 Chart {}（目录 {}）", chart, config.chart_dir.display());

        Ok(Self {
            client,
            metrics: Metrics::new()?,
            health: HealthChecker::new(),
            helm,
            config,
        })
    }

    /// 运行 Operator，直到收到退出信号
    pub async fn run(self) -> Result<()> {
        let metrics_addr = self.config.metrics_addr()?;
        let probe_addr = self.config.health_probe_addr()?;

        // 控制器退出时通知 HTTP 服务器停止
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let wait_for_shutdown = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
            let _ = rx.changed().await;
        };

        let metrics = self.metrics.clone();
        let metrics_shutdown = wait_for_shutdown(shutdown_rx.clone());
        let metrics_server = tokio::spawn(async move {
            if let Err(e) = metrics.serve(metrics_addr, metrics_shutdown).await {
                error!("指标服务器错误: {}", e);
            }
        });

        self.health.spawn_api_check(self.client.clone(), API_CHECK_INTERVAL);
        let health = self.health.clone();
        let health_shutdown = wait_for_shutdown(shutdown_rx);
        let health_server = tokio::spawn(async move {
            if let Err(e) = health.serve(probe_addr, health_shutdown).await {
                error!("健康检查服务器错误: {}", e);
            }
        });

        let reconciler = Reconciler::new(self.helm.clone(), self.metrics.clone(), &self.config);
        let context = Context::new(self.client.clone(), reconciler);
        let namespace = self.config.namespace().map(str::to_string);

        controller::Controller::new(context, namespace)
            .run(self.health.clone())
            .await;

        let _ = shutdown_tx.send(true);
        for server in [metrics_server, health_server] {
            if let Err(e) = server.await {
                error!("HTTP 服务器任务异常退出: {}", e);
            }
        }

        info!("Bookstore Operator 已停止");
        Ok(())
    }
}
