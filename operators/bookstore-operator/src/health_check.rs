//! 健康检查模块
//!
//! 该模块定期检查与 Kubernetes API Server 的连通性，
//! 并提供 `/healthz` 与 `/readyz` 供 Kubernetes 探针调用。

use anyhow::Result;
use chrono::{DateTime, Utc};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use kube::Client;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use crate::metrics::plain;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// 健康
    Healthy,
    /// 不健康
    Unhealthy,
}

/// 健康检查结果
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// 健康状态
    pub status: HealthStatus,
    /// 详细信息
    pub details: String,
    /// 上次检查时间
    pub last_check: DateTime<Utc>,
}

impl HealthCheckResult {
    fn new(status: HealthStatus, details: impl Into<String>) -> Self {
        Self {
            status,
            details: details.into(),
            last_check: Utc::now(),
        }
    }
}

/// 健康检查器
#[derive(Clone)]
pub struct HealthChecker {
    /// 控制器是否已启动
    controller_started: Arc<AtomicBool>,
    /// 最新的 API Server 检查结果
    latest_result: Arc<RwLock<HealthCheckResult>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    /// 创建新的健康检查器
    pub fn new() -> Self {
        Self {
            controller_started: Arc::new(AtomicBool::new(false)),
            latest_result: Arc::new(RwLock::new(HealthCheckResult::new(
                HealthStatus::Unhealthy,
                "健康检查尚未运行",
            ))),
        }
    }

    /// 标记控制器已启动
    pub fn mark_started(&self) {
        self.controller_started.store(true, Ordering::SeqCst);
    }

    /// 记录一次检查结果
    pub async fn record(&self, result: HealthCheckResult) {
        *self.latest_result.write().await = result;
    }

    /// 启动定期检查 API Server 连通性的任务
    pub fn spawn_api_check(&self, client: Client, interval: Duration) {
        let checker = self.clone();

        tokio::spawn(async move {
            let mut interval = time::interval(interval);
            loop {
                interval.tick().await;
                let result = match client.apiserver_version().await {
                    Ok(info) => {
                        debug!("API Server 版本: {}", info.git_version);
                        HealthCheckResult::new(HealthStatus::Healthy, format!("API Server {}", info.git_version))
                    }
                    Err(e) => {
                        warn!("无法访问 API Server: {}", e);
                        HealthCheckResult::new(HealthStatus::Unhealthy, format!("无法访问 API Server: {}", e))
                    }
                };
                checker.record(result).await;
            }
        });
    }

    /// 处理探针请求
    async fn handle(&self, req: &Request<Body>) -> Response<Body> {
        match req.uri().path() {
            "/healthz" => plain(StatusCode::OK, "ok"),
            "/readyz" => self.readiness().await,
            _ => plain(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    /// 就绪检查：控制器已启动且 API Server 可达
    async fn readiness(&self) -> Response<Body> {
        if !self.controller_started.load(Ordering::SeqCst) {
            return plain(StatusCode::SERVICE_UNAVAILABLE, "controller not started");
        }

        let result = self.latest_result.read().await;
        let status_code = match result.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "status": format!("{:?}", result.status),
            "details": result.details,
            "last_check": result.last_check.to_rfc3339(),
        });

        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = status_code;
        response
    }

    /// 启动探针服务器，直到 `shutdown` 完成
    pub async fn serve(self, addr: SocketAddr, shutdown: impl Future<Output = ()>) -> Result<()> {
        let make_svc = make_service_fn(move |_| {
            let checker = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let checker = checker.clone();
                    async move { Ok::<_, Infallible>(checker.handle(&req).await) }
                }))
            }
        });

        info!("健康检查服务器启动在 {}", addr);

        Server::try_bind(&addr)?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let checker = HealthChecker::new();
        assert_eq!(checker.handle(&get("/healthz")).await.status(), StatusCode::OK);
        assert_eq!(checker.handle(&get("/nope")).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_readiness_requires_started_controller_and_api() {
        let checker = HealthChecker::new();
        assert_eq!(
            checker.handle(&get("/readyz")).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        checker.mark_started();
        // API Server 尚未检查
        assert_eq!(
            checker.handle(&get("/readyz")).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        checker
            .record(HealthCheckResult::new(HealthStatus::Healthy, "API Server v1.26.3"))
            .await;
        assert_eq!(checker.handle(&get("/readyz")).await.status(), StatusCode::OK);
    }
}
