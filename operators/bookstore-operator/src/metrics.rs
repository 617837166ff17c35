//! 指标收集与导出模块
//!
//! 该模块记录协调次数、失败次数和耗时，并通过 Prometheus 格式在 `/metrics` 导出。

use anyhow::Result;
use bookstore_common::ReleaseAction;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramTimer, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tracing::{error, info};

/// Operator 指标
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus 注册表
    registry: Registry,
    /// 按动作统计的协调次数
    reconciliations: IntCounterVec,
    /// 协调失败次数
    failures: IntCounter,
    /// 协调耗时
    duration: Histogram,
}

impl Metrics {
    /// 创建并注册指标
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "bookstore_reconciliations_total",
                "Total number of Bookstore reconciliations by release action",
            ),
            &["action"],
        )?;

        let failures = IntCounter::new(
            "bookstore_reconcile_errors_total",
            "Total number of failed Bookstore reconciliations",
        )?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "bookstore_reconcile_duration_seconds",
                "Duration of Bookstore reconciliations",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            failures,
            duration,
        })
    }

    /// 开始计时，计时器在 drop 时记录耗时
    pub fn start_timer(&self) -> HistogramTimer {
        self.duration.start_timer()
    }

    /// 记录一次成功的协调
    pub fn record_action(&self, action: ReleaseAction) {
        self.reconciliations.with_label_values(&[action.as_str()]).inc();
    }

    /// 记录一次失败的协调
    pub fn record_failure(&self) {
        self.failures.inc();
    }

    /// 以文本格式编码所有指标
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }

    fn response(&self, req: &Request<Body>) -> Response<Body> {
        if req.uri().path() != "/metrics" {
            return plain(StatusCode::NOT_FOUND, "Not Found");
        }

        match self.encode() {
            Ok((content_type, buffer)) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", content_type)
                .body(Body::from(buffer))
                .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, "encode error")),
            Err(e) => {
                error!("编码指标失败: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "encode error")
            }
        }
    }

    /// 启动指标服务器，直到 `shutdown` 完成
    pub async fn serve(self, addr: SocketAddr, shutdown: impl Future<Output = ()>) -> Result<()> {
        let make_svc = make_service_fn(move |_| {
            let metrics = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let response = metrics.response(&req);
                    async move { Ok::<_, Infallible>(response) }
                }))
            }
        });

        info!("指标服务器启动在 {}", addr);

        Server::try_bind(&addr)?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

pub(crate) fn plain(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_encode() {
        let metrics = Metrics::new().unwrap();
        metrics.record_action(ReleaseAction::Install);
        metrics.record_action(ReleaseAction::Install);
        metrics.record_action(ReleaseAction::UpToDate);
        metrics.record_failure();
        drop(metrics.start_timer());

        let (content_type, buffer) = metrics.encode().unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains(r#"bookstore_reconciliations_total{action="install"} 2"#));
        assert!(text.contains(r#"bookstore_reconciliations_total{action="up_to_date"} 1"#));
        assert!(text.contains("bookstore_reconcile_errors_total 1"));
        assert!(text.contains("bookstore_reconcile_duration_seconds_count 1"));
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let metrics = Metrics::new().unwrap();
        let req = Request::builder().uri("/other").body(Body::empty()).unwrap();
        assert_eq!(metrics.response(&req).status(), StatusCode::NOT_FOUND);

        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        assert_eq!(metrics.response(&req).status(), StatusCode::OK);
    }
}
