//! 控制器模块
//!
//! 该模块把协调器注册到 kube-rs 控制器上，监听 Bookstore 资源的变化，
//! 可以监听所有命名空间，也可以只监听单个命名空间。

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{controller::Controller as KubeController, watcher},
};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::crd::Bookstore;
use crate::health_check::HealthChecker;
use crate::reconcile::{error_policy, reconcile, Context};

/// 控制器结构体
pub struct Controller {
    /// Kubernetes 客户端
    client: Client,
    /// 协调上下文
    context: Arc<Context>,
    /// 监听的命名空间
    namespace: Option<String>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(context: Context, namespace: Option<String>) -> Self {
        Self {
            client: context.client.clone(),
            context: Arc::new(context),
            namespace,
        }
    }

    /// 要监听的 Bookstore API
    fn api(&self) -> Api<Bookstore> {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// 运行控制器，直到收到 SIGINT/SIGTERM
    pub async fn run(self, health: HealthChecker) {
        match &self.namespace {
            Some(namespace) => info!("启动 Bookstore 控制器，监听命名空间 {}", namespace),
            None => info!("启动 Bookstore 控制器，监听所有命名空间"),
        }

        let controller = KubeController::new(self.api(), watcher::Config::default()).shutdown_on_signal();
        health.mark_started();

        controller
            .run(reconcile, error_policy, self.context.clone())
            .for_each(|result| async move {
                match result {
                    Ok((object, _)) => debug!("协调成功: {}/{}", object.namespace.as_deref().unwrap_or_default(), object.name),
                    Err(e) => error!("协调错误: {}", e),
                }
            })
            .await;

        info!("Bookstore 控制器已停止");
    }
}
