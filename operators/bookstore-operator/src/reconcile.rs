//! 资源协调模块
//!
//! 该模块实现 Bookstore 的协调逻辑：资源被删除时卸载 Helm 发布，
//! 发布不存在时安装，Chart 的应用版本与已安装发布不同时升级。
//! 任何错误都会导致资源重新入队。

use bookstore_common::{ChartMetadata, HelmRelease, NamespacedName, ReleaseAction};
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    runtime::{
        controller::Action,
        finalizer::{finalizer, Error as FinalizerError, Event as Finalizer},
    },
    ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::crd::{Bookstore, BookstorePhase, BookstoreStatus};
use crate::event_handler::{EventHandler, CONTROLLER_NAME};
use crate::helm::{HelmClient, ReleaseValues};
use crate::metrics::Metrics;

/// 保证在资源删除前卸载发布的 finalizer
pub const FINALIZER: &str = "bookstore.livreiro/helm-release";

/// 协调错误
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes API 错误
    #[error("Kubernetes 错误: {0}")]
    Kube(#[from] kube::Error),

    /// Helm 或 Chart 错误
    #[error(transparent)]
    Release(#[from] bookstore_common::Error),
}

/// 一次发布同步的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseOutcome {
    /// 执行的动作
    pub action: ReleaseAction,
    /// 使用的 Chart（卸载时不加载 Chart）
    pub chart: Option<ChartMetadata>,
    /// 同步后的发布
    pub release: Option<HelmRelease>,
}

/// 协调器
pub struct Reconciler {
    /// Helm 客户端
    helm: Arc<dyn HelmClient>,
    /// 指标
    metrics: Metrics,
    /// 成功后的重新同步间隔
    resync_interval: Duration,
    /// 失败后的重试间隔
    error_requeue: Duration,
}

impl Reconciler {
    /// 创建新的协调器
    pub fn new(helm: Arc<dyn HelmClient>, metrics: Metrics, config: &OperatorConfig) -> Self {
        Self {
            helm,
            metrics,
            resync_interval: config.resync_interval(),
            error_requeue: config.error_requeue(),
        }
    }

    /// 使 Helm 发布与资源状态一致
    ///
    /// 资源不存在时直接卸载，不读取发布列表也不加载 Chart。
    pub async fn sync_release(
        &self,
        key: &NamespacedName,
        values: &ReleaseValues,
        resource_exists: bool,
    ) -> Result<ReleaseOutcome, ReconcileError> {
        let (action, installed, chart) = if resource_exists {
            let installed = self.helm.get_release(key).await?;
            let chart = self.helm.load_chart()?;
            let action = ReleaseAction::plan(resource_exists, installed.as_ref(), &chart);
            (action, installed, Some(chart))
        } else {
            (ReleaseAction::Uninstall, None, None)
        };
        let chart_label = chart.as_ref().map(ToString::to_string).unwrap_or_default();

        match action {
            ReleaseAction::Install => {
                info!("安装租户 {}，Chart {}", key, chart_label);
                self.helm.install(key, values).await?;
            }
            ReleaseAction::Upgrade => {
                info!(
                    "升级租户 {}：{} -> {}",
                    key,
                    installed.as_ref().map(|r| r.chart.as_str()).unwrap_or_default(),
                    chart_label
                );
                self.helm.upgrade(key, values).await?;
            }
            ReleaseAction::Uninstall => {
                info!("卸载租户 {}", key);
                self.helm.uninstall(key).await?;
            }
            ReleaseAction::UpToDate => {
                debug!("租户 {} 的发布已是最新", key);
            }
        }

        let release = match action {
            ReleaseAction::Install | ReleaseAction::Upgrade => self.helm.get_release(key).await?,
            ReleaseAction::Uninstall => None,
            ReleaseAction::UpToDate => installed,
        };

        Ok(ReleaseOutcome {
            action,
            chart,
            release,
        })
    }
}

/// 根据同步结果计算期望的状态
pub fn desired_status(
    outcome: &ReleaseOutcome,
    current: Option<&BookstoreStatus>,
    generation: Option<i64>,
) -> Option<BookstoreStatus> {
    let chart = outcome.chart.as_ref()?;
    let phase = match outcome.action {
        ReleaseAction::Install => BookstorePhase::Installed,
        ReleaseAction::Upgrade => BookstorePhase::Upgraded,
        ReleaseAction::Uninstall => BookstorePhase::Uninstalling,
        ReleaseAction::UpToDate => match current.map(|s| s.phase) {
            Some(phase @ (BookstorePhase::Installed | BookstorePhase::Upgraded)) => phase,
            _ => BookstorePhase::Installed,
        },
    };
    let mut status = BookstoreStatus::from_release(phase, outcome.release.as_ref(), chart, generation);

    // Helm 记录的发布状态优先于本次动作
    if let Some(release) = outcome.release.as_ref().filter(|r| !r.is_deployed()) {
        status.phase = if release.is_pending() {
            BookstorePhase::Pending
        } else {
            BookstorePhase::Failed
        };
        status.message = Some(format!("Helm 发布 {} 处于 {} 状态", release.name, release.status));
    }

    Some(status)
}

/// 状态是否需要写回（忽略更新时间）
pub fn needs_status_update(current: Option<&BookstoreStatus>, desired: &BookstoreStatus) -> bool {
    match current {
        None => true,
        Some(current) => {
            let mut current = current.clone();
            current.last_updated = desired.last_updated;
            &current != desired
        }
    }
}

/// 资源是否已不存在或正在删除
pub async fn is_uninstall(api: &Api<Bookstore>, name: &str) -> Result<bool, kube::Error> {
    Ok(match api.get_opt(name).await? {
        None => true,
        Some(bookstore) => bookstore.is_deleting(),
    })
}

/// 控制器共享上下文
pub struct Context {
    /// Kubernetes 客户端
    pub client: Client,
    /// 协调器
    pub reconciler: Reconciler,
    /// 事件处理器
    pub events: EventHandler,
}

impl Context {
    /// 创建新的上下文
    pub fn new(client: Client, reconciler: Reconciler) -> Self {
        let events = EventHandler::new(client.clone());
        Self {
            client,
            reconciler,
            events,
        }
    }

    async fn apply(&self, api: &Api<Bookstore>, bookstore: Arc<Bookstore>) -> Result<Action, ReconcileError> {
        let key = bookstore.key();
        let resource_exists = !is_uninstall(api, &key.name).await?;
        let values = ReleaseValues {
            customer_id: bookstore.spec.customer_id.clone(),
        };

        match self.reconciler.sync_release(&key, &values, resource_exists).await {
            Ok(outcome) => {
                self.reconciler.metrics.record_action(outcome.action);
                self.events
                    .release_changed(&bookstore, outcome.action, outcome.chart.as_ref())
                    .await;

                if resource_exists {
                    if let Some(status) =
                        desired_status(&outcome, bookstore.status.as_ref(), bookstore.metadata.generation)
                    {
                        self.patch_status(api, &bookstore, status).await?;
                    }
                }

                Ok(Action::requeue(self.reconciler.resync_interval))
            }
            Err(e) => {
                self.events.reconcile_failed(&bookstore, &e.to_string()).await;
                let status = BookstoreStatus::failed(e.to_string(), bookstore.metadata.generation);
                if let Err(status_err) = self.patch_status(api, &bookstore, status).await {
                    warn!("更新 {} 的失败状态出错: {}", key, status_err);
                }
                Err(e)
            }
        }
    }

    async fn cleanup(&self, bookstore: Arc<Bookstore>) -> Result<Action, ReconcileError> {
        let key = bookstore.key();
        let values = ReleaseValues {
            customer_id: bookstore.spec.customer_id.clone(),
        };

        match self.reconciler.sync_release(&key, &values, false).await {
            Ok(outcome) => {
                self.reconciler.metrics.record_action(outcome.action);
                self.events
                    .release_changed(&bookstore, outcome.action, outcome.chart.as_ref())
                    .await;
                Ok(Action::await_change())
            }
            Err(e) => {
                self.events.reconcile_failed(&bookstore, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// 使用 server-side apply 更新状态，仅在状态变化时写回
    async fn patch_status(
        &self,
        api: &Api<Bookstore>,
        bookstore: &Bookstore,
        status: BookstoreStatus,
    ) -> Result<(), ReconcileError> {
        if !needs_status_update(bookstore.status.as_ref(), &status) {
            return Ok(());
        }

        let name = bookstore.name_any();
        let patch = Patch::Apply(serde_json::json!({
            "apiVersion": "bookstore.livreiro/v1beta1",
            "kind": "Bookstore",
            "status": status,
        }));

        api.patch_status(&name, &PatchParams::apply(CONTROLLER_NAME).force(), &patch)
            .await?;

        info!("已更新 {} 的状态为 {}", bookstore.key(), status.phase);
        Ok(())
    }
}

/// 协调 Bookstore 资源
#[instrument(skip(bookstore, ctx), fields(name = %bookstore.name_any(), namespace = ?bookstore.namespace()))]
pub async fn reconcile(
    bookstore: Arc<Bookstore>,
    ctx: Arc<Context>,
) -> Result<Action, FinalizerError<ReconcileError>> {
    let _timer = ctx.reconciler.metrics.start_timer();
    let key = bookstore.key();
    let api: Api<Bookstore> = Api::namespaced(ctx.client.clone(), &key.namespace);

    let ctx_ref = ctx.as_ref();
    let api_ref = &api;
    finalizer(&api, FINALIZER, bookstore, |event| async move {
        match event {
            Finalizer::Apply(bookstore) => ctx_ref.apply(api_ref, bookstore).await,
            Finalizer::Cleanup(bookstore) => ctx_ref.cleanup(bookstore).await,
        }
    })
    .await
}

/// 协调失败后的处理
pub fn error_policy(
    bookstore: Arc<Bookstore>,
    error: &FinalizerError<ReconcileError>,
    ctx: Arc<Context>,
) -> Action {
    error!("协调 Bookstore {} 失败: {}", bookstore.key(), error);
    ctx.reconciler.metrics.record_failure();
    Action::requeue(ctx.reconciler.error_requeue)
}
