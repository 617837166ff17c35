//! 事件处理模块
//!
//! 该模块负责在 Bookstore 资源上发布 Kubernetes 事件，记录每一次安装、升级、卸载以及失败，
//! 便于通过 `kubectl describe bookstore` 追踪租户发布的变化。

use bookstore_common::{ChartMetadata, ReleaseAction};
use kube::{
    client::Client,
    runtime::events::{Event, EventType, Recorder, Reporter},
    Resource,
};
use tracing::warn;

use crate::crd::Bookstore;

/// 控制器名称，用作事件的上报者
pub const CONTROLLER_NAME: &str = "bookstore-operator";

/// 事件处理器
#[derive(Clone)]
pub struct EventHandler {
    /// Kubernetes 客户端
    client: Client,
    /// 事件上报者
    reporter: Reporter,
}

impl EventHandler {
    /// 创建新的事件处理器
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    /// 发布事件，失败只记录日志
    async fn publish(&self, bookstore: &Bookstore, event: Event) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            bookstore.object_ref(&()),
        );

        if let Err(e) = recorder.publish(event).await {
            warn!("发布事件失败 {}: {}", bookstore.key(), e);
        }
    }

    /// 发布发布动作事件
    pub async fn release_changed(
        &self,
        bookstore: &Bookstore,
        action: ReleaseAction,
        chart: Option<&ChartMetadata>,
    ) {
        if let Some(event) = action_event(action, chart) {
            self.publish(bookstore, event).await;
        }
    }

    /// 发布协调失败事件
    pub async fn reconcile_failed(&self, bookstore: &Bookstore, message: &str) {
        self.publish(bookstore, failure_event(message)).await;
    }
}

/// 根据动作构建事件，无变化时不产生事件
pub fn action_event(action: ReleaseAction, chart: Option<&ChartMetadata>) -> Option<Event> {
    let chart = chart.map(ToString::to_string).unwrap_or_else(|| "未知".to_string());
    let (reason, note) = match action {
        ReleaseAction::Install => ("Installed", format!("已安装 Chart {}", chart)),
        ReleaseAction::Upgrade => ("Upgraded", format!("已升级到 Chart {}", chart)),
        ReleaseAction::Uninstall => ("Uninstalled", "已卸载租户发布".to_string()),
        ReleaseAction::UpToDate => return None,
    };

    Some(Event {
        type_: EventType::Normal,
        reason: reason.to_string(),
        note: Some(note),
        action: action.as_str().to_string(),
        secondary: None,
    })
}

/// 构建失败事件
pub fn failure_event(message: &str) -> Event {
    Event {
        type_: EventType::Warning,
        reason: "ReconcileFailed".to_string(),
        note: Some(message.to_string()),
        action: "reconcile".to_string(),
        secondary: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart() -> ChartMetadata {
        ChartMetadata::from_yaml("name: bookstore\nversion: 0.2.0\nappVersion: 2.0.0\n").unwrap()
    }

    #[test]
    fn test_action_events() {
        let chart = chart();
        let event = action_event(ReleaseAction::Install, Some(&chart)).unwrap();
        assert_eq!(event.reason, "Installed");
        assert_eq!(event.action, "install");
        assert!(event.note.unwrap().contains("bookstore-0.2.0 (app 2.0.0)"));

        let event = action_event(ReleaseAction::Upgrade, Some(&chart)).unwrap();
        assert_eq!(event.reason, "Upgraded");

        let event = action_event(ReleaseAction::Uninstall, None).unwrap();
        assert_eq!(event.reason, "Uninstalled");

        assert!(action_event(ReleaseAction::UpToDate, Some(&chart)).is_none());
    }

    #[test]
    fn test_failure_event_is_warning() {
        let event = failure_event("helm upgrade 失败");
        assert!(matches!(event.type_, EventType::Warning));
        assert_eq!(event.reason, "ReconcileFailed");
        assert_eq!(event.note.as_deref(), Some("helm upgrade 失败"));
    }
}
