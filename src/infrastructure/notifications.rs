// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tokio::sync::broadcast;

use crate::domain::models::event::ProgressEvent;
use crate::domain::services::notification_service::ProgressPublisher;
use crate::utils::errors::PublishError;

/// 基于 tokio broadcast 通道的进度发布器
///
/// 发送端不阻塞；落后的订阅者会丢失最旧的事件。
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastPublisher {
    /// 创建发布器
    ///
    /// # 参数
    ///
    /// * `capacity` - 每个订阅者的缓冲事件数
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅进度事件
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, event: ProgressEvent) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::ProgressEventType;
    use chrono::Utc;
    use uuid::Uuid;

    fn event() -> ProgressEvent {
        ProgressEvent {
            event_type: ProgressEventType::Progress,
            job_id: Uuid::new_v4(),
            progress_percent: 10.0,
            current_step: "t".into(),
            results_count: 0,
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_publish_without_subscribers_reports_error() {
        let publisher = BroadcastPublisher::new(8);
        assert!(matches!(
            publisher.publish(event()),
            Err(PublishError::NoSubscribers)
        ));
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        let first = event();
        let second = event();
        publisher.publish(first.clone()).unwrap();
        publisher.publish(second.clone()).unwrap();

        assert_eq!(rx.try_recv().unwrap(), first);
        assert_eq!(rx.try_recv().unwrap(), second);
    }
}
