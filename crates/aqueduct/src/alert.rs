/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Structured alerting.
//!
//! The engine emits an [`AlertEvent`] after every recorded state transition of
//! interest: workflow start, task success/failure, workflow success/failure.
//! Delivery is pluggable through [`AlertTransport`]; the built-in
//! [`WebhookTransport`] posts a JSON chat payload. Because events are emitted
//! *after* the transition is recorded, delivery is at-least-once and consumers
//! must be idempotent.
//!
//! Delivery failures are logged and swallowed — alerting never affects
//! workflow state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AlertConfig;
use crate::error::AlertError;
use crate::task::TaskState;

/// The event classes the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertEventKind {
    WorkflowStarted,
    TaskSucceeded,
    TaskFailed,
    WorkflowSucceeded,
    WorkflowFailed,
}

/// One structured alert record.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub workflow: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    pub timestamp: DateTime<Utc>,
    /// Error text for failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AlertEvent {
    fn new(kind: AlertEventKind, workflow: &str) -> Self {
        Self {
            kind,
            workflow: workflow.to_string(),
            task_id: None,
            state: None,
            timestamp: Utc::now(),
            message: None,
        }
    }
}

/// Delivery contract. Implementations render and ship one event.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError>;
}

/// Posts events to a chat webhook as a markdown-ish JSON payload.
pub struct WebhookTransport {
    endpoint: String,
    at_all: bool,
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(endpoint: &str, at_all: bool) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            at_all,
            client: reqwest::Client::new(),
        }
    }

    fn render_text(&self, event: &AlertEvent) -> String {
        let mut text = match event.kind {
            AlertEventKind::WorkflowStarted => format!("workflow `{}` started", event.workflow),
            AlertEventKind::WorkflowSucceeded => format!("workflow `{}` succeeded", event.workflow),
            AlertEventKind::WorkflowFailed => format!("workflow `{}` FAILED", event.workflow),
            AlertEventKind::TaskSucceeded => format!(
                "workflow `{}`: task `{}` succeeded",
                event.workflow,
                event.task_id.as_deref().unwrap_or("?")
            ),
            AlertEventKind::TaskFailed => format!(
                "workflow `{}`: task `{}` FAILED",
                event.workflow,
                event.task_id.as_deref().unwrap_or("?")
            ),
        };
        if let Some(message) = &event.message {
            text.push_str("\n> ");
            text.push_str(message);
        }
        text
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError> {
        let is_failure = matches!(
            event.kind,
            AlertEventKind::TaskFailed | AlertEventKind::WorkflowFailed
        );
        let payload = serde_json::json!({
            "text": self.render_text(event),
            "at_all": self.at_all && is_failure,
            "event": event,
        });

        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Emits alert events for one workflow run.
///
/// Built from the workflow's `alert` block at run start and dropped at run
/// end. With no (or an unrecognised) transport configured the emitter is a
/// no-op apart from a debug log.
pub struct AlertEmitter {
    workflow: String,
    transport: Option<Arc<dyn AlertTransport>>,
}

impl AlertEmitter {
    /// Builds an emitter from the workflow's alert configuration.
    pub fn from_config(workflow: &str, config: Option<&AlertConfig>) -> Self {
        let transport: Option<Arc<dyn AlertTransport>> = match config {
            Some(cfg) if cfg.transport == "webhook" => {
                Some(Arc::new(WebhookTransport::new(&cfg.endpoint, cfg.at_all)))
            }
            Some(cfg) => {
                warn!(
                    transport = %cfg.transport,
                    "unknown alert transport, alerts disabled for this run"
                );
                None
            }
            None => None,
        };
        Self {
            workflow: workflow.to_string(),
            transport,
        }
    }

    /// Builds an emitter with an explicit transport (used by tests).
    pub fn with_transport(workflow: &str, transport: Arc<dyn AlertTransport>) -> Self {
        Self {
            workflow: workflow.to_string(),
            transport: Some(transport),
        }
    }

    pub async fn workflow_started(&self) {
        self.emit(AlertEvent::new(AlertEventKind::WorkflowStarted, &self.workflow))
            .await;
    }

    pub async fn task_finished(&self, task_id: &str, state: TaskState, error: Option<&str>) {
        let kind = match state {
            TaskState::Succeeded => AlertEventKind::TaskSucceeded,
            TaskState::Failed => AlertEventKind::TaskFailed,
            // Only success and failure are alertable task transitions.
            _ => return,
        };
        let mut event = AlertEvent::new(kind, &self.workflow);
        event.task_id = Some(task_id.to_string());
        event.state = Some(state);
        event.message = error.map(str::to_string);
        self.emit(event).await;
    }

    pub async fn workflow_finished(&self, success: bool, summary: &str) {
        let kind = if success {
            AlertEventKind::WorkflowSucceeded
        } else {
            AlertEventKind::WorkflowFailed
        };
        let mut event = AlertEvent::new(kind, &self.workflow);
        event.message = Some(summary.to_string());
        self.emit(event).await;
    }

    async fn emit(&self, event: AlertEvent) {
        let Some(transport) = &self.transport else {
            debug!(kind = ?event.kind, "no alert transport configured, dropping event");
            return;
        };
        if let Err(error) = transport.deliver(&event).await {
            warn!(%error, kind = ?event.kind, "alert delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;
    use std::sync::Mutex;

    /// Records delivered events instead of shipping them.
    pub(crate) struct RecordingTransport {
        pub events: Mutex<Vec<AlertEvent>>,
        pub fail: bool,
    }

    impl RecordingTransport {
        pub(crate) fn new(fail: bool) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl AlertTransport for RecordingTransport {
        async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                return Err(AlertError::Status(500));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_event_sequence_for_failed_task() {
        init_test_logging();

        let transport = Arc::new(RecordingTransport::new(false));
        let emitter = AlertEmitter::with_transport("etl", transport.clone());

        emitter.workflow_started().await;
        emitter
            .task_finished("extract", TaskState::Failed, Some("exit 1"))
            .await;
        emitter.workflow_finished(false, "1 task failed").await;

        let events = transport.events.lock().unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertEventKind::WorkflowStarted,
                AlertEventKind::TaskFailed,
                AlertEventKind::WorkflowFailed
            ]
        );
        assert_eq!(events[1].task_id.as_deref(), Some("extract"));
        assert_eq!(events[1].message.as_deref(), Some("exit 1"));
    }

    #[tokio::test]
    async fn test_non_alertable_states_are_dropped() {
        init_test_logging();

        let transport = Arc::new(RecordingTransport::new(false));
        let emitter = AlertEmitter::with_transport("etl", transport.clone());

        emitter
            .task_finished("a", TaskState::Cancelled, None)
            .await;
        emitter.task_finished("b", TaskState::Skipped, None).await;

        assert!(transport.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        init_test_logging();

        let transport = Arc::new(RecordingTransport::new(true));
        let emitter = AlertEmitter::with_transport("etl", transport.clone());

        // Must not panic or propagate.
        emitter.workflow_started().await;
        assert_eq!(transport.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_transport_disables_alerts() {
        init_test_logging();

        let config = AlertConfig {
            transport: "carrier-pigeon".to_string(),
            endpoint: "coop".to_string(),
            at_all: false,
        };
        let emitter = AlertEmitter::from_config("etl", Some(&config));
        assert!(emitter.transport.is_none());
    }

    #[test]
    fn test_webhook_render_mentions_failure() {
        init_test_logging();

        let transport = WebhookTransport::new("https://hooks.example/x", true);
        let mut event = AlertEvent::new(AlertEventKind::TaskFailed, "etl");
        event.task_id = Some("load".to_string());
        event.message = Some("exit 2".to_string());
        let text = transport.render_text(&event);
        assert!(text.contains("load"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("exit 2"));
    }
}
