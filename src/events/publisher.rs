//! Event Publisher
//!
//! Receives state changes from the observation state machine, the device
//! attributes and the command tracker, and queues them as named events on
//! an unbounded channel. Pushing never blocks, so it is safe under the
//! engine's locks.
//!
//! The channel has a single consumer: either a task looping on
//! `recv_event`, or a caller polling `drain_events`, not both. Events queue
//! up until consumed, so every publisher needs one.

use std::sync::Mutex;

use cspsim_shared::event::attr;
use cspsim_shared::{lock, CommandId, EventSink, EventValue, TaskResult, TaskStatus, TrackerListener};
use serde_json::json;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// A named attribute change
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub name: String,
    pub value: EventValue,
}

/// Façade-side view of the tracked commands
#[derive(Default)]
struct CommandView {
    /// `(id, name, status)` in queue order
    commands: Vec<(CommandId, String, TaskStatus)>,
    /// Last published value of the commands-in-queue event
    pending: Vec<String>,
}

impl CommandView {
    fn sync_queue(&mut self, queue: &[(CommandId, String)]) {
        self.commands = queue
            .iter()
            .map(|(id, name)| {
                let status = self
                    .commands
                    .iter()
                    .find(|(known, _, _)| known == id)
                    .map_or(TaskStatus::Staging, |(_, _, status)| *status);
                (id.clone(), name.clone(), status)
            })
            .collect();
    }

    fn sync_statuses(&mut self, statuses: &[(CommandId, TaskStatus)]) {
        for (id, status) in statuses {
            if let Some(entry) = self.commands.iter_mut().find(|(known, _, _)| known == id) {
                entry.2 = *status;
            }
        }
    }

    /// Names of the commands that have not finished yet
    fn pending_names(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter(|(_, _, status)| !status.is_terminal())
            .map(|(_, name, _)| name.clone())
            .collect()
    }

    fn ids(&self) -> Vec<String> {
        self.commands.iter().map(|(id, _, _)| id.to_string()).collect()
    }
}

/// Publishes device events over a channel
pub struct EventPublisher {
    device: String,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
    event_rx: AsyncMutex<mpsc::UnboundedReceiver<DeviceEvent>>,
    view: Mutex<CommandView>,
}

impl EventPublisher {
    pub fn new(device: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            device: device.into(),
            event_tx,
            event_rx: AsyncMutex::new(event_rx),
            view: Mutex::new(CommandView::default()),
        }
    }

    /// Receive the next event (waits until one is available)
    pub async fn recv_event(&self) -> Option<DeviceEvent> {
        self.event_rx.lock().await.recv().await
    }

    /// Take every event queued so far without waiting.
    ///
    /// Returns nothing while a `recv_event` caller holds the receiver.
    pub fn drain_events(&self) -> Vec<DeviceEvent> {
        let Ok(mut rx) = self.event_rx.try_lock() else {
            warn!("[{}] Events are consumed by recv_event, nothing drained", self.device);
            return Vec::new();
        };

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn publish(&self, name: &str, value: EventValue) {
        debug!("[{}] {} = {}", self.device, name, value);
        let _ = self.event_tx.send(DeviceEvent {
            name: name.to_string(),
            value,
        });
    }

    fn publish_pending(&self, view: &mut CommandView, force: bool) {
        let pending = view.pending_names();
        if force || pending != view.pending {
            view.pending = pending.clone();
            self.publish(attr::COMMANDS_IN_QUEUE, EventValue::Strings(pending));
        }
    }
}

impl EventSink for EventPublisher {
    fn push_event(&self, name: &str, value: EventValue) {
        self.publish(name, value);
    }
}

impl TrackerListener for EventPublisher {
    fn queue_changed(&self, queue: &[(CommandId, String)]) -> anyhow::Result<()> {
        let mut view = lock(&self.view);
        view.sync_queue(queue);
        self.publish_pending(&mut view, true);
        self.publish(attr::COMMAND_IDS_IN_QUEUE, EventValue::Strings(view.ids()));
        Ok(())
    }

    fn status_changed(&self, statuses: &[(CommandId, TaskStatus)]) -> anyhow::Result<()> {
        let mut view = lock(&self.view);
        view.sync_statuses(statuses);

        let flattened = statuses
            .iter()
            .flat_map(|(id, status)| [id.to_string(), status.to_string()])
            .collect();
        self.publish(attr::COMMAND_STATUS, EventValue::Strings(flattened));
        self.publish_pending(&mut view, false);
        Ok(())
    }

    fn progress_changed(&self, progresses: &[(CommandId, u32)]) -> anyhow::Result<()> {
        let flattened = progresses
            .iter()
            .flat_map(|(id, progress)| [id.to_string(), progress.to_string()])
            .collect();
        self.publish(attr::COMMAND_PROGRESS, EventValue::Strings(flattened));
        Ok(())
    }

    fn result_reported(&self, command_id: &CommandId, result: &TaskResult) -> anyhow::Result<()> {
        let encoded = serde_json::to_string(&json!([result.code.code(), result.message]))?;
        self.publish(
            attr::COMMAND_RESULT,
            EventValue::Pair(command_id.to_string(), encoded),
        );
        Ok(())
    }

    fn exception_raised(&self, command_id: &CommandId, exception: &str) -> anyhow::Result<()> {
        self.publish(
            attr::COMMAND_RESULT,
            EventValue::Pair(command_id.to_string(), exception.to_string()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cspsim_shared::ObsState;

    fn strings(items: &[&str]) -> EventValue {
        EventValue::Strings(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_push_event_is_queued() {
        let publisher = EventPublisher::new("test");
        publisher.push_event(attr::OBS_STATE, EventValue::Obs(ObsState::Idle));

        assert_eq!(
            publisher.drain_events(),
            vec![DeviceEvent {
                name: attr::OBS_STATE.into(),
                value: EventValue::Obs(ObsState::Idle),
            }]
        );
        assert!(publisher.drain_events().is_empty());
    }

    #[test]
    fn test_statuses_are_flattened() {
        let publisher = EventPublisher::new("test");
        let statuses = vec![
            (CommandId::from("1_a_On"), TaskStatus::InProgress),
            (CommandId::from("2_b_Off"), TaskStatus::Queued),
        ];
        publisher.status_changed(&statuses).unwrap();

        let events = publisher.drain_events();
        assert_eq!(events[0].name, attr::COMMAND_STATUS);
        assert_eq!(
            events[0].value,
            strings(&["1_a_On", "IN_PROGRESS", "2_b_Off", "QUEUED"])
        );
    }

    #[test]
    fn test_result_is_json_encoded() {
        let publisher = EventPublisher::new("test");
        let id = CommandId::from("1_a_Scan");
        publisher
            .result_reported(&id, &TaskResult::failed("Scan"))
            .unwrap();

        let events = publisher.drain_events();
        assert_eq!(
            events[0].value,
            EventValue::Pair("1_a_Scan".into(), r#"[3,"Scan command failed"]"#.into())
        );
    }

    #[test]
    fn test_finished_commands_leave_pending_names() {
        let publisher = EventPublisher::new("test");
        let id = CommandId::from("1_a_On");
        publisher.queue_changed(&[(id.clone(), "On".into())]).unwrap();
        publisher
            .status_changed(&[(id.clone(), TaskStatus::InProgress)])
            .unwrap();
        publisher
            .status_changed(&[(id.clone(), TaskStatus::Completed)])
            .unwrap();

        let in_queue: Vec<EventValue> = publisher
            .drain_events()
            .into_iter()
            .filter(|e| e.name == attr::COMMANDS_IN_QUEUE)
            .map(|e| e.value)
            .collect();
        assert_eq!(in_queue, vec![strings(&["On"]), strings(&[])]);
    }

    #[tokio::test]
    async fn test_recv_event() {
        let publisher = EventPublisher::new("test");
        publisher.push_event(attr::STATE, EventValue::Strings(vec![]));
        let event = publisher.recv_event().await.unwrap();
        assert_eq!(event.name, attr::STATE);
    }

    #[tokio::test]
    async fn test_drain_yields_to_waiting_receiver() {
        let publisher = std::sync::Arc::new(EventPublisher::new("test"));
        let receiver = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.recv_event().await })
        };
        // Let the receiver take the channel
        tokio::task::yield_now().await;

        publisher.push_event(attr::STATE, EventValue::Strings(vec![]));
        assert!(publisher.drain_events().is_empty());

        let event = receiver.await.unwrap().unwrap();
        assert_eq!(event.name, attr::STATE);
    }
}
