//! Drives a [`LocalizationCoordinator`] through a parsed script.

use relocus_runtime::{CoordinatorConfig, EventRecorder, LocalizationCoordinator};
use relocus_types::{Event, LocError};
use tracing::debug;

use crate::script::ScriptCommand;

/// A coordinator whose actuator link and spatial registry both feed one
/// [`EventRecorder`].
pub struct Replayer {
    coordinator: LocalizationCoordinator,
    recorder: EventRecorder,
}

impl Replayer {
    pub fn new(config: CoordinatorConfig, event_source: &str) -> Self {
        let recorder = EventRecorder::new(event_source);
        let mut coordinator = LocalizationCoordinator::new(config)
            .with_actuator_link(Box::new(recorder.clone()));
        coordinator.add_spatial_registry(Box::new(recorder.clone()));
        Self {
            coordinator,
            recorder,
        }
    }

    pub fn coordinator(&self) -> &LocalizationCoordinator {
        &self.coordinator
    }

    /// Run one command and return the events it emitted.
    ///
    /// Events emitted before a failure are still recorded and returned by the
    /// next successful call.
    pub fn apply(&mut self, command: &ScriptCommand) -> Result<Vec<Event>, LocError> {
        debug!(?command, "replaying command");
        let coordinator = &mut self.coordinator;
        match command {
            ScriptCommand::Odometry { msg } => coordinator.update_from_odometry_message(msg)?,
            ScriptCommand::Observe {
                observation,
                landmark,
            } => {
                let observation = observation.as_ref().map(|o| o.to_observation());
                let landmark = landmark.as_ref().map(|l| l.to_landmark());
                coordinator.localize_to_object(observation.as_ref(), landmark.as_ref())?
            }
            ScriptCommand::Localize { landmark } => {
                let landmark = landmark.as_ref().map(|l| l.to_landmark());
                coordinator.set_localized_to(landmark.as_ref())?
            }
            ScriptCommand::Delocalize { carrying } => coordinator.delocalize(*carrying),
            ScriptCommand::SetPose { pose } => coordinator.set_new_pose(&pose.to_pose())?,
            ScriptCommand::BeginSync => coordinator.begin_sync(),
            ScriptCommand::SyncAck => coordinator.on_sync_acked(),
            ScriptCommand::Flush => {
                coordinator.send_pending_localization_update()?;
            }
        }
        Ok(self.recorder.drain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_script;
    use relocus_runtime::LocalizationState;
    use relocus_types::{EventPayload, LandmarkId, OriginId};

    fn replay(text: &str) -> (Replayer, Vec<Result<Vec<Event>, LocError>>) {
        let mut replayer = Replayer::new(CoordinatorConfig::default(), "test");
        let results = parse_script(text)
            .unwrap()
            .iter()
            .map(|(_, cmd)| replayer.apply(cmd))
            .collect();
        (replayer, results)
    }

    #[test]
    fn relocalization_is_flushed_once_synced() {
        let (replayer, results) = replay(
            r#"
{"cmd": "sync_ack"}
{"cmd": "odometry", "msg": {"timestamp": 10, "origin_id": 1}}
{"cmd": "odometry", "msg": {"timestamp": 20, "origin_id": 1, "pose": {"x": 4.0}}}
{"cmd": "observe", "observation": {"timestamp": 20, "pose": {"x": 90.0, "origin": 1}}, "landmark": {"id": 6, "pose": {"x": 100.0, "origin": 1}}}
{"cmd": "flush"}
"#,
        );
        assert!(results.iter().all(Result::is_ok));
        let flushed = results[4].as_ref().unwrap();
        assert_eq!(flushed.len(), 1);
        match flushed[0].payload {
            EventPayload::LocalizationUpdate(u) => {
                assert_eq!(u.frame_epoch, 1);
                assert_eq!(u.timestamp, 20);
                assert!((u.x - 14.0).abs() < 1e-3);
            }
            ref other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(
            replayer.coordinator().state(),
            LocalizationState::LocalizedToLandmark(LandmarkId(6))
        );
    }

    #[test]
    fn delocalize_reports_the_new_origin() {
        let (_, results) = replay(r#"{"cmd": "delocalize"}"#);
        let events = results[0].as_ref().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].payload,
            EventPayload::Delocalized {
                new_origin: OriginId(2)
            }
        ));
        assert_eq!(events[0].source, "test");
    }

    #[test]
    fn failures_are_returned_not_fatal() {
        let (replayer, results) = replay(
            r#"
{"cmd": "observe"}
{"cmd": "odometry", "msg": {"timestamp": 10, "origin_id": 1}}
"#,
        );
        assert!(matches!(results[0], Err(LocError::NoLandmark)));
        assert!(results[1].is_ok());
        assert_eq!(replayer.coordinator().history().num_raw_states(), 1);
    }
}
