//! Outbound seams of the coordinator.
//!
//! The coordinator never talks to the firmware or to the world model
//! directly. It pushes absolute corrections through an [`ActuatorLink`] and
//! announces origin changes to every registered [`SpatialRegistry`], so the
//! transport and the object store can be swapped without touching the
//! localization logic.

use std::sync::{Arc, Mutex, MutexGuard};

use relocus_types::{
    AbsoluteLocalizationUpdate, Event, EventPayload, LocError, OriginId, OriginSubstitution,
};

/// Channel that carries absolute pose corrections down to the firmware.
pub trait ActuatorLink: Send {
    /// # Errors
    ///
    /// Returns [`LocError::Link`] when the message cannot be delivered.
    fn send_localization_update(
        &mut self,
        update: &AbsoluteLocalizationUpdate,
    ) -> Result<(), LocError>;
}

/// A store of poses that must follow origin changes (objects, maps, faces…).
pub trait SpatialRegistry: Send {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// `substitution.old_origin` now lives under `substitution.new_origin`;
    /// re-anchor every cached pose that referenced the old one.
    fn on_origin_substituted(&mut self, substitution: &OriginSubstitution);

    /// The robot abandoned its frame and now lives in `new_origin`.
    fn on_robot_delocalized(&mut self, _new_origin: OriginId) {}

    /// The object the robot is carrying should stay behind in `old_origin`.
    fn on_carried_object_origin_changed(&mut self, _old_origin: OriginId) {}
}

// ────────────────────────────────────────────────────────────────────────────
// EventRecorder
// ────────────────────────────────────────────────────────────────────────────

/// Collects every outbound message as an [`Event`].
///
/// Implements both seams, so one recorder can observe the full output of a
/// coordinator. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    source: String,
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, payload: EventPayload) {
        self.lock().push(Event::new(self.source.clone(), payload));
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn localization_updates(&self) -> Vec<AbsoluteLocalizationUpdate> {
        self.lock()
            .iter()
            .filter_map(|e| match e.payload {
                EventPayload::LocalizationUpdate(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    pub fn substitutions(&self) -> Vec<OriginSubstitution> {
        self.lock()
            .iter()
            .filter_map(|e| match e.payload {
                EventPayload::OriginSubstituted(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl ActuatorLink for EventRecorder {
    fn send_localization_update(
        &mut self,
        update: &AbsoluteLocalizationUpdate,
    ) -> Result<(), LocError> {
        self.push(EventPayload::LocalizationUpdate(*update));
        Ok(())
    }
}

impl SpatialRegistry for EventRecorder {
    fn name(&self) -> &str {
        &self.source
    }

    fn on_origin_substituted(&mut self, substitution: &OriginSubstitution) {
        self.push(EventPayload::OriginSubstituted(*substitution));
    }

    fn on_robot_delocalized(&mut self, new_origin: OriginId) {
        self.push(EventPayload::Delocalized { new_origin });
    }

    fn on_carried_object_origin_changed(&mut self, old_origin: OriginId) {
        self.push(EventPayload::CarriedObjectOriginChanged { old_origin });
    }
}
