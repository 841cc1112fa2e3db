//! Per-slot event subscriptions.
//!
//! Platform events reach a slot through the dispatcher; only components
//! that registered for an event see it.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use iwlan_core::IwlanEvent;

/// Components inside a slot that can subscribe to platform events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscriber {
    Ledger,
    Orchestrator,
}

/// Events the orchestrator always listens to.
pub const ORCHESTRATOR_EVENTS: [IwlanEvent; 7] = [
    IwlanEvent::CarrierConfigChanged,
    IwlanEvent::CarrierConfigUnknownCarrier,
    IwlanEvent::WifiCallingEnable,
    IwlanEvent::WifiCallingDisable,
    IwlanEvent::CrossSimCallingEnable,
    IwlanEvent::CrossSimCallingDisable,
    IwlanEvent::CallStateChanged,
];

/// Change in a subscriber's event set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDiff {
    pub register: BTreeSet<IwlanEvent>,
    pub unregister: BTreeSet<IwlanEvent>,
}

impl EventDiff {
    /// Events to add and remove to go from `current` to `wanted`.
    pub fn between(current: &BTreeSet<IwlanEvent>, wanted: &BTreeSet<IwlanEvent>) -> Self {
        Self {
            register: wanted.difference(current).copied().collect(),
            unregister: current.difference(wanted).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.register.is_empty() && self.unregister.is_empty()
    }
}

/// Subscriptions for one slot.
#[derive(Debug, Default)]
pub struct EventSubscriptions {
    events: HashMap<Subscriber, BTreeSet<IwlanEvent>>,
}

impl EventSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, subscriber: Subscriber, events: impl IntoIterator<Item = IwlanEvent>) {
        let set = self.events.entry(subscriber).or_default();
        for event in events {
            if set.insert(event) {
                debug!(?subscriber, %event, "event registered");
            }
        }
    }

    pub fn unregister(
        &mut self,
        subscriber: Subscriber,
        events: impl IntoIterator<Item = IwlanEvent>,
    ) {
        if let Some(set) = self.events.get_mut(&subscriber) {
            for event in events {
                if set.remove(&event) {
                    debug!(?subscriber, %event, "event unregistered");
                }
            }
        }
    }

    pub fn apply(&mut self, subscriber: Subscriber, diff: EventDiff) {
        self.register(subscriber, diff.register);
        self.unregister(subscriber, diff.unregister);
    }

    #[cfg(test)]
    fn is_subscribed(&self, subscriber: Subscriber, event: IwlanEvent) -> bool {
        self.events
            .get(&subscriber)
            .is_some_and(|set| set.contains(&event))
    }

    /// Subscribers of `event`, ledger first.
    pub fn subscribers(&self, event: IwlanEvent) -> Vec<Subscriber> {
        let mut subscribers: Vec<Subscriber> = self
            .events
            .iter()
            .filter(|(_, set)| set.contains(&event))
            .map(|(subscriber, _)| *subscriber)
            .collect();
        subscribers.sort_unstable();
        subscribers
    }

    pub fn events_of(&self, subscriber: Subscriber) -> BTreeSet<IwlanEvent> {
        self.events.get(&subscriber).cloned().unwrap_or_default()
    }
}
