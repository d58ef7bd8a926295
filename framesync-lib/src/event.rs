//! Synchronizer output events and their delivery.
use crossbeam::channel::Sender;
use hifitime::Epoch;
use tracing::debug;

use crate::buffer::Station;
use crate::record::FrameRecord;

/// Station and earth receive time at the point an event occurred.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSnapshot {
    pub station: Station,
    pub ert: Epoch,
}

/// Everything the synchronizer reports.
///
/// Offsets are absolute positions in the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Synchronization was acquired. Followed by the frame it was acquired on.
    InSync {
        station: StationSnapshot,
        record: FrameRecord,
    },
    /// Synchronization was lost.
    LossOfSync {
        station: StationSnapshot,
        /// Last frame confirmed before loss, if any.
        last_record: Option<FrameRecord>,
        last_frame_ert: Option<Epoch>,
        reason: String,
    },
    /// Bytes not belonging to any frame.
    OutOfSyncData {
        station: StationSnapshot,
        offset: u64,
        data: Vec<u8>,
    },
    /// A frame that failed VCID validation. Always followed by its [SyncEvent::TelemetryFrame].
    BadFrame {
        station: StationSnapshot,
        record: FrameRecord,
    },
    /// A synchronized frame, including its ASM.
    TelemetryFrame {
        station: StationSnapshot,
        offset: u64,
        record: FrameRecord,
        data: Vec<u8>,
    },
}

impl SyncEvent {
    /// Short upper-case name of the event type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::InSync { .. } => "IN_SYNC",
            SyncEvent::LossOfSync { .. } => "LOSS_OF_SYNC",
            SyncEvent::OutOfSyncData { .. } => "OUT_OF_SYNC_DATA",
            SyncEvent::BadFrame { .. } => "BAD_FRAME",
            SyncEvent::TelemetryFrame { .. } => "TELEMETRY_FRAME",
        }
    }

    #[must_use]
    pub fn station(&self) -> &StationSnapshot {
        match self {
            SyncEvent::InSync { station, .. }
            | SyncEvent::LossOfSync { station, .. }
            | SyncEvent::OutOfSyncData { station, .. }
            | SyncEvent::BadFrame { station, .. }
            | SyncEvent::TelemetryFrame { station, .. } => station,
        }
    }

    /// Record carried by the event, if any.
    #[must_use]
    pub fn record(&self) -> Option<&FrameRecord> {
        match self {
            SyncEvent::InSync { record, .. }
            | SyncEvent::BadFrame { record, .. }
            | SyncEvent::TelemetryFrame { record, .. } => Some(record),
            SyncEvent::LossOfSync { last_record, .. } => last_record.as_ref(),
            SyncEvent::OutOfSyncData { .. } => None,
        }
    }
}

/// Receives events in the order they are produced.
pub trait EventSink {
    fn publish(&mut self, event: SyncEvent);
}

impl EventSink for Vec<SyncEvent> {
    fn publish(&mut self, event: SyncEvent) {
        self.push(event);
    }
}

impl EventSink for Sender<SyncEvent> {
    fn publish(&mut self, event: SyncEvent) {
        if let Err(err) = self.send(event) {
            debug!("failed to send {} event: receiver disconnected", err.0.kind());
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn publish(&mut self, event: SyncEvent) {
        (**self).publish(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn publish(&mut self, event: SyncEvent) {
        (**self).publish(event);
    }
}

/// Receives events from an [EventBus].
pub trait Subscriber: Send {
    fn on_event(&mut self, event: &SyncEvent);
}

impl<F> Subscriber for F
where
    F: FnMut(&SyncEvent) + Send,
{
    fn on_event(&mut self, event: &SyncEvent) {
        self(event);
    }
}

/// Fans events out to any number of [Subscriber]s, in registration order.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Box<dyn Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe<S: Subscriber + 'static>(&mut self, subscriber: S) {
        self.subscribers.push(Box::new(subscriber));
    }

    #[must_use]
    pub fn with_subscriber<S: Subscriber + 'static>(mut self, subscriber: S) -> Self {
        self.subscribe(subscriber);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl EventSink for EventBus {
    fn publish(&mut self, event: SyncEvent) {
        for sub in &mut self.subscribers {
            sub.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn oos(offset: u64) -> SyncEvent {
        SyncEvent::OutOfSyncData {
            station: StationSnapshot {
                station: Station::new(1, 1.0),
                ert: Epoch::from_gpst_seconds(0.0),
            },
            offset,
            data: vec![0],
        }
    }

    #[test]
    fn bus_delivers_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        let mut bus = EventBus::new()
            .with_subscriber(move |e: &SyncEvent| first.lock().unwrap().push((1, e.clone())))
            .with_subscriber(move |e: &SyncEvent| second.lock().unwrap().push((2, e.clone())));

        bus.publish(oos(0));
        bus.publish(oos(1));

        let seen = seen.lock().unwrap();
        let order: Vec<_> = seen.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![1, 2, 1, 2]);
        assert_eq!(seen[2].1, oos(1));
    }

    #[test]
    fn channel_sink_ignores_disconnected_receiver() {
        let (mut tx, rx) = crossbeam::channel::unbounded();
        tx.publish(oos(0));
        assert_eq!(rx.recv().unwrap().kind(), "OUT_OF_SYNC_DATA");
        drop(rx);
        tx.publish(oos(1));
    }

    #[test]
    fn mut_ref_sink() {
        let mut events: Vec<SyncEvent> = Vec::new();
        {
            let mut sink = &mut events;
            sink.publish(oos(9));
        }
        assert_eq!(events.len(), 1);
        assert!(events[0].record().is_none());
    }
}
