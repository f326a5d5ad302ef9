/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Holding events for targets that nobody listens to yet.
//!
//! A queue starts out recording. Once drained it switches to pass-through
//! for good: later deliveries go straight to the target's listeners.

use std::collections::VecDeque;

use base::id::{MessagePortId, WorkerId, WorkerObjectId};
use log::{debug, warn};

use crate::dom::bindings::error::{Error, ErrorResult};
use crate::dom::event::{Event, EventTargetId};
use crate::dom::eventdispatcher::dispatch_event;
use crate::script_runtime::ScriptHost;

/// The number of undelivered events a queue retains; older ones are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 5;

#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<Event>,
    drained: bool,
    /// Set while a drain is replaying events, so that a nested drain does
    /// not overtake it.
    draining: bool,
}

impl EventQueue {
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_events(&self) -> impl Iterator<Item = &Event> {
        self.pending.iter()
    }

    /// Append an event, evicting the oldest one when full.
    pub(crate) fn record(&mut self, event: Event) -> ErrorResult {
        if self.pending.len() >= EVENT_QUEUE_CAPACITY {
            if let Some(evicted) = self.pending.pop_front() {
                warn!(
                    "Event queue full, dropping oldest {} event for {:?}",
                    evicted.type_().as_str(),
                    evicted.target()
                );
            }
        }
        self.pending.try_reserve(1)?;
        self.pending.push_back(event);
        Ok(())
    }

    /// Move every pending event to `target_queue`, aimed at `target_object`.
    pub(crate) fn move_to(&mut self, target_queue: &mut EventQueue, target_object: EventTargetId) {
        for mut event in self.pending.drain(..) {
            event.retarget(target_object);
            if target_queue.record(event).is_err() {
                warn!("Out of memory while moving queued events to {:?}", target_object);
                break;
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    fn take_pending(&mut self) -> VecDeque<Event> {
        std::mem::take(&mut self.pending)
    }

    /// Put back events a drain could not deliver, ahead of anything recorded
    /// since.
    fn restore(&mut self, mut events: VecDeque<Event>) {
        events.append(&mut self.pending);
        while events.len() > EVENT_QUEUE_CAPACITY {
            events.pop_front();
        }
        self.pending = events;
    }
}

/// Which worker queue.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WorkerQueue {
    Message,
    Error,
    Connect,
}

/// Addresses a queue owned by an object in the host's arena.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventQueueId {
    MessagePort(MessagePortId),
    WorkerGlobalScope(WorkerId, WorkerQueue),
    Worker(WorkerObjectId, WorkerQueue),
}

/// Deliver now if the queue has been drained, otherwise record for later.
pub(crate) fn deliver_event(host: &mut ScriptHost, queue: EventQueueId, event: Event) -> ErrorResult {
    let Some(event_queue) = host.event_queue_mut(queue) else {
        debug!("Dropping event for vanished queue {:?}", queue);
        return Ok(());
    };
    if !event_queue.is_drained() {
        return event_queue.record(event);
    }
    dispatch_event(host, &event).map(|_| ())
}

/// Replay pending events in order and switch the queue to pass-through.
///
/// Ordinary delivery failures are logged and skipped. An allocation failure
/// stops the drain, keeps the undelivered events and leaves the queue
/// recording.
pub(crate) fn drain_event_queue(host: &mut ScriptHost, queue: EventQueueId) -> ErrorResult {
    match host.event_queue_mut(queue) {
        Some(event_queue) if !event_queue.draining && !event_queue.drained => {
            event_queue.draining = true;
        },
        _ => return Ok(()),
    }

    loop {
        let Some(mut pending) = host.event_queue_mut(queue).map(EventQueue::take_pending) else {
            return Ok(());
        };
        if pending.is_empty() {
            break;
        }
        while let Some(event) = pending.pop_front() {
            match dispatch_event(host, &event) {
                Ok(_) => {},
                Err(Error::NoMemory) => {
                    if let Some(event_queue) = host.event_queue_mut(queue) {
                        event_queue.restore(pending);
                        event_queue.draining = false;
                    }
                    return Err(Error::NoMemory);
                },
                Err(error) => debug!("Delivery of queued event failed: {}", error),
            }
        }
    }

    if let Some(event_queue) = host.event_queue_mut(queue) {
        event_queue.draining = false;
        event_queue.drained = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use base::id::MessagePortId;
    use script_traits::ScriptValue;

    use super::*;
    use crate::dom::event::EventType;
    use crate::dom::messageevent::MessageEvent;

    fn message(target: EventTargetId, n: f64) -> Event {
        Event::new_message(
            EventType::Message,
            target,
            MessageEvent::new(ScriptValue::Number(n), String::new(), None, vec![]),
        )
    }

    fn numbers(queue: &EventQueue) -> Vec<f64> {
        queue
            .pending_events()
            .filter_map(|event| match event.message().map(MessageEvent::data) {
                Some(ScriptValue::Number(n)) => Some(*n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn record_evicts_oldest_beyond_capacity() {
        let target = EventTargetId::MessagePort(MessagePortId::new());
        let mut queue = EventQueue::default();
        for n in 0..7 {
            queue.record(message(target, n as f64)).unwrap();
        }
        assert_eq!(queue.len(), EVENT_QUEUE_CAPACITY);
        assert_eq!(numbers(&queue), vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(!queue.is_drained());
    }

    #[test]
    fn move_to_retargets_in_order() {
        let old = EventTargetId::MessagePort(MessagePortId::new());
        let new = EventTargetId::MessagePort(MessagePortId::new());
        let mut source = EventQueue::default();
        let mut target = EventQueue::default();
        source.record(message(old, 1.0)).unwrap();
        source.record(message(old, 2.0)).unwrap();

        source.move_to(&mut target, new);

        assert!(source.is_empty());
        assert_eq!(numbers(&target), vec![1.0, 2.0]);
        assert!(target.pending_events().all(|event| event.target() == new));
    }

    #[test]
    fn restore_keeps_undelivered_events_first() {
        let target = EventTargetId::MessagePort(MessagePortId::new());
        let mut queue = EventQueue::default();
        queue.record(message(target, 3.0)).unwrap();
        let mut undelivered = VecDeque::new();
        undelivered.push_back(message(target, 1.0));
        undelivered.push_back(message(target, 2.0));
        queue.restore(undelivered);
        assert_eq!(numbers(&queue), vec![1.0, 2.0, 3.0]);
    }
}
