use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::channel::{EventChannel, EventFilter, Subscription};
use super::event::Event;
use crate::errors::{FlotillaError, Result};

struct Subscriber {
    filter: EventFilter,
    sender: Sender<Event>,
}

/// In-process broker: every matching subscriber gets its own copy of each event.
#[derive(Default)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

impl EventChannel for MemoryBroker {
    fn subscribe(&self, topic: &str, filter: EventFilter) -> Result<Box<dyn Subscription>> {
        let (sender, receiver) = mpsc::channel();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { filter, sender });
        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            receiver,
        }))
    }

    fn publish(&self, topic: &str, event: &Event) -> Result<()> {
        let mut topics = self.topics.lock();
        if let Some(subscribers) = topics.get_mut(topic) {
            // Dropped subscriptions are pruned as a side effect of publishing.
            subscribers.retain(|subscriber| {
                !subscriber.filter.matches(event) || subscriber.sender.send(event.clone()).is_ok()
            });
        }
        trace!("published {:?} event on topic={}", event.kind, topic);
        Ok(())
    }
}

struct MemorySubscription {
    topic: String,
    receiver: Receiver<Event>,
}

impl Subscription for MemorySubscription {
    fn receive(&mut self, timeout: Duration) -> Result<Option<Event>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FlotillaError::event_channel(
                &self.topic,
                "broker dropped the subscription",
            )),
        }
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
