//! Typed publish/subscribe for decoded messages.
//!
//! Subscribers register against a [`MessageKind`] and receive every
//! published message of exactly that kind, synchronously and in
//! subscription order. Publishing a kind nobody subscribed to is a
//! no-op. A panicking handler is a bug in that handler and propagates;
//! the 1:1 decoder-to-variant invariant means a handler can trust the
//! variant it registered for.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::message::{InboundMessage, MessageKind};

/// Handle identifying one subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

type Handler = Box<dyn FnMut(&InboundMessage) + Send>;

/// Type-keyed subscriber registry
#[derive(Default)]
pub struct MessageBroker {
    next_id: u64,
    subscribers: HashMap<MessageKind, Vec<(Subscription, Handler)>>,
}

impl MessageBroker {
    /// Creates an empty broker
    pub fn new() -> Self {
        MessageBroker::default()
    }

    /// Registers a handler for one message kind and returns its handle
    pub fn subscribe<F>(&mut self, kind: MessageKind, handler: F) -> Subscription
    where
        F: FnMut(&InboundMessage) + Send + 'static,
    {
        let subscription = Subscription(self.next_id);
        self.next_id += 1;
        self.subscribers
            .entry(kind)
            .or_default()
            .push((subscription, Box::new(handler)));
        debug!(?kind, "handler subscribed");
        subscription
    }

    /// Removes a subscription; returns false if it was not registered
    /// for the given kind
    pub fn unsubscribe(&mut self, kind: MessageKind, subscription: Subscription) -> bool {
        let Some(handlers) = self.subscribers.get_mut(&kind) else {
            warn!(?kind, "tried to unsubscribe from a kind with no subscribers");
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription);
        let removed = handlers.len() < before;
        if !removed {
            warn!(?kind, "tried to unsubscribe a non-existing handler");
        }
        if handlers.is_empty() {
            self.subscribers.remove(&kind);
        }
        removed
    }

    /// Fans a message out to every handler registered for its kind
    pub fn publish(&mut self, message: &InboundMessage) {
        let kind = message.kind();
        let Some(handlers) = self.subscribers.get_mut(&kind) else {
            trace!(?kind, "no subscribers for message");
            return;
        };
        for (_, handler) in handlers.iter_mut() {
            handler(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_publish_reaches_matching_subscriber() {
        let mut broker = MessageBroker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        broker.subscribe(MessageKind::Analog, move |message| {
            if let InboundMessage::Analog { channel, value } = message {
                sink.lock().unwrap().push((*channel, *value));
            }
        });

        broker.publish(&InboundMessage::Analog { channel: 2, value: 512 });
        broker.publish(&InboundMessage::Digital { port: 0, pins: [false; 8] });

        assert_eq!(*seen.lock().unwrap(), vec![(2, 512)]);
    }

    #[test]
    fn test_fan_out_in_subscription_order() {
        let mut broker = MessageBroker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let sink = order.clone();
            broker.subscribe(MessageKind::CapabilitiesFinished, move |_| {
                sink.lock().unwrap().push(tag);
            });
        }

        broker.publish(&InboundMessage::CapabilitiesFinished);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let mut broker = MessageBroker::new();
        broker.publish(&InboundMessage::CapabilitiesFinished);
    }

    #[test]
    fn test_unsubscribe() {
        let mut broker = MessageBroker::new();
        let count = Arc::new(Mutex::new(0));

        let sink = count.clone();
        let subscription = broker.subscribe(MessageKind::SysexString, move |_| {
            *sink.lock().unwrap() += 1;
        });

        broker.publish(&InboundMessage::SysexString { text: "a".into() });
        assert!(broker.unsubscribe(MessageKind::SysexString, subscription));
        broker.publish(&InboundMessage::SysexString { text: "b".into() });

        assert_eq!(*count.lock().unwrap(), 1);

        // A second unsubscribe finds nothing
        assert!(!broker.unsubscribe(MessageKind::SysexString, subscription));
    }
}
