use crate::buffer::MessageReader;
use crate::message::Message;
use async_trait::async_trait;
use bitflags::bitflags;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Identity of a consumer for (un)subscription, chosen by the application
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ConsumerId(pub u64);

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct SubscriptionFlags: u8 {
        /// the subscription is removed after its first invocation
        const ONESHOT = 0b0000_0001;
        /// the consumer observes messages without counting as their handler
        const MONITOR = 0b0000_0010;
    }
}

/// Receives completed messages of the types it is subscribed to.
///
/// Every invocation gets its own reader positioned at the start of the payload.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageConsumer: Send + Sync + 'static {
    fn id(&self) -> ConsumerId;

    async fn on_message(&self, message: &Message, reader: MessageReader);
}

#[derive(Clone)]
struct Subscription {
    consumer: Arc<dyn MessageConsumer>,
    flags: SubscriptionFlags,
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscription{{{:?}, {:?}}}", self.consumer.id(), self.flags)
    }
}

/// What happened to a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// number of consumers that were invoked, monitors included
    pub invoked: usize,
    /// true if at least one non-monitor consumer was invoked
    pub handled: bool,
}

/// Routes completed messages to the consumers subscribed to their type. The subscription table is
///  shared between the receive loop and application code (un)subscribing concurrently.
#[derive(Default)]
pub struct Dispatcher {
    subscriptions: RwLock<FxHashMap<u8, Vec<Subscription>>>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Default::default()
    }

    /// Subscribes `consumer` to a message type. Subscribing a consumer that is already
    ///  subscribed to the type replaces the existing subscription, keeping its position.
    pub async fn subscribe(&self, message_type: u8, consumer: Arc<dyn MessageConsumer>, flags: SubscriptionFlags) {
        let id = consumer.id();
        let mut subscriptions = self.subscriptions.write().await;
        let for_type = subscriptions.entry(message_type).or_default();

        let subscription = Subscription { consumer, flags };
        if let Some(existing) = for_type.iter_mut().find(|s| s.consumer.id() == id) {
            debug!("replacing subscription of {:?} for message type {}", id, message_type);
            *existing = subscription;
        }
        else {
            debug!("subscribing {:?} to message type {}", id, message_type);
            for_type.push(subscription);
        }
    }

    /// returns `true` if there was a subscription to remove
    pub async fn unsubscribe(&self, message_type: u8, consumer: ConsumerId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let Some(for_type) = subscriptions.get_mut(&message_type) else {
            return false;
        };

        let len_before = for_type.len();
        for_type.retain(|s| s.consumer.id() != consumer);
        let removed = for_type.len() < len_before;
        if for_type.is_empty() {
            subscriptions.remove(&message_type);
        }
        debug!("unsubscribing {:?} from message type {}: {}", consumer, message_type, if removed { "removed" } else { "not subscribed" });
        removed
    }

    /// removes all of a consumer's subscriptions, returning their number
    pub async fn unsubscribe_all(&self, consumer: ConsumerId) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let mut removed = 0;
        subscriptions.retain(|_, for_type| {
            let len_before = for_type.len();
            for_type.retain(|s| s.consumer.id() != consumer);
            removed += len_before - for_type.len();
            !for_type.is_empty()
        });
        debug!("unsubscribed {:?} from {} message types", consumer, removed);
        removed
    }

    pub async fn is_subscribed(&self, message_type: u8, consumer: ConsumerId) -> bool {
        self.subscriptions.read().await
            .get(&message_type)
            .map(|for_type| for_type.iter().any(|s| s.consumer.id() == consumer))
            .unwrap_or(false)
    }

    /// Invokes all consumers subscribed to the message's type, in subscription order. Consumers
    ///  run outside the table lock, so they may (un)subscribe while they are invoked.
    pub async fn deliver(&self, message: &Message) -> DeliveryReport {
        let matching = self.subscriptions.read().await
            .get(&message.message_type)
            .cloned()
            .unwrap_or_default();

        if matching.is_empty() {
            debug!("no subscription for message type {} from {:?} - message is unhandled", message.message_type, message.peer);
            return DeliveryReport { invoked: 0, handled: false };
        }

        let mut handled = false;
        for subscription in &matching {
            trace!("delivering {:?} to {:?}", message, subscription);
            subscription.consumer.on_message(message, message.reader()).await;
            handled |= !subscription.flags.contains(SubscriptionFlags::MONITOR);
        }

        let oneshots: Vec<ConsumerId> = matching.iter()
            .filter(|s| s.flags.contains(SubscriptionFlags::ONESHOT))
            .map(|s| s.consumer.id())
            .collect();
        if !oneshots.is_empty() {
            let mut subscriptions = self.subscriptions.write().await;
            if let Some(for_type) = subscriptions.get_mut(&message.message_type) {
                // a consumer may have re-subscribed without ONESHOT during its invocation
                for_type.retain(|s| !(oneshots.contains(&s.consumer.id()) && s.flags.contains(SubscriptionFlags::ONESHOT)));
                if for_type.is_empty() {
                    subscriptions.remove(&message.message_type);
                }
            }
        }

        if !handled {
            debug!("message type {} from {:?} was only seen by monitors", message.message_type, message.peer);
        }
        DeliveryReport { invoked: matching.len(), handled }
    }
}
