use chrono::{DateTime, Local};
use rumqttc::{Publish, QoS};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Application message pushed by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub received: DateTime<Local>,
}

impl InboundMessage {
    pub fn from_publish(publish: &Publish) -> Self {
        InboundMessage {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
            qos: publish.qos,
            received: Local::now(),
        }
    }

    fn qos_level(&self) -> u8 {
        match self.qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "topic: {}, message size: {}, qos: {}",
            self.topic,
            self.payload.len(),
            self.qos_level()
        )
    }
}

pub type MessageCallback = Box<dyn Fn(&InboundMessage) + Send + Sync>;

/// Callback slot shared between the session and its receive path
#[derive(Clone, Default)]
pub struct MessageHandler {
    callback: Arc<Mutex<Option<MessageCallback>>>,
}

impl MessageHandler {
    pub fn set(&self, callback: MessageCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn clear(&self) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn dispatch(&self, message: &InboundMessage) {
        let guard = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(callback) => callback(message),
            None => debug!("No message handler set for message on {}", message.topic),
        }
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let set = self
            .callback
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        f.debug_struct("MessageHandler").field("set", &set).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> InboundMessage {
        InboundMessage::from_publish(&Publish::new("x/y", QoS::AtLeastOnce, b"hello".to_vec()))
    }

    #[test]
    fn display_summarises_message() {
        assert_eq!(sample().to_string(), "topic: x/y, message size: 5, qos: 1");
    }

    #[test]
    fn dispatch_reaches_installed_callback() {
        let handler = MessageHandler::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        handler.set(Box::new(move |message: &InboundMessage| {
            assert_eq!(message.topic, "x/y");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        handler.clone().dispatch(&sample());
        handler.clear();
        handler.dispatch(&sample());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
