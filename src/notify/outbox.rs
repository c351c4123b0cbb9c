use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::model::subject::Subject;

use super::{Message, Notifier, NotifyError};

#[derive(Debug, Clone, Copy, Default)]
enum Behaviour {
    #[default]
    Deliver,
    Fail,
    Stall(Duration),
}

/// A notifier that keeps every message instead of sending it.
/// It can be told to fail or stall, to exercise delivery errors.
///
/// Clones share the same messages.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    sent: Arc<Mutex<Vec<Message>>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl Outbox {
    /// All delivered messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// The last message delivered to `subject`.
    pub fn last_for(&self, subject: &Subject) -> Option<Message> {
        self.messages()
            .into_iter()
            .rev()
            .find(|message| &message.to == subject)
    }

    /// Refuse every following delivery.
    pub fn fail(&self) {
        self.set(Behaviour::Fail);
    }

    /// Delay every following delivery by `delay` before accepting it.
    pub fn stall(&self, delay: Duration) {
        self.set(Behaviour::Stall(delay));
    }

    /// Go back to accepting deliveries immediately.
    pub fn deliver(&self) {
        self.set(Behaviour::Deliver);
    }

    fn set(&self, behaviour: Behaviour) {
        if let Ok(mut current) = self.behaviour.lock() {
            *current = behaviour;
        }
    }
}

#[rocket::async_trait]
impl Notifier for Outbox {
    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let behaviour = self
            .behaviour
            .lock()
            .map(|behaviour| *behaviour)
            .unwrap_or_default();
        match behaviour {
            Behaviour::Deliver => {}
            Behaviour::Fail => {
                return Err(NotifyError::Rejected("outbox is failing".to_string()));
            }
            Behaviour::Stall(delay) => rocket::tokio::time::sleep(delay).await,
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}
