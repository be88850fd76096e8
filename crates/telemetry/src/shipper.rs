use crate::{Entity, TableSink};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Message {
    Entity(Entity),
    Flush(oneshot::Sender<()>),
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Entity(_) => f.write_str("Entity"),
            Message::Flush(_) => f.write_str("Flush"),
        }
    }
}

/// Ships entities to a [TableSink] from a background task.
///
/// Enqueueing never blocks and never fails; if the sink rejects an entity
/// the failure goes to stderr, not to the caller.
#[derive(Clone, Debug)]
pub struct Shipper {
    tx: mpsc::UnboundedSender<Message>,
}

impl Shipper {
    /// Spawns the background task and returns a handle to it.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(sink: Arc<dyn TableSink>) -> Shipper {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Entity(entity) => {
                        if let Err(err) = sink.write(entity).await {
                            eprintln!("failed to ship log record: {err}");
                        }
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        }));
        Shipper { tx }
    }

    /// Enqueues an entity for shipping.
    pub fn enqueue(&self, entity: Entity) {
        let _ = self.tx.send(Message::Entity(entity));
    }

    /// Waits until everything enqueued so far has been handed to the sink.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Message::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Shipper;
    use crate::MemorySink;
    use serde_json::Map;

    #[tokio::test]
    async fn ships_in_order() {
        let sink = MemorySink::new();
        let shipper = Shipper::spawn(sink.clone());
        for i in 0..3 {
            let mut entity = Map::new();
            let _ = entity.insert("Message".to_string(), format!("record {i}").into());
            shipper.enqueue(entity);
        }
        shipper.flush().await;
        let entities = sink.entities();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0]["Message"], "record 0");
        assert_eq!(entities[2]["Message"], "record 2");
    }
}
