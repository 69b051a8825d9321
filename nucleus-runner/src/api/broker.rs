//! Result broker
//!
//! Framework runners post their results over HTTP while the service that spawned
//! them is still awaiting the process. Each spawn registers a request id and keeps
//! the receiving half of a oneshot channel; the intake handlers complete it.

use nucleus_core::domain::result::{DiscoveryResult, ExecutionResult};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

type Pending<T> = Mutex<HashMap<Uuid, oneshot::Sender<T>>>;

#[derive(Default)]
pub struct ResultBroker {
    discovery: Pending<DiscoveryResult>,
    execution: Pending<ExecutionResult>,
}

fn register<T>(pending: &Pending<T>) -> (Uuid, oneshot::Receiver<T>) {
    let id = Uuid::new_v4();
    let (tx, rx) = oneshot::channel();
    if let Ok(mut map) = pending.lock() {
        map.insert(id, tx);
    }
    (id, rx)
}

fn deliver<T>(pending: &Pending<T>, id: Uuid, value: T) -> bool {
    let sender = pending.lock().ok().and_then(|mut map| map.remove(&id));
    match sender {
        Some(tx) => tx.send(value).is_ok(),
        None => false,
    }
}

impl ResultBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_discovery(&self) -> (Uuid, oneshot::Receiver<DiscoveryResult>) {
        register(&self.discovery)
    }

    pub fn register_execution(&self) -> (Uuid, oneshot::Receiver<ExecutionResult>) {
        register(&self.execution)
    }

    /// Completes a pending discovery request; false when nobody is waiting for `id`
    pub fn deliver_discovery(&self, id: Uuid, result: DiscoveryResult) -> bool {
        deliver(&self.discovery, id, result)
    }

    pub fn deliver_execution(&self, id: Uuid, result: ExecutionResult) -> bool {
        deliver(&self.execution, id, result)
    }

    /// Drops a registration whose runner will never report
    pub fn cancel(&self, id: Uuid) {
        if let Ok(mut map) = self.discovery.lock() {
            map.remove(&id);
        }
        if let Ok(mut map) = self.execution.lock() {
            map.remove(&id);
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        let discovery = self.discovery.lock().map(|m| m.len()).unwrap_or(0);
        let execution = self.execution.lock().map(|m| m.len()).unwrap_or(0);
        discovery + execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_completes_receiver() {
        let broker = ResultBroker::new();
        let (id, rx) = broker.register_discovery();
        let result = DiscoveryResult {
            execute_all_tests: true,
            ..Default::default()
        };
        assert!(broker.deliver_discovery(id, result));
        assert!(rx.await.unwrap().execute_all_tests);
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn test_deliver_unknown_id() {
        let broker = ResultBroker::new();
        assert!(!broker.deliver_execution(Uuid::new_v4(), ExecutionResult::default()));
    }

    #[test]
    fn test_cancel_removes_registration() {
        let broker = ResultBroker::new();
        let (id, _rx) = broker.register_execution();
        assert_eq!(broker.pending(), 1);
        broker.cancel(id);
        assert_eq!(broker.pending(), 0);
        assert!(!broker.deliver_execution(id, ExecutionResult::default()));
    }
}
