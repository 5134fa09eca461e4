use std::cell::RefCell;

use async_trait::async_trait;
use shopdesk_core::{Method, Request, Response, TransportError};
use shopdesk_engine::Transport;
use tokio::sync::oneshot;

/// Wraps a transport and holds each write until the test releases it, so
/// settlement order can be chosen explicitly. Reads pass straight through.
pub struct GatedTransport<T> {
    inner: T,
    waiting: RefCell<Vec<(Request, oneshot::Sender<()>)>>,
}

impl<T: Transport> GatedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            waiting: RefCell::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn waiting(&self) -> usize {
        self.waiting.borrow().len()
    }

    pub fn waiting_paths(&self) -> Vec<String> {
        self.waiting.borrow().iter().map(|(r, _)| r.path.clone()).collect()
    }

    /// Yield until at least `count` requests are held.
    pub async fn wait_for(&self, count: usize) {
        while self.waiting() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Let the oldest held request for `path` through. Returns false when
    /// nothing matching is waiting.
    pub fn release(&self, path: &str) -> bool {
        let gate = {
            let mut waiting = self.waiting.borrow_mut();
            let Some(pos) = waiting.iter().position(|(r, _)| r.path == path) else {
                return false;
            };
            waiting.remove(pos).1
        };
        gate.send(()).is_ok()
    }

    pub fn release_all(&self) {
        let held: Vec<_> = self.waiting.borrow_mut().drain(..).collect();
        for (_, gate) in held {
            let _ = gate.send(());
        }
    }
}

#[async_trait(?Send)]
impl<T: Transport> Transport for GatedTransport<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        if request.method != Method::Get {
            let (tx, rx) = oneshot::channel();
            self.waiting.borrow_mut().push((request.clone(), tx));
            // A dropped sender releases the request too.
            let _ = rx.await;
        }
        self.inner.send(request).await
    }
}
