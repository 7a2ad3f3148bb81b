//! One-shot termination signal, clonable and awaitable from any task.

use futures_util::{future::Shared, FutureExt};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;

/// A future that resolves once the matching [`Signal`] has fired.
///
/// Cheap to clone; every clone resolves. Dropping the [`Signal`] without
/// firing it resolves the receivers as well, so a lost sender can never
/// strand a waiting task.
#[derive(Debug, Clone)]
pub struct Shutdown(Shared<oneshot::Receiver<()>>);

impl Future for Shutdown {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pin = self.get_mut();
        if pin.0.poll_unpin(cx).is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Fires the paired [`Shutdown`] future exactly once.
#[derive(Debug)]
pub struct Signal(oneshot::Sender<()>);

impl Signal {
    /// Consumes the signal and wakes every [`Shutdown`] clone.
    pub fn fire(self) {
        let _ = self.0.send(());
    }
}

/// Creates a connected `(Signal, Shutdown)` pair.
pub fn signal() -> (Signal, Shutdown) {
    let (tx, rx) = oneshot::channel();
    (Signal(tx), Shutdown(rx.shared()))
}
