//! Minimal implementation of the agent pattern.
//!
//! Agents encapsulate state and process messages one at a time. A type
//! implements `Agent`, is constructed, then started with `Agent::start`,
//! which returns an `Addr`. The `Addr` can be cheaply cloned and used to
//! send messages to the agent, or boxed as a `dyn Sender<M>` to abstract
//! over the concrete agent type behind a message.
//!
//! There is no real message queue here; a `Mutex` around the agent state
//! serializes message processing, which is all we need.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A trait for messages that can be sent to an agent.
pub trait Message: Send + 'static {
    /// The type of reply sent back by the agent.
    type Reply: Send + 'static;
}

/// Channel used by an agent to reply to a message.
///
/// The agent must consume this with either `send` or `later`.
pub struct ReplySender<M: Message> {
    tx: oneshot::Sender<M::Reply>,
}

impl<M: Message> ReplySender<M> {
    /// Reply to the message immediately.
    pub fn send(self, reply: M::Reply) {
        let _ = self.tx.send(reply);
    }

    /// Spawn an async task that produces the reply later.
    ///
    /// This frees the agent to pick up its next message while the task runs.
    pub fn later<F>(self, f: F)
    where
        F: Future<Output = M::Reply> + Send + 'static,
    {
        tokio::spawn(async move { self.send(f.await) });
    }
}

/// Channel used to receive a reply from an agent. Await it like a future.
pub struct ReplyReceiver<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for ReplyReceiver<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|val| val.expect("agent did not send a reply"))
    }
}

/// A trait for types that represent agents.
pub trait Agent: Sized {
    /// Start the agent, returning its address.
    fn start(self) -> Addr<Self> {
        Addr {
            agent: Arc::new(Mutex::new(self)),
        }
    }
}

/// Trait implemented by agents for each message type they handle.
pub trait Handler<M: Message> {
    /// Handle the message.
    ///
    /// Handlers run one-by-one as messages arrive, with mutable access to
    /// the agent. The reply channel may outlive the function call, so an
    /// agent can spawn an async task and continue with the next message.
    fn handle(&mut self, message: M, reply: ReplySender<M>);
}

/// An address to an agent. Cheap to clone.
pub struct Addr<T> {
    agent: Arc<Mutex<T>>,
}

impl<T> Addr<T> {
    /// Send a message to the agent.
    pub fn send<M>(&self, message: M) -> ReplyReceiver<M::Reply>
    where
        M: Message,
        T: Handler<M> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || {
            let mut agent = agent.lock().unwrap();
            agent.handle(message, ReplySender { tx });
        });
        ReplyReceiver { rx }
    }
}

impl<T> Clone for Addr<T> {
    fn clone(&self) -> Self {
        Addr {
            agent: self.agent.clone(),
        }
    }
}

/// Trait implemented by `Addr` that allows trait objects per message type.
pub trait Sender<M: Message>: Send + Sync {
    /// Send a message of this type to the agent.
    fn send(&self, message: M) -> ReplyReceiver<M::Reply>;
}

impl<M, T> Sender<M> for Addr<T>
where
    M: Message,
    T: Handler<M> + Send + 'static,
{
    fn send(&self, message: M) -> ReplyReceiver<M::Reply> {
        Addr::<T>::send(self, message)
    }
}
