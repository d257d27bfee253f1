//! Message registry: identity → decode-and-invoke handler.
//!
//! One registry per session run. Dispatch reads the leading identity,
//! decodes a fresh message and calls the handler with a [`Context`] for
//! the originating peer. Unknown identities and undecodable payloads are
//! treated as garbage: the sender is force-disconnected with
//! [`StoppedReason::RemoteError`] and no handler runs.
//!
//! # Example
//!
//! ```ignore
//! let registry = server.registry_mut().unwrap();
//! registry.register(|ctx: &mut Context<'_>, msg: TestMessage| {
//!     ctx.reply(&ServerInfoMessage::current(), Delivery::Reliable)?;
//!     Ok(())
//! })?;
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use thiserror::Error;
use tracing::{debug, warn};

use super::connection::{Connection, Link};
use crate::error::{HandlerError, HandlerResult, RegistryError, SessionError, WireError};
use crate::protocol::{read_message_id, Decoder, MessageId, NetMessage, StoppedReason};
use crate::transport::{Delivery, PeerId};

/// Everything a handler may touch while processing one message.
pub struct Context<'a> {
    peer: PeerId,
    connection: Option<&'a Connection>,
    link: Link<'a>,
    disconnects: Vec<(PeerId, StoppedReason)>,
}

impl<'a> Context<'a> {
    pub fn new(peer: PeerId, connection: Option<&'a Connection>, link: Link<'a>) -> Self {
        Self {
            peer,
            connection,
            link,
            disconnects: Vec::new(),
        }
    }

    /// Transport id of the peer that sent the message.
    #[inline(always)]
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// The originating connection on a server; `None` on a client, whose
    /// only peer is the server.
    #[inline(always)]
    pub fn connection(&self) -> Option<&'a Connection> {
        self.connection
    }

    /// Send `message` back to the originating peer.
    pub fn reply<M: NetMessage>(&mut self, message: &M, delivery: Delivery) -> crate::Result<()> {
        self.send(self.peer, message, delivery)
    }

    /// Send `message` to any peer, e.g. another client from a server handler.
    ///
    /// Peers disconnected earlier in this handler are refused.
    pub fn send<M: NetMessage>(
        &mut self,
        peer: PeerId,
        message: &M,
        delivery: Delivery,
    ) -> crate::Result<()> {
        if self.reason_for(peer).is_some() {
            return Err(SessionError::UnknownConnection(peer));
        }
        self.link.send(peer, message, delivery)
    }

    /// Raw send path. Disconnects go through the context so the session
    /// can update its connection table after dispatch.
    pub fn link(&mut self) -> &mut Link<'a> {
        &mut self.link
    }

    /// Disconnect the originating peer once the handler returns.
    ///
    /// The transport is told at once; the session updates its own state
    /// after dispatch. Only the first call has any effect.
    pub fn disconnect(&mut self, reason: StoppedReason) {
        self.disconnect_peer(self.peer, reason);
    }

    /// Disconnect any peer, carrying `reason` to it.
    ///
    /// Same rules as [`disconnect`](Self::disconnect): the first reason per
    /// peer wins and the table is updated after dispatch.
    pub fn disconnect_peer(&mut self, peer: PeerId, reason: StoppedReason) {
        if self.reason_for(peer).is_some() {
            return;
        }
        if let Err(e) = self.link.disconnect(peer, reason) {
            warn!(peer, error = %e, "transport refused disconnect");
        }
        self.disconnects.push((peer, reason));
    }

    pub(crate) fn force_disconnect(&mut self, reason: StoppedReason) {
        warn!(peer = self.peer, %reason, "force-disconnecting peer");
        self.disconnect(reason);
    }

    /// Whether the originating peer has been disconnected.
    pub fn is_disconnected(&self) -> bool {
        self.disconnect_reason().is_some()
    }

    /// Reason passed to the first disconnect of the originating peer, if any.
    pub fn disconnect_reason(&self) -> Option<StoppedReason> {
        self.reason_for(self.peer)
    }

    /// Every peer disconnected during this dispatch, in call order.
    pub fn disconnects(&self) -> &[(PeerId, StoppedReason)] {
        &self.disconnects
    }

    pub(crate) fn take_disconnects(&mut self) -> Vec<(PeerId, StoppedReason)> {
        std::mem::take(&mut self.disconnects)
    }

    fn reason_for(&self, peer: PeerId) -> Option<StoppedReason> {
        self.disconnects
            .iter()
            .find(|(id, _)| *id == peer)
            .map(|(_, reason)| *reason)
    }
}

/// Why a packet was not handed to any handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Fewer than four bytes: no identity to read.
    MissingId(WireError),
    /// No handler for the identity.
    UnknownId,
    /// The payload did not decode as the registered type.
    Malformed(WireError),
    /// The packet does not fit the receive buffer.
    Oversized(WireError),
}

/// Outcome of dispatching one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled { id: MessageId },
    Rejected { id: Option<MessageId>, reason: Rejection },
}

/// A handler returned an error. Never caught by the registry.
#[derive(Debug, Error)]
#[error("handler for message id {message_id} failed: {source}")]
pub struct HandlerFailure {
    pub message_id: MessageId,
    #[source]
    pub source: HandlerError,
}

impl From<HandlerFailure> for SessionError {
    fn from(failure: HandlerFailure) -> Self {
        SessionError::Handler {
            message_id: failure.message_id,
            source: failure.source,
        }
    }
}

/// Type-erased handler stored in the registry.
trait Handler {
    /// Decode the payload and run the handler.
    ///
    /// The outer `Err` is a decode failure; the inner result is the
    /// handler's own.
    fn call(
        &mut self,
        ctx: &mut Context<'_>,
        decoder: &mut Decoder<'_>,
    ) -> Result<HandlerResult, WireError>;
}

/// Wrapper that decodes `M` before calling the handler.
struct TypedHandler<M, F> {
    handler: F,
    _phantom: PhantomData<fn(M)>,
}

impl<M, F> Handler for TypedHandler<M, F>
where
    M: NetMessage,
    F: FnMut(&mut Context<'_>, M) -> HandlerResult,
{
    fn call(
        &mut self,
        ctx: &mut Context<'_>,
        decoder: &mut Decoder<'_>,
    ) -> Result<HandlerResult, WireError> {
        let message = M::decode(decoder)?;
        Ok((self.handler)(ctx, message))
    }
}

struct Entry {
    type_name: &'static str,
    handler: Box<dyn Handler>,
}

/// Identity → handler map for one session run.
#[derive(Default)]
pub struct MessageRegistry {
    handlers: HashMap<MessageId, Entry>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `M::ID`.
    ///
    /// A duplicate identity is rejected and the existing handler kept.
    pub fn register<M, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        M: NetMessage + 'static,
        F: FnMut(&mut Context<'_>, M) -> HandlerResult + 'static,
    {
        let type_name = std::any::type_name::<M>();

        if let Some(existing) = self.handlers.get(&M::ID) {
            warn!(
                id = M::ID,
                existing = existing.type_name,
                rejected = type_name,
                "duplicate message id"
            );
            return Err(RegistryError::DuplicateId {
                id: M::ID,
                existing: existing.type_name,
            });
        }

        self.handlers.insert(
            M::ID,
            Entry {
                type_name,
                handler: Box::new(TypedHandler {
                    handler,
                    _phantom: PhantomData,
                }),
            },
        );
        debug!(id = M::ID, message = type_name, "handler registered");
        Ok(())
    }

    /// Remove the handler for `M::ID`. Returns whether one was present.
    pub fn unregister<M: NetMessage>(&mut self) -> bool {
        self.handlers.remove(&M::ID).is_some()
    }

    #[inline]
    pub fn contains(&self, id: MessageId) -> bool {
        self.handlers.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch one packet read from `decoder`.
    pub fn dispatch(
        &mut self,
        ctx: &mut Context<'_>,
        decoder: &mut Decoder<'_>,
    ) -> Result<Dispatch, HandlerFailure> {
        let id = match read_message_id(decoder) {
            Ok(id) => id,
            Err(e) => {
                warn!(peer = ctx.peer(), error = %e, "packet too short for a message id");
                ctx.force_disconnect(StoppedReason::RemoteError);
                return Ok(Dispatch::Rejected {
                    id: None,
                    reason: Rejection::MissingId(e),
                });
            }
        };

        let Some(entry) = self.handlers.get_mut(&id) else {
            warn!(peer = ctx.peer(), id, "no handler for message id");
            ctx.force_disconnect(StoppedReason::RemoteError);
            return Ok(Dispatch::Rejected {
                id: Some(id),
                reason: Rejection::UnknownId,
            });
        };

        match entry.handler.call(ctx, decoder) {
            Ok(Ok(())) => Ok(Dispatch::Handled { id }),
            Ok(Err(source)) => Err(HandlerFailure {
                message_id: id,
                source,
            }),
            Err(e) => {
                warn!(
                    peer = ctx.peer(),
                    id,
                    message = entry.type_name,
                    error = %e,
                    "malformed payload"
                );
                ctx.force_disconnect(StoppedReason::RemoteError);
                Ok(Dispatch::Rejected {
                    id: Some(id),
                    reason: Rejection::Malformed(e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::{envelope, Ping, ScriptedTransport};
    use crate::protocol::{Encoder, SendBuffer, DEFAULT_BUFFER_SIZE};
    use std::cell::Cell;
    use std::rc::Rc;
    use tracing_test::traced_test;

    struct Other;

    impl NetMessage for Other {
        const ID: MessageId = Ping::ID;

        fn encode(&self, _: &mut Encoder<'_>) -> Result<(), WireError> {
            Ok(())
        }

        fn decode(_: &mut Decoder<'_>) -> Result<Self, WireError> {
            Ok(Self)
        }
    }

    /// Run `dispatch` against a scripted transport, returning the outcome
    /// and the transport for inspection.
    fn run(
        registry: &mut MessageRegistry,
        packet: &[u8],
    ) -> (Result<Dispatch, HandlerFailure>, ScriptedTransport) {
        let mut transport = ScriptedTransport::default();
        let mut buffer = SendBuffer::new(DEFAULT_BUFFER_SIZE);
        let outcome = {
            let link = Link::new(&mut transport, &mut buffer);
            let mut ctx = Context::new(9, None, link);
            let mut decoder = Decoder::new(packet);
            registry.dispatch(&mut ctx, &mut decoder)
        };
        (outcome, transport)
    }

    #[test]
    fn test_dispatch_invokes_handler_once() {
        let seen = Rc::new(Cell::new(0u64));
        let calls = Rc::new(Cell::new(0));
        let mut registry = MessageRegistry::new();
        {
            let seen = seen.clone();
            let calls = calls.clone();
            registry
                .register(move |ctx: &mut Context<'_>, msg: Ping| {
                    assert_eq!(ctx.peer(), 9);
                    assert!(ctx.connection().is_none());
                    seen.set(msg.nonce);
                    calls.set(calls.get() + 1);
                    Ok(())
                })
                .unwrap();
        }

        let (outcome, transport) = run(&mut registry, &envelope(&Ping { nonce: 99 }));
        assert_eq!(outcome.unwrap(), Dispatch::Handled { id: Ping::ID });
        assert_eq!(seen.get(), 99);
        assert_eq!(calls.get(), 1);
        assert!(transport.disconnects.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = MessageRegistry::new();
        registry.register(|_: &mut Context<'_>, _: Ping| Ok(())).unwrap();

        let err = registry
            .register(|_: &mut Context<'_>, _: Other| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId { id, .. } if id == Ping::ID));
        assert!(logs_contain("duplicate message id"));

        // Handler pertama masih dipakai: Ping payload tetap valid
        let (outcome, _) = run(&mut registry, &envelope(&Ping { nonce: 1 }));
        assert_eq!(outcome.unwrap(), Dispatch::Handled { id: Ping::ID });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_id_disconnects_exactly_once() {
        let calls = Rc::new(Cell::new(0));
        let mut registry = MessageRegistry::new();
        {
            let calls = calls.clone();
            registry
                .register(move |_: &mut Context<'_>, _: Ping| {
                    calls.set(calls.get() + 1);
                    Ok(())
                })
                .unwrap();
        }

        let (outcome, transport) = run(&mut registry, &[0xEE, 0, 0, 0, 1, 2]);
        assert_eq!(
            outcome.unwrap(),
            Dispatch::Rejected {
                id: Some(0xEE),
                reason: Rejection::UnknownId
            }
        );
        assert_eq!(transport.disconnects, vec![(9, StoppedReason::RemoteError.code())]);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_truncated_packets_are_rejected() {
        let mut registry = MessageRegistry::new();
        registry.register(|_: &mut Context<'_>, _: Ping| Ok(())).unwrap();

        let (outcome, transport) = run(&mut registry, &[1, 2]);
        assert!(matches!(
            outcome.unwrap(),
            Dispatch::Rejected { id: None, reason: Rejection::MissingId(_) }
        ));
        assert_eq!(transport.disconnects.len(), 1);

        let mut short = envelope(&Ping { nonce: 5 });
        short.truncate(7);
        let (outcome, transport) = run(&mut registry, &short);
        assert!(matches!(
            outcome.unwrap(),
            Dispatch::Rejected { id: Some(Ping::ID), reason: Rejection::Malformed(_) }
        ));
        assert_eq!(transport.disconnects.len(), 1);
    }

    #[test]
    fn test_handler_error_propagates() {
        let mut registry = MessageRegistry::new();
        registry
            .register(|_: &mut Context<'_>, _: Ping| Err("boom".into()))
            .unwrap();

        let (outcome, transport) = run(&mut registry, &envelope(&Ping { nonce: 0 }));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.message_id, Ping::ID);
        assert_eq!(failure.source.to_string(), "boom");
        assert!(transport.disconnects.is_empty());
    }

    #[test]
    fn test_reply_goes_to_originating_peer() {
        let mut registry = MessageRegistry::new();
        registry
            .register(|ctx: &mut Context<'_>, msg: Ping| {
                ctx.reply(&Ping { nonce: msg.nonce + 1 }, Delivery::Unsequenced)?;
                Ok(())
            })
            .unwrap();

        let (outcome, transport) = run(&mut registry, &envelope(&Ping { nonce: 10 }));
        assert!(outcome.is_ok());
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0].0, 9);
        assert_eq!(transport.sent[0].2, envelope(&Ping { nonce: 11 }));
        assert_eq!(transport.sent[0].3, Delivery::Unsequenced);
    }

    #[test]
    fn test_unregister() {
        let mut registry = MessageRegistry::new();
        assert!(!registry.unregister::<Ping>());
        registry.register(|_: &mut Context<'_>, _: Ping| Ok(())).unwrap();
        assert!(registry.contains(Ping::ID));
        assert!(registry.unregister::<Ping>());
        assert!(registry.is_empty());
    }
}
