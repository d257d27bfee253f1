//! Session scenarios over the in-process loopback transport
//!
//! Deterministic: no sockets, clock di-advance manual.
//!
//! Usage:
//!   cargo test --test session_scenarios

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use netfork::{
    Client, ClientConfig, Context, Delivery, LoopbackNetwork, LoopbackTransport, PeerId, Server,
    ServerConfig, ServerInfoMessage, SessionEvent, SessionError, SessionState, StoppedReason,
    TestMessage,
};

type LoopServer = Server<LoopbackTransport>;
type LoopClient = Client<LoopbackTransport>;

const STEP: Duration = Duration::from_millis(100);

fn server(network: &LoopbackNetwork, config: ServerConfig) -> LoopServer {
    let mut server = Server::new(network.transport(), config);
    server.start().unwrap();
    assert_eq!(server.next_event(), Some(SessionEvent::Started));
    server
}

fn client(network: &LoopbackNetwork, config: ClientConfig) -> LoopClient {
    let mut client = Client::new(network.transport(), config);
    client.start().unwrap();
    assert_eq!(client.next_event(), Some(SessionEvent::Started));
    client
}

/// Run a few ticks on every session without moving the clock.
fn pump(server: &mut LoopServer, clients: &mut [&mut LoopClient]) {
    for _ in 0..4 {
        server.update().unwrap();
        for client in clients.iter_mut() {
            client.update().unwrap();
        }
    }
}

/// Records every `TestMessage` a client receives.
fn record_test_messages(client: &mut LoopClient) -> Rc<RefCell<Vec<i32>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    client
        .registry_mut()
        .unwrap()
        .register(move |_: &mut Context<'_>, msg: TestMessage| {
            sink.borrow_mut().push(msg.birthday_year);
            Ok(())
        })
        .unwrap();
    seen
}

fn connected_peers(server: &mut LoopServer) -> Vec<PeerId> {
    server
        .drain_events()
        .filter_map(|e| match e {
            SessionEvent::PeerConnected(id) => Some(id),
            _ => None,
        })
        .collect()
}

#[test]
fn broadcast_reaches_each_client_once() {
    let network = LoopbackNetwork::new();
    let mut server = server(
        &network,
        ServerConfig::default().with_port(7777).with_max_clients(2),
    );
    let mut alice = client(&network, ClientConfig::default().with_port(7777));
    let mut bob = client(&network, ClientConfig::default().with_port(7777));

    let alice_seen = record_test_messages(&mut alice);
    let bob_seen = record_test_messages(&mut bob);

    pump(&mut server, &mut [&mut alice, &mut bob]);
    assert!(alice.is_connected());
    assert!(bob.is_connected());
    assert_eq!(server.connections().len(), 2);

    // Server iterasi connection table, kirim ke setiap peer
    let message = TestMessage {
        birthday_year: 1987,
    };
    let ids: Vec<PeerId> = server.connections().ids();
    for id in ids {
        server.send(id, &message, Delivery::Reliable).unwrap();
    }
    pump(&mut server, &mut [&mut alice, &mut bob]);

    assert_eq!(*alice_seen.borrow(), vec![1987]);
    assert_eq!(*bob_seen.borrow(), vec![1987]);
}

#[test]
fn client_over_capacity_times_out() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default().with_max_clients(1));
    let mut first = client(&network, ClientConfig::default());
    let mut second = client(
        &network,
        ClientConfig::default().with_timeout(Duration::from_millis(500)),
    );

    pump(&mut server, &mut [&mut first, &mut second]);
    assert!(first.is_connected());
    assert_eq!(second.state(), SessionState::Started);

    for _ in 0..10 {
        network.advance(STEP);
        pump(&mut server, &mut [&mut first, &mut second]);
    }

    assert_eq!(server.connections().len(), 1);
    assert!(first.is_connected());
    assert!(second
        .drain_events()
        .any(|e| e == SessionEvent::Stopped(StoppedReason::Timeout)));
}

#[test]
fn request_reply_round_trip() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default());
    let mut client = client(&network, ClientConfig::default());

    server
        .registry_mut()
        .unwrap()
        .register(|ctx: &mut Context<'_>, msg: TestMessage| {
            let info = ServerInfoMessage::new("test", msg.birthday_year.to_string());
            ctx.reply(&info, Delivery::Reliable)?;
            Ok(())
        })
        .unwrap();

    let reply = Rc::new(RefCell::new(None));
    {
        let reply = reply.clone();
        client
            .registry_mut()
            .unwrap()
            .register(move |_: &mut Context<'_>, msg: ServerInfoMessage| {
                *reply.borrow_mut() = Some(msg);
                Ok(())
            })
            .unwrap();
    }

    pump(&mut server, &mut [&mut client]);
    client
        .send(&TestMessage { birthday_year: 2001 }, Delivery::Reliable)
        .unwrap();
    pump(&mut server, &mut [&mut client]);

    assert_eq!(
        reply.borrow().clone(),
        Some(ServerInfoMessage::new("test", "2001"))
    );
}

#[test]
fn server_closing_reason_reaches_client() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default());
    let mut client = client(&network, ClientConfig::default());
    pump(&mut server, &mut [&mut client]);

    let id = connected_peers(&mut server)[0];
    assert!(server.disconnect(id, StoppedReason::ServerClosing).unwrap());
    assert!(server.connection(id).is_none());

    pump(&mut server, &mut [&mut client]);

    let events: Vec<_> = client.drain_events().collect();
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Stopped(StoppedReason::ServerClosing))
    );
    assert_eq!(client.state(), SessionState::Idle);

    // Id lama tidak lagi valid
    assert!(matches!(
        server.send(id, &TestMessage::default(), Delivery::Reliable),
        Err(SessionError::UnknownConnection(_))
    ));
}

#[test]
fn server_stop_notifies_every_client() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default());
    let mut alice = client(&network, ClientConfig::default());
    let mut bob = client(&network, ClientConfig::default());
    pump(&mut server, &mut [&mut alice, &mut bob]);
    server.drain_events().for_each(drop);

    server.stop().unwrap();
    let events: Vec<_> = server.drain_events().collect();
    assert_eq!(
        events.iter().filter(|e| matches!(
            e,
            SessionEvent::PeerDisconnected {
                reason: StoppedReason::ServerClosing,
                ..
            }
        )).count(),
        2
    );
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Stopped(StoppedReason::LocalStopped))
    );

    alice.update().unwrap();
    bob.update().unwrap();
    for client in [&mut alice, &mut bob] {
        assert!(client
            .drain_events()
            .any(|e| e == SessionEvent::Stopped(StoppedReason::ServerClosing)));
    }
}

#[test]
fn silent_client_times_out_on_both_sides() {
    let network = LoopbackNetwork::new();
    let timeout = Duration::from_millis(1000);
    let mut server = server(&network, ServerConfig::default().with_timeout(timeout));
    let mut client = client(&network, ClientConfig::default().with_timeout(timeout));
    pump(&mut server, &mut [&mut client]);
    let id = connected_peers(&mut server)[0];

    network.set_reachable(client.transport().endpoint(), false);

    for _ in 0..15 {
        network.advance(STEP);
        pump(&mut server, &mut [&mut client]);
    }

    assert!(!server.connections().contains(id));
    assert!(server.drain_events().any(|e| e
        == SessionEvent::PeerDisconnected {
            id,
            reason: StoppedReason::Timeout
        }));
    assert!(client
        .drain_events()
        .any(|e| e == SessionEvent::Stopped(StoppedReason::Timeout)));
}

#[test]
fn live_peers_survive_long_idle() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default());
    let mut client = client(&network, ClientConfig::default());
    pump(&mut server, &mut [&mut client]);

    for _ in 0..100 {
        network.advance(STEP);
        pump(&mut server, &mut [&mut client]);
    }

    assert!(client.is_connected());
    assert_eq!(server.connections().len(), 1);
}

#[test]
fn stop_twice_yields_one_stopped() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default());
    let mut client = client(&network, ClientConfig::default());
    pump(&mut server, &mut [&mut client]);
    client.drain_events().for_each(drop);

    client.stop().unwrap();
    client.stop().unwrap();

    let stopped: Vec<_> = client
        .drain_events()
        .filter(|e| matches!(e, SessionEvent::Stopped(_)))
        .collect();
    assert_eq!(
        stopped,
        vec![SessionEvent::Stopped(StoppedReason::LocalStopped)]
    );

    // Server melihat client pergi
    pump(&mut server, &mut []);
    assert!(server.connections().is_empty());
}

#[test]
fn unknown_message_disconnects_sender_with_remote_error() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default());
    let mut rogue = client(&network, ClientConfig::default());
    let mut honest = client(&network, ClientConfig::default());
    pump(&mut server, &mut [&mut rogue, &mut honest]);
    assert_eq!(server.connections().len(), 2);

    // Server tidak punya handler untuk TestMessage
    rogue
        .send(&TestMessage { birthday_year: 1 }, Delivery::Reliable)
        .unwrap();
    pump(&mut server, &mut [&mut rogue, &mut honest]);

    assert_eq!(server.connections().len(), 1);
    assert!(honest.is_connected());
    assert!(rogue
        .drain_events()
        .any(|e| e == SessionEvent::Stopped(StoppedReason::RemoteError)));
}

#[test]
fn restart_gets_fresh_registry() {
    let network = LoopbackNetwork::new();
    let mut server = server(&network, ServerConfig::default());
    server
        .registry_mut()
        .unwrap()
        .register(|_: &mut Context<'_>, _: TestMessage| Ok(()))
        .unwrap();

    server.stop().unwrap();
    server.start().unwrap();

    let registry = server.registry().unwrap();
    assert!(registry.is_empty());
}
