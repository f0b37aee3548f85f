//! Abbreviated handshakes: over an association, from the session cache, and
//! the fallback to a full handshake.

mod dshake_common;

use std::sync::Arc;
use std::time::Instant;

use dshake::types::AlertDescription;
use dshake::{
    Config, Error, HandshakeKind, HandshakeParams, Handshakers, InMemorySessionCache, Session,
    SessionCache,
};
use dshake_common::*;

#[test]
fn resume_over_association_moves_to_next_epoch() {
    let _ = env_logger::try_init();
    let now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());
    connect(&mut client, &mut server, now);

    let before = client.endpoint.session(server.addr).expect("client session");
    assert_eq!(before.write_epoch(), Some(1));

    client
        .endpoint
        .resume(server.addr, before.clone(), now)
        .expect("resume");

    // The ClientHello travels protected by the association.
    let ch = client.wire.take_datagrams();
    let headers = collect_headers(&ch);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].ctype, HANDSHAKE);
    assert_eq!(headers[0].epoch, 1);

    deliver_all(&client, &mut server, &ch, now);
    assert_eq!(
        server.endpoint.handshaker(client.addr).map(|h| h.kind()),
        Some(HandshakeKind::ResumingServer)
    );

    // No application data while the epoch is about to change.
    let err = server
        .endpoint
        .send_application_data(client.addr, b"data")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    pump(&mut client, &mut server, now);

    let c = client.endpoint.session(server.addr).expect("client session");
    let s = server.endpoint.session(client.addr).expect("server session");
    assert_eq!(c.id(), before.id());
    assert_eq!(s.id(), before.id());
    assert_eq!(c.master_secret(), before.master_secret());
    assert_eq!(s.master_secret(), before.master_secret());
    assert_eq!(c.write_epoch(), Some(2));
    assert_eq!(s.read_epoch(), Some(2));

    assert_eq!(client.events.established().len(), 2);
    assert_eq!(server.events.established().len(), 2);

    client
        .endpoint
        .send_application_data(server.addr, b"after")
        .expect("send");
    let sent = client.wire.take_datagrams();
    assert_eq!(collect_headers(&sent)[0].epoch, 2);
    deliver_all(&client, &mut server, &sent, now);
    assert_eq!(
        server.endpoint.poll_application_data(),
        Some((client.addr, b"after".to_vec()))
    );
}

#[test]
fn resume_from_cache_after_close() {
    //! Without an association the resumed session starts over at epoch 1,
    //! sequence 0, under fresh keys. Only resumption over an association
    //! continues with counters beyond the old ones.

    let _ = env_logger::try_init();
    let now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());
    connect(&mut client, &mut server, now);

    let before = client.endpoint.session(server.addr).expect("client session");
    client.endpoint.close(server.addr).expect("close");
    deliver(&client, &mut server, now);
    assert!(!server.endpoint.is_established(client.addr));

    client
        .endpoint
        .resume(server.addr, before.clone(), now)
        .expect("resume");
    deliver(&client, &mut server, now); // CH with session id
    deliver(&server, &mut client, now); // HVR
    deliver(&client, &mut server, now); // CH + cookie

    assert_eq!(
        server.endpoint.handshaker(client.addr).map(|h| h.kind()),
        Some(HandshakeKind::ResumingServer)
    );

    // Abbreviated: no key exchange.
    let f2 = server.wire.take_datagrams();
    assert_eq!(handshake_types(&f2), vec![SERVER_HELLO]);
    let ctypes: Vec<u8> = collect_headers(&f2).iter().map(|h| h.ctype).collect();
    assert!(ctypes.contains(&CHANGE_CIPHER_SPEC));

    deliver_all(&server, &mut client, &f2, now);
    assert!(client.endpoint.is_established(server.addr));
    deliver(&client, &mut server, now);
    assert!(server.endpoint.is_established(client.addr));

    let c = client.endpoint.session(server.addr).expect("client session");
    let s = server.endpoint.session(client.addr).expect("server session");
    assert_eq!(c.id(), before.id());
    assert_eq!(c.master_secret(), before.master_secret());
    assert_eq!(s.master_secret(), before.master_secret());
    assert_eq!(c.write_epoch(), Some(1));
}

#[test]
fn replayed_record_of_previous_epoch_is_dropped_after_resume() {
    //! Application data the association accepted while a resumption ran over
    //! it stays marked once the epoch switched.

    let _ = env_logger::try_init();
    let now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());
    connect(&mut client, &mut server, now);

    let session = client.endpoint.session(server.addr).expect("client session");
    client
        .endpoint
        .resume(server.addr, session, now)
        .expect("resume");

    server
        .endpoint
        .send_application_data(client.addr, b"pay once")
        .expect("send");
    let payment = server.wire.take_datagrams();
    assert_eq!(collect_headers(&payment)[0].epoch, 1);

    deliver_all(&server, &mut client, &payment, now);
    assert_eq!(
        client.endpoint.poll_application_data(),
        Some((server.addr, b"pay once".to_vec()))
    );

    pump(&mut client, &mut server, now);
    let c = client.endpoint.session(server.addr).expect("client session");
    assert_eq!(c.read_epoch(), Some(2));

    deliver_all(&server, &mut client, &payment, now);
    assert_eq!(client.endpoint.poll_application_data(), None);
}

#[test]
fn aborted_resume_over_association_keeps_sequence_numbers() {
    //! The ClientHellos of a resumption over an association use the
    //! association's epoch. After the resumption timed out, the association
    //! continues past them.

    let _ = env_logger::try_init();
    let mut now = Instant::now();

    let config = Config::builder()
        .psk_store(Arc::new(psk_store()))
        .flight_retries(2)
        .build()
        .expect("config");
    let mut client = Peer::client(config);
    let mut server = Peer::server(psk_config());
    connect(&mut client, &mut server, now);

    let session = client.endpoint.session(server.addr).expect("client session");
    client
        .endpoint
        .resume(server.addr, session, now)
        .expect("resume");

    let mut hellos = client.wire.take_datagrams();
    for _ in 0..10 {
        if client.endpoint.handshaker(server.addr).is_none() {
            break;
        }
        trigger_timeout(&mut client, &mut now);
        hellos.extend(client.wire.take_datagrams());
    }
    assert!(client.endpoint.handshaker(server.addr).is_none());
    let failures = client.events.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], Error::Timeout(_)));

    let hello_headers = collect_headers(&hellos);
    assert_eq!(hello_headers.len(), 3);
    assert!(hello_headers.iter().all(|h| h.epoch == 1));

    assert!(client.endpoint.is_established(server.addr));
    client
        .endpoint
        .send_application_data(server.addr, b"still here")
        .expect("send");
    let sent = client.wire.take_datagrams();

    let mut all = hello_headers.clone();
    all.extend(collect_headers(&sent));
    assert_eq!(all.last().map(|h| h.ctype), Some(APPLICATION_DATA));
    assert_epochs_and_seq_increased(&all);

    deliver_all(&client, &mut server, &sent, now);
    assert_eq!(
        server.endpoint.poll_application_data(),
        Some((client.addr, b"still here".to_vec()))
    );
}

#[test]
fn close_during_resume_uses_fresh_sequence_number() {
    let _ = env_logger::try_init();
    let now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());
    connect(&mut client, &mut server, now);

    let session = client.endpoint.session(server.addr).expect("client session");
    client
        .endpoint
        .resume(server.addr, session, now)
        .expect("resume");
    let hello = client.wire.take_datagrams();

    client.endpoint.close(server.addr).expect("close");
    let closing = client.wire.take_datagrams();

    let mut all = collect_headers(&hello);
    all.extend(collect_headers(&closing));
    assert_eq!(all.last().map(|h| (h.ctype, h.epoch)), Some((ALERT, 1)));
    assert_epochs_and_seq_increased(&all);

    deliver_all(&client, &mut server, &closing, now);
    assert!(!server.endpoint.is_established(client.addr));
}

#[test]
fn fatal_alert_during_resumption_invalidates_session() {
    //! A resumption aborted with a fatal alert removes the session from the
    //! cache. The next attempt runs a full handshake.

    let _ = env_logger::try_init();
    let now = Instant::now();

    let cache = Arc::new(InMemorySessionCache::new(16));
    let server_config = Config::builder()
        .psk_store(Arc::new(psk_store()))
        .max_record_failures(1)
        .build()
        .expect("config");
    let mut client = Peer::client(psk_config());
    let mut server = Peer::with_cache("192.0.2.1:5684", server_config, cache.clone());
    connect(&mut client, &mut server, now);

    let before = client.endpoint.session(server.addr).expect("client session");
    assert!(cache.get(before.id()).is_some());
    client.endpoint.close(server.addr).expect("close");
    deliver(&client, &mut server, now);
    assert!(cache.get(before.id()).is_some(), "close_notify keeps the session");

    client
        .endpoint
        .resume(server.addr, before.clone(), now)
        .expect("resume");
    deliver(&client, &mut server, now);
    deliver(&server, &mut client, now);
    deliver(&client, &mut server, now);
    assert_eq!(
        server.endpoint.handshaker(client.addr).map(|h| h.kind()),
        Some(HandshakeKind::ResumingServer)
    );
    lose(&server);

    // Handshake record claiming 40 bytes, carrying 2.
    let truncated = [22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 9, 0, 40, 1, 2];
    server.endpoint.handle_datagram(client.addr, &truncated, now);
    assert!(server.endpoint.handshaker(client.addr).is_none());
    assert_eq!(
        server.events.failures()[0].alert_description(),
        Some(AlertDescription::DecodeError)
    );
    assert!(cache.get(before.id()).is_none());

    deliver(&server, &mut client, now);
    assert!(client.endpoint.handshaker(server.addr).is_none());

    client
        .endpoint
        .resume(server.addr, before.clone(), now)
        .expect("resume");
    pump(&mut client, &mut server, now);

    let c = client.endpoint.session(server.addr).expect("client session");
    let s = server.endpoint.session(client.addr).expect("server session");
    assert_ne!(c.id(), before.id());
    assert_eq!(c.id(), s.id());
}

#[test]
fn fatal_alert_over_association_invalidates_session() {
    let _ = env_logger::try_init();
    let now = Instant::now();

    let client_cache = Arc::new(InMemorySessionCache::new(16));
    let server_cache = Arc::new(InMemorySessionCache::new(16));
    let client_config = Config::builder()
        .psk_store(Arc::new(psk_store()))
        .max_record_failures(1)
        .build()
        .expect("config");
    let mut client = Peer::with_cache("192.0.2.10:40001", client_config, client_cache.clone());
    let mut server = Peer::with_cache("192.0.2.1:5684", psk_config(), server_cache.clone());
    connect(&mut client, &mut server, now);

    let before = client.endpoint.session(server.addr).expect("client session");
    assert!(client_cache.get(before.id()).is_some());
    assert!(server_cache.get(before.id()).is_some());

    client
        .endpoint
        .resume(server.addr, before.clone(), now)
        .expect("resume");
    let hello = client.wire.take_datagrams();

    // The ClientHello is lost, the client then fails the resumption.
    let truncated = [22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 9, 0, 40, 1, 2];
    client.endpoint.handle_datagram(server.addr, &truncated, now);
    assert!(client.endpoint.handshaker(server.addr).is_none());
    assert!(client_cache.get(before.id()).is_none());

    let alert = client.wire.take_datagrams();
    let mut all = collect_headers(&hello);
    all.extend(collect_headers(&alert));
    assert_eq!(all.last().map(|h| (h.ctype, h.epoch)), Some((ALERT, 1)));
    assert_epochs_and_seq_increased(&all);

    deliver_all(&client, &mut server, &alert, now);
    assert!(!server.endpoint.is_established(client.addr));
    assert!(server_cache.get(before.id()).is_none());
}

#[test]
fn lost_client_finished_is_resent_by_association() {
    //! In an abbreviated handshake the client speaks last. When its final
    //! flight is lost, the server's retransmission reaches the client's
    //! association, which answers with the retained flight.

    let _ = env_logger::try_init();
    let mut now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());
    connect(&mut client, &mut server, now);

    let before = client.endpoint.session(server.addr).expect("client session");
    client.endpoint.close(server.addr).expect("close");
    deliver(&client, &mut server, now);

    client
        .endpoint
        .resume(server.addr, before, now)
        .expect("resume");
    deliver(&client, &mut server, now);
    deliver(&server, &mut client, now);
    deliver(&client, &mut server, now);
    deliver(&server, &mut client, now);
    assert!(client.endpoint.is_established(server.addr));

    // Client's CCS + Finished lost.
    assert!(lose(&client) > 0);
    assert!(server.endpoint.handshaker(client.addr).is_some());

    trigger_timeout(&mut server, &mut now);
    deliver(&server, &mut client, now);
    assert!(!client.wire.is_empty(), "client resends its final flight");

    deliver(&client, &mut server, now);
    assert!(server.endpoint.is_established(client.addr));
    assert_eq!(client.events.established().len(), 2);
}

#[test]
fn unknown_session_falls_back_to_full_handshake() {
    let _ = env_logger::try_init();
    let now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());
    connect(&mut client, &mut server, now);
    let before = client.endpoint.session(server.addr).expect("client session");

    // A second server that never saw the session.
    let mut other = Peer::new("192.0.2.2:5684", psk_config());

    client
        .endpoint
        .resume(other.addr, before.clone(), now)
        .expect("resume");
    pump(&mut client, &mut other, now);

    let c = client.endpoint.session(other.addr).expect("client session");
    let s = other.endpoint.session(client.addr).expect("server session");
    assert_ne!(c.id(), before.id());
    assert_ne!(c.master_secret(), before.master_secret());
    assert_eq!(c.id(), s.id());
    assert_eq!(c.master_secret(), s.master_secret());
    assert!(client.events.failures().is_empty());

    // The first association is untouched.
    assert!(client.endpoint.is_established(server.addr));
}

#[test]
fn shared_cache_lets_another_endpoint_resume() {
    //! Two server endpoints behind one session cache. A session negotiated
    //! with the first is resumed with the second.

    let _ = env_logger::try_init();
    let now = Instant::now();

    let cache = Arc::new(InMemorySessionCache::new(16));
    let mut client = Peer::client(psk_config());
    let mut first = Peer::with_cache("192.0.2.1:5684", psk_config(), cache.clone());
    let mut second = Peer::with_cache("192.0.2.2:5684", psk_config(), cache.clone());

    connect(&mut client, &mut first, now);
    let before = client.endpoint.session(first.addr).expect("client session");
    assert!(cache.get(before.id()).is_some());

    client
        .endpoint
        .resume(second.addr, before.clone(), now)
        .expect("resume");
    deliver(&client, &mut second, now);
    deliver(&second, &mut client, now);
    deliver(&client, &mut second, now);
    assert_eq!(
        second.endpoint.handshaker(client.addr).map(|h| h.kind()),
        Some(HandshakeKind::ResumingServer)
    );
    pump(&mut client, &mut second, now);

    let s = second.endpoint.session(client.addr).expect("server session");
    assert_eq!(s.id(), before.id());
    assert_eq!(s.master_secret(), before.master_secret());
}

#[test]
fn resume_requires_resumable_session() {
    let now = Instant::now();
    let mut client = Peer::client(psk_config());
    let addr = "192.0.2.1:5684".parse().unwrap();

    let err = client
        .endpoint
        .resume(addr, Session::new(addr), now)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(client.endpoint.handshaker(addr).is_none());
}

#[test]
fn factory_refuses_resuming_server_without_session_id() {
    let addr = "192.0.2.10:40001".parse().unwrap();
    let params = HandshakeParams::builder()
        .session(Session::new(addr))
        .record_layer(Arc::new(Wire::default()))
        .listener(Arc::new(Events::default()))
        .config(Arc::new(psk_config()))
        .build()
        .expect("params");

    let err = Handshakers::create(HandshakeKind::ResumingServer, params).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
