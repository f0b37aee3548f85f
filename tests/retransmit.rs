//! Flight retransmission under loss and duplication.

mod dshake_common;

use std::time::Instant;

use dshake::HandshakeState;
use dshake_common::*;

/// Run the handshake up to the point where the client's flight 5 is on the
/// wire.
fn up_to_flight_5(client: &mut Peer, server: &mut Peer, now: Instant) {
    client.endpoint.connect(server.addr, now).expect("connect");
    deliver(client, server, now); // CH
    deliver(server, client, now); // HVR
    deliver(client, server, now); // CH + cookie
    deliver(server, client, now); // flight 4
}

#[test]
fn lost_final_flight_is_resent_without_new_keys() {
    //! The server's last flight is lost three times. Each retransmission of
    //! the client's flight 5 reaches the server's association, which answers
    //! with its retained flight. Neither side derives keys again.

    let _ = env_logger::try_init();
    let mut now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());

    up_to_flight_5(&mut client, &mut server, now);

    let mut f5_all = client.wire.take_datagrams();
    deliver_all(&client, &mut server, &f5_all, now);
    assert!(server.endpoint.is_established(client.addr));
    let established = server.endpoint.session(client.addr).expect("server session");

    // FLIGHT 6 lost
    assert!(lose(&server) > 0);

    for attempt in 0..3 {
        trigger_timeout(&mut client, &mut now);
        let f5 = client.wire.take_datagrams();
        assert!(!f5.is_empty(), "client resends flight 5 (attempt {})", attempt);

        let handshaker = client.endpoint.handshaker(server.addr).expect("client handshake");
        assert_eq!(handshaker.key_derivations(), 1);
        assert_eq!(handshaker.state(), HandshakeState::VerifyingFinal);

        deliver_all(&client, &mut server, &f5, now);
        f5_all.extend(f5);

        assert!(server.endpoint.handshaker(client.addr).is_none());
        assert!(lose(&server) > 0, "server resends flight 6 (attempt {})", attempt);
    }

    // Retransmitted records carry fresh sequence numbers.
    assert_epochs_and_seq_increased(&collect_headers(&f5_all));

    trigger_timeout(&mut client, &mut now);
    deliver(&client, &mut server, now);
    deliver(&server, &mut client, now);

    assert!(client.endpoint.is_established(server.addr));
    assert_eq!(server.events.established().len(), 1);
    assert_eq!(client.events.established().len(), 1);

    let c = client.endpoint.session(server.addr).expect("client session");
    let s = server.endpoint.session(client.addr).expect("server session");
    assert_eq!(s.master_secret(), established.master_secret());
    assert_eq!(c.master_secret(), s.master_secret());
}

#[test]
fn lost_server_hello_flight_is_resent_on_client_retransmission() {
    let _ = env_logger::try_init();
    let mut now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());

    client.endpoint.connect(server.addr, now).expect("connect");
    deliver(&client, &mut server, now); // CH
    deliver(&server, &mut client, now); // HVR
    deliver(&client, &mut server, now); // CH + cookie

    let mut f4_all = server.wire.take_datagrams();
    assert_eq!(handshake_types(&f4_all)[0], SERVER_HELLO);
    let mut last_f4 = f4_all.clone();

    for _ in 0..3 {
        trigger_timeout(&mut client, &mut now);
        let f3 = client.wire.take_datagrams();
        assert_eq!(handshake_types(&f3), vec![CLIENT_HELLO]);
        deliver_all(&client, &mut server, &f3, now);

        let f4 = server.wire.take_datagrams();
        assert_eq!(handshake_types(&f4)[0], SERVER_HELLO);
        f4_all.extend(f4.iter().cloned());
        last_f4 = f4;

        let handshaker = server.endpoint.handshaker(client.addr).expect("server handshake");
        assert_eq!(handshaker.key_derivations(), 0);
    }

    assert_epochs_and_seq_increased(&collect_headers(&f4_all));
    assert_eq!(server.events.started(), 1);

    deliver_all(&server, &mut client, &last_f4, now);
    pump(&mut client, &mut server, now);

    assert!(client.endpoint.is_established(server.addr));
    assert!(server.endpoint.is_established(client.addr));
    assert_eq!(server.events.established().len(), 1);
}

#[test]
fn replayed_datagram_is_ignored() {
    //! A byte-identical copy of a record already seen is a replay, not a
    //! retransmission, and triggers nothing.

    let _ = env_logger::try_init();
    let now = Instant::now();

    let mut client = Peer::client(psk_config());
    let mut server = Peer::server(psk_config());

    client.endpoint.connect(server.addr, now).expect("connect");
    deliver(&client, &mut server, now);
    deliver(&server, &mut client, now);

    let f3 = client.wire.take_datagrams();
    deliver_all(&client, &mut server, &f3, now);
    assert!(!server.wire.take().is_empty());

    deliver_all(&client, &mut server, &f3, now);
    assert!(server.wire.is_empty());
}

#[test]
fn flight_resend_backs_off() {
    let _ = env_logger::try_init();
    let start = Instant::now();
    let mut now = start;

    let mut client = Peer::client(psk_config());
    let server = Peer::server(psk_config());
    client.endpoint.connect(server.addr, now).expect("connect");
    lose(&client);

    let mut gaps = Vec::new();
    let mut last = now;
    for _ in 0..3 {
        trigger_timeout(&mut client, &mut now);
        assert!(lose(&client) > 0);
        gaps.push(now - last);
        last = now;
    }

    assert!(gaps[1] > gaps[0]);
    assert!(gaps[2] > gaps[1]);
}
