//! Session resumption through the public API, including ticket
//! persistence: a ticket serialized to bytes and restored must resume
//! exactly like the original.

use core::cell::RefCell;

use milli_tls::tls::ticket::{Ticket, TicketStore};
use milli_tls::{ServerTlsConfig, TlsClient, TlsConfig, TlsEvent, TlsServer};

const SERVER_KEY_SEED: [u8; 32] = [0x01u8; 32];

fn test_cert_der() -> &'static [u8] {
    let pk = milli_tls::crypto::ed25519::ed25519_public_key_from_seed(&SERVER_KEY_SEED);
    let mut buf = [0u8; 512];
    let len = milli_tls::crypto::ed25519::build_ed25519_cert_der(&pk, &mut buf).unwrap();
    Box::leak(buf[..len].to_vec().into_boxed_slice())
}

fn pump(client: &mut TlsClient<32768>, server: &mut TlsServer<32768>) {
    for _ in 0..20 {
        let mut any = false;
        let mut buf = [0u8; 32768];
        while let Some(data) = client.poll_output(&mut buf).unwrap() {
            server.feed_data(data).unwrap();
            any = true;
        }
        let mut buf2 = [0u8; 32768];
        while let Some(data) = server.poll_output(&mut buf2).unwrap() {
            client.feed_data(data).unwrap();
            any = true;
        }
        if !any {
            break;
        }
    }
}

fn server_config(
    cert: &'static [u8],
    store: &'static RefCell<TicketStore>,
    now_ms: u64,
) -> ServerTlsConfig {
    let mut config = ServerTlsConfig::new(cert, &SERVER_KEY_SEED);
    config.ticket_store = Some(store);
    config.ticket_lifetime_secs = 7200;
    config.now_ms = now_ms;
    config
}

fn client_config(cert: &'static [u8], now_ms: u64) -> TlsConfig {
    let mut config = TlsConfig::new("test.local");
    config.pinned_certs = Box::leak(Box::new([cert]));
    config.now_ms = now_ms;
    config
}

#[test]
fn ticket_survives_serialization_and_resumes() {
    let cert = test_cert_der();
    let store: &'static RefCell<TicketStore> =
        Box::leak(Box::new(RefCell::new(TicketStore::new())));

    // First connection: full handshake, collect a ticket.
    let mut client: TlsClient<32768> =
        TlsClient::new(client_config(cert, 1_000), [0xaa; 32], [0xbb; 32]);
    let mut server: TlsServer<32768> =
        TlsServer::new(server_config(cert, store, 1_000), [0xcc; 32], [0xdd; 32]);
    pump(&mut client, &mut server);
    assert!(client.is_active() && server.is_active());

    let mut saw_ticket = false;
    while let Some(ev) = client.poll_event() {
        saw_ticket |= ev == TlsEvent::TicketReceived;
    }
    assert!(saw_ticket);
    let ticket = client.take_ticket().expect("ticket issued");

    // Persist and restore the ticket as an opaque byte blob.
    let mut blob = [0u8; 512];
    let blob_len = ticket.to_bytes(&mut blob).unwrap();
    let restored = Ticket::from_bytes(&blob[..blob_len]).unwrap();

    // Second connection resumes from the restored ticket.
    let mut config = client_config(cert, 60_000);
    config.ticket = Some(restored);
    let mut client2: TlsClient<32768> = TlsClient::new(config, [0x11; 32], [0x22; 32]);
    let mut server2: TlsServer<32768> =
        TlsServer::new(server_config(cert, store, 60_000), [0x33; 32], [0x44; 32]);
    pump(&mut client2, &mut server2);

    assert!(client2.is_active() && server2.is_active());

    // Resumed connections still move data.
    client2.send_app_data(b"resumed").unwrap();
    let mut buf = [0u8; 32768];
    while let Some(data) = client2.poll_output(&mut buf).unwrap() {
        server2.feed_data(data).unwrap();
    }
    let mut rx = [0u8; 64];
    let n = server2.recv_app_data(&mut rx).unwrap();
    assert_eq!(&rx[..n], b"resumed");
}

#[test]
fn expired_ticket_falls_back_to_full_handshake() {
    let cert = test_cert_der();
    let store: &'static RefCell<TicketStore> =
        Box::leak(Box::new(RefCell::new(TicketStore::new())));

    let mut client: TlsClient<32768> =
        TlsClient::new(client_config(cert, 1_000), [0xaa; 32], [0xbb; 32]);
    let mut server: TlsServer<32768> =
        TlsServer::new(server_config(cert, store, 1_000), [0xcc; 32], [0xdd; 32]);
    pump(&mut client, &mut server);
    let ticket = client.take_ticket().expect("ticket issued");

    // Three hours later the 7200-second ticket has lapsed; the client
    // quietly omits the PSK offer and the handshake still succeeds.
    let later = 1_000 + 3 * 3_600 * 1_000;
    let mut config = client_config(cert, later);
    config.ticket = Some(ticket);
    let mut client2: TlsClient<32768> = TlsClient::new(config, [0x11; 32], [0x22; 32]);
    let mut server2: TlsServer<32768> =
        TlsServer::new(server_config(cert, store, later), [0x33; 32], [0x44; 32]);
    pump(&mut client2, &mut server2);

    assert!(client2.is_active() && server2.is_active());
}
