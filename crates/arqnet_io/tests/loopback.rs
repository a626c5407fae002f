//! Full client/server exchanges over loopback TCP: real sockets, real
//! threads, one worker per connection — only the network faults are still
//! injected deliberately.

use std::{net::SocketAddr, thread};

use assert_matches::assert_matches;

use arqnet_io::{
    client::{Client, ClientError, MessageOutcome},
    config::{ClientConfig, ServerConfig},
    server::Server,
};
use arqnet_proto::{fault::FaultMode, handshake::ServerPolicy, packet::Protocol};

fn spawn_server(policy: ServerPolicy) -> SocketAddr {
    let config = ServerConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        policy,
        tls: None,
    };
    let server = Server::bind(&config).expect("bind loopback");
    let addr = server.local_addr().expect("local addr");
    thread::spawn(move || server.serve());
    addr
}

fn client_config(addr: SocketAddr, protocol: Protocol) -> ClientConfig {
    ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        protocol,
        packet_size: 4,
        ..ClientConfig::default()
    }
}

#[test]
fn gbn_end_to_end() {
    let addr = spawn_server(ServerPolicy::default());
    let mut client = Client::connect(&client_config(addr, Protocol::Gbn)).unwrap();

    let outcome = client.send_message("Hello World!").unwrap();
    assert_eq!(outcome, MessageOutcome::Delivered { attempts: 1 });

    let stats = client.close().unwrap();
    assert_eq!(stats.packets_sent, 3);
    assert_eq!(stats.packets_confirmed, 1, "GBN confirms per message");
    assert_eq!(stats.messages_sent, 1);
}

#[test]
fn sr_end_to_end() {
    let addr = spawn_server(ServerPolicy {
        default_protocol: Protocol::Sr,
        ..ServerPolicy::default()
    });
    let mut client = Client::connect(&client_config(addr, Protocol::Sr)).unwrap();

    let outcome = client.send_message("abcdefghij").unwrap();
    assert_eq!(outcome, MessageOutcome::Delivered { attempts: 1 });

    let stats = client.close().unwrap();
    assert_eq!(stats.packets_sent, 3);
    assert_eq!(stats.packets_confirmed, 3, "SR confirms per packet");
}

#[test]
fn handshake_clamps_oversized_requests() {
    let addr = spawn_server(ServerPolicy::default());
    let config = ClientConfig {
        max_chars: 100,
        packet_size: 64,
        ..client_config(addr, Protocol::Gbn)
    };
    let client = Client::connect(&config).unwrap();

    let params = client.negotiated().params;
    assert_eq!(params.max_chars, 30);
    assert_eq!(params.payload_len, 8);
    assert_eq!(params.window, 5);
    assert_eq!(client.negotiated().session_id.len(), 8);
    client.close().unwrap();
}

#[test]
fn sr_corruption_is_nacked_and_recovered() {
    let addr = spawn_server(ServerPolicy {
        default_protocol: Protocol::Sr,
        ..ServerPolicy::default()
    });
    let mut client = Client::connect(&client_config(addr, Protocol::Sr)).unwrap();

    client.arm_fault(1, FaultMode::Corrupt);
    let outcome = client.send_message("abcdefghij").unwrap();
    // recovery happens inside the first attempt: only chunk 1 is resent
    assert_eq!(outcome, MessageOutcome::Delivered { attempts: 1 });

    let stats = client.close().unwrap();
    assert_eq!(stats.packets_sent, 4);
    assert_eq!(stats.packets_confirmed, 3);
}

#[test]
fn gbn_corruption_forces_whole_message_retry() {
    let addr = spawn_server(ServerPolicy::default());
    let mut client = Client::connect(&client_config(addr, Protocol::Gbn)).unwrap();

    client.arm_fault(1, FaultMode::Corrupt);
    let outcome = client.send_message("Hello World!").unwrap();
    assert_eq!(outcome, MessageOutcome::Delivered { attempts: 2 });

    let stats = client.close().unwrap();
    assert_eq!(stats.packets_sent, 6, "the whole message went out twice");
    assert_eq!(stats.messages_sent, 1);
}

#[test]
fn over_long_messages_are_truncated() {
    let addr = spawn_server(ServerPolicy::default());
    let mut client = Client::connect(&client_config(addr, Protocol::Gbn)).unwrap();

    let long = "x".repeat(60);
    let outcome = client.send_message(&long).unwrap();
    assert_matches!(outcome, MessageOutcome::Delivered { .. });

    // 30 chars at P = 4 makes 8 chunks
    let stats = client.close().unwrap();
    assert_eq!(stats.packets_sent, 8);
}

#[test]
fn empty_messages_are_rejected_locally() {
    let addr = spawn_server(ServerPolicy::default());
    let mut client = Client::connect(&client_config(addr, Protocol::Gbn)).unwrap();
    assert_matches!(client.send_message(""), Err(ClientError::EmptyMessage));
    client.close().unwrap();
}

#[test]
fn sequences_survive_across_messages() {
    let addr = spawn_server(ServerPolicy {
        default_protocol: Protocol::Sr,
        ..ServerPolicy::default()
    });
    let mut client = Client::connect(&client_config(addr, Protocol::Sr)).unwrap();

    // three messages back to back; the receiver tracks the running
    // sequence numbers across all of them
    for text in ["abcd", "efghij", "Hello World!"] {
        let outcome = client.send_message(text).unwrap();
        assert_matches!(outcome, MessageOutcome::Delivered { .. });
    }
    let stats = client.close().unwrap();
    assert_eq!(stats.messages_sent, 3);
    assert_eq!(stats.packets_sent, 1 + 2 + 3);
}
