// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Exercise the fd-door UDP transport and the combined daemon.
// Author: Lukas Bower

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use fd_door::config::{FdDoorConfig, TcpConfig, UdpConfig};
use fd_door::{ClientError, FdDoor, RemoteTable, TcpClient, UdpClient, UdpServer};
use fd_table::{HandleTable, DEFAULT_TYPE_TAG};
use fd_wire::{decode_response, ErrorKind, ResponseBody};
use serial_test::serial;

fn start_server(table: Arc<HandleTable>) -> UdpServer {
    let mut server = UdpServer::bind("127.0.0.1:0", table).expect("bind");
    server.start().expect("start");
    server
}

fn client(addr: SocketAddr) -> UdpClient {
    UdpClient::connect(addr)
        .expect("client socket")
        .with_timeout(Duration::from_secs(2))
}

fn raw_exchange(addr: SocketAddr, payload: &[u8]) -> fd_wire::Response {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket.send_to(payload, addr).unwrap();
    let mut buf = [0u8; 2048];
    let (len, from) = socket.recv_from(&mut buf).unwrap();
    assert_eq!(from, addr);
    decode_response(&buf[..len]).unwrap()
}

#[test]
fn open_then_read_returns_name() {
    let table = Arc::new(HandleTable::with_defaults());
    let server = start_server(Arc::clone(&table));
    let mut client = client(server.local_addr());

    let fd = client.open("b", DEFAULT_TYPE_TAG).unwrap();
    assert_eq!(client.read(fd).unwrap(), "b");
    client.write(fd, "changed").unwrap();
    assert_eq!(client.read(fd).unwrap(), "changed");
    assert_eq!(client.close(fd).unwrap(), 0);
    assert!(table.is_empty());
}

#[test]
fn senders_share_entries() {
    let table = Arc::new(HandleTable::with_defaults());
    let server = start_server(Arc::clone(&table));
    let mut first = client(server.local_addr());
    let mut second = client(server.local_addr());

    let fd = first.open("shared", DEFAULT_TYPE_TAG).unwrap();
    assert_eq!(second.open("shared", DEFAULT_TYPE_TAG).unwrap(), fd);
    assert_eq!(table.refcount(fd), Some(2));

    // A vanished sender keeps its reference.
    drop(first);
    assert_eq!(second.close(fd).unwrap(), 1);
    assert_eq!(table.refcount(fd), Some(1));
}

#[test]
fn remote_errors_surface_to_the_caller() {
    let table = Arc::new(HandleTable::with_defaults());
    let server = start_server(table);
    let mut client = client(server.local_addr());

    let err = client.close(42).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Remote {
            kind: ErrorKind::NotFound,
            ..
        }
    ));
}

#[test]
fn undecodable_datagrams_get_an_error_reply() {
    let table = Arc::new(HandleTable::with_defaults());
    let server = start_server(Arc::clone(&table));

    let reply = raw_exchange(server.local_addr(), br#"{"op":"read","args":[],"tag":9}"#);
    assert_eq!(reply.tag, Some(9));
    assert_eq!(reply.error_kind(), Some(ErrorKind::DecodeError));

    let reply = raw_exchange(server.local_addr(), b"not json");
    assert_eq!(reply.tag, None);
    assert_eq!(reply.error_kind(), Some(ErrorKind::DecodeError));

    // The server keeps serving afterwards.
    let reply = raw_exchange(
        server.local_addr(),
        br#"{"op":"open","args":["ok","default"],"tag":10}"#,
    );
    assert_eq!(reply.tag, Some(10));
    assert_eq!(reply.body, ResponseBody::Opened { fd: 0 });
}

#[test]
#[serial]
fn unanswered_requests_time_out() {
    // Bound but never served, so nothing ever replies.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut client = UdpClient::connect(silent.local_addr().unwrap())
        .unwrap()
        .with_timeout(Duration::from_millis(100))
        .with_read_retries(2);

    let err = client.read(0).unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert_eq!(err.kind(), ErrorKind::Timeout);

    // Three read attempts: the first plus two retries.
    silent
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut buf = [0u8; 512];
    let mut received = 0;
    while silent.recv_from(&mut buf).is_ok() {
        received += 1;
    }
    assert_eq!(received, 3);

    let err = client.write(0, "x").unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert!(silent.recv_from(&mut buf).is_ok());
    assert!(silent.recv_from(&mut buf).is_err());
}

#[test]
fn descriptors_are_shared_across_transports() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = FdDoorConfig::default();
    config.table.text_root = dir.path().to_path_buf();
    config.tcp = TcpConfig {
        bind: "127.0.0.1:0".into(),
        ..TcpConfig::default()
    };
    config.udp = UdpConfig {
        bind: "127.0.0.1:0".into(),
        ..UdpConfig::default()
    };
    let mut door = FdDoor::start(&config).unwrap();
    let tcp_addr = door.tcp_addr().unwrap();
    let udp_addr = door.udp_addr().unwrap();

    let mut udp = client(udp_addr);
    let fd = udp.open("both", "text").unwrap();
    udp.write(fd, "via udp").unwrap();

    let mut tcp = TcpClient::new(tcp_addr);
    assert_eq!(tcp.open("both", "text").unwrap(), fd);
    assert_eq!(tcp.read(fd).unwrap(), "via udp");
    assert_eq!(door.table().refcount(fd), Some(2));
    assert_eq!(tcp.close(fd).unwrap(), 1);

    door.stop();
    assert_eq!(door.table().refcount(fd), Some(1));
    assert!(door.tcp_addr().is_none());
    assert!(dir.path().join("both").exists());
}
