// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Binds an ephemeral loopback listener and spawns a task that accepts a
/// single connection, reads until EOF or `expect_len` bytes have arrived
/// (whichever comes first), and reports the bytes back over `result`.
pub async fn spawn_single_shot_peer(expect_len: usize) -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0u8; expect_len];
        let mut received = 0;
        while received < expect_len {
            match stream.read(&mut buf[received..]).await {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(_) => break,
            }
        }
        buf.truncate(received);
        let _ = tx.send(buf);
    });

    (addr, rx)
}
