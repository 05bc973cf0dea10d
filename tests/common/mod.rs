//! Shared test helpers: ClientHello records and fake forward proxies.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const SESSION_ID_LEN: usize = 32;
pub const CIPHER_SUITES: [u8; 4] = [0x13, 0x01, 0x13, 0x02];

/// Builds a TLS 1.2-style ClientHello record with chosen extensions
#[derive(Debug, Clone, Default)]
pub struct ClientHelloBuilder {
    pub extensions: Vec<(u16, Vec<u8>)>,
    /// Leave the extensions block out entirely
    pub omit_extensions: bool,
}

impl ClientHelloBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(host: &str) -> Self {
        Self::new().extension(0, server_name_list(&[(0, host.as_bytes())]))
    }

    pub fn extension(mut self, ty: u16, body: Vec<u8>) -> Self {
        self.extensions.push((ty, body));
        self
    }

    fn extensions_block(&self) -> Vec<u8> {
        let mut block = Vec::new();
        for (ty, body) in &self.extensions {
            block.extend_from_slice(&ty.to_be_bytes());
            block.extend_from_slice(&(body.len() as u16).to_be_bytes());
            block.extend_from_slice(body);
        }
        block
    }

    fn body(&self) -> Vec<u8> {
        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[0x11; 32]);
        body.push(SESSION_ID_LEN as u8);
        body.extend_from_slice(&[0x22; SESSION_ID_LEN]);
        body.extend_from_slice(&(CIPHER_SUITES.len() as u16).to_be_bytes());
        body.extend_from_slice(&CIPHER_SUITES);
        body.extend_from_slice(&[0x01, 0x00]);
        if !self.omit_extensions {
            let block = self.extensions_block();
            body.extend_from_slice(&(block.len() as u16).to_be_bytes());
            body.extend_from_slice(&block);
        }
        body
    }

    /// Complete record: 5-byte header, 4-byte handshake header, body
    pub fn build(&self) -> Vec<u8> {
        let body = self.body();
        let mut handshake = vec![0x01];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![0x16, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    /// Record padded with a padding extension to exactly `total` bytes
    pub fn build_padded(self, total: usize) -> Vec<u8> {
        let unpadded = self.build().len();
        assert!(total >= unpadded + 4, "record already longer than {}", total);
        let pad = total - unpadded - 4;
        let record = self.extension(0x0015, vec![0; pad]).build();
        assert_eq!(record.len(), total);
        record
    }
}

/// Offset of the 2-byte extensions length inside a built record
pub fn extensions_length_offset() -> usize {
    5 + 4 + 2 + 32 + 1 + SESSION_ID_LEN + 2 + CIPHER_SUITES.len() + 2
}

/// Offset of the first extension header inside a built record
pub fn first_extension_offset() -> usize {
    extensions_length_offset() + 2
}

/// ServerNameList body: 2-byte list length then (type, len, name) entries
pub fn server_name_list(entries: &[(u8, &[u8])]) -> Vec<u8> {
    let mut list = Vec::new();
    for (ty, name) in entries {
        list.push(*ty);
        list.extend_from_slice(&(name.len() as u16).to_be_bytes());
        list.extend_from_slice(name);
    }
    let mut body = (list.len() as u16).to_be_bytes().to_vec();
    body.extend_from_slice(&list);
    body
}

pub fn put_u16(record: &mut [u8], offset: usize, value: u16) {
    record[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// What a fake proxy learned from one tunnel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRequest {
    Socks { host: String, port: u16 },
    Http { request_line: String },
}

/// A fake forward proxy that accepts every tunnel and echoes its payload
pub struct FakeProxy {
    pub addr: std::net::SocketAddr,
    pub requests: mpsc::UnboundedReceiver<ProxyRequest>,
    /// Tunnels whose echo loop has ended
    pub finished: Arc<AtomicUsize>,
    /// TCP connections accepted, handshake or not
    pub accepted: Arc<AtomicUsize>,
}

impl FakeProxy {
    pub async fn socks() -> Self {
        Self::start(true).await
    }

    pub async fn http() -> Self {
        Self::start(false).await
    }

    async fn start(socks: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, requests) = mpsc::unbounded_channel();
        let finished = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (finished_task, accepted_task) = (Arc::clone(&finished), Arc::clone(&accepted));

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                accepted_task.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                let finished = Arc::clone(&finished_task);
                tokio::spawn(async move {
                    let request = if socks {
                        socks_handshake(&mut stream).await
                    } else {
                        http_handshake(&mut stream).await
                    };
                    if let Some(request) = request {
                        let _ = tx.send(request);
                        echo(&mut stream).await;
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            requests,
            finished,
            accepted,
        }
    }
}

async fn socks_handshake(stream: &mut TcpStream) -> Option<ProxyRequest> {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.ok()?;
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await.ok()?;
    stream.write_all(&[0x05, 0x00]).await.ok()?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.ok()?;
    let host = match head[3] {
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.ok()?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await.ok()?;
            String::from_utf8(name).ok()?
        }
        0x01 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await.ok()?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        _ => return None,
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await.ok()?;
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .ok()?;
    Some(ProxyRequest::Socks {
        host,
        port: u16::from_be_bytes(port),
    })
}

async fn http_handshake(stream: &mut TcpStream) -> Option<ProxyRequest> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.ok()?;
        head.push(byte[0]);
    }
    let text = String::from_utf8(head).ok()?;
    let request_line = text.lines().next()?.to_string();
    stream
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await
        .ok()?;
    Some(ProxyRequest::Http { request_line })
}

async fn echo(stream: &mut TcpStream) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Poll `cond` every 10 ms until it holds or `limit` passes
pub async fn wait_until<F: Fn() -> bool>(cond: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
