//! In-process stand-in for the data service.
//!
//! The listener accepts every connection and hands it to the test, which
//! then drives the server side by hand: read requests, answer them in any
//! order, push subscription data or drop the socket.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use dataservice_client::protocol::{build_frame, Header, RequestType, HEADER_SIZE};
use dataservice_client::{Client, ClientBuilder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

pub struct MockServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, conns) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if tx.send(ServerConn { stream }).is_err() {
                    break;
                }
            }
        });
        Self { addr, conns, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Builder pointed at this server with short test timings.
    pub fn client_builder(&self) -> ClientBuilder {
        ClientBuilder::new()
            .host("127.0.0.1")
            .port(self.port())
            .timeout_ms(500)
            .worker_threads(2)
            .reconnect_delay(Duration::from_millis(50))
    }

    /// Start a client and return it with the server side of its socket.
    pub async fn connect(&mut self) -> (Client, ServerConn) {
        let client = self.client_builder().start().await.unwrap();
        let conn = self.accept().await;
        (client, conn)
    }

    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("no connection accepted")
            .expect("listener stopped")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A request as seen by the server.
#[derive(Debug)]
pub struct Request {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        self.header.request_type().expect("unknown request type")
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.payload.clone()).unwrap()
    }
}

pub struct ServerConn {
    stream: TcpStream,
}

impl ServerConn {
    pub async fn recv(&mut self) -> Request {
        tokio::time::timeout(WAIT, self.read_request())
            .await
            .expect("no request received")
    }

    /// Next request if one arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Request> {
        tokio::time::timeout(wait, self.read_request()).await.ok()
    }

    async fn read_request(&mut self) -> Request {
        let mut head = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut head).await.unwrap();
        let header = Header::decode(&head).unwrap();
        let mut payload = vec![0u8; usize::from(header.len)];
        self.stream.read_exact(&mut payload).await.unwrap();
        Request { header, payload }
    }

    pub async fn send(&mut self, header: Header, payload: &[u8]) {
        let header = Header {
            len: payload.len() as u16,
            ..header
        };
        self.stream
            .write_all(&build_frame(&header, payload))
            .await
            .unwrap();
    }

    /// Successful reply echoing the request's kind and sequence number.
    pub async fn reply(&mut self, request: &Request, payload: &[u8]) {
        self.reply_flag(request, 0, payload).await;
    }

    pub async fn reply_flag(&mut self, request: &Request, flag: u8, payload: &[u8]) {
        let header = Header {
            kind: request.header.kind,
            seq: request.header.seq,
            ..Header::default()
        }
        .with_flag(flag);
        self.send(header, payload).await;
    }

    /// Subscription push for `batch_id`.
    pub async fn push(&mut self, batch_id: u16, flag: u8, payload: &[u8]) {
        let header = Header::new(RequestType::RegTagData, 0, 0)
            .with_reserve(batch_id, 0)
            .with_flag(flag);
        self.send(header, payload).await;
    }

    /// Expect a registration and acknowledge it.
    pub async fn accept_registration(&mut self) -> Request {
        let request = self.recv().await;
        assert_eq!(request.request_type(), RequestType::RegTag);
        self.reply(&request, b"").await;
        request
    }
}
