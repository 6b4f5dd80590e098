//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use gatehouse::config::Settings;
use gatehouse::http::HttpServer;
use gatehouse::lifecycle::Coordinator;
use gatehouse::observability::Telemetry;
use gatehouse::security::TrustResolver;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing_subscriber::fmt::MakeWriter;

/// Start the service on an ephemeral loopback port.
pub async fn start_server(settings: &Settings, telemetry: Arc<dyn Telemetry>) -> (Coordinator, SocketAddr) {
    let server = HttpServer::new(settings, TrustResolver::default(), telemetry.clone());
    let mut coordinator = Coordinator::new(telemetry);
    let addr = coordinator
        .start("127.0.0.1:0".parse().unwrap(), server)
        .await
        .unwrap();
    (coordinator, addr)
}

/// Open a connection and send a POST /echo whose body never completes.
///
/// `declared` is the Content-Length announced; only `sent` is written.
pub async fn start_slow_upload(addr: SocketAddr, declared: usize, sent: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST /echo HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {declared}\r\n\r\n{sent}"
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream
}

/// In-memory JSON log sink.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn records(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    pub fn with_msg(&self, msg: &str) -> Vec<Value> {
        self.records().into_iter().filter(|r| r["msg"] == msg).collect()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
