//! Shared helpers for transport integration tests
//!
//! Servers bind `127.0.0.1:0` and run inside the test's runtime.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ereader_core::{AttemptOutcome, GenerationClient, GenerationUpdate};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(10);

/// One step of a scripted response body
#[derive(Clone, Debug)]
pub enum Step {
    /// Write raw bytes
    Write(String),
    /// Pause before the next step
    Pause(Duration),
    /// Keep the connection open without writing
    Hold,
}

/// `data: <json>\n`
pub fn event(json: &str) -> Step {
    Step::Write(format!("data: {json}\n"))
}

/// The five messages of the reference scenario, as JSON bodies
pub fn scenario_messages() -> Vec<&'static str> {
    vec![
        r#"{"type":"status","message":"Analyzing"}"#,
        r#"{"type":"progress","step":"tags","data":{"tags":["romance"]}}"#,
        r#"{"type":"stream","chunk":"Hello "}"#,
        r#"{"type":"stream","chunk":"world"}"#,
        r#"{"type":"complete","data":{"success":true,"generatedContent":"Hello world!","extractedCharacters":[],"contentSummary":"","detectedTags":["romance"],"relatedSnippets":[]}}"#,
    ]
}

/// A running HTTP event-stream server
pub struct SseServer {
    /// Endpoint URL
    pub url: String,
    /// Bodies of received requests
    pub requests: mpsc::UnboundedReceiver<String>,
}

/// Serve `steps` after a `status` line to every connection
pub async fn sse_server(status: u16, steps: Vec<Step>) -> SseServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api/stream", listener.local_addr().unwrap());
    let (tx, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let steps = steps.clone();
            tokio::spawn(async move {
                let body = read_http_request(&mut stream).await;
                let _ = tx.send(body);

                let head = if status == 200 {
                    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n".to_string()
                } else {
                    format!("HTTP/1.1 {status} Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                };
                if stream.write_all(head.as_bytes()).await.is_err() {
                    return;
                }

                for step in steps {
                    match step {
                        Step::Write(bytes) => {
                            if stream.write_all(bytes.as_bytes()).await.is_err() {
                                return;
                            }
                            let _ = stream.flush().await;
                        }
                        Step::Pause(d) => tokio::time::sleep(d).await,
                        Step::Hold => tokio::time::sleep(Duration::from_secs(60)).await,
                    }
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    SseServer { url, requests }
}

async fn read_http_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let len = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = end + 4;
            while buf.len() < body_start + len {
                let n = stream.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let body_end = buf.len().min(body_start + len);
            return String::from_utf8_lossy(&buf[body_start..body_end]).into_owned();
        }

        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return String::new();
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// What a socket server does after answering a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterReply {
    /// Keep serving requests on the same socket
    KeepOpen,
    /// Close with code 1000
    CloseNormal,
    /// Drop the TCP connection without a close frame
    Drop,
}

/// A running WebSocket generation server
pub struct SocketServer {
    /// Endpoint URL
    pub url: String,
    /// Request frames received, across all connections
    pub requests: mpsc::UnboundedReceiver<String>,
    /// Close frames received from the client, as close codes
    pub closes: mpsc::UnboundedReceiver<u16>,
    /// Number of accepted WebSocket connections
    pub connections: Arc<AtomicUsize>,
}

/// Answer every request frame with `replies`
pub async fn socket_server(replies: Vec<&'static str>, after: AfterReply) -> SocketServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/api/ws", listener.local_addr().unwrap());
    let (req_tx, requests) = mpsc::unbounded_channel();
    let (close_tx, closes) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let req_tx = req_tx.clone();
            let close_tx = close_tx.clone();
            let replies = replies.clone();

            tokio::spawn(async move {
                while let Some(Ok(frame)) = ws.next().await {
                    match frame {
                        Message::Text(text) => {
                            let _ = req_tx.send(text.to_string());
                            for reply in &replies {
                                if ws.send(Message::Text((*reply).into())).await.is_err() {
                                    return;
                                }
                            }
                            match after {
                                AfterReply::KeepOpen => {}
                                AfterReply::CloseNormal => {
                                    let frame = CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: "done".into(),
                                    };
                                    let _ = ws.close(Some(frame)).await;
                                    return;
                                }
                                AfterReply::Drop => return,
                            }
                        }
                        Message::Close(frame) => {
                            let code = frame.map_or(1005, |f| u16::from(f.code));
                            let _ = close_tx.send(code);
                            return;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    SocketServer {
        url,
        requests,
        closes,
        connections,
    }
}

/// A listener that accepts TCP connections but never speaks WebSocket
///
/// With `hold` the socket stays open (the handshake stalls); without it the
/// connection is dropped at once. Returns the `ws://` URL and an accept counter.
pub async fn raw_listener(hold: bool) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/api/ws", listener.local_addr().unwrap());
    let accepts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            if hold {
                // Never complete the handshake
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    drop(stream);
                });
            } else {
                drop(stream);
            }
        }
    });

    (url, accepts)
}

/// Wait for the current attempt's outcome
pub async fn finished(rx: &mut mpsc::UnboundedReceiver<GenerationUpdate>) -> AttemptOutcome {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(GenerationUpdate::Finished(outcome)) => return outcome,
                Some(_) => {}
                None => panic!("update channel closed"),
            }
        }
    })
    .await
    .expect("attempt did not finish in time")
}

/// Collect updates until the attempt finishes
pub async fn collect_until_finished(
    rx: &mut mpsc::UnboundedReceiver<GenerationUpdate>,
) -> Vec<GenerationUpdate> {
    tokio::time::timeout(WAIT, async {
        let mut updates = Vec::new();
        loop {
            match rx.recv().await {
                Some(update) => {
                    let done = matches!(update, GenerationUpdate::Finished(_));
                    updates.push(update);
                    if done {
                        return updates;
                    }
                }
                None => panic!("update channel closed"),
            }
        }
    })
    .await
    .expect("attempt did not finish in time")
}

/// Poll until `check` holds for the client
pub async fn eventually(client: &GenerationClient, check: impl Fn(&GenerationClient) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check(client) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
