//! The client half of an MCP connection, shared by every transport.
//!
//! A peer owns the outbound frame queue (one writer per connection) and
//! a pump task that demultiplexes inbound frames by JSON-RPC id into
//! single-shot completion slots. Multiple calls may be in flight on the
//! same connection; responses resolve whichever slot matches.

use crate::rpc::{self, RpcRequest, RpcResponse};
use agentd_core::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, warn};

type Slot = oneshot::Sender<Result<Value, McpError>>;

pub struct McpPeer {
    server_name: String,
    outbound: mpsc::Sender<Value>,
    pending: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
    closed_tx: watch::Sender<bool>,
}

impl McpPeer {
    /// Wire a peer onto a frame pair and start its inbound pump.
    ///
    /// `outbound` frames are consumed by the transport's writer task;
    /// `inbound` frames come from its reader task. When `inbound`
    /// closes, all pending calls fail and the `closed` watch flips.
    pub fn spawn(
        server_name: impl Into<String>,
        outbound: mpsc::Sender<Value>,
        inbound: mpsc::Receiver<Value>,
    ) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        let peer = Arc::new(Self {
            server_name: server_name.into(),
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed_tx,
        });

        let pump = Arc::clone(&peer);
        tokio::spawn(async move {
            pump.pump_inbound(inbound).await;
        });

        peer
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Subscribe to the connection-closed signal.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Send a request and await its response's `result` field.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        eprintln!("REQUEST START");
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.to_string(), tx);
        }
        eprintln!("REQUEST INSERTED PENDING id={id}");

        let frame = serde_json::to_value(RpcRequest::new(id, method, params))
            .map_err(|source| McpError::InvalidJson {
                server: self.server_name.clone(),
                source,
            })?;

        if self.outbound.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id.to_string());
            return Err(self.transport_error("connection closed before send"));
        }

        eprintln!("REQUEST AWAITING RX id={id}");
        let out = match rx.await {
            Ok(result) => result,
            Err(_) => Err(McpError::Terminated {
                server: self.server_name.clone(),
            }),
        };
        eprintln!("REQUEST DONE id={id}");
        out
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let frame = serde_json::to_value(RpcRequest::notification(method, params))
            .map_err(|source| McpError::InvalidJson {
                server: self.server_name.clone(),
                source,
            })?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| self.transport_error("connection closed before send"))
    }

    async fn pump_inbound(self: Arc<Self>, mut inbound: mpsc::Receiver<Value>) {
        eprintln!("PUMP START");
        while let Some(frame) = inbound.recv().await {
            eprintln!("PUMP GOT FRAME");
            self.process_inbound(frame).await;
        }

        eprintln!("PUMP ENDED, failing pending");
        // Transport gone: fail everything still waiting.
        self.fail_all_pending().await;
        eprintln!("FAILED PENDING, closed_tx send");
        let r = self.closed_tx.send(true);
        eprintln!("closed_tx send result={:?}", r.is_ok());
    }

    async fn process_inbound(&self, frame: Value) {
        let has_method = frame.get("method").is_some();
        match frame.get("id") {
            Some(id) if !has_method => self.resolve_response(id.clone(), frame).await,
            Some(id) => self.answer_server_request(id.clone(), frame).await,
            None if has_method => {
                let method = frame.get("method").and_then(Value::as_str).unwrap_or("");
                debug!(server = %self.server_name, method, "notification from server");
            }
            None => {}
        }
    }

    async fn resolve_response(&self, id: Value, frame: Value) {
        let Some(key) = rpc::id_key(&id) else {
            return;
        };

        let slot = self.pending.lock().await.remove(&key);
        let Some(slot) = slot else {
            debug!(
                server = %self.server_name,
                response_id = key,
                "response for unknown request"
            );
            return;
        };

        if let Some(error) = frame.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let _ = slot.send(Err(McpError::Rpc {
                server: self.server_name.clone(),
                code,
                message,
            }));
        } else {
            let result = frame.get("result").cloned().unwrap_or(Value::Null);
            let _ = slot.send(Ok(result));
        }
    }

    /// Servers may send requests back to the client. Only `ping` is
    /// supported; everything else is refused with `-32601`.
    async fn answer_server_request(&self, id: Value, frame: Value) {
        let method = frame.get("method").and_then(Value::as_str).unwrap_or("");
        let response = match method {
            "ping" => RpcResponse::success(Some(id), serde_json::json!({})),
            other => {
                warn!(server = %self.server_name, method = other, "unsupported server request");
                RpcResponse::method_not_found(Some(id), other)
            }
        };
        if let Ok(frame) = serde_json::to_value(&response) {
            let _ = self.outbound.send(frame).await;
        }
    }

    async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, slot) in pending.drain() {
            let _ = slot.send(Err(McpError::Terminated {
                server: self.server_name.clone(),
            }));
        }
    }

    fn transport_error(&self, message: impl Into<String>) -> McpError {
        McpError::Transport {
            server: self.server_name.clone(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A loopback "server" that answers every request from a closure.
    fn loopback<F>(respond: F) -> Arc<McpPeer>
    where
        F: Fn(RpcRequest) -> Option<RpcResponse> + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<Value>(16);
        let (in_tx, in_rx) = mpsc::channel::<Value>(16);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let req: RpcRequest = serde_json::from_value(frame).unwrap();
                if let Some(resp) = respond(req) {
                    let _ = in_tx.send(serde_json::to_value(&resp).unwrap()).await;
                }
            }
        });

        McpPeer::spawn("test", out_tx, in_rx)
    }

    #[tokio::test]
    async fn request_resolves_result() {
        let peer = loopback(|req| {
            Some(RpcResponse::success(
                req.id,
                serde_json::json!({"echo": req.method}),
            ))
        });

        let result = peer.request("tools/list", serde_json::json!({})).await.unwrap();
        assert_eq!(result["echo"], "tools/list");
    }

    #[tokio::test]
    async fn rpc_error_surfaces() {
        let peer = loopback(|req| Some(RpcResponse::method_not_found(req.id, &req.method)));

        let err = peer.request("nope", serde_json::json!({})).await.unwrap_err();
        match err {
            McpError::Rpc { code, .. } => assert_eq!(code, -32601),
            other => panic!("expected Rpc error, got {other}"),
        }
    }

    #[tokio::test]
    async fn interleaved_requests_demux_by_id() {
        let peer = loopback(|req| {
            let id = req.id.clone();
            Some(RpcResponse::success(
                id.clone(),
                serde_json::json!({"id_seen": id}),
            ))
        });

        let (a, b) = tokio::join!(
            peer.request("m", serde_json::json!({})),
            peer.request("m", serde_json::json!({})),
        );
        let a = a.unwrap()["id_seen"].clone();
        let b = b.unwrap()["id_seen"].clone();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn closed_transport_fails_pending() {
        let (out_tx, _out_rx) = mpsc::channel::<Value>(16);
        let (in_tx, in_rx) = mpsc::channel::<Value>(16);
        let peer = McpPeer::spawn("dying", out_tx, in_rx);

        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.request("m", serde_json::json!({})).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(in_tx); // server side disappears

        eprintln!("TEST: awaiting call join handle");
        let err = call.await.unwrap().unwrap_err();
        eprintln!("TEST: call joined");
        assert!(matches!(err, McpError::Terminated { .. }));

        let mut closed = peer.closed();
        eprintln!("TEST: awaiting closed watch, current={}", *closed.borrow());
        closed.wait_for(|c| *c).await.unwrap();
        eprintln!("TEST: closed watch satisfied");
    }
}
