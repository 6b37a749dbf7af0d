//! In-process transport — MCP over a paired frame queue.
//!
//! An [`McpService`] is hosted on a server task that consumes request
//! frames and produces response frames, giving in-process services the
//! exact wire surface of a subprocess server. The pool cannot tell the
//! difference.

use crate::peer::McpPeer;
use crate::rpc::{
    self, RpcRequest, RpcResponse, METHOD_INITIALIZE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    PROTOCOL_VERSION,
};
use agentd_core::service::McpService;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Host `service` on a paired queue and return the client peer.
pub fn spawn_in_process(server_name: &str, service: Arc<dyn McpService>) -> Arc<McpPeer> {
    // client -> server
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    // server -> client
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(64);

    let task_name = server_name.to_string();
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let request: RpcRequest = match serde_json::from_value(frame) {
                Ok(req) => req,
                Err(_) => {
                    let resp =
                        RpcResponse::error(None, rpc::CODE_INVALID_REQUEST, "malformed frame");
                    if send_response(&inbound_tx, resp).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if request.is_notification() {
                debug!(server = %task_name, method = %request.method, "notification");
                continue;
            }

            let response = dispatch(&*service, request).await;
            if send_response(&inbound_tx, response).await.is_err() {
                break;
            }
        }
        debug!(server = %task_name, "in-process server task exiting");
    });

    McpPeer::spawn(server_name, outbound_tx, inbound_rx)
}

async fn send_response(
    tx: &mpsc::Sender<Value>,
    response: RpcResponse,
) -> Result<(), mpsc::error::SendError<Value>> {
    match serde_json::to_value(&response) {
        Ok(frame) => tx.send(frame).await,
        Err(_) => Ok(()),
    }
}

async fn dispatch(service: &dyn McpService, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        METHOD_INITIALIZE => RpcResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": service.name(),
                    "version": service.version(),
                },
            }),
        ),
        METHOD_TOOLS_LIST => {
            let tools = service.list_tools().await;
            RpcResponse::success(id, serde_json::json!({ "tools": tools }))
        }
        METHOD_TOOLS_CALL => {
            let params = request.params.unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return RpcResponse::invalid_params(id, "missing tool name");
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            match service.call_tool(name, arguments).await {
                Ok(result) => RpcResponse::success(id, result),
                Err(err) => RpcResponse::error(id, err.rpc_code(), err.to_string()),
            }
        }
        other => RpcResponse::method_not_found(id, other),
    }
}
