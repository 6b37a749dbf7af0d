//! The self-driven iteration engine.
//!
//! Drives the bounded think→act loop for one turn: call the model,
//! relay its stream, execute any tool calls through the pool, feed the
//! results back, and repeat until the model answers without tool calls
//! or the iteration bound is hit. Emits an ordered, finite stream of
//! [`TurnEvent`]s terminated by exactly one `Complete` or `Error`.

use crate::context::SessionContext;
use crate::turn_event::TurnEvent;
use agentd_core::message::{Message, MessageToolCall};
use agentd_core::provider::{ChatRequest, Provider, ProviderEvent};
use agentd_core::service::result_text;
use agentd_mcp::ToolSessionPool;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Model-call settings resolved from the session config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_iterations: u32,
}

/// A tool call being assembled from provider deltas.
struct PendingCall {
    id: String,
    name: String,
    arguments_json: String,
    complete: bool,
}

pub struct IterationEngine {
    provider: Arc<dyn Provider>,
    settings: EngineSettings,
}

impl IterationEngine {
    pub fn new(provider: Arc<dyn Provider>, settings: EngineSettings) -> Self {
        Self { provider, settings }
    }

    /// Run one turn. The returned channel yields events as the turn
    /// progresses; the turn itself runs on a spawned task.
    ///
    /// `max_iterations` overrides the session default, clamped to it.
    /// Context mutations are preserved on every exit path, including
    /// cancellation.
    pub fn run(
        &self,
        context: Arc<Mutex<SessionContext>>,
        pool: Arc<ToolSessionPool>,
        user_input: String,
        max_iterations: Option<u32>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(128);

        let provider = self.provider.clone();
        let settings = self.settings.clone();
        let max_iterations = max_iterations
            .map(|m| m.clamp(1, settings.max_iterations))
            .unwrap_or(settings.max_iterations);

        tokio::spawn(async move {
            run_turn(
                provider,
                settings,
                max_iterations,
                context,
                pool,
                user_input,
                cancel,
                tx,
            )
            .await;
        });

        rx
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_turn(
    provider: Arc<dyn Provider>,
    settings: EngineSettings,
    max_iterations: u32,
    context: Arc<Mutex<SessionContext>>,
    pool: Arc<ToolSessionPool>,
    user_input: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<TurnEvent>,
) {
    context.lock().await.append(Message::user(&user_input));

    let mut last_assistant_content = String::new();

    for iteration in 1..=max_iterations {
        if cancel.is_cancelled() {
            emit_cancelled(&tx).await;
            return;
        }

        if tx
            .send(TurnEvent::Iteration {
                current: iteration,
                max: max_iterations,
            })
            .await
            .is_err()
        {
            return;
        }

        let prompt = context.lock().await.assemble_prompt().await;
        let tools = pool.list_tools().await;

        debug!(
            iteration,
            max_iterations,
            prompt_messages = prompt.len(),
            tools = tools.len(),
            "engine iteration"
        );

        let request = ChatRequest {
            model: settings.model.clone(),
            messages: prompt,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            tools,
        };

        let mut stream = match provider.chat_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "provider request failed");
                let _ = tx
                    .send(TurnEvent::Error {
                        error: format!("provider error: {e}"),
                    })
                    .await;
                return;
            }
        };

        // Relay the provider stream, accumulating content and per-call
        // argument buffers.
        let mut content = String::new();
        let mut calls: Vec<PendingCall> = Vec::new();
        let mut finished = false;

        while !finished {
            let event = tokio::select! {
                event = stream.recv() => event,
                _ = cancel.cancelled() => {
                    emit_cancelled(&tx).await;
                    return;
                }
            };

            let Some(event) = event else {
                break; // provider stream closed without Done
            };

            match event {
                Ok(ProviderEvent::ContentDelta { text }) => {
                    if !text.is_empty() {
                        content.push_str(&text);
                        if tx
                            .send(TurnEvent::Content { content: text })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Ok(ProviderEvent::ToolCallBegin { id, name }) => {
                    calls.push(PendingCall {
                        id,
                        name,
                        arguments_json: String::new(),
                        complete: false,
                    });
                }
                Ok(ProviderEvent::ToolCallArgumentsDelta { id, delta }) => {
                    if let Some(call) = calls.iter_mut().find(|c| c.id == id) {
                        call.arguments_json.push_str(&delta);
                    }
                }
                Ok(ProviderEvent::ToolCallEnd { id }) => {
                    if let Some(call) = calls.iter_mut().find(|c| c.id == id) {
                        call.complete = true;
                        let arguments = parse_arguments(&call.arguments_json);
                        if tx
                            .send(TurnEvent::ToolCall {
                                tool: call.name.clone(),
                                arguments,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Ok(ProviderEvent::Done) => {
                    finished = true;
                }
                Err(e) => {
                    warn!(error = %e, "provider stream failed");
                    let _ = tx
                        .send(TurnEvent::Error {
                            error: format!("provider error: {e}"),
                        })
                        .await;
                    return;
                }
            }
        }

        calls.retain(|c| c.complete);
        last_assistant_content = content.clone();

        // Persist the assistant message (content and calls together).
        let tool_calls: Vec<MessageToolCall> = calls
            .iter()
            .map(|c| MessageToolCall {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: c.arguments_json.clone(),
            })
            .collect();
        context
            .lock()
            .await
            .append(Message::assistant_with_calls(&content, tool_calls));

        if calls.is_empty() {
            info!(iterations = iteration, "turn complete");
            let _ = tx
                .send(TurnEvent::Complete {
                    final_response: content,
                    iterations: iteration,
                })
                .await;
            return;
        }

        // Execute the calls in presentation order. Failures are fed
        // back to the model, never fatal to the turn.
        for call in &calls {
            if cancel.is_cancelled() {
                emit_cancelled(&tx).await;
                return;
            }

            let arguments = parse_arguments(&call.arguments_json);
            let outcome = pool.call(&call.name, arguments).await;

            let (result_value, message_content) = if outcome.ok {
                let text = result_text(&outcome.result)
                    .unwrap_or_else(|| outcome.result.to_string());
                (outcome.result.clone(), text)
            } else {
                let error = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "tool call failed".into());
                (Value::String(error.clone()), error)
            };

            if tx
                .send(TurnEvent::ToolResult {
                    tool: call.name.clone(),
                    success: outcome.ok,
                    result: result_value,
                })
                .await
                .is_err()
            {
                return;
            }

            context.lock().await.append(Message::tool_result(
                &call.id,
                &call.name,
                message_content,
                !outcome.ok,
            ));
        }
    }

    // Bound reached: finish with the last assistant content.
    warn!(max_iterations, "max iterations reached");
    let _ = tx
        .send(TurnEvent::Complete {
            final_response: last_assistant_content,
            iterations: max_iterations,
        })
        .await;
}

async fn emit_cancelled(tx: &mpsc::Sender<TurnEvent>) {
    let _ = tx
        .send(TurnEvent::Error {
            error: "cancelled".into(),
        })
        .await;
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}
