//! Server command dispatch.
//!
//! Inbound frames come from the transport reader; effectful handlers run
//! here.  The command set is closed: unknown names are logged and ignored.
//! Commands may carry a `request_id`, echoed in the reply frame.
//!
//! The `ai_*` family belongs to the external AI collaborator; the core only
//! redacts the prompt and forwards through the [`AiBridge`] seam.

use std::sync::Arc;

use chrono::Utc;
use scribe_protocol::{
    error_codes, CommandFrame, CommandName, CommandReply, ServerMessage,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::auth::AuthStore;
use crate::collector::Collector;
use crate::mode::ModeController;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// AI bridge seam
// ---------------------------------------------------------------------------

/// The external AI subsystem's command surface.  Out-of-core: the default
/// implementation reports the subsystem as unavailable.
pub trait AiBridge: Send + Sync {
    fn handle(&self, command: CommandName, params: &serde_json::Value) -> serde_json::Value;
}

pub struct NoopAiBridge;

impl AiBridge for NoopAiBridge {
    fn handle(&self, command: CommandName, _params: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "error": "ai subsystem unavailable",
            "command": command.as_str(),
        })
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

pub struct CommandHandler {
    pub mode: Arc<ModeController>,
    pub collector: Arc<Collector>,
    pub transport: Transport,
    pub auth: Arc<AuthStore>,
    pub agent_id: String,
    pub shutdown_tx: watch::Sender<bool>,
    pub ai: Arc<dyn AiBridge>,
    /// Set by tests to observe `restart` without respawning.
    pub restart_requested: std::sync::atomic::AtomicBool,
    /// When false (tests), `restart` only flags instead of exec'ing.
    pub allow_respawn: bool,
}

impl CommandHandler {
    /// Dispatch one command frame; returns the reply payload, or None for
    /// unknown commands.
    pub fn dispatch(&self, frame: &CommandFrame) -> Option<serde_json::Value> {
        let Some(name) = CommandName::parse(&frame.command) else {
            warn!(command = %frame.command, "unknown command ignored");
            return None;
        };

        let data = match name {
            CommandName::StartStream => {
                self.mode.set_active();
                serde_json::json!({"mode": "active"})
            }
            CommandName::StopStream => {
                self.mode.set_passive("stop_stream command");
                serde_json::json!({"mode": "passive"})
            }
            CommandName::Shutdown => {
                info!("shutdown command received");
                let _ = self.shutdown_tx.send(true);
                serde_json::json!({"shutting_down": true})
            }
            CommandName::Restart => {
                info!("restart command received");
                self.restart_requested
                    .store(true, std::sync::atomic::Ordering::SeqCst);
                if self.allow_respawn {
                    respawn_self();
                }
                serde_json::json!({"restarting": true})
            }
            CommandName::Disable => {
                info!("disable command received, send interval -> 24h");
                self.collector.send_override.disable();
                serde_json::json!({"disabled": true})
            }
            CommandName::AiStatus
            | CommandName::AiEnable
            | CommandName::AiDisable
            | CommandName::AiDownloadModel
            | CommandName::AiDownloadRunner
            | CommandName::AiGenerate => {
                let params = redact_prompt(&frame.params);
                self.ai.handle(name, &params)
            }
        };
        Some(data)
    }

    fn reply_for(
        &self,
        frame: &CommandFrame,
        data: serde_json::Value,
    ) -> CommandReply {
        CommandReply {
            reply_type: format!("{}_response", frame.command),
            agent_id: self.agent_id.clone(),
            timestamp: Utc::now(),
            data,
            request_id: frame.request_id.clone(),
        }
    }
}

/// Any user-provided prompt leaves the host redacted.
fn redact_prompt(params: &serde_json::Value) -> serde_json::Value {
    let mut params = params.clone();
    if let Some(prompt) = params.get("prompt").and_then(|p| p.as_str()) {
        let cleaned = scribe_redact::redact(prompt, scribe_redact::Profile::Default);
        if let Some(obj) = params.as_object_mut() {
            obj.insert("prompt".to_owned(), serde_json::json!(cleaned));
        }
    }
    params
}

fn respawn_self() {
    match std::env::current_exe() {
        Ok(exe) => {
            match std::process::Command::new(&exe)
                .args(std::env::args().skip(1))
                .spawn()
            {
                Ok(_) => std::process::exit(0),
                Err(e) => warn!(error = %e, "respawn failed, continuing"),
            }
        }
        Err(e) => warn!(error = %e, "cannot locate own binary for restart"),
    }
}

// ---------------------------------------------------------------------------
// Inbound loop
// ---------------------------------------------------------------------------

pub async fn run_command_loop(
    handler: Arc<CommandHandler>,
    mut inbound: mpsc::UnboundedReceiver<ServerMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            msg = inbound.recv() => match msg {
                None => break,
                Some(ServerMessage::Command(frame)) => {
                    if let Some(data) = handler.dispatch(&frame) {
                        let reply = handler.reply_for(&frame, data);
                        if let Err(e) = handler.transport.send(&reply).await {
                            warn!(error = %e, command = %frame.command, "command reply send failed");
                        }
                    }
                }
                Some(ServerMessage::AuthToken(grant)) => {
                    handler.auth.set_token(grant.auth_token);
                }
                Some(ServerMessage::Error(err)) => {
                    if err.error == error_codes::AUTH_FAILED {
                        handler.auth.clear_token();
                    } else {
                        warn!(error = %err.error, message = ?err.message, "server error frame");
                    }
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
