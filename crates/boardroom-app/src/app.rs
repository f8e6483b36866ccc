// Application state and command loop.
//
// Commands from the input reader are handled one at a time. Chat replies and
// reports are produced inline; streamed tokens are relayed to the UI by a
// short-lived forwarding task while a send is in flight.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use boardroom_core::config::Config;
use boardroom_core::db::Database;
use boardroom_core::model::{Agent, Conversation, Message, Report};
use boardroom_core::persona::Persona;
use boardroom_llm::{ChatBackend, LlmEvent};

use crate::chat::ChatSession;
use crate::command::{UserCommand, HELP};
use crate::report::{self, ReportOptions};

// ---------------------------------------------------------------------------
// UI updates
// ---------------------------------------------------------------------------

/// Everything the presentation layer is asked to show.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Informational line.
    Notice(String),
    /// One streamed fragment of the reply in progress.
    Token(String),
    /// A finished reply. When `streamed` is set its text already went out as
    /// `Token`s.
    Reply {
        persona: Persona,
        content: String,
        streamed: bool,
    },
    Error(String),
    /// A send failed; this is the text the user typed.
    RestoreInput(String),
    PersonaChanged(Persona),
    Agents(Vec<Agent>),
    Conversations(Vec<Conversation>),
    /// Messages of a reopened conversation.
    Transcript {
        conversation: Conversation,
        messages: Vec<Message>,
    },
    Reports(Vec<Report>),
    Report {
        id: String,
        markdown: String,
    },
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub session: ChatSession,
    db: Arc<Database>,
    backend: Arc<dyn ChatBackend>,
    default_agents: Vec<String>,
    history_limit: usize,
    stream: bool,
    /// Last input whose send failed, for `/retry`.
    failed_input: Option<String>,
}

impl AppState {
    pub fn new(
        db: Arc<Database>,
        backend: Arc<dyn ChatBackend>,
        user_id: String,
        config: &Config,
    ) -> Self {
        Self {
            session: ChatSession::new(db.clone(), backend.clone(), user_id),
            db,
            backend,
            default_agents: config.report.default_agents.clone(),
            history_limit: config.report.history_limit,
            stream: config.llm.stream,
            failed_input: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the command loop until `/quit`, the command channel closes, or the UI
/// goes away.
pub async fn run(
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => {
                        handle_user_command(&mut state, cmd, &ui_tx).await;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            _ = ui_tx.closed() => {
                info!("UI channel closed, shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn notify(ui_tx: &mpsc::Sender<UiUpdate>, update: UiUpdate) {
    if ui_tx.send(update).await.is_err() {
        debug!("UI receiver dropped");
    }
}

async fn handle_user_command(state: &mut AppState, cmd: UserCommand, ui_tx: &mpsc::Sender<UiUpdate>) {
    debug!(?cmd, "handling command");
    match cmd {
        UserCommand::Chat(text) => send_chat(state, text, ui_tx).await,
        UserCommand::Retry => match state.failed_input.take() {
            Some(text) => send_chat(state, text, ui_tx).await,
            None => notify(ui_tx, UiUpdate::Notice("nothing to retry".into())).await,
        },
        UserCommand::SwitchAgent(tag) => match state.session.switch_persona(&tag) {
            Ok(persona) => notify(ui_tx, UiUpdate::PersonaChanged(persona)).await,
            Err(e) => notify(ui_tx, UiUpdate::Error(e.to_string())).await,
        },
        UserCommand::ListAgents => match state.db.list_agents() {
            Ok(agents) => notify(ui_tx, UiUpdate::Agents(agents)).await,
            Err(e) => notify(ui_tx, UiUpdate::Error(format!("{e:#}"))).await,
        },
        UserCommand::NewConversation => {
            state.session.start_new();
            notify(ui_tx, UiUpdate::Notice("new conversation".into())).await;
        }
        UserCommand::OpenConversation(id) => match state.session.open_conversation(&id) {
            Ok(messages) => {
                if let Some(conversation) = state.session.conversation().cloned() {
                    notify(ui_tx, UiUpdate::Transcript { conversation, messages }).await;
                }
            }
            Err(e) => notify(ui_tx, UiUpdate::Error(e.to_string())).await,
        },
        UserCommand::EndConversation => match state.session.end_conversation() {
            Ok(conv) => notify(ui_tx, UiUpdate::Notice(format!("ended \"{}\"", conv.title))).await,
            Err(e) => notify(ui_tx, UiUpdate::Error(e.to_string())).await,
        },
        UserCommand::History => match state.session.recent_conversations(state.history_limit) {
            Ok(list) => notify(ui_tx, UiUpdate::Conversations(list)).await,
            Err(e) => notify(ui_tx, UiUpdate::Error(e.to_string())).await,
        },
        UserCommand::Reports => match state.db.list_reports(state.session.user_id(), state.history_limit) {
            Ok(list) => notify(ui_tx, UiUpdate::Reports(list)).await,
            Err(e) => notify(ui_tx, UiUpdate::Error(format!("{e:#}"))).await,
        },
        UserCommand::GenerateReport { agents, topic } => {
            let agents = agents.unwrap_or_else(|| state.default_agents.clone());
            generate_and_save_report(state, topic, agents, ui_tx).await;
        }
        UserCommand::ShowReport(id) => match report::load_report(&state.db, &id) {
            Ok(Some((row, doc))) => {
                notify(
                    ui_tx,
                    UiUpdate::Report {
                        id: row.id,
                        markdown: doc.to_markdown(),
                    },
                )
                .await
            }
            Ok(None) => notify(ui_tx, UiUpdate::Error(format!("report {id} not found"))).await,
            Err(e) => notify(ui_tx, UiUpdate::Error(format!("{e:#}"))).await,
        },
        UserCommand::Help => notify(ui_tx, UiUpdate::Notice(HELP.to_string())).await,
        UserCommand::Quit => {}
    }
}

/// Relay `LlmEvent::Token`s to the UI until the sender side is dropped.
fn spawn_token_forwarder(
    ui_tx: &mpsc::Sender<UiUpdate>,
) -> (mpsc::Sender<LlmEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<LlmEvent>(64);
    let ui = ui_tx.clone();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let LlmEvent::Token { text } = event {
                if ui.send(UiUpdate::Token(text)).await.is_err() {
                    break;
                }
            }
        }
    });
    (tx, handle)
}

async fn send_chat(state: &mut AppState, text: String, ui_tx: &mpsc::Sender<UiUpdate>) {
    let (tokens, forwarder) = if state.stream {
        let (tx, handle) = spawn_token_forwarder(ui_tx);
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };

    let result = state.session.send(&text, tokens).await;

    // The sender was dropped with the send; wait for queued tokens to drain
    // so they reach the UI before the reply marker.
    if let Some(handle) = forwarder {
        let _ = handle.await;
    }

    match result {
        Ok(reply) => {
            state.failed_input = None;
            notify(
                ui_tx,
                UiUpdate::Reply {
                    persona: state.session.persona(),
                    content: reply.content,
                    streamed: state.stream,
                },
            )
            .await;
        }
        Err(err) => {
            warn!(error = %err, "chat send failed");
            notify(ui_tx, UiUpdate::Error(err.to_string())).await;
            if !err.input.trim().is_empty() {
                state.failed_input = Some(err.input.clone());
                notify(ui_tx, UiUpdate::RestoreInput(err.input)).await;
            }
        }
    }
}

async fn generate_and_save_report(
    state: &mut AppState,
    topic: String,
    agents: Vec<String>,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    notify(
        ui_tx,
        UiUpdate::Notice(format!("generating report on \"{topic}\" with {}", agents.join(", "))),
    )
    .await;

    let mut options = ReportOptions::new(topic, agents);
    options.conversation_id = state.session.conversation().map(|c| c.id.clone());

    let generated = match report::generate_report(state.backend.as_ref(), &options).await {
        Ok(generated) => generated,
        Err(e) => {
            warn!(error = %e, "report generation failed");
            notify(ui_tx, UiUpdate::Error(e.to_string())).await;
            return;
        }
    };

    match report::save_report(&state.db, state.session.user_id(), &options, &generated) {
        Ok(row) => {
            info!(report_id = %row.id, "report saved");
            notify(
                ui_tx,
                UiUpdate::Report {
                    id: row.id,
                    markdown: generated.to_markdown(),
                },
            )
            .await;
        }
        Err(e) => notify(ui_tx, UiUpdate::Error(format!("failed to save report: {e:#}"))).await,
    }
}
