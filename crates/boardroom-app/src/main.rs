// Boardroom entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open database
// 4. Resolve the signed-in user
// 5. Build the LLM client
// 6. Create mpsc channels and AppState
// 7. Spawn realtime conversation watcher
// 8. Spawn stdin reader task
// 9. Spawn app logic task
// 10. Print UI updates until the app loop ends
// 11. Cleanup on exit

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

use boardroom_app::app::{self, AppState, UiUpdate};
use boardroom_app::command::{self, UserCommand};
use boardroom_core::config;
use boardroom_core::db::Database;
use boardroom_core::model::NewUser;
use boardroom_llm::{ChatBackend, LlmClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("Boardroom starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: model={}, stream={}, default agents={:?}",
        config.llm.model, config.llm.stream, config.report.default_agents
    );

    // 3. Open database
    let db_path = config.resolved_db_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db_path_str = db_path.to_string_lossy().into_owned();
    let db = Arc::new(Database::open(&db_path_str).context("failed to open database")?);
    info!("Database opened at {}", db_path_str);

    // 4. Resolve the signed-in user
    let user = db
        .ensure_user(&NewUser {
            email: config.user.email.clone(),
            full_name: config.user.full_name.clone(),
            role: config.user.role.clone(),
            department: config.user.department.clone(),
        })
        .context("failed to resolve user")?;
    db.update_user_last_login(&user.id)
        .context("failed to record login")?;
    info!("Signed in as {} ({})", user.full_name, user.email);

    // 5. Build the LLM client
    let llm_client = LlmClient::from_config(&config);
    match &llm_client {
        LlmClient::Active(_) => info!("LLM client initialized (API key configured)"),
        LlmClient::Disabled => info!("LLM client disabled (no API key)"),
    }
    if !llm_client.is_configured() {
        println!("AI service is not configured. Set OPENAI_API_KEY or config/credentials.toml.");
    }
    let backend: Arc<dyn ChatBackend> = Arc::new(llm_client);

    // 6. Create mpsc channels and AppState
    let (cmd_tx, cmd_rx) = mpsc::channel::<UserCommand>(64);
    let (ui_tx, mut ui_rx) = mpsc::channel::<UiUpdate>(256);
    let app_state = AppState::new(db.clone(), backend, user.id.clone(), &config);

    // 7. Spawn realtime conversation watcher
    let mut conversations = db.subscribe_conversations(&user.id);
    let watch_handle = tokio::spawn(async move {
        while let Some(conv) = conversations.next().await {
            info!(
                conversation_id = %conv.id,
                status = %conv.status,
                title = %conv.title,
                "conversation changed"
            );
        }
    });

    // 8. Spawn stdin reader task
    let input_handle = tokio::spawn(read_input(cmd_tx));

    // 9. Spawn app logic task
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(cmd_rx, ui_tx, app_state).await {
            error!("Application loop error: {}", e);
        }
    });

    // 10. Print UI updates until the app loop ends
    println!("Boardroom ready. Type /help for commands.");
    while let Some(update) = ui_rx.recv().await {
        render(&update);
    }

    // 11. Cleanup
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;
    input_handle.abort();
    watch_handle.abort();

    info!("Boardroom shut down cleanly");
    Ok(())
}

/// Read stdin line by line and forward parsed commands. Usage errors are
/// printed directly; EOF ends the session.
async fn read_input(cmd_tx: mpsc::Sender<UserCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("stdin read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match command::parse_command(&line) {
            Ok(cmd) => {
                let quit = cmd == UserCommand::Quit;
                if cmd_tx.send(cmd).await.is_err() || quit {
                    return;
                }
            }
            Err(e) => println!("{e}"),
        }
    }
    let _ = cmd_tx.send(UserCommand::Quit).await;
}

fn render(update: &UiUpdate) {
    match update {
        UiUpdate::Notice(text) => println!("{text}"),
        UiUpdate::Token(text) => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        UiUpdate::Reply {
            persona,
            content,
            streamed,
        } => {
            if *streamed {
                println!();
            } else {
                println!("[{}] {}", persona.display_name(), content);
            }
        }
        UiUpdate::Error(msg) => println!("error: {msg}"),
        UiUpdate::RestoreInput(input) => {
            println!("(not sent: \"{input}\"; /retry to resend)")
        }
        UiUpdate::PersonaChanged(persona) => {
            println!("now talking to {} ({})", persona.display_name(), persona.role_line())
        }
        UiUpdate::Agents(agents) => {
            for agent in agents {
                println!(
                    "{:<5} {}  {}",
                    agent.agent_type,
                    agent.name,
                    agent.capabilities.join(", ")
                );
            }
        }
        UiUpdate::Conversations(list) => {
            if list.is_empty() {
                println!("no conversations yet");
            }
            for conv in list {
                println!(
                    "{}  {:<6}  {}  {}",
                    conv.id,
                    conv.status,
                    conv.updated_at.format("%Y-%m-%d %H:%M"),
                    conv.title
                );
            }
        }
        UiUpdate::Transcript {
            conversation,
            messages,
        } => {
            println!("== {} ==", conversation.title);
            for msg in messages {
                println!("[{}] {}", msg.role, msg.content);
            }
        }
        UiUpdate::Reports(list) => {
            if list.is_empty() {
                println!("no reports yet");
            }
            for report in list {
                println!(
                    "{}  {}  {}",
                    report.id,
                    report.generated_at.format("%Y-%m-%d %H:%M"),
                    report.title
                );
            }
        }
        UiUpdate::Report { id, markdown } => {
            println!("{markdown}");
            println!("(saved as report {id})");
        }
    }
}

/// Initialize tracing to log to a file so the terminal stays free for chat.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("boardroom.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("boardroom_app=info,boardroom_core=info,boardroom_llm=info,warn")
        }))
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
