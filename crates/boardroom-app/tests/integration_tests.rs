// Integration tests for the boardroom app.
//
// These drive the real OpenAI-compatible client against a scripted local
// HTTP server and an in-memory database, checking that chat sessions, the
// report pipeline and the command loop work together end to end.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use boardroom_app::app::{self, AppState, UiUpdate};
use boardroom_app::chat::{ChatError, ChatSession};
use boardroom_app::command::{parse_command, UserCommand};
use boardroom_app::report::{self, KpiStatus, ReportOptions};
use boardroom_core::config::*;
use boardroom_core::db::Database;
use boardroom_core::model::{MessageRole, NewUser, User};
use boardroom_llm::{ChatBackend, LlmClient, LlmError, LlmEvent};

// ===========================================================================
// Test helpers
// ===========================================================================

fn test_config(base_url: &str, api_key: Option<&str>, stream: bool) -> Config {
    Config {
        llm: LlmConfig {
            base_url: base_url.to_string(),
            model: "gpt-test".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            stream,
        },
        database: DatabaseConfig {
            path: ":memory:".to_string(),
        },
        user: UserConfig {
            email: "ceo@example.com".to_string(),
            full_name: "대표님".to_string(),
            role: "ceo".to_string(),
            department: None,
        },
        report: ReportConfig {
            default_agents: vec!["CFO".to_string(), "CTO".to_string()],
            history_limit: 10,
        },
        credentials: CredentialsConfig {
            openai_api_key: api_key.map(str::to_string),
        },
    }
}

fn setup_db() -> (Arc<Database>, User) {
    let db = Arc::new(Database::open(":memory:").unwrap());
    let user = db
        .ensure_user(&NewUser {
            email: "ceo@example.com".into(),
            full_name: "대표님".into(),
            role: "ceo".into(),
            department: None,
        })
        .unwrap();
    (db, user)
}

/// Read one HTTP request and return its body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf[header_end..]).into_owned()
}

/// Serve `responses` in order, one per connection, and hand back the request
/// bodies once all were served.
async fn scripted_server(responses: Vec<String>) -> (SocketAddr, JoinHandle<Vec<serde_json::Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut bodies = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let body = read_request(&mut socket).await;
            bodies.push(serde_json::from_str(&body).unwrap());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            let _ = socket.shutdown().await;
        }
        bodies
    });
    (addr, task)
}

fn completion(content: &str) -> String {
    let body = serde_json::json!({
        "model": "gpt-test-0613",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 40, "completion_tokens": 8, "total_tokens": 48}
    })
    .to_string();
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn error_response(status: &str, message: &str) -> String {
    let body = serde_json::json!({"error": {"message": message}}).to_string();
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn sse(chunks: &[&str]) -> String {
    let mut out = String::from(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
    );
    for chunk in chunks {
        let frame = serde_json::json!({"choices": [{"index": 0, "delta": {"content": chunk}}]});
        out.push_str(&format!("data: {frame}\n\n"));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

fn backend_for(addr: SocketAddr, stream: bool) -> Arc<dyn ChatBackend> {
    let config = test_config(&format!("http://{addr}"), Some("sk-test"), stream);
    Arc::new(LlmClient::from_config(&config))
}

fn system_prompt(body: &serde_json::Value) -> &str {
    body["messages"][0]["content"].as_str().unwrap()
}

// ===========================================================================
// Chat sessions
// ===========================================================================

#[tokio::test]
async fn first_message_creates_titled_conversation_and_persists_both_sides() {
    let (addr, server) = scripted_server(vec![
        completion("\"3분기 예산 검토\""),
        completion("운영비를 10% 줄이는 것을 권합니다."),
    ])
    .await;
    let (db, user) = setup_db();
    let mut session = ChatSession::new(db.clone(), backend_for(addr, false), user.id.clone());

    let reply = session.send("3분기 예산을 어떻게 조정할까요?", None).await.unwrap();
    assert_eq!(reply.content, "운영비를 10% 줄이는 것을 권합니다.");
    assert_eq!(reply.role, MessageRole::Assistant);

    let conv = session.conversation().unwrap().clone();
    assert_eq!(conv.title, "3분기 예산 검토");

    let messages = db.list_messages(&conv.id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "3분기 예산을 어떻게 조정할까요?");
    assert_eq!(messages[1].agent_id, db.get_agent_by_type("CFO").unwrap().map(|a| a.id));
    let meta = messages[1].metadata.as_ref().unwrap();
    assert_eq!(meta["model"], "gpt-test-0613");
    assert_eq!(meta["usage"]["total_tokens"], 48);
    assert_eq!(meta["persona"], "CFO");

    let bodies = server.await.unwrap();
    assert_eq!(bodies.len(), 2);
    // The chat call carries the CFO system prompt followed by the history.
    assert!(system_prompt(&bodies[1]).contains("CFO"));
    assert_eq!(bodies[1]["messages"][1]["role"], "user");
    assert_eq!(bodies[1]["messages"][1]["content"], "3분기 예산을 어떻게 조정할까요?");
}

#[tokio::test]
async fn follow_up_in_same_conversation_sends_full_history() {
    let (addr, server) = scripted_server(vec![
        completion("Cloud plan"),
        completion("Move to managed Postgres."),
        completion("Roughly six weeks."),
    ])
    .await;
    let (db, user) = setup_db();
    let mut session = ChatSession::new(db.clone(), backend_for(addr, false), user.id.clone());
    session.switch_persona("cto").unwrap();

    session.send("How should we migrate the database?", None).await.unwrap();
    session.send("How long will it take?", None).await.unwrap();

    let conv_id = session.conversation().unwrap().id.clone();
    assert_eq!(db.list_conversations(&user.id, 10).unwrap().len(), 1);
    assert_eq!(db.list_messages(&conv_id).unwrap().len(), 4);

    let bodies = server.await.unwrap();
    let last = bodies[2]["messages"].as_array().unwrap();
    // system + user + assistant + user
    assert_eq!(last.len(), 4);
    assert!(last[0]["content"].as_str().unwrap().contains("CTO"));
    assert_eq!(last[2]["content"], "Move to managed Postgres.");
    assert_eq!(last[3]["content"], "How long will it take?");
}

#[tokio::test]
async fn streamed_reply_matches_persisted_message() {
    let (addr, server) = scripted_server(vec![
        completion("Hiring plan"),
        sse(&["Hire ", "two ", "engineers ", "first."]),
    ])
    .await;
    let (db, user) = setup_db();
    let mut session = ChatSession::new(db.clone(), backend_for(addr, true), user.id.clone());
    session.switch_persona("CHRO").unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let reply = session.send("Who should we hire next?", Some(tx)).await.unwrap();

    let mut tokens = String::new();
    let mut completed = None;
    while let Some(event) = rx.recv().await {
        match event {
            LlmEvent::Token { text } => tokens.push_str(&text),
            LlmEvent::Complete { full_text } => completed = Some(full_text),
            LlmEvent::Error { message } => panic!("unexpected stream error: {message}"),
        }
    }
    assert_eq!(tokens, "Hire two engineers first.");
    assert_eq!(completed.as_deref(), Some("Hire two engineers first."));
    assert_eq!(reply.content, tokens);

    let stored = db.list_messages(&reply.conversation_id).unwrap();
    assert_eq!(stored.last().unwrap().content, "Hire two engineers first.");

    let bodies = server.await.unwrap();
    assert_eq!(bodies[1]["stream"], true);
    assert!(system_prompt(&bodies[1]).contains("CHRO"));
}

#[tokio::test]
async fn upstream_failure_keeps_user_message_and_returns_input() {
    let (addr, server) = scripted_server(vec![
        completion("Pricing"),
        error_response("401 Unauthorized", "Incorrect API key provided"),
    ])
    .await;
    let (db, user) = setup_db();
    let mut session = ChatSession::new(db.clone(), backend_for(addr, false), user.id.clone());

    let err = session.send("What should we charge?", None).await.unwrap_err();
    assert_eq!(err.input, "What should we charge?");
    match &err.source {
        ChatError::Llm(LlmError::Upstream { status, message }) => {
            assert_eq!(*status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("expected upstream error, got: {other:?}"),
    }

    let conv_id = session.conversation().unwrap().id.clone();
    let messages = db.list_messages(&conv_id).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);
    server.await.unwrap();
}

#[tokio::test]
async fn unconfigured_client_never_touches_network_or_database() {
    let (db, user) = setup_db();
    let config = test_config("http://127.0.0.1:9", None, true);
    let backend: Arc<dyn ChatBackend> = Arc::new(LlmClient::from_config(&config));
    assert!(!backend.is_configured());

    let mut session = ChatSession::new(db.clone(), backend.clone(), user.id.clone());
    let err = session.send("hello", None).await.unwrap_err();
    assert!(matches!(err.source, ChatError::Llm(LlmError::NotConfigured)));
    assert!(db.list_conversations(&user.id, 10).unwrap().is_empty());

    let options = ReportOptions::new("topic", vec!["CFO".into()]);
    let err = report::generate_report(backend.as_ref(), &options).await.unwrap_err();
    assert!(matches!(err, LlmError::NotConfigured));
}

// ===========================================================================
// Report pipeline
// ===========================================================================

#[tokio::test]
async fn report_pipeline_parses_model_json_and_falls_back_per_stage() {
    let kpi_reply = r#"핵심 지표는 다음과 같습니다:
[{"metric": "예상 ROI", "value": 180, "status": "positive"}, {"metric": "초기 투자", "value": "12억", "status": "neutral"}]"#;
    let (addr, server) = scripted_server(vec![
        completion("전반적으로 추진할 가치가 있습니다."),
        completion(kpi_reply),
        completion("재무 관점 분석"),
        completion("기술 관점 분석"),
        completion("다음 단계는 추후 논의가 필요합니다."),
    ])
    .await;
    let (db, user) = setup_db();
    let backend = backend_for(addr, false);

    let mut options = ReportOptions::new("동남아 시장 진출", vec!["CFO".into(), "CTO".into()]);
    options.conversation_id = None;
    let generated = report::generate_report(backend.as_ref(), &options).await.unwrap();

    assert_eq!(generated.title, "동남아 시장 진출 - 종합 분석 보고서");
    assert_eq!(generated.executive_summary, "전반적으로 추진할 가치가 있습니다.");
    assert_eq!(generated.kpi.len(), 2);
    assert_eq!(generated.kpi[0].value, "180");
    assert_eq!(generated.kpi[1].status, KpiStatus::Neutral);
    assert_eq!(generated.sections.len(), 2);
    assert_eq!(generated.sections[0].title, "CFO 분석");
    assert_eq!(generated.sections[1].order_index, 2);
    assert_eq!(generated.next_steps, report::fallback_next_steps());

    let bodies = server.await.unwrap();
    assert_eq!(bodies.len(), 5);
    // Agent sections are written with each agent's analysis prompt.
    assert!(system_prompt(&bodies[3]).contains("CTO"));

    let saved = report::save_report(&db, &user.id, &options, &generated).unwrap();
    let (row, loaded) = report::load_report(&db, &saved.id).unwrap().unwrap();
    assert_eq!(row.status, "completed");
    assert_eq!(loaded, generated);
    let markdown = loaded.to_markdown();
    assert!(markdown.starts_with("# 동남아 시장 진출 - 종합 분석 보고서"));
    assert!(markdown.contains("예상 ROI"));
}

#[tokio::test]
async fn report_stops_at_first_failed_stage() {
    let (addr, server) = scripted_server(vec![
        completion("summary"),
        error_response("500 Internal Server Error", "boom"),
    ])
    .await;
    let backend = backend_for(addr, false);
    let options = ReportOptions::new("topic", vec!["CFO".into()]);

    let err = report::generate_report(backend.as_ref(), &options).await.unwrap_err();
    assert!(matches!(err, LlmError::Upstream { status: 500, .. }));
    assert_eq!(server.await.unwrap().len(), 2);
}

// ===========================================================================
// Command loop
// ===========================================================================

#[tokio::test]
async fn typed_commands_drive_chat_and_report_through_the_loop() {
    let (addr, server) = scripted_server(vec![
        completion("Marketing"),
        completion("Focus on retention campaigns."),
        completion("summary"),
        completion("no kpis here"),
        completion("CMO view"),
        completion("[]"),
    ])
    .await;
    let (db, user) = setup_db();
    let config = test_config(&format!("http://{addr}"), Some("sk-test"), false);
    let backend: Arc<dyn ChatBackend> = Arc::new(LlmClient::from_config(&config));
    let state = AppState::new(db.clone(), backend, user.id.clone(), &config);

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ui_tx, mut ui_rx) = mpsc::channel(256);
    for line in [
        "/agent cmo",
        "What should marketing prioritise?",
        "/report CMO retention push",
        "/reports",
        "/quit",
    ] {
        cmd_tx.send(parse_command(line).unwrap()).await.unwrap();
    }

    app::run(cmd_rx, ui_tx, state).await.unwrap();
    server.await.unwrap();

    let mut updates = Vec::new();
    while let Some(update) = ui_rx.recv().await {
        updates.push(update);
    }

    assert!(updates.contains(&UiUpdate::Reply {
        persona: boardroom_core::persona::Persona::Cmo,
        content: "Focus on retention campaigns.".into(),
        streamed: false,
    }));
    let markdown = updates
        .iter()
        .find_map(|u| match u {
            UiUpdate::Report { markdown, .. } => Some(markdown.clone()),
            _ => None,
        })
        .expect("report update");
    assert!(markdown.contains("## CMO 분석"));
    assert!(markdown.contains("종합 점수"));

    // The report is linked to the conversation that was active.
    let reports = db.list_reports(&user.id, 10).unwrap();
    assert_eq!(reports.len(), 1);
    let conv = &db.list_conversations(&user.id, 10).unwrap()[0];
    assert_eq!(reports[0].conversation_id.as_deref(), Some(conv.id.as_str()));
    assert!(matches!(updates.last(), Some(UiUpdate::Reports(list)) if list.len() == 1));

    assert_eq!(parse_command("/quit").unwrap(), UserCommand::Quit);
}
