// Line-oriented command parsing for the interactive prompt.

use thiserror::Error;

use boardroom_core::persona::Persona;

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Plain text for the active persona.
    Chat(String),
    /// `/agent TAG`
    SwitchAgent(String),
    /// `/agents`
    ListAgents,
    /// `/new`
    NewConversation,
    /// `/open ID`
    OpenConversation(String),
    /// `/end`
    EndConversation,
    /// `/history`
    History,
    /// `/reports`
    Reports,
    /// `/report [AGENTS] TOPIC`; `agents` is `None` when the line names none.
    GenerateReport {
        agents: Option<Vec<String>>,
        topic: String,
    },
    /// `/show ID`
    ShowReport(String),
    /// `/retry`: resend the last input that failed.
    Retry,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
/agent TAG              switch persona (CFO, CTO, CMO, COO, CHRO)
/agents                 list personas
/new                    start a new conversation
/open ID                reopen a conversation
/end                    end the current conversation
/history                recent conversations
/report [AGENTS] TOPIC  generate a report (AGENTS comma-separated, e.g. CFO,CTO)
/reports                recent reports
/show ID                print a saved report
/retry                  resend the last failed message
/quit                   exit
anything else           chat with the current persona";

/// Parse one input line. Lines that do not start with a known command are
/// chat messages.
pub fn parse_command(line: &str) -> Result<UserCommand, CommandError> {
    let trimmed = line.trim();
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };

    let cmd = match head {
        "/agent" => UserCommand::SwitchAgent(required(rest, "/agent TAG")?),
        "/agents" => UserCommand::ListAgents,
        "/new" => UserCommand::NewConversation,
        "/open" => UserCommand::OpenConversation(required(rest, "/open ID")?),
        "/end" => UserCommand::EndConversation,
        "/history" => UserCommand::History,
        "/reports" => UserCommand::Reports,
        "/report" => parse_report(rest)?,
        "/show" => UserCommand::ShowReport(required(rest, "/show ID")?),
        "/retry" => UserCommand::Retry,
        "/help" => UserCommand::Help,
        "/quit" | "/exit" => UserCommand::Quit,
        _ => UserCommand::Chat(trimmed.to_string()),
    };
    Ok(cmd)
}

fn required(arg: &str, usage: &'static str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::Usage(usage))
    } else {
        Ok(arg.to_string())
    }
}

/// The first word is an agent list only if every comma-separated entry is a
/// known persona; otherwise the whole argument is the topic.
fn parse_report(rest: &str) -> Result<UserCommand, CommandError> {
    const USAGE: &str = "/report [AGENTS] TOPIC";

    let (first, remainder) = match rest.split_once(char::is_whitespace) {
        Some((first, remainder)) => (first, remainder.trim()),
        None => (rest, ""),
    };

    let tags: Vec<&str> = first.split(',').filter(|t| !t.is_empty()).collect();
    let is_agent_list = !tags.is_empty() && tags.iter().all(|t| Persona::from_tag(t).is_some());

    if is_agent_list {
        let agents = tags
            .iter()
            .filter_map(|t| Persona::from_tag(t))
            .map(|p| p.as_str().to_string())
            .collect();
        Ok(UserCommand::GenerateReport {
            agents: Some(agents),
            topic: required(remainder, USAGE)?,
        })
    } else {
        Ok(UserCommand::GenerateReport {
            agents: None,
            topic: required(rest, USAGE)?,
        })
    }
}
