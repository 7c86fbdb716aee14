use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use parley_kernel::{Assistant, AssistantBuilder, CompletionConfig, PipelineConfig, PolicyKind};
use parley_protocol::{CorrectionRecord, Intent, SessionId, Slots, UserId, Utterance};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "parleyd")]
#[command(about = "Runs the parley pipeline over stdin, one utterance per line")]
struct Cli {
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "PARLEY_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,
    /// `fixed` or `semantic`.
    #[arg(long, env = "PARLEY_POLICY", value_parser = parse_policy)]
    policy: Option<PolicyKind>,
    #[arg(long, env = "PARLEY_MODEL")]
    model: Option<String>,
    #[arg(long, env = "PARLEY_OLLAMA_URL")]
    ollama_url: Option<String>,
    #[arg(long, env = "PARLEY_NO_MODEL")]
    no_model: bool,
    /// Reuse a session across runs; a fresh one is minted otherwise.
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    user: Option<String>,
}

fn parse_policy(raw: &str) -> Result<PolicyKind, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "fixed" => Ok(PolicyKind::Fixed),
        "semantic" => Ok(PolicyKind::Semantic),
        other => Err(format!("unknown policy {other:?}; expected fixed or semantic")),
    }
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(root) = &self.storage_root {
            config.storage_root = Some(root.clone());
        }
        if let Some(policy) = self.policy {
            config.policy.kind = policy;
        }
        if self.no_model {
            config.completion = None;
        } else if self.model.is_some() || self.ollama_url.is_some() {
            let completion = config
                .completion
                .get_or_insert_with(CompletionConfig::default);
            if let Some(model) = &self.model {
                completion.model = model.clone();
            }
            if let Some(base_url) = &self.ollama_url {
                completion.base_url = base_url.clone();
            }
        }
        Ok(config)
    }
}

/// A line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Command {
    Say(String),
    /// `/correct <intent> [always]` re-labels the previous utterance.
    Correct { intent: Intent, always_apply: bool },
    Clear,
    Patterns,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_owned())));
    };
    let mut words = rest.split_whitespace();
    let command = match words.next() {
        Some("correct") => {
            let Some(intent) = words.next() else {
                bail!("usage: /correct <intent> [always]");
            };
            Command::Correct {
                intent: Intent::new(intent),
                always_apply: words.next() == Some("always"),
            }
        }
        Some("clear") => Command::Clear,
        Some("patterns") => Command::Patterns,
        other => bail!("unknown command {:?}", other.unwrap_or_default()),
    };
    Ok(Some(command))
}

struct Repl {
    assistant: Assistant,
    session_id: SessionId,
    user_id: Option<UserId>,
    last_text: Option<String>,
}

impl Repl {
    async fn run(&mut self, command: Command) -> Result<serde_json::Value> {
        match command {
            Command::Say(text) => {
                let mut utterance = Utterance::new(&text).in_session(self.session_id.clone());
                if let Some(user_id) = &self.user_id {
                    utterance = utterance.by_user(user_id.clone());
                }
                let response = self.assistant.process(utterance).await?;
                self.last_text = Some(text);
                Ok(serde_json::to_value(response)?)
            }
            Command::Correct {
                intent,
                always_apply,
            } => {
                let Some(original_text) = self.last_text.clone() else {
                    bail!("nothing to correct yet");
                };
                let correction =
                    CorrectionRecord::new(original_text, intent, Slots::new(), always_apply);
                let (_, response) = self
                    .assistant
                    .apply_correction(&self.session_id, correction)
                    .await?;
                Ok(serde_json::to_value(response)?)
            }
            Command::Clear => {
                let existed = self.assistant.clear_session(&self.session_id).await?;
                self.last_text = None;
                Ok(serde_json::json!({ "cleared": existed }))
            }
            Command::Patterns => Ok(serde_json::to_value(self.assistant.patterns())?),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let assistant = AssistantBuilder::from_config(cli.pipeline_config()?)
        .build()
        .await?;
    let session_id = SessionId::or_generate(cli.session.as_deref());
    info!(%session_id, policy = assistant.policy_name(), "session ready");

    let mut events = assistant.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let rendered = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_owned());
            info!(event = %rendered, "event.appended");
        }
    });

    let mut repl = Repl {
        assistant,
        session_id,
        user_id: cli.user.map(UserId::from_string),
        last_text: None,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let output = match parse_command(&line) {
            Ok(None) => continue,
            Ok(Some(command)) => repl.run(command).await,
            Err(error) => Err(error),
        };
        let rendered = match output {
            Ok(value) => value.to_string(),
            Err(error) => {
                warn!(%error, "line failed");
                serde_json::json!({ "error": format!("{error:#}") }).to_string()
            }
        };
        stdout.write_all(rendered.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    event_task.abort();
    if let Err(error) = event_task.await
        && !error.is_cancelled()
    {
        warn!(%error, "event task stopped");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use parley_kernel::AssistantBuilder;
    use parley_protocol::{Intent, SessionId};

    use super::{Command, Repl, parse_command, parse_policy};

    #[test]
    fn parses_commands_and_plain_text() -> Result<()> {
        assert_eq!(parse_command("   ")?, None);
        assert_eq!(
            parse_command(" remind me to stretch ")?,
            Some(Command::Say("remind me to stretch".to_owned()))
        );
        assert_eq!(
            parse_command("/correct create_event always")?,
            Some(Command::Correct {
                intent: Intent::new("create_event"),
                always_apply: true,
            })
        );
        assert_eq!(parse_command("/clear")?, Some(Command::Clear));
        assert!(parse_command("/correct").is_err());
        assert!(parse_command("/dance").is_err());
        Ok(())
    }

    #[test]
    fn policy_names_are_case_insensitive() {
        assert!(parse_policy("Semantic").is_ok());
        assert!(parse_policy("strict").is_err());
    }

    #[tokio::test]
    async fn correcting_the_previous_line_teaches_a_pattern() -> Result<()> {
        let assistant = AssistantBuilder::new().without_completion().build().await?;
        let mut repl = Repl {
            assistant,
            session_id: SessionId::from_string("repl"),
            user_id: None,
            last_text: None,
        };

        assert!(
            repl.run(Command::Correct {
                intent: Intent::new("create_event"),
                always_apply: true,
            })
            .await
            .is_err()
        );

        let first = repl.run(Command::Say("standup with design".to_owned())).await?;
        assert_eq!(first["sessionId"], "repl");

        let corrected = repl
            .run(Command::Correct {
                intent: Intent::new("create_event"),
                always_apply: true,
            })
            .await?;
        assert_eq!(corrected["intent"], "create_event");
        assert_eq!(corrected["decision"], "execute");

        let patterns = repl.run(Command::Patterns).await?;
        assert_eq!(patterns[0]["key"], "standup with design");

        let cleared = repl.run(Command::Clear).await?;
        assert_eq!(cleared["cleared"], true);
        Ok(())
    }
}
