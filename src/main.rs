//! Biograph 命令行
//!
//! 用法: biograph "<question>" [--history <file>] [--config <file>]
//! 事件逐行以 NDJSON 写到 stdout；给出 --history 时从该文件载入历史并在结束后追加本轮对话。

use std::path::PathBuf;

use anyhow::{bail, Context};
use biograph::agent::create_runtime;
use biograph::memory::{ConversationPersistence, Message};
use biograph::stream::{EventKind, SessionFrame};
use clap::Parser;

/// 生物医学多阶段工具编排：一次提问，事件以 NDJSON 输出
#[derive(Debug, Parser)]
#[command(name = "biograph", version, about)]
struct Cli {
    /// 要提问的问题
    question: String,

    /// 对话历史 JSON 文件；运行成功后追加本轮问答
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    biograph::observability::init();
    let args = Cli::parse();
    if args.question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let runtime = create_runtime(args.config).context("Failed to create runtime")?;
    let store = args.history.as_ref().map(ConversationPersistence::new);
    let history = match &store {
        Some(s) => s
            .load(runtime.config.app.history_limit)
            .context("Failed to load history")?,
        None => Vec::new(),
    };

    let chat_id = uuid::Uuid::new_v4().to_string();
    let mut session = runtime.ask(args.question.clone(), history, chat_id);
    let mut answer = String::new();
    let mut failed = false;
    while let Some(frame) = session.next_frame().await {
        let SessionFrame::Event(ev) = frame else {
            continue;
        };
        match ev.event {
            EventKind::Token => answer.push_str(ev.data.as_str().unwrap_or_default()),
            EventKind::Error => failed = true,
            _ => {}
        }
        println!("{}", ev.to_json());
    }

    if let Some(store) = store {
        if !failed {
            store
                .append(&[Message::user(args.question), Message::assistant(answer)])
                .context("Failed to save history")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_accepts_question_and_files() {
        let cli = Cli::try_parse_from([
            "biograph",
            "EGFR 단백질 구조",
            "--history",
            "chat.json",
            "--config",
            "local.toml",
        ])
        .unwrap();
        assert_eq!(cli.question, "EGFR 단백질 구조");
        assert_eq!(cli.history, Some(PathBuf::from("chat.json")));
        assert_eq!(cli.config, Some(PathBuf::from("local.toml")));
    }

    #[test]
    fn test_cli_requires_question() {
        assert!(Cli::try_parse_from(["biograph"]).is_err());
        assert!(Cli::try_parse_from(["biograph", "q", "--history"]).is_err());
        assert!(Cli::try_parse_from(["biograph", "q", "extra"]).is_err());
    }
}
