//! 命令行入口
//!
//! 单次发送模式：读取提示词，驱动一整条流直到终结，把增量文本
//! 打到标准输出，制品在结束后单独列出。Ctrl-C 触发取消，已流入
//! 的部分内容保留并落库。

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use opschat::models::Message;
use opschat::streaming::{ChatError, TurnNote, TurnStatus};
use opschat::{
    ChatPipeline, ChatRequest, ClientConfig, HttpStreamTransport, Session, SessionMessageStore,
    SqliteMessageStore,
};

#[derive(Parser, Debug)]
#[command(name = "opschat", about = "运维助手的流式对话客户端", version)]
struct Cli {
    /// 发送给助手的提示词
    prompt: String,

    /// 继续已有会话（缺省时新建会话）
    #[arg(short, long)]
    session: Option<String>,

    /// 覆盖配置中的模型
    #[arg(short, long)]
    model: Option<String>,

    /// 覆盖配置中的服务地址
    #[arg(long)]
    base_url: Option<String>,

    /// 启用联网检索
    #[arg(long)]
    web_search: bool,

    /// 日志详细程度（-v info，-vv debug）
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::load().context("加载配置失败")?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }

    let store: Arc<dyn SessionMessageStore> = Arc::new(
        SqliteMessageStore::open(config.database_path()?).context("打开数据库失败")?,
    );

    // 定位或新建会话
    let session = match &cli.session {
        Some(id) => store
            .get_session(id)?
            .with_context(|| format!("会话不存在: {}", id))?,
        None => {
            let session = Session::new(session_title(&cli.prompt));
            store.upsert_session(&session)?;
            session
        }
    };

    // 用户消息在发送前落库
    let user = Message::user(&cli.prompt);
    store.save_message(&session.id, &user)?;
    let messages = store.load_messages(&session.id)?;

    let mut request = ChatRequest::new(&session.id, &cli.prompt, &config.model)
        .with_web_search(cli.web_search || config.web_search);
    request.features = config.features.clone();

    let transport = Arc::new(HttpStreamTransport::new(
        &config.base_url,
        config.api_key.clone(),
    ));
    let pipeline = ChatPipeline::new(transport, Arc::clone(&store));

    // Ctrl-C 触发取消
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let outcome = pipeline
        .send(request, messages, cancel, |note| match note {
            TurnNote::TextDelta(delta) => {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
            TurnNote::TextReplaced(text) => {
                println!();
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            TurnNote::ArtifactFinalized(artifact) => {
                info!("[CLI] 制品已终结: {}", artifact.title);
            }
        })
        .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(ChatError::SessionBusy(id)) => {
            anyhow::bail!("会话 {} 已有进行中的发送", id);
        }
    };

    println!();
    for artifact in &outcome.artifacts {
        println!();
        println!("=== {} [{}] ===", artifact.title, artifact.artifact_type.as_str());
        println!("{}", artifact.content);
    }

    match outcome.status {
        TurnStatus::Completed => {
            eprintln!("sessão: {}", session.id);
            Ok(())
        }
        TurnStatus::Cancelled => {
            eprintln!("cancelado. sessão: {}", session.id);
            Ok(())
        }
        TurnStatus::Failed { message, retryable } => {
            if retryable {
                eprintln!("{} (tente novamente)", message);
            } else {
                eprintln!("{}", message);
            }
            std::process::exit(1);
        }
    }
}

/// 会话标题取提示词的前 50 个字符
fn session_title(prompt: &str) -> String {
    let mut title: String = prompt.chars().take(50).collect();
    if prompt.chars().count() > 50 {
        title.push('…');
    }
    title
}
