//! news-chat: terminal front end for the news Q&A service.
//! Binds a thread to the chat core, sends questions (positional argument or
//! stdin lines) and prints the streamed answers to stdout.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use news_chat_client::{
    config, ChatCore, Config, HttpSessionApi, Role, SessionApi, ThreadStore,
};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "news-chat", about = "Ask questions about the news")]
struct Cli {
    /// Config file (default: $NEWS_CHAT_CONFIG, then ~/.news-chat/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Continue an existing thread instead of starting a new one.
    #[arg(long)]
    session: Option<String>,

    /// Ask one question and exit. Without it, questions are read from stdin.
    question: Option<String>,
}

fn init_tracing() {
    let default_level = "error";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(flag: Option<&Path>) -> anyhow::Result<Config> {
    // 1. --config <path> flag
    if let Some(path) = flag {
        return config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }
    // 2. NEWS_CHAT_CONFIG env var
    if let Some(path) = std::env::var_os("NEWS_CHAT_CONFIG").map(PathBuf::from) {
        return config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }
    // 3. Default path (~/.news-chat/config.yaml), optional
    match config::default_config_path() {
        Some(path) => config::load_or_default(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = load_config(cli.config.as_deref())?;
    let threads_path = cfg
        .threads_path()
        .unwrap_or_else(|| ThreadStore::path_in(Path::new(".")));
    let mut store = ThreadStore::load(threads_path);

    let session = match cli.session {
        Some(id) => {
            if let Err(e) = store.ensure(&id) {
                tracing::warn!(error = %e, "cannot record thread");
            }
            id
        }
        None => store.create().context("cannot create thread")?,
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    rt.block_on(async {
        let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(cfg.api_base_url()));
        let mut core = ChatCore::connect(session, api, &cfg.ws_url(), cfg.chat_options()).await;

        if let Some(question) = cli.question {
            let answered = ask(&core, &mut store, &question).await;
            return Ok::<_, anyhow::Error>(exit_code(answered));
        }

        let mut all_answered = true;
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(command) = line.strip_prefix('/') {
                if !run_command(&mut core, &mut store, command).await {
                    break;
                }
                continue;
            }
            all_answered &= ask(&core, &mut store, line).await;
        }
        Ok(exit_code(all_answered))
    })
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Submit one question and stream the reply to stdout. Returns false if no answer arrived.
async fn ask(core: &ChatCore, store: &mut ThreadStore, question: &str) -> bool {
    let question = question.trim();
    if question.is_empty() {
        eprintln!("Error: no question provided");
        return false;
    }
    let first_user = core
        .messages()
        .into_iter()
        .find(|m| m.role == Role::User)
        .map(|m| m.content);
    if let Err(e) = store.auto_title(core.session(), first_user.as_deref().unwrap_or(question)) {
        tracing::warn!(error = %e, "cannot title thread");
    }

    let mut revisions = core.subscribe();
    let reply_index = core.messages().len() + 1;
    if let Err(e) = core.submit(question).await {
        eprintln!("Error: {}", e);
        return false;
    }

    let mut printed = 0;
    let mut replied = false;
    loop {
        let messages = core.messages();
        if let Some(reply) = messages
            .get(reply_index)
            .filter(|m| m.role == Role::Assistant)
        {
            replied = true;
            if reply.content.len() > printed {
                let mut out = std::io::stdout().lock();
                let _ = write!(out, "{}", &reply.content[printed..]);
                let _ = out.flush();
                printed = reply.content.len();
            }
        }
        if !core.status().loading {
            break;
        }
        if revisions.changed().await.is_err() {
            break;
        }
    }

    if !replied {
        match core.last_error() {
            Some(message) => eprintln!("Server error: {}", message),
            None => eprintln!("Error: no answer received (disconnected or timed out)"),
        }
        return false;
    }
    println!();
    true
}

/// Handle a slash command. Returns false to stop reading input.
async fn run_command(core: &mut ChatCore, store: &mut ThreadStore, command: &str) -> bool {
    let (name, arg) = command
        .split_once(' ')
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));
    match name {
        "quit" | "exit" => return false,
        "reset" => match core.reset().await {
            Ok(()) => println!("(conversation cleared)"),
            Err(e) => eprintln!("Error: reset failed: {}", e),
        },
        "new" => match store.create() {
            Ok(id) => {
                core.rebind(id.clone()).await;
                println!("(new thread {})", id);
            }
            Err(e) => eprintln!("Error: {}", e),
        },
        "threads" => {
            for thread in store.threads() {
                let marker = if thread.id == core.session() { '*' } else { ' ' };
                println!("{} {}  {}", marker, thread.id, thread.title);
            }
        }
        "rename" => {
            if let Err(e) = store.rename(core.session(), arg) {
                eprintln!("Error: {}", e);
            }
        }
        "delete" => {
            let current = core.session().to_string();
            let next = store.remove(&current).and_then(|_| store.create());
            match next {
                Ok(id) => {
                    core.rebind(id.clone()).await;
                    println!("(deleted {}; new thread {})", current, id);
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        "history" => {
            for message in core.messages() {
                let who = match message.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("{}: {}", who, message.content);
            }
        }
        "status" => {
            let status = core.status();
            let phase = match (status.loading, status.streaming) {
                (false, _) => "idle",
                (true, false) => "loading",
                (true, true) => "streaming",
            };
            let channel = if status.connected { "connected" } else { "fallback" };
            println!("WS: {}  Status: {}", channel, phase);
        }
        other => eprintln!("Unknown command: /{}", other),
    }
    true
}
