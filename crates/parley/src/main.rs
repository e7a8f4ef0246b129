//! Terminal front end of `parley`.

#[macro_use]
extern crate tracing;

use std::error::Error as StdError;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use parley::config::AppConfig;
use parley::core::{Conversation, Threads, TranscriptSource};
use parley::{Session, SessionBuilder};
use parley_checkpoint::{Checkpointer, SqliteCheckpointer};
use parley_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

type CliResult<T = ()> = Result<T, Box<dyn StdError>>;

#[derive(Parser)]
#[command(name = "parley", version)]
#[command(about = "A terminal assistant with web search, stocks, \
calendar and video tools")]
#[command(long_about = "Chat with a hosted language model that can search \
the web, look up stock quotes, do arithmetic, manage a Google Calendar and \
find YouTube videos. Conversations are stored per thread and can be resumed.\n\n\
Environment Variables:\n\
  HUGGINGFACEHUB_API_TOKEN  API key of the model endpoint (or HF_TOKEN)\n\
  ALPHAVANTAGE_API_KEY      Key for stock quotes\n\
  YOUTUBE_API_KEY           Key for video search\n\
  PARLEY_MODEL              Model name\n\
  PARLEY_BASE_URL           OpenAI-compatible endpoint\n\
  PARLEY_DATABASE           Where threads are stored")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path of the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start chatting (default)
    Chat {
        /// Resume an existing thread
        #[arg(long, value_name = "ID")]
        thread: Option<String>,
    },
    /// List stored threads
    Threads,
    /// Print the messages of a thread
    Show {
        /// Thread id
        thread_id: String,
    },
    /// Delete a thread
    Delete {
        /// Thread id
        thread_id: String,
    },
}

enum SessionEvent {
    Idle,
    Transcript(String, TranscriptSource),
    ToolCall(String, String),
    Error(String),
}

enum Flow {
    Continue,
    Quit,
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".bright_red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> CliResult {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_env();
    let checkpointer = open_store(&config).await?;

    match args.command.unwrap_or(Command::Chat { thread: None }) {
        Command::Chat { thread } => chat(&config, checkpointer, thread).await,
        Command::Threads => {
            let threads = Threads::new(checkpointer).list().await?;
            if threads.is_empty() {
                println!("No threads yet.");
            }
            for thread in threads {
                println!("{}  {}", thread.id.dimmed(), thread.title);
            }
            Ok(())
        }
        Command::Show { thread_id } => {
            let conversation = Threads::new(checkpointer).load(&thread_id).await;
            if conversation.is_empty() {
                return Err(format!("thread {thread_id} not found").into());
            }
            print_conversation(&conversation);
            Ok(())
        }
        Command::Delete { thread_id } => {
            if Threads::new(checkpointer).delete(&thread_id).await? {
                println!("Deleted thread {thread_id}.");
                Ok(())
            } else {
                Err(format!("thread {thread_id} not found").into())
            }
        }
    }
}

async fn open_store(config: &AppConfig) -> CliResult<Arc<dyn Checkpointer>> {
    let path = config.database_path();
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir)?;
    }
    debug!("opening database at {}", path.display());
    Ok(Arc::new(SqliteCheckpointer::connect(&path).await?))
}

async fn chat(
    config: &AppConfig,
    checkpointer: Arc<dyn Checkpointer>,
    thread: Option<String>,
) -> CliResult {
    let Some(api_key) = config.model.api_key.clone() else {
        return Err("no API key for the model endpoint, set \
HUGGINGFACEHUB_API_TOKEN or `api_key` in the [model] section"
            .into());
    };
    let mut model_config = OpenAIConfigBuilder::with_api_key(api_key);
    if let Some(model) = &config.model.model {
        model_config = model_config.with_model(model);
    }
    if let Some(base_url) = &config.model.base_url {
        model_config = model_config.with_base_url(base_url);
    }
    if let Some(max_tokens) = config.model.max_tokens {
        model_config = model_config.with_max_tokens(max_tokens);
    }
    let model_provider = OpenAIProvider::new(model_config.build());

    let system_prompt = match &config.agent.system_prompt {
        Some(prompt) => prompt.clone(),
        None => parley::system_prompt(chrono::Local::now().date_naive()),
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = SessionBuilder::with_model_provider(model_provider)
        .with_checkpointer(checkpointer)
        .with_system_prompt(system_prompt)
        .with_tools(&config.tools)
        .on_idle({
            let event_tx = event_tx.clone();
            move || {
                event_tx.send(SessionEvent::Idle).ok();
            }
        })
        .on_transcript({
            let event_tx = event_tx.clone();
            move |transcript, source| {
                event_tx
                    .send(SessionEvent::Transcript(
                        transcript.to_owned(),
                        source,
                    ))
                    .ok();
            }
        })
        .on_tool_call({
            let event_tx = event_tx.clone();
            move |req| {
                event_tx
                    .send(SessionEvent::ToolCall(
                        req.name.clone(),
                        req.arguments.to_string(),
                    ))
                    .ok();
            }
        })
        .on_error({
            let event_tx = event_tx.clone();
            move |err| {
                event_tx.send(SessionEvent::Error(err.to_string())).ok();
            }
        });
    if let Some(max_steps) = config.agent.max_steps {
        builder = builder.with_max_steps(max_steps);
    }
    if let Some(timeout) = config.agent.tool_timeout() {
        builder = builder.with_tool_timeout(timeout);
    }
    drop(event_tx);

    let mut session = match thread {
        Some(thread_id) => {
            let session = builder.build_with_thread(thread_id);
            print_conversation(&session.history().await?);
            session
        }
        None => builder.build(),
    };

    println!(
        "{} {}",
        "thread".dimmed(),
        session.thread_id().dimmed()
    );
    println!("{}", "Type /help for commands.".dimmed());

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            match run_command(&mut session, command).await {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Quit) => break,
                Err(err) => {
                    eprintln!("{} {err}", "error:".bright_red());
                    continue;
                }
            }
        }

        session.send_message(line)?;
        if !wait_for_reply(&mut event_rx, &progress_style).await {
            break;
        }
    }
    Ok(())
}

/// Prints the reply as it streams in. Returns `false` if the session is
/// gone.
async fn wait_for_reply(
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    progress_style: &ProgressStyle,
) -> bool {
    let mut progress_bar: Option<ProgressBar> = None;
    let mut streaming = false;

    loop {
        if !streaming {
            // Create a new progress bar if it has been finished.
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("🤔 Thinking...");
                    progress_bar
                })
                .inc(1);
        }

        let sleep = sleep(Duration::from_millis(100));
        let event = select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    return false;
                };
                event
            },
            _ = sleep => {
                continue;
            }
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }

        match event {
            SessionEvent::Transcript(delta, TranscriptSource::Assistant) => {
                if !streaming {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    streaming = true;
                }
                print!("{}", delta.bright_white());
                std::io::stdout().flush().ok();
            }
            SessionEvent::Transcript(_, TranscriptSource::User) => {}
            SessionEvent::ToolCall(name, arguments) => {
                if streaming {
                    println!();
                    streaming = false;
                }
                println!(
                    "{}🔧 {}{}",
                    BAR_CHAR.bright_yellow(),
                    name.bright_white().bold(),
                    arguments.dimmed()
                );
            }
            SessionEvent::Error(message) => {
                if streaming {
                    println!();
                    streaming = false;
                }
                println!("{}⚠️  {}", BAR_CHAR.bright_red(), message.red());
            }
            SessionEvent::Idle => {
                if streaming {
                    println!();
                }
                return true;
            }
        }
    }
}

async fn run_command(session: &mut Session, command: &str) -> CliResult<Flow> {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return Ok(Flow::Quit),
        "new" => {
            let thread_id = session.new_thread().await;
            println!("{} {}", "Started thread".dimmed(), thread_id.dimmed());
        }
        "threads" => {
            let threads = session.threads().await?;
            if threads.is_empty() {
                println!("No threads yet.");
            }
            for (idx, thread) in threads.iter().enumerate() {
                let marker = if thread.id == session.thread_id() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker}{:>3}. {}  {}",
                    idx + 1,
                    thread.title,
                    thread.id.dimmed()
                );
            }
        }
        "switch" => {
            let thread_id = resolve_thread(session, arg).await?;
            let conversation = session.switch_thread(&thread_id).await?;
            println!("{} {}", "Switched to".dimmed(), thread_id.dimmed());
            print_conversation(&conversation);
        }
        "delete" => {
            let thread_id = resolve_thread(session, arg).await?;
            let was_active = thread_id == session.thread_id();
            session.delete_thread(&thread_id).await?;
            println!("{} {}", "Deleted thread".dimmed(), thread_id.dimmed());
            if was_active {
                println!(
                    "{} {}",
                    "Started thread".dimmed(),
                    session.thread_id().dimmed()
                );
            }
        }
        "history" => print_conversation(&session.history().await?),
        "help" => {
            println!("/new            start a new thread");
            println!("/threads        list threads");
            println!("/switch N|ID    switch to a thread");
            println!("/delete N|ID    delete a thread");
            println!("/history        show this thread");
            println!("/quit           exit");
        }
        _ => println!("Unknown command /{name}, try /help."),
    }
    Ok(Flow::Continue)
}

/// Accepts either a position in the `/threads` listing or a thread id.
async fn resolve_thread(session: &Session, arg: &str) -> CliResult<String> {
    if arg.is_empty() {
        return Err("expected a thread number or id".into());
    }
    let threads = session.threads().await?;
    if let Ok(position) = arg.parse::<usize>() {
        return match position.checked_sub(1).and_then(|idx| threads.get(idx)) {
            Some(thread) => Ok(thread.id.clone()),
            None => Err(format!("no thread #{position}").into()),
        };
    }
    threads
        .into_iter()
        .find(|thread| thread.id == arg)
        .map(|thread| thread.id)
        .ok_or_else(|| format!("thread {arg} not found").into())
}

fn print_conversation(conversation: &Conversation) {
    for (source, text) in conversation.display_messages() {
        match source {
            TranscriptSource::User => {
                println!("{}> {}", BAR_CHAR.bright_green(), text);
            }
            TranscriptSource::Assistant => {
                println!(
                    "{}🤖 {}",
                    BAR_CHAR.bright_cyan(),
                    text.bright_white()
                );
            }
        }
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
