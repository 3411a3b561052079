//! Terminal chat client.
//!
//! Signs in once, keeps the token pair fresh in the background and streams
//! replies to stdout as they arrive.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::auth::token::token_subject;
use crate::auth::{FileTokenStore, RefreshOutcome, StoredTokens, TokenRefresher, TokenStore};
use crate::backend::HealthApi;
use crate::cache::{CacheManager, FileStore};
use crate::chat::history::format_time_ago;
use crate::chat::{
    ChatHistoryService, ChatMessage, HealthRecordsService, StreamConsumer, Transcript,
    new_session_id,
};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::uploads;

/// File holding the stored token pair, inside the data directory.
pub const SESSION_FILE: &str = "session.json";

const HELP: &str = "Commands: /history, /records, /image <path>, /new, /help, /quit";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Quit,
    Help,
    History,
    Records,
    New,
    Image(PathBuf),
    Message(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/help" => Input::Help,
        "/history" => Input::History,
        "/records" => Input::Records,
        "/new" => Input::New,
        _ => match line.strip_prefix("/image") {
            Some(path) if path.starts_with(char::is_whitespace) && !path.trim().is_empty() => {
                Input::Image(PathBuf::from(path.trim()))
            }
            _ => Input::Message(line.to_string()),
        },
    }
}

type StdinLines = Lines<BufReader<Stdin>>;

async fn prompt(lines: &mut StdinLines, label: &str) -> anyhow::Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}

async fn sign_in(
    api: &HealthApi,
    store: &dyn TokenStore,
    lines: &mut StdinLines,
) -> anyhow::Result<bool> {
    loop {
        let Some(email) = prompt(lines, "Email: ").await? else {
            return Ok(false);
        };
        let Some(password) = prompt(lines, "Password: ").await? else {
            return Ok(false);
        };
        if email.trim().is_empty() || password.is_empty() {
            println!("Please enter your email and password.");
            continue;
        }

        match api.auth().obtain_token(email.trim(), &password).await {
            Ok(pair) => {
                store.save(&StoredTokens::new(pair.access, pair.refresh))?;
                println!("Logged in successfully!");
                return Ok(true);
            }
            Err(AppError::Api { message, .. }) => println!("{message}"),
            Err(e) => println!("Sign-in failed: {e}"),
        }
    }
}

/// Run the interactive client until the user quits or stdin closes.
pub async fn run(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let api = HealthApi::with_timeout(
        &config.backend.base_url,
        Duration::from_secs(config.backend.timeout_secs),
    )?;
    let cache = Arc::new(CacheManager::new(Arc::new(FileStore::new(&config.cache.dir)?)));
    let store: Arc<dyn TokenStore> =
        Arc::new(FileTokenStore::new(config.data_dir().join(SESSION_FILE)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let refresher = Arc::new(TokenRefresher::new(
        api.clone(),
        store.clone(),
        config.auth.refresh_leeway_secs,
    ));
    if refresher.check_and_refresh().await == RefreshOutcome::SignInRequired
        && !sign_in(&api, store.as_ref(), &mut lines).await?
    {
        return Ok(());
    }
    let handle = refresher.spawn(Duration::from_secs(config.auth.refresh_interval_secs));

    let Some(access) = store.load().access else {
        anyhow::bail!("no access token after sign-in");
    };
    let Some(subject) = token_subject(&access) else {
        store.clear()?;
        anyhow::bail!("access token carries no user id; please sign in again");
    };
    let history = ChatHistoryService::new(api.clone(), cache.clone(), &subject);
    let records = HealthRecordsService::new(api.clone(), cache.clone(), &subject);
    tokio::spawn({
        let records = records.clone();
        async move { records.prefetch(&access).await }
    });

    println!("Health Assistant. {HELP}");
    let mut transcript = Transcript::new();
    let mut session_id = new_session_id();

    loop {
        let Some(line) = prompt(&mut lines, "> ").await? else {
            break;
        };
        if handle.latest() == Some(RefreshOutcome::SignInRequired) {
            println!("{}", AppError::Unauthorized);
            break;
        }
        let Some(token) = store.load().access else {
            println!("{}", AppError::Unauthorized);
            break;
        };

        let outcome = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => {
                println!("{HELP}");
                continue;
            }
            Input::New => {
                transcript = Transcript::new();
                session_id = new_session_id();
                println!("Started a new chat.");
                continue;
            }
            Input::History => print_history(&history, &token).await,
            Input::Records => print_records(&records, &token).await,
            Input::Image(path) => {
                analyze_image(&api, &token, &path, config.uploads.max_image_bytes, &mut transcript)
                    .await
            }
            Input::Message(text) => {
                let result = match api.chat().stream_chat(&token, &text, &session_id).await {
                    Ok(stream) => {
                        let consumer = StreamConsumer::begin(std::mem::take(&mut transcript), text);
                        let (updated, result) = consumer
                            .consume(stream, |delta| {
                                print!("{delta}");
                                let _ = std::io::stdout().flush();
                            })
                            .await;
                        transcript = updated;
                        println!();
                        if result.is_err()
                            && let Some(reply) = transcript.last().and_then(ChatMessage::text)
                        {
                            println!("{reply}");
                        }
                        result
                    }
                    Err(e) => Err(e),
                };
                history.invalidate();
                records.invalidate();
                result
            }
        };

        match outcome {
            Ok(()) => {}
            Err(AppError::Unauthorized) => {
                store.clear()?;
                println!("{}", AppError::Unauthorized);
                break;
            }
            Err(AppError::Api { message, .. }) => println!("{message}"),
            Err(e) => println!("Something went wrong: {e}"),
        }
    }

    drop(handle);
    Ok(())
}

async fn print_history(history: &ChatHistoryService, token: &str) -> crate::error::Result<()> {
    let sessions = history.fetch(token).await?;
    if sessions.is_empty() {
        println!("No chat history found");
        return Ok(());
    }
    let now = chrono::Utc::now().timestamp_millis();
    for session in sessions {
        println!(
            "{:<36} {:>10}  {}",
            session.title,
            format_time_ago(session.timestamp, now),
            session.last_message.lines().next().unwrap_or_default()
        );
    }
    Ok(())
}

async fn print_records(records: &HealthRecordsService, token: &str) -> crate::error::Result<()> {
    let result = records.get(token, false).await?;
    println!(
        "{} messages{}",
        result.messages.len(),
        if result.from_cache { " (cached)" } else { "" }
    );
    for entry in result.messages.iter().rev().take(10) {
        let who = if entry.is_user { "You" } else { "Assistant" };
        println!("[{}] {who}: {}", entry.timestamp, entry.message);
    }
    Ok(())
}

async fn analyze_image(
    api: &HealthApi,
    token: &str,
    path: &std::path::Path,
    max_bytes: usize,
    transcript: &mut Transcript,
) -> crate::error::Result<()> {
    let upload = uploads::load_image(path).await?;
    if let Err(AppError::Validation(fields)) = uploads::validate_image(&upload, max_bytes) {
        for message in fields.values() {
            println!("{message}");
        }
        return Ok(());
    }
    transcript.push(ChatMessage::image(uploads::data_url(&upload)));
    let reply = uploads::analyze(api, token, upload, max_bytes).await?;
    println!("{reply}");
    transcript.push(ChatMessage::bot(reply));
    Ok(())
}
