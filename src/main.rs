use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use threadsync::api::HttpThreadSource;
use threadsync::sync::config::{
    DEFAULT_BASE_URL, DEFAULT_FETCH_TIMEOUT_SECONDS, DEFAULT_MAX_BACKOFF_SECONDS, DEFAULT_POLL_INTERVAL_MS,
};
use threadsync::sync::{
    Identity, NewThread, ResourceKey, RetryPolicy, SyncConfig, SyncState, ThreadSnapshot, ThreadSource,
    ThreadView, ViewState,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Keep a local view of a forum thread in sync with its server", long_about = None)]
struct Args {
    /// Root of the forum API
    #[arg(long, env = "THREADSYNC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Delay between polls while a reply is being generated
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// Per-request timeout
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECONDS, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,

    /// Back off exponentially after failed polls instead of retrying at the poll interval
    #[arg(long)]
    backoff: bool,

    /// Longest delay between retries when backing off
    #[arg(long, default_value_t = DEFAULT_MAX_BACKOFF_SECONDS)]
    max_backoff_secs: u64,

    /// Override the User-Agent header
    #[arg(long, env = "THREADSYNC_USER_AGENT")]
    user_agent: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List threads
    List,
    /// Start a new thread
    Create {
        #[arg(long)]
        username: String,
        content: String,
    },
    /// Follow a thread until its generated reply has landed
    Watch {
        id: String,
        /// Keep following after generation finishes, until interrupted
        #[arg(long)]
        follow: bool,
    },
    /// Reply to a thread and wait for the reply to appear
    Reply {
        id: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "THREADSYNC_TOKEN", hide_env_values = true)]
        token: String,
        content: String,
    },
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        let retry = if self.backoff {
            RetryPolicy::Exponential {
                max: Duration::from_secs(self.max_backoff_secs),
            }
        } else {
            RetryPolicy::Flat
        };

        SyncConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_fetch_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(retry)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("threadsync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.sync_config();

    let source = Arc::new(
        HttpThreadSource::new(args.base_url.as_str(), args.user_agent.as_deref())
            .context("building HTTP client")?,
    );

    match args.command {
        Command::List => list(source.as_ref()).await,
        Command::Create { username, content } => {
            let key = source
                .create_thread(&NewThread { username, body: content })
                .await
                .context("creating thread")?;
            println!("created thread {key}");
            Ok(())
        }
        Command::Watch { id, follow } => {
            let view = ThreadView::new(source, config);
            watch(&view, ResourceKey::new(id), follow).await
        }
        Command::Reply {
            id,
            username,
            token,
            content,
        } => {
            let view = ThreadView::new(source, config);
            reply(&view, ResourceKey::new(id), &Identity::new(username, token), &content).await
        }
    }
}

async fn list(source: &dyn ThreadSource) -> Result<()> {
    let threads = source.list_threads().await.context("listing threads")?;
    for thread in threads {
        let marker = if thread.generation_in_progress { " [generating]" } else { "" };
        println!(
            "{:>6}  {}  by {} ({} posts){}",
            thread.id, thread.title, thread.author, thread.post_count, marker
        );
    }
    Ok(())
}

async fn watch(view: &ThreadView, key: ResourceKey, follow: bool) -> Result<()> {
    view.bind(key).await;
    let mut updates = view.updates();
    let mut shown_posts = None;
    let mut failure = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.next() => {
                let Some(state) = update else { break };
                shown_posts = render(&state, shown_posts);
                failure = state.sync.error().filter(|e| e.is_terminal()).cloned();
                if !follow && is_settled(&state) {
                    break;
                }
            }
        }
    }

    view.unbind().await;
    match failure {
        Some(error) => bail!("{error}"),
        None => Ok(()),
    }
}

async fn reply(view: &ThreadView, key: ResourceKey, identity: &Identity, content: &str) -> Result<()> {
    view.bind(key.clone()).await;
    view.submit_reply(content, Some(identity))
        .await
        .with_context(|| format!("replying to thread {key}"))?;

    let posts = view.current().snapshot().map_or(0, |s| s.post_count());
    println!("reply accepted, thread {key} now has {posts} posts");
    watch(view, key, false).await
}

/// A state after which nothing changes without outside input
fn is_settled(state: &ViewState) -> bool {
    match &state.sync {
        SyncState::Ready(snapshot) => !snapshot.generation_in_progress,
        SyncState::Error { error, .. } => error.is_terminal(),
        SyncState::Idle | SyncState::Fetching { .. } => false,
    }
}

/// Print what changed since the last update. `None` means nothing has been shown yet.
fn render(state: &ViewState, shown_posts: Option<usize>) -> Option<usize> {
    match &state.sync {
        SyncState::Idle => shown_posts,
        SyncState::Fetching { .. } => {
            eprintln!("loading...");
            shown_posts
        }
        SyncState::Ready(snapshot) => print_new_posts(snapshot, shown_posts),
        SyncState::Error { last_good, error } => {
            eprintln!("error: {error}");
            last_good
                .as_ref()
                .map_or(shown_posts, |snapshot| print_new_posts(snapshot, shown_posts))
        }
    }
}

fn print_new_posts(snapshot: &ThreadSnapshot, shown_posts: Option<usize>) -> Option<usize> {
    let shown = shown_posts.unwrap_or_else(|| {
        println!("# {} ({})", snapshot.title, snapshot.author);
        println!("{}", snapshot.body);
        0
    });
    for post in snapshot.posts.iter().skip(shown) {
        let tag = if post.is_generated { " [ai]" } else { "" };
        println!("-- {}{} at {}", post.author, tag, post.created_at.format("%Y-%m-%d %H:%M"));
        println!("{}", post.body);
    }
    if snapshot.generation_in_progress {
        eprintln!("reply being generated...");
    }
    Some(snapshot.posts.len().max(shown))
}
