#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use threadsync::sync::{
    NewThread, Post, ReplyRequest, ResourceKey, SyncError, ThreadSnapshot, ThreadSource, ThreadSummary,
    ThreadView, ViewState,
};
use tokio::sync::watch;

/// Closed gates hold every fetch except the ones released by number
#[derive(Debug)]
struct Gate {
    open: bool,
    released: HashSet<usize>,
}

/// In-memory forum server.
///
/// A fetch reads the thread as soon as it is issued and only then waits for the gate,
/// so a closed gate reproduces a response that was computed before a later write.
/// Fetches are numbered from 1 in the order they reach the server.
pub struct FakeForum {
    threads: Mutex<HashMap<ResourceKey, ThreadSnapshot>>,
    fetch_failures: Mutex<VecDeque<SyncError>>,
    reply_error: Mutex<Option<SyncError>>,
    fetch_calls: Mutex<HashMap<ResourceKey, usize>>,
    reply_calls: AtomicUsize,
    next_id: AtomicU64,
    fetch_seq: AtomicUsize,
    gate: watch::Sender<Gate>,
}

impl Default for FakeForum {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeForum {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(Gate {
            open: true,
            released: HashSet::new(),
        });
        Self {
            threads: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            reply_error: Mutex::new(None),
            fetch_calls: Mutex::new(HashMap::new()),
            reply_calls: AtomicUsize::new(0),
            next_id: AtomicU64::new(100),
            fetch_seq: AtomicUsize::new(0),
            gate,
        }
    }

    /// Add a thread with `posts` human posts
    pub fn add_thread(&self, id: u64, posts: usize, generating: bool) -> ResourceKey {
        let key = ResourceKey::from(id);
        let posts = (0..posts)
            .map(|i| self.post(&format!("post {i}"), "bob", false))
            .collect();
        let snapshot = ThreadSnapshot {
            id: key.clone(),
            title: format!("thread {id}"),
            body: "opening post".to_string(),
            author: "alice".to_string(),
            author_avatar: None,
            created_at: Utc::now(),
            posts,
            generation_in_progress: generating,
            fetched_at: Utc::now(),
        };
        self.threads.lock().unwrap().insert(key.clone(), snapshot);
        key
    }

    pub fn set_generating(&self, key: &ResourceKey, generating: bool) {
        if let Some(thread) = self.threads.lock().unwrap().get_mut(key) {
            thread.generation_in_progress = generating;
        }
    }

    /// The generated reply lands and generation ends
    pub fn finish_generation(&self, key: &ResourceKey, body: &str) {
        let post = self.post(body, "assistant", true);
        if let Some(thread) = self.threads.lock().unwrap().get_mut(key) {
            thread.posts.push(post);
            thread.generation_in_progress = false;
        }
    }

    pub fn fail_next_fetch(&self, error: SyncError) {
        self.fetch_failures.lock().unwrap().push_back(error);
    }

    pub fn reject_replies(&self, error: Option<SyncError>) {
        *self.reply_error.lock().unwrap() = error;
    }

    pub fn close_gate(&self) {
        self.gate.send_modify(|gate| gate.open = false);
    }

    pub fn open_gate(&self) {
        self.gate.send_modify(|gate| gate.open = true);
    }

    /// Let fetch number `n` through a closed gate
    pub fn release_fetch(&self, n: usize) {
        self.gate.send_modify(|gate| {
            gate.released.insert(n);
        });
    }

    pub fn fetch_calls(&self, key: &ResourceKey) -> usize {
        self.fetch_calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_fetch_calls(&self) -> usize {
        self.fetch_calls.lock().unwrap().values().sum()
    }

    pub fn reply_calls(&self) -> usize {
        self.reply_calls.load(Ordering::SeqCst)
    }

    fn post(&self, body: &str, author: &str, generated: bool) -> Post {
        Post {
            id: ResourceKey::from(self.next_id.fetch_add(1, Ordering::SeqCst)),
            body: body.to_string(),
            author: author.to_string(),
            author_avatar: None,
            created_at: Utc::now(),
            is_generated: generated,
        }
    }

    async fn pass_gate(&self, n: usize) {
        let mut rx = self.gate.subscribe();
        loop {
            let passable = {
                let gate = rx.borrow_and_update();
                gate.open || gate.released.contains(&n)
            };
            if passable {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl ThreadSource for FakeForum {
    async fn fetch_thread(&self, key: &ResourceKey) -> Result<ThreadSnapshot, SyncError> {
        *self.fetch_calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        let n = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let captured = self.threads.lock().unwrap().get(key).cloned();
        let failure = self.fetch_failures.lock().unwrap().pop_front();

        self.pass_gate(n).await;

        if let Some(error) = failure {
            return Err(error);
        }
        captured
            .map(|mut thread| {
                thread.fetched_at = Utc::now();
                thread
            })
            .ok_or_else(|| SyncError::NotFound(key.clone()))
    }

    async fn submit_reply(&self, key: &ResourceKey, reply: &ReplyRequest) -> Result<(), SyncError> {
        self.reply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.reply_error.lock().unwrap().clone() {
            return Err(error);
        }

        let post = self.post(&reply.body, &reply.identity.username, false);
        let mut threads = self.threads.lock().unwrap();
        let thread = threads.get_mut(key).ok_or_else(|| SyncError::NotFound(key.clone()))?;
        thread.posts.push(post);
        thread.generation_in_progress = true;
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, SyncError> {
        Ok(self.threads.lock().unwrap().values().map(ThreadSummary::from).collect())
    }

    async fn create_thread(&self, thread: &NewThread) -> Result<ResourceKey, SyncError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let key = self.add_thread(id, 0, true);
        if let Some(created) = self.threads.lock().unwrap().get_mut(&key) {
            created.body.clone_from(&thread.body);
            created.author.clone_from(&thread.username);
        }
        Ok(key)
    }

    fn name(&self) -> &'static str {
        "fake-forum"
    }
}

/// Wait until the view reaches a state matching `pred`
pub async fn wait_for_view(view: &ThreadView, pred: impl FnMut(&ViewState) -> bool) -> ViewState {
    let mut rx = view.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(pred))
        .await
        .expect("timed out waiting for view state")
        .expect("view dropped");
    state.clone()
}

/// Poll `cond` on the virtual clock until it holds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never held");
}

pub fn is_ready(state: &ViewState) -> bool {
    state.sync.is_ready()
}

pub fn post_count(state: &ViewState) -> usize {
    state.snapshot().map_or(0, |s| s.post_count())
}
