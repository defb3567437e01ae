//! Relay flows driven through the Router with a recording platform adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use aily_bus::{Event, EventBus};
use aily_core::config::ThreadCleanup;
use aily_core::status::SessionStatus;
use aily_core::types::{AgentKind, HostId, MessageRole, MessageSource, Platform, SessionName, ThreadRef};
use aily_host::HostExecutor;
use aily_platform::adapter::PlatformAdapter;
use aily_platform::error::Result as PlatformResult;
use aily_platform::manager::AdapterManager;
use aily_platform::types::AdapterStatus;
use aily_registry::{Observation, SessionRegistry};
use aily_router::{AgentEvent, Router, RouterSettings};
use aily_store::bindings::ThreadBindings;
use aily_store::MessageStore;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recording {
    posts: Vec<(String, String)>,
    archived: Vec<String>,
    deleted: Vec<String>,
    threads_created: u64,
}

struct RecordingAdapter {
    state: Arc<Mutex<Recording>>,
    next_thread: AtomicU64,
}

impl RecordingAdapter {
    fn new() -> (Self, Arc<Mutex<Recording>>) {
        let state = Arc::new(Mutex::new(Recording::default()));
        (
            Self {
                state: Arc::clone(&state),
                next_thread: AtomicU64::new(1),
            },
            state,
        )
    }
}

#[async_trait]
impl PlatformAdapter for RecordingAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn connect(&mut self) -> PlatformResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> PlatformResult<()> {
        Ok(())
    }

    async fn ensure_thread(
        &self,
        session: &SessionName,
        _starter_text: &str,
    ) -> PlatformResult<ThreadRef> {
        let id = self.next_thread.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.threads_created += 1;
        Ok(ThreadRef(format!("thread-{session}-{id}")))
    }

    async fn post(&self, thread: &ThreadRef, text: &str, _raw: bool) -> PlatformResult<()> {
        self.state
            .lock()
            .unwrap()
            .posts
            .push((thread.to_string(), text.to_string()));
        Ok(())
    }

    async fn archive_thread(&self, thread: &ThreadRef) -> PlatformResult<()> {
        self.state.lock().unwrap().archived.push(thread.to_string());
        Ok(())
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> PlatformResult<()> {
        self.state.lock().unwrap().deleted.push(thread.to_string());
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus::Connected
    }
}

struct Harness {
    router: Arc<Router>,
    registry: Arc<SessionRegistry>,
    store: Arc<MessageStore>,
    bindings: Arc<ThreadBindings>,
    bus: Arc<EventBus>,
    recording: Arc<Mutex<Recording>>,
    _dir: tempfile::TempDir,
}

fn name(s: &str) -> SessionName {
    SessionName::parse(s).unwrap()
}

async fn harness(cleanup: ThreadCleanup) -> Harness {
    harness_with(cleanup, true).await
}

async fn harness_with(cleanup: ThreadCleanup, thread_sync: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("aily.db");
    let db_path = db_path.to_str().unwrap();

    let (store, writer) = MessageStore::open(db_path).unwrap();
    let store = Arc::new(store);
    tokio::spawn(writer.run(CancellationToken::new()));

    let bus = Arc::new(EventBus::new());
    let bindings = Arc::new(ThreadBindings::new(aily_store::db::open(db_path).unwrap()));
    let registry =
        Arc::new(SessionRegistry::load(aily_store::db::open(db_path).unwrap(), Arc::clone(&bus)).unwrap());

    let socket_dir = dir.path().join("sockets");
    let executor = Arc::new(HostExecutor::new(&[], socket_dir.to_str().unwrap()));

    let (adapter, recording) = RecordingAdapter::new();
    let mut adapters = AdapterManager::new();
    adapters.register(Box::new(adapter));
    let adapters = Arc::new(adapters);

    let router = Arc::new(Router::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&bindings),
        Arc::clone(&bus),
        executor,
        adapters,
        RouterSettings {
            hosts: vec![HostId::from("h1")],
            notify_max_retries: 2,
            thread_cleanup: cleanup,
            thread_sync,
        },
    ));

    Harness {
        router,
        registry,
        store,
        bindings,
        bus,
        recording,
        _dir: dir,
    }
}

fn agent_event(session: &str, content: &str, external_id: &str) -> AgentEvent {
    AgentEvent {
        session: name(session),
        agent: AgentKind::Claude,
        role: MessageRole::Assistant,
        content: content.to_string(),
        external_id: Some(external_id.to_string()),
        timestamp: None,
        source: MessageSource::Hook,
    }
}

#[tokio::test]
async fn completion_notification_creates_thread_and_stores_message() {
    let h = harness(ThreadCleanup::Archive).await;

    h.router.handle_agent_event(agent_event("s", "done", "x1")).await;

    // the message is stored with its external id
    let page = h.store.page(&name("s"), 10, 0, None).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.messages[0].external_id.as_deref(), Some("x1"));
    assert!(page.messages[0].content.ends_with("done"));

    // exactly one thread was created, bound, and posted into
    let rec = h.recording.lock().unwrap();
    assert_eq!(rec.threads_created, 1);
    assert_eq!(rec.posts.len(), 1);
    assert!(rec.posts[0].1.contains("done"));
    drop(rec);
    assert!(h
        .bindings
        .lookup(Platform::Discord, &name("s"))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn duplicate_hook_events_store_once_and_notify_once() {
    let h = harness(ThreadCleanup::Archive).await;
    let mut sub = h.bus.subscribe(None);

    h.router.handle_agent_event(agent_event("s", "done", "dup1")).await;
    h.router.handle_agent_event(agent_event("s", "done", "dup1")).await;

    let page = h.store.page(&name("s"), 10, 0, None).unwrap();
    assert_eq!(page.total, 1);

    let rec = h.recording.lock().unwrap();
    assert_eq!(rec.posts.len(), 1);
    drop(rec);

    // exactly one message.new crosses the bus
    let mut message_new = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await
    {
        if matches!(event, Event::MessageNew { .. }) {
            message_new += 1;
        }
    }
    assert_eq!(message_new, 1);
}

#[tokio::test]
async fn assistant_question_transitions_to_waiting() {
    let h = harness(ThreadCleanup::Archive).await;
    h.registry
        .upsert(&name("s"), Observation::live_on(HostId::from("h1")))
        .unwrap();

    h.router
        .handle_agent_event(agent_event("s", "Proceed with deploy?", "q1"))
        .await;

    assert_eq!(
        h.registry.get(&name("s")).unwrap().status,
        SessionStatus::Waiting
    );
}

#[tokio::test]
async fn close_is_idempotent_after_archive() {
    let h = harness(ThreadCleanup::Archive).await;
    h.registry
        .upsert(&name("s"), Observation::from_platform())
        .unwrap();
    h.bindings
        .bind(Platform::Discord, &name("s"), &ThreadRef("t1".into()))
        .unwrap();

    h.router.close_session(&name("s"), false).await;
    assert_eq!(
        h.registry.get(&name("s")).unwrap().status,
        SessionStatus::Archived
    );

    let (posts_after_first, archived_after_first) = {
        let rec = h.recording.lock().unwrap();
        (rec.posts.len(), rec.archived.len())
    };
    assert_eq!(archived_after_first, 1);

    // a second close of an archived session produces no platform writes
    h.router.close_session(&name("s"), false).await;
    let rec = h.recording.lock().unwrap();
    assert_eq!(rec.posts.len(), posts_after_first);
    assert_eq!(rec.archived.len(), 1);
}

#[tokio::test]
async fn delete_policy_clears_binding() {
    let h = harness(ThreadCleanup::Delete).await;
    h.registry
        .upsert(&name("s"), Observation::from_platform())
        .unwrap();
    h.bindings
        .bind(Platform::Discord, &name("s"), &ThreadRef("t1".into()))
        .unwrap();

    h.router.close_session(&name("s"), false).await;

    let rec = h.recording.lock().unwrap();
    assert_eq!(rec.deleted, vec!["t1".to_string()]);
    drop(rec);
    assert!(h
        .bindings
        .lookup(Platform::Discord, &name("s"))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn thread_sync_off_suppresses_lifecycle_writes() {
    let h = harness_with(ThreadCleanup::Archive, false).await;
    h.registry
        .upsert(&name("s"), Observation::from_platform())
        .unwrap();
    h.bindings
        .bind(Platform::Discord, &name("s"), &ThreadRef("t1".into()))
        .unwrap();

    h.router.close_session(&name("s"), false).await;

    // the session still archives, but no platform traffic happens
    assert_eq!(
        h.registry.get(&name("s")).unwrap().status,
        SessionStatus::Archived
    );
    let rec = h.recording.lock().unwrap();
    assert!(rec.posts.is_empty());
    assert!(rec.archived.is_empty());
    assert_eq!(rec.threads_created, 0);
}

#[tokio::test]
async fn lifecycle_close_alias_archives_session() {
    let h = harness(ThreadCleanup::Archive).await;
    h.registry
        .upsert(&name("s"), Observation::live_on(HostId::from("h1")))
        .unwrap();

    h.router
        .handle_agent_event(AgentEvent {
            session: name("s"),
            agent: AgentKind::Claude,
            role: MessageRole::System,
            content: "closed".into(),
            external_id: None,
            timestamp: None,
            source: MessageSource::Hook,
        })
        .await;

    assert_eq!(
        h.registry.get(&name("s")).unwrap().status,
        SessionStatus::Archived
    );
}
