//! Revision workflow tests against scripted backends

use instead_core::llm::{
    GenerationBackend, GenerationOutput, GenerationRequest, ProviderError,
};
use instead_core::{
    AlternateResponseManager, ConversationEvent, ConversationStore, FeedbackAnnotationIndex,
    InMemoryConversationStore, RevisionController, RevisionError, RevisionState, StoreError, Turn,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

const ORIGINAL: &str = "The door creaks open.";
const SCARIER: &str = "The door groans open, and a cold draft spills out.";

/// Backend returning scripted results in order
struct ScriptedBackend {
    results: Mutex<VecDeque<Result<GenerationOutput, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    fn new(results: Vec<Result<GenerationOutput, String>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::from(results)),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn text(text: &str) -> Result<GenerationOutput, String> {
        Ok(GenerationOutput {
            text: text.to_string(),
            reasoning: None,
        })
    }

    async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait::async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        self.requests.lock().await.push(request.clone());
        match self.results.lock().await.pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(ProviderError::Api {
                message,
                status_code: Some(500),
            }),
            None => Err(ProviderError::Api {
                message: "no scripted result".to_string(),
                status_code: None,
            }),
        }
    }
}

/// Backend that blocks until released
struct GatedBackend {
    entered: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<Option<oneshot::Receiver<()>>>,
    result: Result<String, String>,
}

#[async_trait::async_trait]
impl GenerationBackend for GatedBackend {
    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        if let Some(tx) = self.entered.lock().await.take() {
            let _ = tx.send(());
        }
        let release = self.release.lock().await.take();
        if let Some(rx) = release {
            let _ = rx.await;
        }
        match &self.result {
            Ok(text) => Ok(GenerationOutput {
                text: text.clone(),
                reasoning: Some("kept the ending".to_string()),
            }),
            Err(message) => Err(ProviderError::Api {
                message: message.clone(),
                status_code: Some(503),
            }),
        }
    }
}

struct Gate {
    entered: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

fn gated(result: Result<&str, &str>) -> (Arc<GatedBackend>, Gate) {
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    let backend = Arc::new(GatedBackend {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(Some(release_rx)),
        result: result.map(str::to_string).map_err(str::to_string),
    });
    (
        backend,
        Gate {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

/// In-memory store whose persist step, or one numbered turn write, can fail
struct FlakyStore {
    inner: InMemoryConversationStore,
    fail_persist: AtomicBool,
    persisted: AtomicUsize,
    fail_update: Option<usize>,
    updates: AtomicUsize,
}

impl FlakyStore {
    fn new(fail_persist: bool, fail_update: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryConversationStore::from_turns(conversation()),
            fail_persist: AtomicBool::new(fail_persist),
            persisted: AtomicUsize::new(0),
            fail_update,
            updates: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ConversationStore for FlakyStore {
    async fn turns(&self) -> Vec<Turn> {
        self.inner.turns().await
    }

    async fn turn(&self, id: usize) -> Option<Turn> {
        self.inner.turn(id).await
    }

    async fn update_turn(&self, turn: Turn) -> Result<(), StoreError> {
        let number = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_update == Some(number) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        self.inner.update_turn(turn).await
    }

    async fn persist(&self) -> Result<(), StoreError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reload(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn conversation() -> Vec<Turn> {
    vec![
        Turn::user(0, "I push the door.").with_name("Ana"),
        Turn::assistant(1, ORIGINAL).with_name("Narrator"),
    ]
}

fn store() -> Arc<InMemoryConversationStore> {
    Arc::new(InMemoryConversationStore::from_turns(conversation()))
}

async fn wait_until_idle(controller: &RevisionController) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.state() != RevisionState::Idle {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("revision attempt did not finish");
}

fn controller(
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn GenerationBackend>,
    streaming: bool,
) -> RevisionController {
    RevisionController::new(store, backend, Arc::new(AtomicBool::new(streaming)))
}

#[tokio::test]
async fn test_batch_revision_appends_alternate() {
    let store = store();
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text(SCARIER)]);
    let controller = controller(store.clone(), backend.clone(), false);

    let outcome = controller
        .request_revision(1, "make it scarier")
        .await
        .unwrap();

    assert_eq!(outcome.turn_id, 1);
    assert_eq!(outcome.alternate, 1);
    assert_eq!(outcome.text, SCARIER);
    assert_eq!(outcome.feedback, "make it scarier");

    let turn = store.turn(1).await.unwrap();
    let texts: Vec<&str> = turn.alternates.iter().map(|a| a.text.as_str()).collect();
    assert_eq!(texts, vec![ORIGINAL, SCARIER]);
    assert_eq!(turn.active_alternate, 1);
    assert_eq!(turn.text, SCARIER);
    assert_eq!(
        AlternateResponseManager::feedback_for(&turn, 1),
        Some("make it scarier")
    );
    assert!(AlternateResponseManager::feedback_for(&turn, 0).is_none());
    assert_eq!(controller.state(), RevisionState::Idle);
}

#[tokio::test]
async fn test_backend_receives_instruction_and_history() {
    let store = store();
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text(SCARIER)]);
    let controller = controller(store, backend.clone(), false);

    controller.request_revision(1, "make it scarier").await.unwrap();

    let requests = backend.requests.lock().await;
    let request = &requests[0];
    assert!(!request.streaming);
    assert!(request.instruction.contains(ORIGINAL));
    assert!(request.instruction.contains("make it scarier"));
    assert_eq!(request.history.len(), 1);
    assert_eq!(request.history[0].text, "I push the door.");
    assert_eq!(request.history[0].name.as_deref(), Some("Ana"));
}

#[tokio::test]
async fn test_empty_result_fails_without_mutation() {
    let store = store();
    let before = store.turn(1).await.unwrap();
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text("")]);
    let controller = controller(store.clone(), backend, false);

    let result = controller.request_revision(1, "make it scarier").await;

    assert!(matches!(result, Err(RevisionError::GenerationFailed(_))));
    let after = store.turn(1).await.unwrap();
    assert_eq!(after.alternates.len(), 1);
    assert_eq!(after.text, ORIGINAL);
    assert_eq!(after, before);
    assert_eq!(controller.state(), RevisionState::Idle);
}

#[tokio::test]
async fn test_whitespace_feedback_is_rejected_before_backend() {
    let store = store();
    let before = store.turns().await;
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text(SCARIER)]);
    let controller = controller(store.clone(), backend.clone(), false);

    let result = controller.request_revision(1, "   ").await;

    assert_eq!(result, Err(RevisionError::EmptyFeedback));
    assert_eq!(backend.calls().await, 0);
    assert_eq!(store.turns().await, before);
    assert_eq!(controller.state(), RevisionState::Idle);
}

#[tokio::test]
async fn test_invalid_targets() {
    let store = store();
    let backend = ScriptedBackend::new(vec![]);
    let controller = controller(store, backend.clone(), false);

    let user_turn = controller.request_revision(0, "fix").await;
    assert!(matches!(user_turn, Err(RevisionError::InvalidTarget(_))));

    let missing = controller.request_revision(42, "fix").await;
    assert!(matches!(missing, Err(RevisionError::InvalidTarget(_))));

    assert_eq!(backend.calls().await, 0);
    assert_eq!(controller.state(), RevisionState::Idle);
}

#[tokio::test]
async fn test_second_request_while_first_unpolled_is_rejected() {
    let store = store();
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text(SCARIER)]);
    let controller = controller(store.clone(), backend.clone(), false);

    let first = controller.request_revision(1, "make it scarier");
    let second = controller.request_revision(1, "make it funnier").await;
    assert_eq!(second, Err(RevisionError::AlreadyInProgress));

    let outcome = first.await.unwrap();
    assert_eq!(outcome.text, SCARIER);
    assert_eq!(backend.calls().await, 1);
    assert_eq!(store.turn(1).await.unwrap().alternates.len(), 2);
}

#[tokio::test]
async fn test_second_request_while_generating_is_rejected() {
    let store = store();
    let (backend, gate) = gated(Ok(SCARIER));
    let controller = controller(store.clone(), backend, false);

    let running = controller.clone();
    let first = tokio::spawn(async move { running.request_revision(1, "make it scarier").await });

    gate.entered.await.unwrap();
    assert_eq!(controller.state(), RevisionState::Generating);

    let second = controller.request_revision(1, "other").await;
    assert_eq!(second, Err(RevisionError::AlreadyInProgress));

    gate.release.send(()).unwrap();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.feedback, "make it scarier");
    assert_eq!(outcome.reasoning.as_deref(), Some("kept the ending"));
    assert_eq!(controller.state(), RevisionState::Idle);

    let turn = store.turn(1).await.unwrap();
    assert_eq!(turn.alternates.len(), 2);
    assert_eq!(
        AlternateResponseManager::feedback_for(&turn, 1),
        Some("make it scarier")
    );
}

#[tokio::test]
async fn test_streaming_shows_pending_then_commits() {
    let store = store();
    let (backend, gate) = gated(Ok(SCARIER));
    let controller = controller(store.clone(), backend, true);
    let mut events = controller.subscribe();

    let running = controller.clone();
    let first = tokio::spawn(async move { running.request_revision(1, "make it scarier").await });

    gate.entered.await.unwrap();
    let pending = store.turn(1).await.unwrap();
    assert_eq!(pending.alternates.len(), 2);
    assert_eq!(pending.active_alternate, 1);
    assert_eq!(pending.text, "");
    assert!(pending.alternates[1].metadata.is_pending());

    gate.release.send(()).unwrap();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.alternate, 1);

    let turn = store.turn(1).await.unwrap();
    assert_eq!(turn.text, SCARIER);
    assert!(!turn.alternates[1].metadata.is_pending());
    assert_eq!(
        turn.alternates[1].metadata.reasoning.as_deref(),
        Some("kept the ending")
    );

    assert!(matches!(
        events.recv().await.unwrap(),
        ConversationEvent::RevisionStarted { turn_id: 1, .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        ConversationEvent::RevisionPending { index: 1, .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        ConversationEvent::RevisionCommitted { index: 1, .. }
    ));
    assert_eq!(events.recv().await.unwrap(), ConversationEvent::TurnsReloaded);
}

#[tokio::test]
async fn test_streaming_failure_rolls_back_completely() {
    let store = store();
    {
        // Start from a turn that already has a revision, showing the original
        let mut turn = store.turn(1).await.unwrap();
        AlternateResponseManager::append_revision(&mut turn, "shorter", "Creak.", None).unwrap();
        AlternateResponseManager::select_alternate(&mut turn, 0).unwrap();
        store.update_turn(turn).await.unwrap();
    }
    let before = store.turn(1).await.unwrap();

    let (backend, gate) = gated(Err("upstream timeout"));
    let controller = controller(store.clone(), backend, true);

    let running = controller.clone();
    let first = tokio::spawn(async move { running.request_revision(1, "make it scarier").await });
    gate.entered.await.unwrap();
    assert_eq!(store.turn(1).await.unwrap().alternates.len(), 3);
    gate.release.send(()).unwrap();

    let result = first.await.unwrap();
    assert!(matches!(result, Err(RevisionError::GenerationFailed(_))));
    assert_eq!(store.turn(1).await.unwrap(), before);
    assert_eq!(controller.state(), RevisionState::Idle);
}

#[tokio::test]
async fn test_streaming_empty_result_rolls_back() {
    let store = store();
    let before = store.turn(1).await.unwrap();
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text("  \n")]);
    let controller = controller(store.clone(), backend, true);

    let result = controller.request_revision(1, "make it scarier").await;

    assert!(matches!(result, Err(RevisionError::GenerationFailed(_))));
    assert_eq!(store.turn(1).await.unwrap(), before);
}

#[tokio::test]
async fn test_revision_applies_to_active_alternate() {
    let store = store();
    let backend = ScriptedBackend::new(vec![
        ScriptedBackend::text("First revision"),
        ScriptedBackend::text("Second revision"),
    ]);
    let controller = controller(store.clone(), backend.clone(), false);

    controller.request_revision(1, "one").await.unwrap();
    controller.request_revision(1, "two").await.unwrap();

    let requests = backend.requests.lock().await;
    assert!(requests[1].instruction.contains("First revision"));
    assert!(!requests[1].instruction.contains(ORIGINAL));

    let turn = store.turn(1).await.unwrap();
    assert_eq!(turn.alternates.len(), 3);
    assert_eq!(turn.alternates[0].text, ORIGINAL);
    assert_eq!(AlternateResponseManager::feedback_for(&turn, 1), Some("one"));
    assert_eq!(AlternateResponseManager::feedback_for(&turn, 2), Some("two"));
}

#[tokio::test]
async fn test_persistence_failure_keeps_committed_state() {
    let store = FlakyStore::new(true, None);
    let backend = ScriptedBackend::new(vec![
        ScriptedBackend::text(SCARIER),
        ScriptedBackend::text("Calmer"),
    ]);
    let controller = controller(store.clone(), backend, false);

    let result = controller.request_revision(1, "make it scarier").await;
    assert!(matches!(result, Err(RevisionError::PersistenceFailed(_))));

    let turn = store.turn(1).await.unwrap();
    assert_eq!(turn.text, SCARIER);
    assert_eq!(turn.alternates.len(), 2);
    assert_eq!(controller.state(), RevisionState::Idle);

    store.fail_persist.store(false, Ordering::SeqCst);
    controller.request_revision(1, "calmer").await.unwrap();
    assert_eq!(store.persisted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_switch_alternate_updates_feedback_display() {
    let store = store();
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text(SCARIER)]);
    let controller = controller(store.clone(), backend, false);
    let mut events = controller.subscribe();
    let mut index = FeedbackAnnotationIndex::new();

    controller.request_revision(1, "make it scarier").await.unwrap();
    while let Ok(event) = events.try_recv() {
        index.handle_event(&event, store.as_ref()).await;
    }
    assert_eq!(index.get(1).unwrap().feedback, "make it scarier");

    let turn = controller.switch_alternate(1, 0).await.unwrap();
    assert_eq!(turn.text, ORIGINAL);
    while let Ok(event) = events.try_recv() {
        index.handle_event(&event, store.as_ref()).await;
    }
    assert!(index.get(1).is_none());

    let out_of_range = controller.switch_alternate(1, 9).await;
    assert!(matches!(out_of_range, Err(RevisionError::InvalidTarget(_))));
    assert_eq!(store.turn(1).await.unwrap().active_alternate, 0);
}

#[tokio::test]
async fn test_legacy_turn_is_initialized_before_revision() {
    let mut legacy = Turn::assistant(1, ORIGINAL);
    legacy.alternates.clear();
    let store = Arc::new(InMemoryConversationStore::from_turns(vec![
        Turn::user(0, "Go"),
        legacy,
    ]));
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text(SCARIER)]);
    let controller = controller(store.clone(), backend, false);

    controller.request_revision(1, "make it scarier").await.unwrap();

    let turn = store.turn(1).await.unwrap();
    assert_eq!(turn.alternates.len(), 2);
    assert_eq!(turn.alternates[0].text, ORIGINAL);
    assert_eq!(turn.alternates[1].text, SCARIER);
}

#[tokio::test]
async fn test_dropped_request_still_commits() {
    let store = store();
    let (backend, gate) = gated(Ok(SCARIER));
    let controller = controller(store.clone(), backend, true);

    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        controller.request_revision(1, "make it scarier"),
    )
    .await;
    assert!(timed_out.is_err());

    gate.entered.await.unwrap();
    assert_eq!(controller.state(), RevisionState::Generating);
    assert_eq!(
        controller.request_revision(1, "other").await,
        Err(RevisionError::AlreadyInProgress)
    );

    gate.release.send(()).unwrap();
    wait_until_idle(&controller).await;

    let turn = store.turn(1).await.unwrap();
    assert_eq!(turn.alternates.len(), 2);
    assert_eq!(turn.text, SCARIER);
    assert!(!turn.alternates[1].metadata.is_pending());
}

#[tokio::test]
async fn test_dropped_request_rolls_back_on_failure() {
    let store = store();
    let before = store.turn(1).await.unwrap();
    let (backend, gate) = gated(Err("upstream timeout"));
    let controller = controller(store.clone(), backend, true);

    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        controller.request_revision(1, "make it scarier"),
    )
    .await;
    assert!(timed_out.is_err());

    gate.entered.await.unwrap();
    gate.release.send(()).unwrap();
    wait_until_idle(&controller).await;

    assert_eq!(store.turn(1).await.unwrap(), before);
}

#[tokio::test]
async fn test_streaming_failure_restores_legacy_turn() {
    let mut legacy = Turn::assistant(1, ORIGINAL);
    legacy.alternates.clear();
    let store = Arc::new(InMemoryConversationStore::from_turns(vec![
        Turn::user(0, "Go"),
        legacy,
    ]));
    let before = store.turn(1).await.unwrap();
    let backend = ScriptedBackend::new(vec![Err("boom".to_string())]);
    let controller = controller(store.clone(), backend, true);

    let result = controller.request_revision(1, "make it scarier").await;

    assert!(matches!(result, Err(RevisionError::GenerationFailed(_))));
    let after = store.turn(1).await.unwrap();
    assert!(after.alternates.is_empty());
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_streaming_commit_write_failure_rolls_back() {
    // Second turn write is the commit of the pending alternate
    let store = FlakyStore::new(false, Some(2));
    let before = store.turn(1).await.unwrap();
    let backend = ScriptedBackend::new(vec![ScriptedBackend::text(SCARIER)]);
    let controller = controller(store.clone(), backend, true);

    let result = controller.request_revision(1, "make it scarier").await;

    assert!(matches!(result, Err(RevisionError::PersistenceFailed(_))));
    assert_eq!(store.turn(1).await.unwrap(), before);
    assert_eq!(store.persisted.load(Ordering::SeqCst), 0);
    assert_eq!(controller.state(), RevisionState::Idle);
}
