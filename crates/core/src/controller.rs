//! Revision Controller - feedback-driven turn revision
//!
//! Responsibilities:
//! - Validate a revision request and build its instruction
//! - Run the batch or streaming generation path
//! - Commit the result as a new alternate, or roll back
//! - Allow at most one revision in flight per controller
//!
//! State machine per attempt:
//! `Idle -> Validating -> Generating -> {Committing | RollingBack} -> Idle`

use crate::alternates::{AlternateError, AlternateResponseManager};
use crate::events::{ConversationEvent, EventBus};
use crate::llm::{
    ContextMessage, GenerationBackend, GenerationOutput, GenerationRequest, GenerationSettings,
};
use crate::prompt::{PromptError, RevisionPromptBuilder};
use crate::store::ConversationStore;
use crate::turn::{Turn, TurnId};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Revision errors, as surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevisionError {
    #[error("Feedback is empty")]
    EmptyFeedback,

    #[error("Invalid revision target: {0}")]
    InvalidTarget(String),

    #[error("A revision is already in progress")]
    AlreadyInProgress,

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),
}

/// How loudly an error is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl RevisionError {
    pub fn severity(&self) -> Severity {
        match self {
            RevisionError::EmptyFeedback
            | RevisionError::InvalidTarget(_)
            | RevisionError::AlreadyInProgress => Severity::Warning,
            RevisionError::GenerationFailed(_) | RevisionError::PersistenceFailed(_) => {
                Severity::Error
            }
        }
    }

    /// Short text for a user-visible notification
    pub fn user_message(&self) -> &'static str {
        match self {
            RevisionError::EmptyFeedback => "Please enter some feedback.",
            RevisionError::InvalidTarget(_) => "Only assistant messages can be revised.",
            RevisionError::AlreadyInProgress => {
                "Please wait for the current revision to complete."
            }
            RevisionError::GenerationFailed(_) => "Failed to generate revision.",
            RevisionError::PersistenceFailed(_) => {
                "The revision was applied but could not be saved."
            }
        }
    }
}

impl From<PromptError> for RevisionError {
    fn from(e: PromptError) -> Self {
        match e {
            PromptError::EmptyFeedback => RevisionError::EmptyFeedback,
            PromptError::NotAssistant(_) => RevisionError::InvalidTarget(e.to_string()),
        }
    }
}

impl From<AlternateError> for RevisionError {
    fn from(e: AlternateError) -> Self {
        RevisionError::InvalidTarget(e.to_string())
    }
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionState {
    Idle,
    Validating,
    Generating,
    Committing,
    RollingBack,
}

/// Result of a committed revision
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionOutcome {
    pub attempt_id: String,
    pub turn_id: TurnId,
    /// Index of the new alternate
    pub alternate: usize,
    pub text: String,
    pub feedback: String,
    pub reasoning: Option<String>,
}

fn lock_state(state: &Mutex<RevisionState>) -> MutexGuard<'_, RevisionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single-flight guard; returns the controller to `Idle` when dropped
struct FlightGuard {
    state: Arc<Mutex<RevisionState>>,
}

impl FlightGuard {
    fn acquire(state: &Arc<Mutex<RevisionState>>) -> Result<Self, RevisionError> {
        let mut current = lock_state(state);
        if *current != RevisionState::Idle {
            return Err(RevisionError::AlreadyInProgress);
        }
        *current = RevisionState::Validating;
        Ok(Self {
            state: Arc::clone(state),
        })
    }

    fn advance(&self, next: RevisionState) {
        let mut current = lock_state(&self.state);
        debug!("Revision state: {:?} -> {:?}", *current, next);
        *current = next;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        *lock_state(&self.state) = RevisionState::Idle;
    }
}

/// Revision Controller
#[derive(Clone)]
pub struct RevisionController {
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn GenerationBackend>,
    settings: Arc<dyn GenerationSettings>,
    prompts: RevisionPromptBuilder,
    events: EventBus,
    state: Arc<Mutex<RevisionState>>,
}

impl RevisionController {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        backend: Arc<dyn GenerationBackend>,
        settings: Arc<dyn GenerationSettings>,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
            prompts: RevisionPromptBuilder::new(),
            events: EventBus::new(),
            state: Arc::new(Mutex::new(RevisionState::Idle)),
        }
    }

    pub fn with_prompt_builder(mut self, prompts: RevisionPromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// Share an event bus with the host
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> RevisionState {
        *lock_state(&self.state)
    }

    /// Revise a turn with user feedback.
    ///
    /// The single-flight check happens when this is called, not when the
    /// returned future is first polled: a second call made while another
    /// revision is outstanding resolves to `AlreadyInProgress`.
    ///
    /// Once polled, the attempt runs in its own task and is not cancelled by
    /// dropping the returned future; it still ends in a commit or a rollback.
    pub fn request_revision(
        &self,
        turn_id: TurnId,
        feedback: &str,
    ) -> impl Future<Output = Result<RevisionOutcome, RevisionError>> + Send + 'static {
        let acquired = FlightGuard::acquire(&self.state);
        if acquired.is_err() {
            warn!(turn_id, "Revision rejected: another revision is in progress");
        }
        let controller = self.clone();
        let feedback = feedback.to_string();
        async move {
            let guard = acquired?;
            let task = tokio::spawn(async move {
                controller.run_revision(&guard, turn_id, &feedback).await
            });
            join_attempt(task).await
        }
    }

    /// Switch the displayed alternate of a turn
    pub fn switch_alternate(
        &self,
        turn_id: TurnId,
        index: usize,
    ) -> impl Future<Output = Result<Turn, RevisionError>> + Send + 'static {
        let acquired = FlightGuard::acquire(&self.state);
        let controller = self.clone();
        async move {
            let guard = acquired?;
            let task = tokio::spawn(async move {
                controller.run_switch(&guard, turn_id, index).await
            });
            join_attempt(task).await
        }
    }

    async fn run_switch(
        &self,
        guard: &FlightGuard,
        turn_id: TurnId,
        index: usize,
    ) -> Result<Turn, RevisionError> {
        let mut turn = self.load_target(turn_id).await?;
        AlternateResponseManager::ensure_initialized(&mut turn);
        AlternateResponseManager::select_alternate(&mut turn, index)?;

        guard.advance(RevisionState::Committing);
        self.write_turn(&turn).await?;
        self.events
            .publish(ConversationEvent::AlternateSwitched { turn_id, index });
        info!(turn_id, index, "Switched alternate");

        self.persist_and_reload().await?;
        Ok(turn)
    }

    async fn run_revision(
        &self,
        guard: &FlightGuard,
        turn_id: TurnId,
        feedback: &str,
    ) -> Result<RevisionOutcome, RevisionError> {
        if feedback.trim().is_empty() {
            warn!(turn_id, "Revision rejected: empty feedback");
            return Err(RevisionError::EmptyFeedback);
        }

        let loaded = self.load_target(turn_id).await?;
        let mut turn = loaded.clone();
        AlternateResponseManager::ensure_initialized(&mut turn);
        let instruction = self.prompts.build(feedback, &turn)?;

        let attempt_id = ulid::Ulid::new().to_string();
        let streaming = self.settings.streaming();
        let request = GenerationRequest {
            instruction,
            streaming,
            history: self.history_before(turn_id).await,
        };

        info!(
            turn_id,
            attempt_id = %attempt_id,
            streaming,
            "Generating revision with feedback"
        );
        self.events.publish(ConversationEvent::RevisionStarted {
            attempt_id: attempt_id.clone(),
            turn_id,
        });

        let result = if streaming {
            self.run_streaming(guard, &attempt_id, &loaded, turn, feedback, &request)
                .await
        } else {
            self.run_batch(guard, turn, feedback, &request).await
        };

        let (turn, index) = match result {
            Ok(committed) => committed,
            Err(e) => {
                error!(turn_id, attempt_id = %attempt_id, "Revision failed: {}", e);
                self.events.publish(ConversationEvent::RevisionFailed {
                    attempt_id,
                    turn_id,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        self.events.publish(ConversationEvent::RevisionCommitted {
            attempt_id: attempt_id.clone(),
            turn_id,
            index,
        });
        info!(turn_id, alternate = index, attempt_id = %attempt_id, "Revision committed");

        let alternate = &turn.alternates[index];
        let outcome = RevisionOutcome {
            attempt_id,
            turn_id,
            alternate: index,
            text: alternate.text.clone(),
            feedback: feedback.to_string(),
            reasoning: alternate.metadata.reasoning.clone(),
        };

        self.persist_and_reload().await?;
        Ok(outcome)
    }

    /// Generate first, then append the finished alternate
    async fn run_batch(
        &self,
        guard: &FlightGuard,
        mut turn: Turn,
        feedback: &str,
        request: &GenerationRequest,
    ) -> Result<(Turn, usize), RevisionError> {
        guard.advance(RevisionState::Generating);
        let output = match self.generate(request).await {
            Ok(output) => output,
            Err(e) => {
                // Nothing was written; the stored turn is untouched
                guard.advance(RevisionState::RollingBack);
                return Err(e);
            }
        };

        guard.advance(RevisionState::Committing);
        let index = AlternateResponseManager::append_revision(
            &mut turn,
            feedback,
            &output.text,
            output.reasoning.as_deref(),
        )?;
        self.write_turn(&turn).await?;
        Ok((turn, index))
    }

    /// Reserve and display a pending alternate, then fill it.
    ///
    /// Any failure after the pending alternate was written puts `loaded` (the
    /// turn as read before initialization) back into the store.
    async fn run_streaming(
        &self,
        guard: &FlightGuard,
        attempt_id: &str,
        loaded: &Turn,
        mut turn: Turn,
        feedback: &str,
        request: &GenerationRequest,
    ) -> Result<(Turn, usize), RevisionError> {
        let index = AlternateResponseManager::begin_pending_alternate(&mut turn, feedback);
        AlternateResponseManager::activate_pending(&mut turn, index)?;
        if let Err(e) = self.write_turn(&turn).await {
            self.roll_back(guard, loaded).await;
            return Err(e);
        }
        self.events.publish(ConversationEvent::RevisionPending {
            attempt_id: attempt_id.to_string(),
            turn_id: turn.id,
            index,
        });

        guard.advance(RevisionState::Generating);
        let committed = match self.generate(request).await {
            Ok(output) => {
                guard.advance(RevisionState::Committing);
                AlternateResponseManager::commit_alternate(
                    &mut turn,
                    index,
                    &output.text,
                    output.reasoning.as_deref(),
                )
                .map_err(RevisionError::from)
            }
            Err(e) => Err(e),
        };

        let written = match committed {
            Ok(()) => self.write_turn(&turn).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok((turn, index)),
            Err(e) => {
                self.roll_back(guard, loaded).await;
                Err(e)
            }
        }
    }

    /// Write the pre-attempt turn back
    async fn roll_back(&self, guard: &FlightGuard, loaded: &Turn) {
        guard.advance(RevisionState::RollingBack);
        if let Err(e) = self.write_turn(loaded).await {
            error!(turn_id = loaded.id, "Rollback write failed: {}", e);
        }
    }

    /// Call the backend; errors and blank results are `GenerationFailed`
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, RevisionError> {
        let output = self
            .backend
            .generate(request)
            .await
            .map_err(|e| RevisionError::GenerationFailed(e.to_string()))?;
        if output.text.trim().is_empty() {
            return Err(RevisionError::GenerationFailed(
                "backend returned an empty result".to_string(),
            ));
        }
        Ok(output)
    }

    async fn load_target(&self, turn_id: TurnId) -> Result<Turn, RevisionError> {
        let turn = self.store.turn(turn_id).await.ok_or_else(|| {
            warn!(turn_id, "Revision target not found");
            RevisionError::InvalidTarget(format!("turn {} not found", turn_id))
        })?;
        if !turn.is_assistant() {
            warn!(turn_id, "Revision target is not an assistant turn");
            return Err(RevisionError::InvalidTarget(format!(
                "turn {} is not an assistant turn",
                turn_id
            )));
        }
        Ok(turn)
    }

    /// Turns preceding the target, used as generation context
    async fn history_before(&self, turn_id: TurnId) -> Vec<ContextMessage> {
        self.store
            .turns()
            .await
            .into_iter()
            .filter(|turn| turn.id < turn_id)
            .map(|turn| ContextMessage {
                author: turn.author,
                name: turn.name,
                text: turn.text,
            })
            .collect()
    }

    async fn write_turn(&self, turn: &Turn) -> Result<(), RevisionError> {
        self.store
            .update_turn(turn.clone())
            .await
            .map_err(|e| RevisionError::PersistenceFailed(e.to_string()))
    }

    /// Save and re-render; the in-memory turn stays committed on failure
    async fn persist_and_reload(&self) -> Result<(), RevisionError> {
        if let Err(e) = self.store.persist().await {
            warn!("Persist failed, in-memory conversation is ahead of storage: {}", e);
            return Err(RevisionError::PersistenceFailed(e.to_string()));
        }
        if let Err(e) = self.store.reload().await {
            warn!("Reload failed: {}", e);
            return Err(RevisionError::PersistenceFailed(e.to_string()));
        }
        self.events.publish(ConversationEvent::TurnsReloaded);
        Ok(())
    }
}

/// Await a spawned attempt; a panicked task surfaces as a generation failure
async fn join_attempt<T>(
    task: tokio::task::JoinHandle<Result<T, RevisionError>>,
) -> Result<T, RevisionError> {
    task.await.unwrap_or_else(|e| {
        error!("Revision task failed: {}", e);
        Err(RevisionError::GenerationFailed(e.to_string()))
    })
}
