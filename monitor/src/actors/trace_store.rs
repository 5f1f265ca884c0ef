//! TraceStoreActor - single owner of canonical trace, span, and conversation
//! state.
//!
//! Both sync channels (push events and polling) write through this actor's
//! mailbox, so merges are serialized in arrival order and readers never see a
//! torn trace+selection pair. The store is also the command surface for the
//! UI layer: select, delete, start a discovery, submit a refinement, resume a
//! historical session.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

use shared_types::{
    ConnectionStatus, ConversationMessage, DiscoveryResult, MessageRole, RunStatus, Trace,
    TraceUpdate,
};

use crate::actors::poller::PollerMsg;
use crate::client::{ConversationTurn, RefinementRequest, TraceApiClient};
use crate::conversation::output::parse_final_output;
use crate::conversation::{assistant_summary, reconstruct_conversation, ReconstructedSession};

/// Bounded most-recent list cap.
const MAX_TRACKED_TRACES: usize = 50;

#[derive(Debug, Clone)]
pub struct TraceStoreArguments {
    pub client: TraceApiClient,
}

pub struct TraceStoreState {
    client: TraceApiClient,
    traces: Vec<Trace>,
    selected_id: Option<String>,
    detail: Option<Trace>,
    conversation: Vec<ConversationMessage>,
    /// Root trace of the active conversation, used as the refinement origin.
    root_trace_id: Option<String>,
    /// Backend session for refinement calls.
    session_id: Option<String>,
    /// Trace currently producing the conversation's next assistant turn.
    active_trace_id: Option<String>,
    current_result: Option<DiscoveryResult>,
    current_result_trace_id: Option<String>,
    connection: ConnectionStatus,
    last_error: Option<String>,
    scheduler: Option<ActorRef<PollerMsg>>,
}

/// Atomic read of everything the UI layer renders.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub traces: Vec<Trace>,
    pub selected_id: Option<String>,
    pub detail: Option<Trace>,
    pub conversation: Vec<ConversationMessage>,
    pub root_trace_id: Option<String>,
    pub session_id: Option<String>,
    pub active_trace_id: Option<String>,
    pub current_result: Option<DiscoveryResult>,
    pub current_result_trace_id: Option<String>,
    pub connection: ConnectionStatus,
    pub last_error: Option<String>,
}

/// What the poll scheduler needs to derive its cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingHints {
    pub any_running: bool,
    /// Selected trace id, present only while that trace is running.
    pub running_selection: Option<String>,
}

#[derive(Debug)]
pub enum TraceStoreMsg {
    /// Full list replacement after a poll. Never clears selection or detail,
    /// even if the selected trace is momentarily absent from the new list.
    ReplaceAll { traces: Vec<Trace> },
    /// Shallow merge by id; unknown ids insert at the head of the bounded
    /// most-recent list.
    UpsertTrace { update: TraceUpdate },
    /// Set the active selection; a non-null id triggers a detail fetch.
    SelectTrace { id: Option<String> },
    /// Detail write path for select/poll/push re-fetches.
    SetDetail { trace: Trace },
    /// Issue the external delete; failure leaves state untouched.
    DeleteTrace { id: String },
    /// Live flow: begin a discovery run.
    StartDiscovery { query: String, locale: String },
    /// Live flow: follow-up turn against the active session.
    SubmitRefinement { text: String },
    /// Fetch a historical trace tree, replay it, and seed conversation
    /// state from the result.
    ResumeSession {
        trace_id: String,
        original_query: String,
    },
    /// Seed conversation state from an already-replayed session.
    LoadSession {
        session: ReconstructedSession,
        root_trace_id: String,
        session_id: Option<String>,
    },
    SetConnectionStatus { status: ConnectionStatus },
    /// Late-bound scheduler ref; the store casts `Recompute` whenever a
    /// mutation flips the running/not-running condition.
    BindScheduler { scheduler: ActorRef<PollerMsg> },
    GetSnapshot { reply: RpcReplyPort<StoreSnapshot> },
    GetSelected { reply: RpcReplyPort<Option<String>> },
    GetPollingHints { reply: RpcReplyPort<PollingHints> },
}

#[derive(Debug, Default)]
pub struct TraceStoreActor;

#[async_trait]
impl Actor for TraceStoreActor {
    type Msg = TraceStoreMsg;
    type State = TraceStoreState;
    type Arguments = TraceStoreArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(TraceStoreState {
            client: args.client,
            traces: Vec::new(),
            selected_id: None,
            detail: None,
            conversation: Vec::new(),
            root_trace_id: None,
            session_id: None,
            active_trace_id: None,
            current_result: None,
            current_result_trace_id: None,
            connection: ConnectionStatus::Connecting,
            last_error: None,
            scheduler: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TraceStoreMsg::ReplaceAll { traces } => {
                let before = polling_hints(state);
                state.traces = traces;
                notify_scheduler(state, before);
            }
            TraceStoreMsg::UpsertTrace { update } => {
                let before = polling_hints(state);
                self.upsert(state, update);
                notify_scheduler(state, before);
            }
            TraceStoreMsg::SelectTrace { id } => {
                let before = polling_hints(state);
                state.selected_id = id.clone();
                match id {
                    None => state.detail = None,
                    Some(id) => self.spawn_detail_fetch(state, &myself, id),
                }
                notify_scheduler(state, before);
            }
            TraceStoreMsg::SetDetail { trace } => {
                let before = polling_hints(state);
                self.set_detail(state, trace);
                notify_scheduler(state, before);
            }
            TraceStoreMsg::DeleteTrace { id } => {
                let before = polling_hints(state);
                self.delete_trace(state, &id).await;
                notify_scheduler(state, before);
            }
            TraceStoreMsg::StartDiscovery { query, locale } => {
                let before = polling_hints(state);
                self.start_discovery(state, query, locale).await;
                notify_scheduler(state, before);
            }
            TraceStoreMsg::SubmitRefinement { text } => {
                let before = polling_hints(state);
                self.submit_refinement(state, text).await;
                notify_scheduler(state, before);
            }
            TraceStoreMsg::ResumeSession {
                trace_id,
                original_query,
            } => {
                self.resume_session(state, trace_id, original_query).await;
            }
            TraceStoreMsg::LoadSession {
                session,
                root_trace_id,
                session_id,
            } => {
                seed_session(state, session, root_trace_id, session_id);
            }
            TraceStoreMsg::SetConnectionStatus { status } => {
                state.connection = status;
            }
            TraceStoreMsg::BindScheduler { scheduler } => {
                state.scheduler = Some(scheduler);
            }
            TraceStoreMsg::GetSnapshot { reply } => {
                let _ = reply.send(StoreSnapshot {
                    traces: state.traces.clone(),
                    selected_id: state.selected_id.clone(),
                    detail: state.detail.clone(),
                    conversation: state.conversation.clone(),
                    root_trace_id: state.root_trace_id.clone(),
                    session_id: state.session_id.clone(),
                    active_trace_id: state.active_trace_id.clone(),
                    current_result: state.current_result.clone(),
                    current_result_trace_id: state.current_result_trace_id.clone(),
                    connection: state.connection,
                    last_error: state.last_error.clone(),
                });
            }
            TraceStoreMsg::GetSelected { reply } => {
                let _ = reply.send(state.selected_id.clone());
            }
            TraceStoreMsg::GetPollingHints { reply } => {
                let _ = reply.send(polling_hints(state));
            }
        }
        Ok(())
    }
}

impl TraceStoreActor {
    fn upsert(&self, state: &mut TraceStoreState, update: TraceUpdate) {
        let id = update.id.clone();
        if let Some(existing) = state.traces.iter_mut().find(|t| t.id == id) {
            update.clone().apply(existing);
        } else {
            state.traces.insert(0, update.clone().into_trace());
            state.traces.truncate(MAX_TRACKED_TRACES);
        }
        if let Some(detail) = state.detail.as_mut().filter(|d| d.id == id) {
            update.apply(detail);
        }
        self.advance_conversation(state, &id);
    }

    /// Append the assistant turn once the conversation's active trace
    /// reaches a terminal status.
    fn advance_conversation(&self, state: &mut TraceStoreState, trace_id: &str) {
        if state.active_trace_id.as_deref() != Some(trace_id) {
            return;
        }
        let Some(trace) = state.traces.iter().find(|t| t.id == trace_id) else {
            return;
        };
        match trace.status {
            RunStatus::Running => {}
            RunStatus::Completed => {
                let result = parse_final_output(trace.final_output.as_deref());
                let mut message =
                    ConversationMessage::live(MessageRole::Assistant, assistant_summary(&result));
                message.trace_id = Some(trace_id.to_string());
                message.results_snapshot = Some(result.clone());
                state.conversation.push(message);

                if state.session_id.is_none() {
                    state.session_id = result.session_id.clone();
                }
                // An empty turn never displaces the last useful result set.
                if !result.is_empty() {
                    state.current_result = Some(result);
                    state.current_result_trace_id = Some(trace_id.to_string());
                }
                state.active_trace_id = None;
            }
            RunStatus::Error => {
                let content = trace
                    .error
                    .clone()
                    .unwrap_or_else(|| "The search failed. Please try again.".to_string());
                let mut message = ConversationMessage::live(MessageRole::Assistant, content);
                message.trace_id = Some(trace_id.to_string());
                state.conversation.push(message);
                state.active_trace_id = None;
            }
        }
    }

    fn spawn_detail_fetch(
        &self,
        state: &TraceStoreState,
        myself: &ActorRef<TraceStoreMsg>,
        id: String,
    ) {
        let client = state.client.clone();
        let store = myself.clone();
        tokio::spawn(async move {
            match client.get_trace(&id).await {
                Ok(trace) => {
                    let _ = store.cast(TraceStoreMsg::SetDetail { trace });
                }
                // Not fatal: the next poll or push re-fetch will catch up.
                Err(e) => tracing::warn!(trace_id = %id, error = %e, "Detail fetch failed"),
            }
        });
    }

    fn set_detail(&self, state: &mut TraceStoreState, trace: Trace) {
        if state.selected_id.as_deref() != Some(trace.id.as_str()) {
            // Stale response for a deselected trace.
            return;
        }
        if let Some(entry) = state.traces.iter_mut().find(|t| t.id == trace.id) {
            *entry = trace.clone();
        }
        state.detail = Some(trace);
    }

    async fn delete_trace(&self, state: &mut TraceStoreState, id: &str) {
        match state.client.delete_trace(id).await {
            Ok(()) => {
                state.traces.retain(|t| t.id != id);
                if state.selected_id.as_deref() == Some(id) {
                    state.selected_id = None;
                    state.detail = None;
                }
            }
            // Deletion failure is non-fatal and changes nothing user-facing.
            Err(e) => {
                tracing::warn!(trace_id = %id, error = %e, "Trace delete rejected; keeping local state");
            }
        }
    }

    async fn start_discovery(&self, state: &mut TraceStoreState, query: String, locale: String) {
        state.last_error = None;
        let mut message = ConversationMessage::live(MessageRole::User, query.clone());
        message.results_snapshot = state.current_result.clone();
        state.conversation.push(message);

        match state.client.start_discovery(&query, &locale).await {
            Ok(run) => {
                if run.session_id.is_some() {
                    state.session_id = run.session_id;
                }
                state.root_trace_id = Some(run.trace_id.clone());
                state.active_trace_id = Some(run.trace_id.clone());
                self.upsert(
                    state,
                    TraceUpdate {
                        id: run.trace_id,
                        status: Some(RunStatus::Running),
                        input_prompt: Some(query),
                        ..TraceUpdate::default()
                    },
                );
            }
            Err(e) => self.roll_back_command(state, e.to_string()),
        }
    }

    async fn submit_refinement(&self, state: &mut TraceStoreState, text: String) {
        let Some(source_trace_id) = state.root_trace_id.clone() else {
            tracing::warn!("Refinement submitted with no active discovery session");
            state.last_error = Some("No active discovery session".to_string());
            return;
        };

        state.last_error = None;
        let prior_turns: Vec<ConversationTurn> =
            state.conversation.iter().map(ConversationTurn::from).collect();
        let mut message = ConversationMessage::live(MessageRole::User, text.clone());
        message.results_snapshot = state.current_result.clone();
        state.conversation.push(message);

        let request = RefinementRequest {
            session_id: state.session_id.clone(),
            source_trace_id,
            conversation: prior_turns,
            text: text.clone(),
        };
        match state.client.submit_refinement(&request).await {
            Ok(run) => {
                state.active_trace_id = Some(run.trace_id.clone());
                self.upsert(
                    state,
                    TraceUpdate {
                        id: run.trace_id,
                        status: Some(RunStatus::Running),
                        input_prompt: Some(text),
                        ..TraceUpdate::default()
                    },
                );
            }
            Err(e) => self.roll_back_command(state, e.to_string()),
        }
    }

    async fn resume_session(
        &self,
        state: &mut TraceStoreState,
        trace_id: String,
        original_query: String,
    ) {
        state.last_error = None;
        match state.client.get_trace(&trace_id).await {
            Ok(trace) => {
                let session = reconstruct_conversation(&trace, &original_query);
                let session_id = session
                    .current_result
                    .as_ref()
                    .and_then(|result| result.session_id.clone());
                seed_session(state, session, trace_id, session_id);
            }
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Session resume failed");
                state.last_error = Some(e.to_string());
            }
        }
    }

    /// Error-state rollback: drop the optimistic user turn and record the
    /// failure for the caller to display. Prior state stays intact.
    fn roll_back_command(&self, state: &mut TraceStoreState, error: String) {
        tracing::warn!(error = %error, "Discovery command failed; rolling back optimistic turn");
        state.conversation.pop();
        state.last_error = Some(error);
    }
}

fn seed_session(
    state: &mut TraceStoreState,
    session: ReconstructedSession,
    root_trace_id: String,
    session_id: Option<String>,
) {
    state.conversation = session.messages;
    state.current_result = session.current_result;
    state.current_result_trace_id = session.current_trace_id;
    state.root_trace_id = Some(root_trace_id);
    state.session_id = session_id;
    state.active_trace_id = None;
    state.last_error = None;
}

fn polling_hints(state: &TraceStoreState) -> PollingHints {
    let any_running = state.traces.iter().any(|t| t.status == RunStatus::Running);
    let running_selection = state
        .selected_id
        .as_ref()
        .filter(|id| {
            let in_list = state
                .traces
                .iter()
                .any(|t| &t.id == *id && t.status == RunStatus::Running);
            let in_detail = state
                .detail
                .as_ref()
                .is_some_and(|d| &d.id == *id && d.status == RunStatus::Running);
            in_list || in_detail
        })
        .cloned();
    PollingHints {
        any_running,
        running_selection,
    }
}

fn notify_scheduler(state: &TraceStoreState, before: PollingHints) {
    if polling_hints(state) != before {
        if let Some(scheduler) = &state.scheduler {
            let _ = scheduler.cast(PollerMsg::Recompute);
        }
    }
}
