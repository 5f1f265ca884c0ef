//! PushChannelActor - live event stream client.
//!
//! Owns one WebSocket connection to the backend event stream and translates
//! typed lifecycle events into TraceStore messages. On transport loss it
//! schedules exactly one reconnect attempt after a fixed delay; the timer and
//! the reader task are both torn down deterministically in `post_stop`.
//!
//! Span-level events deliberately trigger a full list/detail re-fetch instead
//! of span patching: span deltas are numerous and easy to apply incorrectly,
//! a detail re-fetch is always correct.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use shared_types::{ConnectionStatus, OperationalSummary, PushEvent, RunStatus, TraceUpdate};

use crate::actors::trace_store::TraceStoreMsg;
use crate::client::TraceApiClient;

#[derive(Debug, Clone)]
pub struct PushChannelArguments {
    pub events_url: String,
    pub store: ActorRef<TraceStoreMsg>,
    pub client: TraceApiClient,
    pub reconnect_delay: Duration,
}

pub struct PushChannelState {
    events_url: String,
    store: ActorRef<TraceStoreMsg>,
    client: TraceApiClient,
    reconnect_delay: Duration,
    status: ConnectionStatus,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub enum PushChannelMsg {
    /// (Re)establish the stream connection.
    Connect,
    /// Reader task confirmed the socket is up.
    Opened,
    /// Reader task ended: connect failure, transport error, or server close.
    StreamClosed,
    EventReceived(PushEvent),
    GetStatus { reply: RpcReplyPort<ConnectionStatus> },
}

#[derive(Debug, Default)]
pub struct PushChannelActor;

#[async_trait]
impl Actor for PushChannelActor {
    type Msg = PushChannelMsg;
    type State = PushChannelState;
    type Arguments = PushChannelArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(PushChannelState {
            events_url: args.events_url,
            store: args.store,
            client: args.client,
            reconnect_delay: args.reconnect_delay,
            status: ConnectionStatus::Connecting,
            reader: None,
            reconnect: None,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let _ = myself.cast(PushChannelMsg::Connect);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PushChannelMsg::Connect => {
                state.reconnect = None;
                self.set_status(state, ConnectionStatus::Connecting);
                self.spawn_reader(state, &myself);
            }
            PushChannelMsg::Opened => {
                self.set_status(state, ConnectionStatus::Connected);
            }
            PushChannelMsg::StreamClosed => {
                self.set_status(state, ConnectionStatus::Disconnected);
                if state.reconnect.is_none() {
                    let delay = state.reconnect_delay;
                    let channel = myself.clone();
                    state.reconnect = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = channel.cast(PushChannelMsg::Connect);
                    }));
                }
            }
            PushChannelMsg::EventReceived(event) => {
                self.dispatch_event(state, event).await;
            }
            PushChannelMsg::GetStatus { reply } => {
                let _ = reply.send(state.status);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        if let Some(reconnect) = state.reconnect.take() {
            reconnect.abort();
        }
        Ok(())
    }
}

impl PushChannelActor {
    fn set_status(&self, state: &mut PushChannelState, status: ConnectionStatus) {
        state.status = status;
        let _ = state
            .store
            .cast(TraceStoreMsg::SetConnectionStatus { status });
    }

    fn spawn_reader(&self, state: &mut PushChannelState, myself: &ActorRef<PushChannelMsg>) {
        if let Some(previous) = state.reader.take() {
            previous.abort();
        }
        let url = state.events_url.clone();
        let channel = myself.clone();
        state.reader = Some(tokio::spawn(async move {
            match connect_async(url.as_str()).await {
                Ok((mut stream, _)) => {
                    let _ = channel.cast(PushChannelMsg::Opened);
                    while let Some(frame) = stream.next().await {
                        match frame {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<PushEvent>(&text) {
                                    Ok(event) => {
                                        let _ = channel.cast(PushChannelMsg::EventReceived(event));
                                    }
                                    Err(e) => {
                                        tracing::warn!(error = %e, "Dropping malformed push frame")
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Ok(_) => continue,
                            Err(e) => {
                                tracing::warn!(error = %e, "Push stream transport error");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Push stream connect failed");
                }
            }
            let _ = channel.cast(PushChannelMsg::StreamClosed);
        }));
    }

    async fn dispatch_event(&self, state: &PushChannelState, event: PushEvent) {
        match event.event_type.as_str() {
            "trace_started" => match trace_started_update(&event) {
                Some(update) => {
                    let _ = state.store.cast(TraceStoreMsg::UpsertTrace { update });
                }
                None => tracing::warn!("trace_started event without trace_id"),
            },
            "trace_ended" => match trace_ended_update(&event) {
                Some(update) => {
                    let _ = state.store.cast(TraceStoreMsg::UpsertTrace { update });
                }
                None => tracing::warn!("trace_ended event without trace_id"),
            },
            "span_started" | "span_ended" => {
                self.refresh_after_span_event(state, event.trace_id.as_deref())
                    .await;
            }
            other => {
                tracing::debug!(event_type = %other, "Ignoring unrecognized push event");
            }
        }
    }

    /// Consistency over efficiency: re-fetch the list, and the detail of the
    /// affected trace if it is the current selection.
    async fn refresh_after_span_event(&self, state: &PushChannelState, trace_id: Option<&str>) {
        match state.client.list_traces().await {
            Ok(traces) => {
                let _ = state.store.cast(TraceStoreMsg::ReplaceAll { traces });
            }
            Err(e) => tracing::warn!(error = %e, "List refresh after span event failed"),
        }

        let Some(trace_id) = trace_id else { return };
        let selected = ractor::call!(state.store, |reply| TraceStoreMsg::GetSelected { reply })
            .ok()
            .flatten();
        if selected.as_deref() == Some(trace_id) {
            match state.client.get_trace(trace_id).await {
                Ok(trace) => {
                    let _ = state.store.cast(TraceStoreMsg::SetDetail { trace });
                }
                Err(e) => {
                    tracing::warn!(trace_id, error = %e, "Detail refresh after span event failed")
                }
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TraceStartedData {
    #[serde(default)]
    input_prompt: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
}

fn trace_started_update(event: &PushEvent) -> Option<TraceUpdate> {
    let trace_id = event.trace_id.clone()?;
    let data: TraceStartedData = serde_json::from_value(event.data.clone()).unwrap_or_default();
    Some(TraceUpdate {
        id: trace_id,
        status: Some(RunStatus::Running),
        started_at: data.started_at,
        input_prompt: data.input_prompt,
        ..TraceUpdate::default()
    })
}

#[derive(Debug, Default, Deserialize)]
struct TraceEndedData {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    final_output: Option<String>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    total_duration_ms: Option<u64>,
    #[serde(default)]
    operational_summary: Option<OperationalSummary>,
}

fn trace_ended_update(event: &PushEvent) -> Option<TraceUpdate> {
    let trace_id = event.trace_id.clone()?;
    let data: TraceEndedData = serde_json::from_value(event.data.clone()).unwrap_or_default();
    let status = if data.error.is_some() {
        RunStatus::Error
    } else {
        RunStatus::Completed
    };
    Some(TraceUpdate {
        id: trace_id,
        status: Some(status),
        ended_at: Some(data.ended_at.unwrap_or_else(Utc::now)),
        final_output: data.final_output,
        error: data.error,
        total_tokens: data.total_tokens,
        total_duration_ms: data.total_duration_ms,
        operational_summary: data.operational_summary,
        ..TraceUpdate::default()
    })
}
