//! PollSchedulerActor - adaptive fallback polling.
//!
//! Independent reconciliation channel next to the push stream: re-fetches the
//! trace list on a cadence that tightens while anything is running, and the
//! selected trace's detail only while that trace runs. Timers are one-shot
//! tasks that reschedule themselves after each tick; the pending handle is
//! aborted before any respawn, so duplicate timers can never be live. The
//! store casts `Recompute` when a mutation flips the running condition, and
//! both timers are re-derived immediately instead of waiting out the old
//! interval.

use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::task::JoinHandle;

use shared_types::RunStatus;

use crate::actors::trace_store::{PollingHints, TraceStoreMsg};
use crate::client::TraceApiClient;

#[derive(Debug, Clone)]
pub struct PollSchedulerArguments {
    pub client: TraceApiClient,
    pub store: ActorRef<TraceStoreMsg>,
    /// List cadence while any visible trace is running.
    pub active_interval: Duration,
    /// List cadence while everything is settled.
    pub idle_interval: Duration,
    /// Detail cadence for a selected running trace.
    pub detail_interval: Duration,
}

pub struct PollSchedulerState {
    client: TraceApiClient,
    store: ActorRef<TraceStoreMsg>,
    active_interval: Duration,
    idle_interval: Duration,
    detail_interval: Duration,
    any_running: bool,
    list_timer: Option<JoinHandle<()>>,
    detail_timer: Option<JoinHandle<()>>,
    detail_target: Option<String>,
}

#[derive(Debug)]
pub enum PollerMsg {
    /// List tick.
    PollList,
    /// Detail tick for the current target.
    PollDetail,
    /// The store reported a running-condition flip; re-derive both timers.
    Recompute,
    /// Health/test endpoint.
    GetListInterval { reply: RpcReplyPort<Duration> },
}

#[derive(Debug, Default)]
pub struct PollSchedulerActor;

#[async_trait]
impl Actor for PollSchedulerActor {
    type Msg = PollerMsg;
    type State = PollSchedulerState;
    type Arguments = PollSchedulerArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(PollSchedulerState {
            client: args.client,
            store: args.store,
            active_interval: args.active_interval,
            idle_interval: args.idle_interval,
            detail_interval: args.detail_interval,
            any_running: false,
            list_timer: None,
            detail_timer: None,
            detail_target: None,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // First fetch immediately; the tick handler schedules the rest.
        let _ = myself.cast(PollerMsg::PollList);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PollerMsg::PollList => {
                match state.client.list_traces().await {
                    Ok(traces) => {
                        let _ = state.store.cast(TraceStoreMsg::ReplaceAll { traces });
                    }
                    // Degraded freshness only; the next tick retries.
                    Err(e) => tracing::warn!(error = %e, "Trace list poll failed"),
                }
                self.resync(state, &myself).await;
                self.schedule_list(state, &myself);
            }
            PollerMsg::PollDetail => {
                let Some(id) = state.detail_target.clone() else {
                    return Ok(());
                };
                match state.client.get_trace(&id).await {
                    Ok(trace) => {
                        let still_running = trace.status == RunStatus::Running;
                        let _ = state.store.cast(TraceStoreMsg::SetDetail { trace });
                        if still_running {
                            self.schedule_detail(state, &myself);
                        } else {
                            // Stopped entirely, not paused; a newly selected
                            // running trace restarts it via Recompute/resync.
                            self.stop_detail_timer(state);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(trace_id = %id, error = %e, "Trace detail poll failed");
                        self.schedule_detail(state, &myself);
                    }
                }
            }
            PollerMsg::Recompute => {
                self.resync(state, &myself).await;
                self.schedule_list(state, &myself);
            }
            PollerMsg::GetListInterval { reply } => {
                let _ = reply.send(list_interval(state));
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(timer) = state.list_timer.take() {
            timer.abort();
        }
        self.stop_detail_timer(state);
        Ok(())
    }
}

impl PollSchedulerActor {
    /// Pull fresh hints from the store and reconcile the detail timer.
    async fn resync(&self, state: &mut PollSchedulerState, myself: &ActorRef<PollerMsg>) {
        let hints: PollingHints =
            match ractor::call!(state.store, |reply| TraceStoreMsg::GetPollingHints { reply }) {
                Ok(hints) => hints,
                Err(e) => {
                    tracing::warn!(error = %e, "Polling hints unavailable");
                    return;
                }
            };
        state.any_running = hints.any_running;

        match hints.running_selection {
            Some(id) => {
                let retarget = state.detail_target.as_ref() != Some(&id);
                if retarget || state.detail_timer.is_none() {
                    state.detail_target = Some(id);
                    if let Some(timer) = state.detail_timer.take() {
                        timer.abort();
                    }
                    // Fetch now; the tick handler keeps the cadence going.
                    let _ = myself.cast(PollerMsg::PollDetail);
                }
            }
            None => self.stop_detail_timer(state),
        }
    }

    fn schedule_list(&self, state: &mut PollSchedulerState, myself: &ActorRef<PollerMsg>) {
        if let Some(timer) = state.list_timer.take() {
            timer.abort();
        }
        let delay = list_interval(state);
        let tick = myself.clone();
        state.list_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tick.cast(PollerMsg::PollList);
        }));
    }

    fn schedule_detail(&self, state: &mut PollSchedulerState, myself: &ActorRef<PollerMsg>) {
        if let Some(timer) = state.detail_timer.take() {
            timer.abort();
        }
        let delay = state.detail_interval;
        let tick = myself.clone();
        state.detail_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tick.cast(PollerMsg::PollDetail);
        }));
    }

    fn stop_detail_timer(&self, state: &mut PollSchedulerState) {
        if let Some(timer) = state.detail_timer.take() {
            timer.abort();
        }
        state.detail_target = None;
    }
}

fn list_interval(state: &PollSchedulerState) -> Duration {
    if state.any_running {
        state.active_interval
    } else {
        state.idle_interval
    }
}
