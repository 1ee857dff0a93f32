use crate::gui_bridge::model::StationModel;
use anyhow::Context;
use log::{info, warn};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use thzcore::{EventBus, QcHandle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warp::{http::StatusCode, Filter};

type SharedModel = Arc<RwLock<StationModel>>;

fn read_model(state: &SharedModel) -> StationModel {
    match state.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn routes(
    state: SharedModel,
    handle: QcHandle,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());
    let handle_filter = warp::any().map(move || handle.clone());

    let status_route = warp::path("status")
        .and(warp::get())
        .and(state_filter.clone())
        .map(|state: SharedModel| {
            let model = read_model(&state);
            warp::reply::json(&json!({
                "status": model.status,
                "averaging": model.averaging,
                "classification": model.classification,
                "votes": model.votes,
                "last_robot_message": model.last_robot_message,
                "outcome": model.outcome,
            }))
        });

    let results_route = warp::path("results")
        .and(warp::get())
        .and(state_filter)
        .map(|state: SharedModel| {
            let model = read_model(&state);
            warp::reply::json(&json!({
                "results": model.results,
                "skipped": model.skipped,
            }))
        });

    let finish_route = warp::path("finish")
        .and(warp::post())
        .and(handle_filter.clone())
        .map(|handle: QcHandle| {
            handle.finish();
            info!("[bridge] finish requested");
            warp::reply::with_status(
                warp::reply::json(&json!({"status": "finishing"})),
                StatusCode::ACCEPTED,
            )
        });

    let cancel_route = warp::path("cancel")
        .and(warp::post())
        .and(handle_filter)
        .map(|handle: QcHandle| {
            handle.cancel();
            info!("[bridge] cancel requested");
            warp::reply::with_status(
                warp::reply::json(&json!({"status": "cancelling"})),
                StatusCode::ACCEPTED,
            )
        });

    status_route.or(results_route).or(finish_route).or(cancel_route)
}

/// HTTP surface for the operator: live status and results, finish and cancel.
pub struct OperatorBridge {
    state: SharedModel,
    tasks: Vec<JoinHandle<()>>,
}

impl OperatorBridge {
    /// Starts folding session events into the model. Call [`OperatorBridge::serve`]
    /// to expose it over HTTP.
    pub fn new(handle: &QcHandle, bus: &EventBus, cancel: CancellationToken) -> Self {
        let state: SharedModel = Arc::new(RwLock::new(StationModel {
            status: Some(handle.status()),
            ..StationModel::default()
        }));

        let mut events = bus.subscribe();
        let mut status = handle.watch_status();
        let state_for_events = state.clone();
        let listener = tokio::spawn(async move {
            loop {
                // queued events and status drain before cancellation ends the loop
                tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let Ok(mut model) = state_for_events.write() {
                                model.apply(&event);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("[bridge] dropped {skipped} events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = status.borrow_and_update().clone();
                        if let Ok(mut model) = state_for_events.write() {
                            model.status = Some(snapshot);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });

        Self {
            state,
            tasks: vec![listener],
        }
    }

    pub fn serve(
        &mut self,
        handle: QcHandle,
        address: SocketAddr,
        cancel: CancellationToken,
    ) -> anyhow::Result<SocketAddr> {
        let (bound, server) = warp::serve(routes(self.state.clone(), handle))
            .try_bind_with_graceful_shutdown(address, cancel.cancelled_owned())
            .with_context(|| format!("binding operator bridge to {address}"))?;
        info!("[bridge] operator bridge listening on http://{bound}");
        self.tasks.push(tokio::spawn(server));
        Ok(bound)
    }

    pub fn snapshot(&self) -> StationModel {
        read_model(&self.state)
    }
}

impl Drop for OperatorBridge {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
