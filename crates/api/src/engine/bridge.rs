//! Engine event consumer.
//!
//! The engine implementation writes [`EngineEvent`]s from its own tasks.
//! This single consumer applies them to the broker in arrival order. A
//! queue drain is settled on its own task: finishing a job waits for the
//! owner's socket to take its messages, and a slow reader must not hold
//! up events such as a disconnect.

use std::sync::Arc;

use aihub_core::engine::{EngineEvent, Enumerations, ExecutionEngine};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::engine::broker::JobBroker;

pub struct EngineBridge {
    broker: Arc<JobBroker>,
    engine: Arc<dyn ExecutionEngine>,
    enumerations: Arc<RwLock<Enumerations>>,
}

impl EngineBridge {
    pub fn new(
        broker: Arc<JobBroker>,
        engine: Arc<dyn ExecutionEngine>,
        enumerations: Arc<RwLock<Enumerations>>,
    ) -> Self {
        Self {
            broker,
            engine,
            enumerations,
        }
    }

    /// Consume events until the channel closes or `cancel` fires.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Engine bridge started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }
        tracing::info!("Engine bridge stopped");
    }

    pub async fn handle(&self, event: EngineEvent) {
        match event {
            EngineEvent::Progress {
                engine_job_id,
                node_id,
                value,
                max,
            } => {
                self.broker
                    .on_progress(&engine_job_id, &node_id, value, max)
                    .await;
            }
            EngineEvent::Message {
                engine_job_id,
                payload,
            } => self.broker.on_message(&engine_job_id, payload).await,
            EngineEvent::File {
                engine_job_id,
                data_type,
                action,
                data,
            } => {
                self.broker
                    .on_file(&engine_job_id, data_type, action, data)
                    .await;
            }
            EngineEvent::QueueDrained => {
                let broker = Arc::clone(&self.broker);
                tokio::spawn(async move { broker.on_queue_drained().await });
            }
            EngineEvent::Connected => {
                tracing::info!("Execution engine connected");
                self.refresh_enumerations().await;
                self.broker.on_engine_connected().await;
            }
            EngineEvent::Disconnected => {
                tracing::warn!("Execution engine disconnected");
                self.broker.on_engine_lost().await;
            }
        }
    }

    /// Reload sampler and scheduler names; keeps the old lists on failure.
    pub async fn refresh_enumerations(&self) {
        match self.engine.enumerations().await {
            Ok(fresh) => {
                tracing::info!(
                    samplers = fresh.samplers.len(),
                    schedulers = fresh.schedulers.len(),
                    "Engine enumerations loaded",
                );
                *self.enumerations.write().await = fresh;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to load engine enumerations"),
        }
    }
}
