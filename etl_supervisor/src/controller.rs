//! Wires a validated `PipelineConfig` into its running components and
//! drives the §4.7 lifecycle. The single-start discipline (take the
//! shutdown receivers and error receiver out of an `Option` exactly once)
//! is grounded on `siem_unified_pipeline`'s `Pipeline::start_workers`,
//! which takes its event receiver out of `Arc<RwLock<Option<_>>>` and
//! errors if called twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use etl_bus::{Bus, InMemoryKeyValueStore, KeyValueStore};
use etl_core::lifecycle::PipelineState;
use etl_core::PipelineConfig;
use etl_dedup::{CompiledExpr, Deduplicator, DeduplicatorConfig, StatelessTransformer};
use etl_ingest::{
    Ingestor, IngestorConfig, KafkaConnectionParams as IngestConnParams, RdKafkaSource,
};
use etl_join::{JoinExecutor, JoinExecutorConfig, LeftBuffer, RightBuffer};
use etl_schema::SchemaMapper;
use etl_sink::{ChPool, SinkExecutor, SinkExecutorConfig};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Result, SupervisorError};
use crate::mapping::{build_mapper, dedup_output_subject, schema_defaults};
use crate::subjects;

struct ComponentError {
    component: String,
    error: String,
}

/// The receivers that may only be taken once, across the controller's
/// entire lifetime: a second `start()` call finds this empty and errors.
struct StartupResources {
    shutdown_rxs: HashMap<String, watch::Receiver<bool>>,
    error_rx: mpsc::Receiver<ComponentError>,
}

pub struct PipelineController {
    pipeline_id: String,
    state: Arc<RwLock<PipelineState>>,
    ingestors: Vec<(String, Arc<Ingestor<RdKafkaSource>>)>,
    dedups: Vec<(String, Arc<Deduplicator>)>,
    join: Option<Arc<JoinExecutor>>,
    sink: Arc<SinkExecutor>,
    shutdown_txs: Vec<watch::Sender<bool>>,
    error_tx: mpsc::Sender<ComponentError>,
    startup: RwLock<Option<StartupResources>>,
    task_handles: RwLock<Vec<JoinHandle<()>>>,
}

impl PipelineController {
    /// Constructs every component described by `config`. Connects real
    /// Kafka consumers (one per declared topic) and expects a
    /// ClickHouse pool already built for `config.sink`.
    pub fn new(config: &PipelineConfig, bus: Arc<dyn Bus>, sink_pool: Arc<ChPool>) -> Result<Self> {
        config.validate()?;

        let join_enabled = config.join.as_ref().map(|j| j.enabled).unwrap_or(false);
        if config.source.topics.len() == 2 && !join_enabled {
            return Err(SupervisorError::Config(
                "two topics are configured but join is not enabled".to_string(),
            ));
        }

        let mapper = Arc::new(build_mapper(config)?);
        let dedup_kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());

        let mut ingestors = Vec::new();
        let mut dedups = Vec::new();
        let mut shutdown_txs = Vec::new();
        let mut shutdown_rxs = HashMap::new();

        for topic in &config.source.topics {
            let group_id = format!("etl-{}-{}", config.pipeline_id, topic.name);
            let conn = &config.source.connection_params;
            let params = IngestConnParams {
                brokers: &conn.brokers,
                group_id: &group_id,
                initial_offset: &topic.consumer_group_initial_offset,
                sasl_username: conn.sasl_username.as_deref(),
                sasl_password: conn.sasl_password.as_deref(),
                sasl_mechanism: conn.sasl_mechanism.as_deref(),
                tls_enabled: conn.tls_enabled,
                skip_auth: conn.skip_auth,
            };
            let source = RdKafkaSource::connect(&topic.name, params)?;
            let dedup_id_path = topic
                .deduplication
                .as_ref()
                .filter(|d| d.enabled)
                .map(|d| d.id_field.clone());

            let ingestor = Ingestor::new(
                source,
                bus.clone(),
                mapper.clone(),
                IngestorConfig {
                    topic: topic.name.clone(),
                    output_subject: subjects::ingest_subject(&topic.name),
                    dlq_subject: subjects::DLQ.to_string(),
                    dlq_component: "ingestor".to_string(),
                    dedup_id_path,
                    fetch_timeout: Duration::from_millis(500),
                    max_publish_retries: 3,
                },
            );
            let name = format!("ingestor:{}", topic.name);
            let (tx, rx) = watch::channel(false);
            shutdown_txs.push(tx);
            shutdown_rxs.insert(name.clone(), rx);
            ingestors.push((name, Arc::new(ingestor)));
        }

        let filter = config
            .filter_expression
            .as_deref()
            .map(CompiledExpr::compile)
            .transpose()
            .map_err(|e| SupervisorError::Config(format!("invalid filter_expression: {e}")))?;

        for topic in &config.source.topics {
            let transformer = StatelessTransformer::compile(&config.transformations)
                .map_err(|e| SupervisorError::Config(format!("invalid transformations: {e}")))?;

            // §6.1: a filter must compile *and* yield a boolean, and
            // transformations must evaluate cleanly, against this topic's
            // schema defaults — caught here, at startup, rather than on
            // the first real record a worker sees.
            let defaults = schema_defaults(&topic.source_schema());
            if let Some(f) = &filter {
                f.eval_bool(&defaults).map_err(|e| {
                    SupervisorError::Config(format!(
                        "filter_expression does not evaluate to a boolean for topic '{}': {e}",
                        topic.name
                    ))
                })?;
            }
            transformer.apply(&defaults).map_err(|e| {
                SupervisorError::Config(format!(
                    "transformations failed to evaluate for topic '{}': {e}",
                    topic.name
                ))
            })?;

            let window = topic
                .deduplication
                .as_ref()
                .filter(|d| d.enabled)
                .map(|d| d.window())
                .transpose()?;
            let dedup = Deduplicator::new(
                bus.clone(),
                dedup_kv.clone(),
                DeduplicatorConfig {
                    input_subject: subjects::ingest_subject(&topic.name),
                    output_subject: dedup_output_subject(config, topic)?,
                    dlq_subject: subjects::DLQ.to_string(),
                    window,
                    batch_size: 100,
                    max_wait: Duration::from_millis(250),
                },
                filter.clone(),
                transformer,
            );
            let name = format!("dedup:{}", topic.name);
            let (tx, rx) = watch::channel(false);
            shutdown_txs.push(tx);
            shutdown_rxs.insert(name.clone(), rx);
            dedups.push((name, Arc::new(dedup)));
        }

        let join = if join_enabled {
            let join_cfg = config.join.as_ref().expect("join_enabled implies join is Some");
            let left = join_cfg
                .left()
                .ok_or_else(|| SupervisorError::Config("join.sources is missing a left entry".to_string()))?;
            let right = join_cfg
                .right()
                .ok_or_else(|| SupervisorError::Config("join.sources is missing a right entry".to_string()))?;
            let left_kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
            let right_kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
            let exec = JoinExecutor::new(
                bus.clone(),
                LeftBuffer::new(left_kv, left.window()?),
                RightBuffer::new(right_kv, right.window()?),
                mapper.clone(),
                JoinExecutorConfig {
                    left_topic: left.source_id.clone(),
                    right_topic: right.source_id.clone(),
                    left_subject: subjects::JOIN_LEFT_IN.to_string(),
                    right_subject: subjects::JOIN_RIGHT_IN.to_string(),
                    results_subject: subjects::SINK_IN.to_string(),
                    dlq_subject: subjects::DLQ.to_string(),
                    batch_size: 100,
                    max_wait: Duration::from_millis(250),
                },
            );
            let (tx, rx) = watch::channel(false);
            shutdown_txs.push(tx);
            shutdown_rxs.insert("join".to_string(), rx);
            Some(Arc::new(exec))
        } else {
            None
        };

        let sink = Arc::new(SinkExecutor::new(
            bus,
            sink_pool,
            mapper,
            SinkExecutorConfig {
                input_subject: subjects::SINK_IN.to_string(),
                dlq_subject: subjects::DLQ.to_string(),
                table: config.sink.table.clone(),
                max_batch_size: config.sink.max_batch_size,
                max_delay: config.sink.max_delay()?,
                max_retries: 3,
            },
        ));
        let (sink_tx, sink_rx) = watch::channel(false);
        shutdown_txs.push(sink_tx);
        shutdown_rxs.insert("sink".to_string(), sink_rx);

        let (error_tx, error_rx) = mpsc::channel(64);

        Ok(Self {
            pipeline_id: config.pipeline_id.clone(),
            state: Arc::new(RwLock::new(PipelineState::Created)),
            ingestors,
            dedups,
            join,
            sink,
            shutdown_txs,
            error_tx,
            startup: RwLock::new(Some(StartupResources { shutdown_rxs, error_rx })),
            task_handles: RwLock::new(Vec::new()),
        })
    }

    pub async fn state(&self) -> PipelineState {
        *self.state.read().await
    }

    async fn transition(&self, next: PipelineState) -> Result<()> {
        let mut state = self.state.write().await;
        *state = (*state).transition(next)?;
        Ok(())
    }

    /// Spawns one task per component plus the error-watch and stats
    /// tasks. Errors with `AlreadyStarted` if a prior `start()` already
    /// took the startup resources.
    pub async fn start(&self) -> Result<()> {
        let mut rxs = {
            let mut guard = self.startup.write().await;
            let resources = guard.take().ok_or(SupervisorError::AlreadyStarted)?;
            drop(guard);
            // error_rx is consumed below; keep it alongside the receivers
            // map so a single take() protects both.
            let StartupResources { shutdown_rxs, error_rx } = resources;
            (shutdown_rxs, error_rx)
        };

        self.transition(PipelineState::Running).await?;

        let mut handles = Vec::new();

        for (name, ingestor) in &self.ingestors {
            let rx = rxs.0.remove(name).expect("shutdown receiver registered at construction");
            let ingestor = ingestor.clone();
            let error_tx = self.error_tx.clone();
            let component = name.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = ingestor.run(rx).await {
                    let _ = error_tx.send(ComponentError { component, error: e.to_string() }).await;
                }
            }));
        }

        for (name, dedup) in &self.dedups {
            let rx = rxs.0.remove(name).expect("shutdown receiver registered at construction");
            let dedup = dedup.clone();
            let error_tx = self.error_tx.clone();
            let component = name.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = dedup.run(rx).await {
                    let _ = error_tx.send(ComponentError { component, error: e.to_string() }).await;
                }
            }));
        }

        if let Some(join) = &self.join {
            let rx = rxs.0.remove("join").expect("join shutdown receiver registered at construction");
            let join = join.clone();
            let error_tx = self.error_tx.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = join.run(rx).await {
                    let _ = error_tx
                        .send(ComponentError { component: "join".to_string(), error: e.to_string() })
                        .await;
                }
            }));
        }

        {
            let rx = rxs.0.remove("sink").expect("sink shutdown receiver registered at construction");
            let sink = self.sink.clone();
            let error_tx = self.error_tx.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = sink.run(rx).await {
                    let _ = error_tx
                        .send(ComponentError { component: "sink".to_string(), error: e.to_string() })
                        .await;
                }
            }));
        }

        let mut error_rx = rxs.1;
        let error_state = self.state.clone();
        let pipeline_id = self.pipeline_id.clone();
        handles.push(tokio::spawn(async move {
            while let Some(err) = error_rx.recv().await {
                error!(pipeline_id = %pipeline_id, component = %err.component, error = %err.error, "component failed, transitioning pipeline to Failed");
                let mut state = error_state.write().await;
                if !state.is_terminal() {
                    if let Ok(next) = state.transition(PipelineState::Failed) {
                        *state = next;
                    }
                }
            }
        }));

        let stats_state = self.state.clone();
        let stats_pipeline_id = self.pipeline_id.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let state = *stats_state.read().await;
                info!(pipeline_id = %stats_pipeline_id, ?state, "pipeline stats snapshot");
                if state.is_terminal() {
                    break;
                }
            }
        }));

        *self.task_handles.write().await = handles;
        Ok(())
    }

    /// Halts ingestion only; downstream components keep draining
    /// already-buffered work until it runs dry.
    pub async fn pause(&self) -> Result<()> {
        self.transition(PipelineState::Pausing).await?;
        for (_, ingestor) in &self.ingestors {
            ingestor.pause();
        }
        self.transition(PipelineState::Paused).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.transition(PipelineState::Resuming).await?;
        for (_, ingestor) in &self.ingestors {
            ingestor.resume();
        }
        self.transition(PipelineState::Running).await
    }

    /// Signals every component to stop and waits for its task to return.
    pub async fn stop(&self) -> Result<()> {
        self.transition(PipelineState::Stopping).await?;
        for tx in &self.shutdown_txs {
            let _ = tx.send(true);
        }
        let handles = std::mem::take(&mut *self.task_handles.write().await);
        for handle in handles {
            let _ = handle.await;
        }
        self.transition(PipelineState::Stopped).await
    }

    /// Like `stop`, but aborts component tasks instead of waiting for
    /// them to drain.
    pub async fn terminate(&self) -> Result<()> {
        self.transition(PipelineState::Terminating).await?;
        for tx in &self.shutdown_txs {
            let _ = tx.send(true);
        }
        let handles = std::mem::take(&mut *self.task_handles.write().await);
        for handle in handles {
            handle.abort();
        }
        self.transition(PipelineState::Terminated).await
    }
}
