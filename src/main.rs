// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::{
    runtime::{
        controller::{Action, Config as ControllerConfig},
        reflector, watcher,
        watcher::Config,
        Controller, WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use pdb_operator::{
    config::OperatorConfig,
    constants::{
        CONTROLLER_DIRECT_PDB, CONTROLLER_POLICY, CONTROLLER_WORKLOAD,
        ERROR_REQUEUE_DURATION_SECS, HEALTHZ_PATH, METRICS_SERVER_PATH, READYZ_PATH,
        TOKIO_WORKER_THREADS,
    },
    context::Context,
    crd::AvailabilityPolicy,
    metrics,
    reconcilers::{reconcile_direct_pdb, reconcile_policy, reconcile_workload, ReconcileOutcome},
    selector::{find_policies_for_workload, PolicyFanout},
    store::ObjectKey,
    watch::{self, WatchTracker},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] pdb_operator::errors::ReconcileError);

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("pdb-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    let config = OperatorConfig::parse();
    info!(
        version = %config.operator_version,
        namespace = %config.pod_namespace,
        direct_pdb = config.enable_pdb,
        workers = config.workers(),
        strict_function_inference = config.strict_function_inference,
        "Starting PDB operator"
    );
    match config.tracing_endpoint() {
        Some(endpoint) => info!(
            endpoint,
            sample_rate = config.sample_rate(),
            "Trace collector configured; spans are exported by the log pipeline"
        ),
        None => debug!("No trace collector configured"),
    }

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let grace = config.shutdown_grace();
    let bind_address = config.metrics_bind_address.clone();
    let ctx = Arc::new(Context::for_kube(client.clone(), config));

    let ready = Arc::new(AtomicBool::new(false));
    let mut server = tokio::spawn(run_metrics_server(bind_address, ready.clone()));

    let (workload_stop, workload_stop_rx) = oneshot::channel::<()>();
    let (policy_stop, policy_stop_rx) = oneshot::channel::<()>();
    let workload = run_workload_controller(client.clone(), ctx.clone(), workload_stop_rx);
    let policy = run_policy_controller(client, ctx.clone(), policy_stop_rx);
    tokio::pin!(workload, policy);

    info!("Starting all controllers");
    ready.store(true, Ordering::Relaxed);

    // Controllers should never exit on their own - if one does, exit the process
    tokio::select! {
        result = &mut workload => {
            error!("CRITICAL: workload controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("workload controller exited unexpectedly without error")
        }
        result = &mut policy => {
            error!("CRITICAL: AvailabilityPolicy controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("AvailabilityPolicy controller exited unexpectedly without error")
        }
        result = &mut server => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        () = shutdown_signal() => {}
    }

    info!(
        grace_seconds = grace.as_secs(),
        "Shutdown signal received, draining in-flight reconciles"
    );
    ready.store(false, Ordering::Relaxed);
    let _ = workload_stop.send(());
    let _ = policy_stop.send(());

    let drained = tokio::time::timeout(grace, async {
        let (workload_result, policy_result) = tokio::join!(&mut workload, &mut policy);
        if let Err(e) = workload_result {
            warn!(error = %e, "Workload controller stopped with an error");
        }
        if let Err(e) = policy_result {
            warn!(error = %e, "AvailabilityPolicy controller stopped with an error");
        }
    })
    .await;
    if drained.is_err() {
        warn!("Grace period elapsed, cancelling remaining reconciles");
    }
    ctx.shutdown.cancel();
    server.abort();

    info!("PDB operator stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Run the workload controller.
///
/// Reconciles Deployments with either the policy-aware or the annotation-only
/// reconciler depending on `ENABLE_PDB`. Managed PDB edits and deletions map
/// back to their owning Deployment. In policy-aware mode, policy changes fan
/// out to every Deployment the policy selects.
async fn run_workload_controller(
    client: Client,
    ctx: Arc<Context>,
    stop: oneshot::Receiver<()>,
) -> Result<()> {
    let direct = ctx.config.enable_pdb;
    let strict = ctx.config.strict_function_inference;
    info!(direct, "Starting workload controller");

    let deployments = Api::<Deployment>::all(client.clone());
    let pdbs = Api::<PodDisruptionBudget>::all(client.clone());

    let (reader, writer) = reflector::store();
    let deployment_stream = watch::filtered(
        watcher(deployments, Config::default())
            .default_backoff()
            .reflect(writer),
        WatchTracker::new(watch::workload_changed),
    );
    let pdb_stream = watch::filtered(
        watcher(pdbs, Config::default()).default_backoff(),
        WatchTracker::new(watch::pdb_changed),
    );
    debug!("Deployment and PodDisruptionBudget watches created");

    let deployment_index = reader.clone();
    let mut controller = Controller::for_stream(deployment_stream, reader)
        .with_config(ControllerConfig::default().concurrency(ctx.config.workers()))
        .watches_stream(pdb_stream, |pdb| watch::pdb_to_workload(&pdb));

    if !direct {
        let cache = ctx.cache.clone();
        let fanout = PolicyFanout::new();
        controller = controller.watches(
            Api::<AvailabilityPolicy>::all(client),
            Config::default(),
            move |policy| {
                cache.invalidate_policy(&policy.name_any());
                fanout.workloads_for(&deployment_index, &policy, strict)
            },
        );
    }

    controller
        .graceful_shutdown_on(async move {
            let _ = stop.await;
        })
        .run(reconcile_workload_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `AvailabilityPolicy` controller.
///
/// Deployment changes re-trigger every policy that selects them so the
/// reported component list stays current.
async fn run_policy_controller(
    client: Client,
    ctx: Arc<Context>,
    stop: oneshot::Receiver<()>,
) -> Result<()> {
    info!("Starting AvailabilityPolicy controller");
    let strict = ctx.config.strict_function_inference;

    let controller = Controller::new(
        Api::<AvailabilityPolicy>::all(client.clone()),
        Config::default(),
    );
    let policies = controller.store();

    controller
        .with_config(ControllerConfig::default().concurrency(ctx.config.workers()))
        .watches(
            Api::<Deployment>::all(client),
            Config::default(),
            move |deployment| find_policies_for_workload(&policies, &deployment, strict),
        )
        .graceful_shutdown_on(async move {
            let _ = stop.await;
        })
        .run(reconcile_policy_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for Deployments
async fn reconcile_workload_wrapper(
    deployment: Arc<Deployment>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let key = ObjectKey::new(
        deployment.namespace().as_deref().unwrap_or_default(),
        &deployment.name_any(),
    );
    let controller = if ctx.config.enable_pdb {
        CONTROLLER_DIRECT_PDB
    } else {
        CONTROLLER_WORKLOAD
    };
    let scope = ctx.scope(controller, &key, None);
    let span = scope.span().clone();
    let start = Instant::now();

    let result = if ctx.config.enable_pdb {
        reconcile_direct_pdb(&ctx, &key, &scope)
            .instrument(span.clone())
            .await
    } else {
        reconcile_workload(&ctx, &key, &scope)
            .instrument(span.clone())
            .await
    };

    span.in_scope(|| finish(controller, start, result))
}

/// Reconcile wrapper for `AvailabilityPolicy`
async fn reconcile_policy_wrapper(
    policy: Arc<AvailabilityPolicy>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = policy.name_any();
    let scope = ctx.scope(CONTROLLER_POLICY, &ObjectKey::cluster(&name), None);
    let span = scope.span().clone();
    let start = Instant::now();

    let result = reconcile_policy(&ctx, &name, &scope)
        .instrument(span.clone())
        .await;

    span.in_scope(|| finish(CONTROLLER_POLICY, start, result))
}

/// Record the outcome of a reconcile and convert it for the runtime.
fn finish(
    controller: &str,
    start: Instant,
    result: Result<ReconcileOutcome, pdb_operator::errors::ReconcileError>,
) -> Result<Action, ReconcileError> {
    let elapsed = start.elapsed();
    match result {
        Ok(outcome) => {
            if outcome.requeue {
                metrics::record_reconciliation_requeue(controller, elapsed);
            } else {
                metrics::record_reconciliation_success(controller, elapsed);
            }
            debug!(duration_ms = elapsed.as_millis(), "Reconcile finished");
            Ok(outcome.into_action())
        }
        Err(e) => {
            metrics::record_reconciliation_error(controller, elapsed);
            error!(kind = e.kind().as_str(), "Reconcile failed: {e}");
            Err(e.into())
        }
    }
}

/// Error policy for both controllers
fn error_policy<K>(_resource: Arc<K>, _err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Serve `/metrics`, `/healthz` and `/readyz`.
async fn run_metrics_server(bind_address: String, ready: Arc<AtomicBool>) -> Result<()> {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route(HEALTHZ_PATH, get(|| async { "ok" }))
        .route(READYZ_PATH, get(readyz_handler))
        .with_state(ready);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn readyz_handler(State(ready): State<Arc<AtomicBool>>) -> StatusCode {
    if ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
