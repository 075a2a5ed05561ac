//! Render request proxying.
//!
//! Forwards a job to its claimed worker and relays the worker's response.
//! The artifact is streamed: a pump reads the worker's body chunk by
//! chunk and feeds a bounded channel that backs the caller's response body.
//!
//! The exchange with the worker runs on a spawned task that owns the job's
//! [`JobTicket`], so dropping the HTTP handler never cancels a render. When
//! the worker's body ends, or fails, the task resolves the ticket, which
//! releases the worker and decrements demand. If the caller goes away the
//! task keeps draining the worker's response so the worker is only released
//! once it is done.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use mapanim_fleet::Worker;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::job::{JobOutcome, JobPhase, RenderJob};
use crate::ledger::JobTicket;
use crate::probe::ReadinessProber;

/// Header carrying the worker credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Chunks buffered between the worker and the caller.
const STREAM_BUFFER_CHUNKS: usize = 16;

/// Proxy tuning.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upper bound on a whole render, head to last byte.
    pub render_timeout: Duration,
    /// Credential sent when the caller supplies none.
    pub worker_api_key: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(3600),
            worker_api_key: None,
        }
    }
}

/// Forwards render jobs to workers.
#[derive(Clone)]
pub struct Proxy {
    client: reqwest::Client,
    prober: ReadinessProber,
    config: ProxyConfig,
}

impl Proxy {
    pub fn new(client: reqwest::Client, prober: ReadinessProber, config: ProxyConfig) -> Self {
        Self {
            client,
            prober,
            config,
        }
    }

    /// Send `job` to `worker` (claimed by `ticket`) and stream its response.
    ///
    /// The exchange with the worker runs on its own task, which owns the
    /// ticket. This call only waits for the response head (or an error
    /// before it). If the caller goes away first, the task still runs the
    /// render to completion and the worker stays claimed until it ends.
    pub async fn forward(
        &self,
        job: RenderJob,
        worker: Worker,
        credential: Option<HeaderValue>,
        ticket: JobTicket,
    ) -> Result<Response<Body>, GatewayError> {
        let address = worker.address;
        let (head_tx, head_rx) = oneshot::channel();
        tokio::spawn(self.clone().exchange(job, worker, credential, ticket, head_tx));

        head_rx
            .await
            .unwrap_or(Err(GatewayError::Interrupted { worker: address }))
    }

    /// Probe, send and pump. Resolves the ticket before reporting an error
    /// before the head, and after the body ends otherwise.
    async fn exchange(
        self,
        job: RenderJob,
        worker: Worker,
        credential: Option<HeaderValue>,
        ticket: JobTicket,
        head_tx: oneshot::Sender<Result<Response<Body>, GatewayError>>,
    ) {
        ticket.set_phase(JobPhase::Probing);
        if !self.prober.await_ready(worker.address).await {
            warn!(
                job_id = %ticket.id(),
                worker = %worker.name,
                "Worker never answered its health check; forwarding anyway"
            );
        }

        let url = format!("{}/render", worker.base_url());
        let worker = worker.address;

        let mut request = self
            .client
            .post(&url)
            .timeout(self.config.render_timeout)
            .header(header::CONTENT_TYPE, "application/json");

        let credential = credential.or_else(|| {
            self.config
                .worker_api_key
                .as_deref()
                .and_then(|key| HeaderValue::from_str(key).ok())
        });
        if let Some(credential) = credential {
            request = request.header(API_KEY_HEADER, credential);
        }

        ticket.set_phase(JobPhase::Routed);
        info!(
            job_id = %ticket.id(),
            worker = %worker,
            bytes = job.size_bytes(),
            "Proxying render job"
        );

        let upstream = match request.body(job.into_body()).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = classify(worker, e);
                ticket.resolve(JobOutcome::Failed);
                let _ = head_tx.send(Err(error));
                return;
            }
        };

        let status = upstream.status();
        info!(job_id = %ticket.id(), worker = %worker, status = %status, "Worker responded");

        let mut builder = Response::builder().status(status);
        if let Some(headers) = builder.headers_mut() {
            copy_end_to_end_headers(upstream.headers(), headers);
        }

        ticket.set_phase(JobPhase::Streaming);
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(STREAM_BUFFER_CHUNKS);
        let response = builder
            .body(Body::from_stream(ReceiverStream::new(rx)))
            .unwrap_or_else(|_| Response::new(Body::empty()));

        if head_tx.send(Ok(response)).is_err() {
            debug!(job_id = %ticket.id(), worker = %worker, "Caller left before the response head");
        }
        pump(upstream, tx, ticket, worker).await;
    }
}

fn classify(worker: SocketAddr, error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        warn!(worker = %worker, "Render timed out before the worker responded");
        GatewayError::RenderTimeout { worker }
    } else {
        warn!(worker = %worker, error = %error, "Upstream worker error");
        GatewayError::Upstream {
            worker,
            source: error,
        }
    }
}

async fn pump(
    upstream: reqwest::Response,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    ticket: JobTicket,
    worker: SocketAddr,
) {
    let mut body = upstream.bytes_stream();
    let mut caller_attached = true;
    let mut streamed: u64 = 0;
    let mut outcome = JobOutcome::Succeeded;

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                streamed += bytes.len() as u64;
                if caller_attached && tx.send(Ok(bytes)).await.is_err() {
                    caller_attached = false;
                    debug!(job_id = %ticket.id(), worker = %worker, "Caller disconnected; draining worker response");
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    warn!(job_id = %ticket.id(), worker = %worker, streamed, "Render timed out mid-stream");
                } else {
                    warn!(job_id = %ticket.id(), worker = %worker, streamed, error = %e, "Worker stream failed");
                }
                if caller_attached {
                    let _ = tx.send(Err(io::Error::other(e))).await;
                }
                outcome = JobOutcome::Failed;
                break;
            }
        }
    }

    debug!(job_id = %ticket.id(), worker = %worker, streamed, "Worker stream finished");
    ticket.resolve(outcome);
}

/// Hop-by-hop headers are connection-scoped and never relayed.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn copy_end_to_end_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) {
            to.append(name.clone(), value.clone());
        }
    }
}
