// GET /stream: validate, launch the generator, relay its stdout as the body

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        HeaderName, HeaderValue,
    },
    response::Response,
};
use stream_core::job;
use stream_core::pcm;
use stream_core::relay::{self, ChannelSink, RelayError};
use stream_core::session::{SessionState, StreamSession};
use stream_core::supervisor::{ExitOutcome, GeneratorProcess};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::validation::{validate_stream_request, StreamQuery};
use crate::AppState;

pub const X_AUDIO_FORMAT: HeaderName = HeaderName::from_static("x-audio-format");
pub const X_AUDIO_SAMPLERATE: HeaderName = HeaderName::from_static("x-audio-samplerate");
pub const X_AUDIO_BITDEPTH: HeaderName = HeaderName::from_static("x-audio-bitdepth");
pub const X_AUDIO_CHANNELS: HeaderName = HeaderName::from_static("x-audio-channels");
pub const X_AUDIO_ENCODING: HeaderName = HeaderName::from_static("x-audio-encoding");
pub const X_AUDIO_ENDIANNESS: HeaderName = HeaderName::from_static("x-audio-endianness");
pub const X_STREAM_ID: HeaderName = HeaderName::from_static("x-stream-id");

const MB: f64 = 1024.0 * 1024.0;

pub async fn stream_audio(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    state.metrics.record_request();
    let mut session = StreamSession::new();
    let stream_id = session.id();

    let params = match validate_stream_request(&query, state.config.max_duration_minutes) {
        Ok(params) => params,
        Err(e) => {
            warn!(%stream_id, "Rejected stream request: {}", e);
            state.metrics.record_rejected();
            return Err(reject(session, e));
        }
    };

    info!(
        %stream_id,
        freq = params.frequency(),
        end_freq = ?params.end_frequency(),
        duration = params.duration_minutes(),
        noise = %params.noise(),
        mode = %params.mode(),
        carrier = params.carrier(),
        amplitude = params.amplitude(),
        "Streaming request"
    );

    let description = job::build(&params);
    session.validated(params)?;
    session.advance(SessionState::Generating)?;

    let mut process = match state.launcher.start(&description).await {
        Ok(process) => process,
        Err(e) => {
            state.metrics.record_spawn_failure();
            return Err(reject(session, e.into()));
        }
    };

    if let Err(e) = process
        .await_output(state.config.chunk_size, state.config.startup_timeout())
        .await
    {
        if let Err(cleanup) = process.terminate().await {
            warn!(%stream_id, "Cleanup after failed start: {}", cleanup);
        }
        state.metrics.record_spawn_failure();
        return Err(reject(session, e.into()));
    }

    session.advance(SessionState::Streaming)?;
    info!(%stream_id, pid = ?process.id(), "Generator running, streaming audio");

    let (sink, rx) = ChannelSink::channel();
    state.metrics.record_stream_started();
    tokio::spawn(relay_session(process, sink, session, state));

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(pcm::CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(X_AUDIO_FORMAT, HeaderValue::from_static("raw"));
    headers.insert(X_AUDIO_SAMPLERATE, HeaderValue::from(pcm::SAMPLE_RATE));
    headers.insert(X_AUDIO_BITDEPTH, HeaderValue::from(pcm::BIT_DEPTH));
    headers.insert(X_AUDIO_CHANNELS, HeaderValue::from(pcm::CHANNELS));
    headers.insert(X_AUDIO_ENCODING, HeaderValue::from_static(pcm::ENCODING));
    headers.insert(X_AUDIO_ENDIANNESS, HeaderValue::from_static(pcm::ENDIANNESS));
    if let Ok(value) = HeaderValue::from_str(&stream_id.to_string()) {
        headers.insert(X_STREAM_ID, value);
    }
    Ok(response)
}

/// Close out a session that ended before streaming began and hand back the
/// error. Error responses carry no stream id, so the report is only logged
/// and never takes a slot in the session registry.
fn reject(mut session: StreamSession, err: ApiError) -> ApiError {
    match session.fail(0, err.to_string()) {
        Ok(()) => debug!(stream_id = %session.id(), state = ?session.state(), "Session ended before streaming"),
        Err(e) => warn!(stream_id = %session.id(), "{}", e),
    }
    err
}

/// Owns the generator for the lifetime of the response body. The sink is
/// dropped only after the session is recorded, so a client that has read
/// the whole body can immediately look the session up.
async fn relay_session(
    mut process: GeneratorProcess,
    mut sink: ChannelSink,
    mut session: StreamSession,
    state: AppState,
) {
    let stream_id = session.id();
    let started = Instant::now();
    let options = state.config.relay_options();

    let finished = match relay::pump(&mut process, &mut sink, &options).await {
        Ok(bytes) => match process.exit_status() {
            Ok(ExitOutcome::Success) => {
                info!(
                    %stream_id,
                    bytes,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Stream completed: {:.2} MB sent",
                    bytes as f64 / MB
                );
                session.complete(bytes)
            }
            Ok(ExitOutcome::Failure { code, diagnostics }) => {
                let reason = match code {
                    Some(code) => format!("generator exited with status {}: {}", code, diagnostics),
                    None => format!("generator killed by signal: {}", diagnostics),
                };
                error!(%stream_id, bytes, "Stream failed: {}", reason);
                session.fail(bytes, reason)
            }
            Err(e) => {
                error!(%stream_id, bytes, "Stream ended without exit status: {}", e);
                session.fail(bytes, e.to_string())
            }
        },
        Err(RelayError::SinkClosed { bytes }) => {
            info!(
                %stream_id,
                bytes,
                "Client disconnected after {:.2} MB",
                bytes as f64 / MB
            );
            session.abort(bytes)
        }
        Err(RelayError::GeneratorFailed { bytes, source }) => {
            let reason = match process.exit_status() {
                Ok(ExitOutcome::Failure { diagnostics, .. }) if !diagnostics.is_empty() => {
                    format!("{}: {}", source, diagnostics)
                }
                _ => source.to_string(),
            };
            error!(%stream_id, bytes, "Generator read failed: {}", reason);
            session.fail(bytes, reason)
        }
    };
    if let Err(e) = finished {
        warn!(%stream_id, "{}", e);
    }

    if let Err(e) = process.terminate().await {
        warn!(%stream_id, "Generator cleanup failed: {}", e);
    }

    state.metrics.record_stream_finished(session.state(), session.bytes());
    state.sessions.record(session.report());
    drop(sink);
}
