//! Core of the generator streaming proxy.
//!
//! * [`job`] turns request parameters into the generator's job description.
//! * [`supervisor`] launches the generator and owns its lifecycle.
//! * [`relay`] moves generator output to a response sink chunk by chunk.
//! * [`session`] tracks one request from receipt to its terminal state.
//!
//! Nothing here knows about HTTP; the `server` crate wires these pieces to
//! axum.

pub mod job;
pub mod pcm;
pub mod relay;
pub mod session;
pub mod supervisor;

pub use job::{build, JobDescription, JobParameters, NoiseType, ParameterError, ToneMode};
pub use relay::{pump, ChannelSink, ChunkSink, ChunkSource, RelayError, RelayOptions};
pub use session::{SessionReport, SessionState, StreamSession};
pub use supervisor::{
    Chunk, ExitOutcome, GeneratorCommand, GeneratorProcess, Launcher, Supervisor, SupervisorError,
};
