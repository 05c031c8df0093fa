//! Session-level error, aggregating every per-concern error of the crate.

use thiserror::Error;

use crate::buffer::BufferError;
use crate::capture::CaptureError;
use crate::codec::{AssetError, EncodeError};
use crate::config::ConfigError;
use crate::dsp::graph::GraphError;
use crate::dsp::mixer::MixerError;
use crate::dsp::renderer::RenderError;
use crate::remote::RemoteError;
use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("no render to export yet")]
    NothingRendered,

    #[error("render {ticket} was superseded and discarded")]
    StaleRender { ticket: u64 },
}
