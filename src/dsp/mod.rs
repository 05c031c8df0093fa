//! DSP Engine — the vocal effect chain, its live and offline hosts, and the preview mixer.
//!
//! The same graph code powers live monitoring (device callback via the
//! `LiveMonitor`) and the offline render that produces the final take, so
//! what the singer hears is what gets exported.

pub mod convolver;
pub mod delay;
pub mod graph;
pub mod mixer;
pub mod monitor;
pub mod renderer;
