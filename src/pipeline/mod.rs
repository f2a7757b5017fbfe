//! Synchronization primitives shared by the pipeline actors.
//!
//! ```text
//! Recorder ──Prepare{signal}──▶ Audio Encoder ─┐
//!          ──Prepare{signal}──▶ Video Encoder ─┴─▶ PhaseBarrier(2) ──▶ Recorder
//! ```
//!
//! The coordinator allocates one [`PhaseBarrier`] per transition and hands
//! each encoder a [`PhaseSignal`] with its request.

mod barrier;

pub use barrier::{PhaseBarrier, PhaseOutcome, PhaseSignal};
