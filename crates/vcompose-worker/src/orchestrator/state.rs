//! Composition state machine.
//!
//! ```text
//! INIT -> PREPARE_TIMELINE -> TRY(primary) -> VALIDATE -> SUCCESS
//!                 |              | fail           | fail
//!                 |              v                v
//!                 |          TRY(secondary) ... TRY(tertiary)
//!                 |                                 | fail
//!                 |                   cycle 0: RETRY -> TRY(primary)
//!                 v                   cycle 1: EXHAUSTED_MOCK
//!           EXHAUSTED_MOCK
//! ```
//!
//! Any non-terminal state moves to CANCELLED on a cancellation request.

use std::fmt;
use thiserror::Error;

use vcompose_models::{EncoderTier, JobStage};

/// Number of relaxed retry cycles after the first full pass.
pub const MAX_RETRY_CYCLES: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    PrepareTimeline,
    TryEncoder(EncoderTier),
    Validate(EncoderTier),
    Retry,
    Success,
    ExhaustedMock,
    Cancelled,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Success | State::ExhaustedMock | State::Cancelled)
    }

    pub fn stage(&self) -> JobStage {
        match self {
            State::Init => JobStage::Init,
            State::PrepareTimeline => JobStage::PrepareTimeline,
            State::TryEncoder(EncoderTier::Primary) => JobStage::TryPrimary,
            State::TryEncoder(EncoderTier::Secondary) => JobStage::TrySecondary,
            State::TryEncoder(EncoderTier::Tertiary) => JobStage::TryTertiary,
            State::Validate(_) => JobStage::Validate,
            State::Retry => JobStage::Retry,
            State::Success => JobStage::Success,
            State::ExhaustedMock => JobStage::ExhaustedMock,
            State::Cancelled => JobStage::Cancelled,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::TryEncoder(tier) => write!(f, "try_{}", tier),
            State::Validate(tier) => write!(f, "validate_{}", tier),
            other => f.write_str(other.stage().as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Start,
    TimelineReady,
    TimelineFailed,
    EncodeFinished,
    EncodeFailed,
    ValidationPassed,
    ValidationFailed,
    ParamsRelaxed,
    CancelRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {state} on {event:?}")]
pub struct InvalidTransition {
    pub state: State,
    pub event: Event,
}

/// Pure transition function. `cycle` is the current retry cycle.
pub fn transition(state: State, event: Event, cycle: u8) -> Result<(State, u8), InvalidTransition> {
    let next = match (state, event) {
        (s, Event::CancelRequested) if !s.is_terminal() => (State::Cancelled, cycle),
        (State::Init, Event::Start) => (State::PrepareTimeline, cycle),
        (State::PrepareTimeline, Event::TimelineReady) => (State::TryEncoder(EncoderTier::Primary), cycle),
        (State::PrepareTimeline, Event::TimelineFailed) => (State::ExhaustedMock, cycle),
        (State::TryEncoder(tier), Event::EncodeFinished) => (State::Validate(tier), cycle),
        (State::TryEncoder(tier), Event::EncodeFailed) | (State::Validate(tier), Event::ValidationFailed) => {
            (after_failure(tier, cycle), cycle)
        }
        (State::Validate(_), Event::ValidationPassed) => (State::Success, cycle),
        (State::Retry, Event::ParamsRelaxed) => (State::TryEncoder(EncoderTier::Primary), cycle + 1),
        (state, event) => return Err(InvalidTransition { state, event }),
    };
    Ok(next)
}

fn after_failure(tier: EncoderTier, cycle: u8) -> State {
    match tier.next() {
        Some(next) => State::TryEncoder(next),
        None if cycle < MAX_RETRY_CYCLES => State::Retry,
        None => State::ExhaustedMock,
    }
}

/// Reported percentage on entering `state`. Strictly increasing along every
/// valid path through the machine.
pub fn progress_percent(state: State, cycle: u8) -> u8 {
    let tier_offset = |tier: EncoderTier| match tier {
        EncoderTier::Primary => 0,
        EncoderTier::Secondary => 12,
        EncoderTier::Tertiary => 24,
    };
    let cycle_offset = if cycle == 0 { 0 } else { 40 };

    match state {
        State::Init => 0,
        State::PrepareTimeline => 5,
        State::TryEncoder(tier) => 20 + cycle_offset + tier_offset(tier),
        State::Validate(tier) => 26 + cycle_offset + tier_offset(tier),
        State::Retry => 56,
        State::Success | State::ExhaustedMock => 100,
        State::Cancelled => 0,
    }
}

/// Percentages an attempt may report while encoding, above its try state.
/// Stays below the matching validate state.
pub const ENCODE_BAND: u8 = 5;

/// Reported percentage for `fraction` of the attempt in `tier` and `cycle`.
pub fn encode_band_percent(tier: EncoderTier, cycle: u8, fraction: f64) -> u8 {
    let base = progress_percent(State::TryEncoder(tier), cycle);
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    base + (fraction * ENCODE_BAND as f64).floor() as u8
}

/// Current state plus retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine {
    state: State,
    cycle: u8,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: State::Init,
            cycle: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn cycle(&self) -> u8 {
        self.cycle
    }

    /// Force the terminal exhausted state after an invalid transition.
    pub fn exhaust(&mut self) {
        self.state = State::ExhaustedMock;
    }

    pub fn fire(&mut self, event: Event) -> Result<State, InvalidTransition> {
        let (state, cycle) = transition(self.state, event, self.cycle)?;
        self.state = state;
        self.cycle = cycle;
        Ok(state)
    }
}
