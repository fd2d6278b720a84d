//! The non-blocking submit/drain stage protocol.
//!
//! Every stateful transform (decoder, encoder, bitstream filter, resampler,
//! filter graph) is a [`StageSession`]. Callers push input with
//! [`StageSession::submit`] and pull output with [`StageSession::drain`]:
//!
//! ```text
//! loop:
//!   r = drain()
//!   Produced(u) -> handle(u), continue
//!   Eof         -> break
//!   NeedsInput  -> s = submit(next input, or None at end of stream)
//!                  Busy -> drain again before re-submitting the same input
//! ```
//!
//! Concrete stages implement the smaller [`StageEngine`] trait and are wrapped
//! in a [`Session`], which owns the state machine and rejects protocol misuse.
//! [`drive`], [`feed`] and [`flush`] implement the canonical caller loop.

use crate::error::{Error, ProtocolViolation, Result};
use crate::{record_counter, record_gauge};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, trace, warn};

/// Unique stage identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u64);

impl StageId {
    /// Create a new unique stage ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for StageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of stage behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Decoder,
    Encoder,
    BitstreamFilter,
    Resample,
    Filter,
}

impl StageKind {
    /// Short lowercase name, used as a log field and metric label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Decoder => "decoder",
            Self::Encoder => "encoder",
            Self::BitstreamFilter => "bsf",
            Self::Resample => "resample",
            Self::Filter => "filter",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet opened.
    Unopened,
    /// Accepting input.
    Open,
    /// End of stream submitted; only draining remains.
    Draining,
    /// Resources released.
    Closed,
}

/// Result of a submit call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The unit was consumed.
    Accepted,
    /// Internal buffers are full; drain, then submit the same unit again.
    Busy,
    /// End of stream was already submitted.
    Ended,
}

/// Result of a drain call.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStatus<T> {
    /// One output unit.
    Produced(T),
    /// No output until more input is submitted.
    NeedsInput,
    /// Everything was produced after end of stream.
    Eof,
}

impl<T> DrainStatus<T> {
    /// The produced unit, if any.
    pub fn into_produced(self) -> Option<T> {
        match self {
            Self::Produced(t) => Some(t),
            _ => None,
        }
    }

    /// Check for end of stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

/// What a session does when the caller breaks the protocol.
///
/// Both policies log the violation at error level first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolPolicy {
    /// Return [`Error::Protocol`].
    #[default]
    ReturnError,
    /// Panic with the violation message.
    Panic,
}

/// The submit/drain contract shared by every stage.
pub trait StageSession {
    /// Unit accepted by `submit`.
    type Input;
    /// Unit produced by `drain`.
    type Output;

    /// Stage id.
    fn id(&self) -> StageId;

    /// Stage kind.
    fn kind(&self) -> StageKind;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Allocate resources and start accepting input.
    fn open(&mut self) -> Result<()>;

    /// Submit one unit, or `None` to signal end of stream.
    fn submit(&mut self, input: Option<&Self::Input>) -> Result<SubmitStatus>;

    /// Try to produce one unit.
    fn drain(&mut self) -> Result<DrainStatus<Self::Output>>;

    /// Drop all buffered data and return to the post-open state.
    fn reset(&mut self) -> Result<()>;

    /// Release resources. A second close is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// Outcome of handing one unit to an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSubmit {
    Accepted,
    Full,
}

/// Outcome of asking an engine for output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutput<T> {
    /// One unit is ready.
    Ready(T),
    /// Nothing buffered.
    Pending,
    /// Nothing buffered and nothing will be after end of stream.
    Finished,
}

/// The stage-specific half of a session.
///
/// Engines never see protocol misuse: [`Session`] guarantees `send` is not
/// called after `send_eof`, and nothing is called before `open` or after `close`.
pub trait StageEngine {
    /// Unit accepted by `send`.
    type Input;
    /// Unit produced by `receive`.
    type Output;

    /// Stage kind.
    fn kind(&self) -> StageKind;

    /// Called once before any input.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Consume one unit, or report `Full` without consuming it.
    fn send(&mut self, input: &Self::Input) -> Result<EngineSubmit>;

    /// Enter flush mode.
    fn send_eof(&mut self) -> Result<EngineSubmit>;

    /// Inputs that stand for end of stream, such as an empty packet.
    fn is_flush_marker(_input: &Self::Input) -> bool {
        false
    }

    /// Produce one unit.
    fn receive(&mut self) -> Result<EngineOutput<Self::Output>>;

    /// Drop all buffered data.
    fn reset(&mut self) -> Result<()>;

    /// Release resources. Called at most once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Number of units currently buffered.
    fn buffered(&self) -> usize {
        0
    }
}

/// Protocol state machine wrapped around a [`StageEngine`].
pub struct Session<E: StageEngine> {
    id: StageId,
    engine: E,
    state: SessionState,
    policy: ProtocolPolicy,
    // Last submit returned Busy and no drain happened since.
    busy_pending: bool,
    needs_input: bool,
    ended_reported: bool,
    eof_reached: bool,
    failed: bool,
}

impl<E: StageEngine> Session<E> {
    /// Wrap an engine. The session starts unopened.
    pub fn new(engine: E) -> Self {
        Self {
            id: StageId::new(),
            engine,
            state: SessionState::Unopened,
            policy: ProtocolPolicy::default(),
            busy_pending: false,
            needs_input: true,
            ended_reported: false,
            eof_reached: false,
            failed: false,
        }
    }

    /// Set the protocol violation policy.
    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Protocol violation policy.
    pub fn policy(&self) -> ProtocolPolicy {
        self.policy
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The wrapped engine, mutably.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// True after a drain reported `NeedsInput` and before the next accepted submit.
    pub fn needs_input(&self) -> bool {
        self.needs_input
    }

    fn violation(&self, violation: ProtocolViolation) -> Error {
        error!(
            stage = %self.id,
            kind = %self.engine.kind(),
            %violation,
            "stage protocol violation"
        );
        if self.policy == ProtocolPolicy::Panic {
            panic!("stage protocol violation: {violation}");
        }
        Error::Protocol(violation)
    }

    fn check_usable(&self, operation: &'static str) -> Result<()> {
        let (stage, kind) = (self.id, self.engine.kind());
        match self.state {
            SessionState::Unopened => Err(self.violation(ProtocolViolation::NotOpen {
                stage,
                kind,
                operation,
            })),
            SessionState::Closed if self.failed => Err(Error::Closed(stage)),
            SessionState::Closed => Err(self.violation(ProtocolViolation::AfterClose {
                stage,
                kind,
                operation,
            })),
            SessionState::Open | SessionState::Draining => Ok(()),
        }
    }

    // Fatal engine errors close the stage so iteration cannot continue.
    fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            error!(stage = %self.id, kind = %self.engine.kind(), error = %err, "fatal stage error, closing");
            if let Err(close_err) = self.engine.close() {
                warn!(stage = %self.id, error = %close_err, "close after fatal error failed");
            }
            self.state = SessionState::Closed;
            self.failed = true;
        }
        err
    }
}

impl<E: StageEngine> StageSession for Session<E> {
    type Input = E::Input;
    type Output = E::Output;

    fn id(&self) -> StageId {
        self.id
    }

    fn kind(&self) -> StageKind {
        self.engine.kind()
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn open(&mut self) -> Result<()> {
        let (stage, kind) = (self.id, self.engine.kind());
        match self.state {
            SessionState::Unopened => {}
            SessionState::Closed => {
                return Err(self.violation(ProtocolViolation::AfterClose {
                    stage,
                    kind,
                    operation: "open",
                }))
            }
            SessionState::Open | SessionState::Draining => {
                return Err(self.violation(ProtocolViolation::AlreadyOpen { stage, kind }))
            }
        }
        self.engine.open().map_err(|e| self.fail(e))?;
        self.state = SessionState::Open;
        debug!(stage = %stage, kind = %kind, "stage opened");
        Ok(())
    }

    fn submit(&mut self, input: Option<&E::Input>) -> Result<SubmitStatus> {
        self.check_usable("submit")?;
        let (stage, kind) = (self.id, self.engine.kind());
        if self.busy_pending {
            return Err(self.violation(ProtocolViolation::ResubmitWithoutDrain { stage, kind }));
        }
        if self.state == SessionState::Draining {
            if self.ended_reported {
                return Err(self.violation(ProtocolViolation::SubmitAfterEnded { stage, kind }));
            }
            self.ended_reported = true;
            debug!(stage = %stage, kind = %kind, "submit after end of stream");
            return Ok(SubmitStatus::Ended);
        }

        let input = input.filter(|unit| !E::is_flush_marker(unit));
        let result = match input {
            Some(unit) => self.engine.send(unit),
            None => self.engine.send_eof(),
        };
        match result.map_err(|e| self.fail(e))? {
            EngineSubmit::Full => {
                self.busy_pending = true;
                record_counter!("stage.busy", 1, "kind" => kind.name());
                trace!(stage = %stage, kind = %kind, "stage busy");
                Ok(SubmitStatus::Busy)
            }
            EngineSubmit::Accepted => {
                self.needs_input = false;
                if input.is_some() {
                    record_counter!("stage.submitted", 1, "kind" => kind.name());
                    trace!(stage = %stage, kind = %kind, "unit accepted");
                } else {
                    self.state = SessionState::Draining;
                    debug!(stage = %stage, kind = %kind, "end of stream submitted");
                }
                Ok(SubmitStatus::Accepted)
            }
        }
    }

    fn drain(&mut self) -> Result<DrainStatus<E::Output>> {
        self.check_usable("drain")?;
        self.busy_pending = false;
        if self.eof_reached {
            return Ok(DrainStatus::Eof);
        }
        let (stage, kind) = (self.id, self.engine.kind());
        let output = self.engine.receive().map_err(|e| self.fail(e))?;
        record_gauge!("stage.buffered", self.engine.buffered() as f64, "kind" => kind.name());
        match output {
            EngineOutput::Ready(unit) => {
                record_counter!("stage.produced", 1, "kind" => kind.name());
                Ok(DrainStatus::Produced(unit))
            }
            EngineOutput::Pending | EngineOutput::Finished
                if self.state == SessionState::Draining =>
            {
                if matches!(output, EngineOutput::Pending) {
                    warn!(stage = %stage, kind = %kind, "engine pending after end of stream, treating as finished");
                }
                self.eof_reached = true;
                debug!(stage = %stage, kind = %kind, "stage drained to end of stream");
                Ok(DrainStatus::Eof)
            }
            EngineOutput::Pending | EngineOutput::Finished => {
                self.needs_input = true;
                Ok(DrainStatus::NeedsInput)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.check_usable("reset")?;
        self.engine.reset().map_err(|e| self.fail(e))?;
        self.state = SessionState::Open;
        self.busy_pending = false;
        self.needs_input = true;
        self.ended_reported = false;
        self.eof_reached = false;
        debug!(stage = %self.id, kind = %self.engine.kind(), "stage reset");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        debug!(stage = %self.id, kind = %self.engine.kind(), "stage closed");
        self.engine.close()
    }
}

impl<E: StageEngine> Drop for Session<E> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(err) = self.close() {
                warn!(stage = %self.id, error = %err, "close on drop failed");
            }
        }
    }
}

impl<E: StageEngine> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.engine.kind())
            .field("state", &self.state)
            .field("busy_pending", &self.busy_pending)
            .field("eof_reached", &self.eof_reached)
            .finish()
    }
}

/// Implement [`StageSession`] for a wrapper type by forwarding to a [`Session`] field.
#[macro_export]
macro_rules! delegate_stage_session {
    ($ty:ty, $field:ident, $input:ty, $output:ty) => {
        impl $crate::session::StageSession for $ty {
            type Input = $input;
            type Output = $output;

            fn id(&self) -> $crate::session::StageId {
                $crate::session::StageSession::id(&self.$field)
            }

            fn kind(&self) -> $crate::session::StageKind {
                $crate::session::StageSession::kind(&self.$field)
            }

            fn state(&self) -> $crate::session::SessionState {
                $crate::session::StageSession::state(&self.$field)
            }

            fn open(&mut self) -> $crate::error::Result<()> {
                $crate::session::StageSession::open(&mut self.$field)
            }

            fn submit(
                &mut self,
                input: Option<&$input>,
            ) -> $crate::error::Result<$crate::session::SubmitStatus> {
                $crate::session::StageSession::submit(&mut self.$field, input)
            }

            fn drain(
                &mut self,
            ) -> $crate::error::Result<$crate::session::DrainStatus<$output>> {
                $crate::session::StageSession::drain(&mut self.$field)
            }

            fn reset(&mut self) -> $crate::error::Result<()> {
                $crate::session::StageSession::reset(&mut self.$field)
            }

            fn close(&mut self) -> $crate::error::Result<()> {
                $crate::session::StageSession::close(&mut self.$field)
            }
        }
    };
}

fn stalled<S: StageSession + ?Sized>(stage: &S) -> Error {
    let violation = ProtocolViolation::Stalled {
        stage: stage.id(),
        kind: stage.kind(),
    };
    error!(stage = %stage.id(), kind = %stage.kind(), %violation, "stage protocol violation");
    Error::Protocol(violation)
}

/// The drain-first loop for a single unit: drain pending output, submit
/// `input` (end of stream for `None`), then drain everything it makes available.
///
/// A `Busy` submit is retried after draining. For `None` the stage is drained
/// to end of stream. Returns the number of units handed to `on_output`.
pub fn feed<S, F, E>(
    stage: &mut S,
    input: Option<&S::Input>,
    mut on_output: F,
) -> std::result::Result<usize, E>
where
    S: StageSession + ?Sized,
    F: FnMut(S::Output) -> std::result::Result<(), E>,
    E: From<Error>,
{
    let mut produced = 0;
    let mut submitted = false;
    let mut busy = false;
    loop {
        match stage.drain()? {
            DrainStatus::Produced(unit) => {
                busy = false;
                produced += 1;
                on_output(unit)?;
                continue;
            }
            DrainStatus::Eof => return Ok(produced),
            DrainStatus::NeedsInput if busy => return Err(stalled(stage).into()),
            DrainStatus::NeedsInput if submitted => return Ok(produced),
            DrainStatus::NeedsInput => {}
        }
        match stage.submit(input)? {
            SubmitStatus::Accepted => submitted = true,
            SubmitStatus::Busy => busy = true,
            SubmitStatus::Ended => return Ok(produced),
        }
    }
}

/// Signal end of stream and drain the stage to `Eof`.
pub fn flush<S, F, E>(stage: &mut S, on_output: F) -> std::result::Result<usize, E>
where
    S: StageSession + ?Sized,
    F: FnMut(S::Output) -> std::result::Result<(), E>,
    E: From<Error>,
{
    feed(stage, None, on_output)
}

/// Run the canonical drain-first loop over a whole input sequence, ending with a flush.
pub fn drive<S, I, F, E>(stage: &mut S, inputs: I, mut on_output: F) -> std::result::Result<usize, E>
where
    S: StageSession + ?Sized,
    I: IntoIterator<Item = S::Input>,
    F: FnMut(S::Output) -> std::result::Result<(), E>,
    E: From<Error>,
{
    let mut inputs = inputs.into_iter();
    let mut pending: Option<Option<S::Input>> = None;
    let mut busy = false;
    let mut produced = 0;
    loop {
        match stage.drain()? {
            DrainStatus::Produced(unit) => {
                busy = false;
                produced += 1;
                on_output(unit)?;
                continue;
            }
            DrainStatus::Eof => return Ok(produced),
            DrainStatus::NeedsInput if busy => return Err(stalled(stage).into()),
            DrainStatus::NeedsInput => {}
        }
        let unit = pending.take().unwrap_or_else(|| inputs.next());
        match stage.submit(unit.as_ref())? {
            SubmitStatus::Accepted => busy = false,
            SubmitStatus::Busy => {
                busy = true;
                pending = Some(unit);
            }
            SubmitStatus::Ended => return Ok(produced),
        }
    }
}
