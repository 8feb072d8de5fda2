//! Linear load-state machine (spec §4.8).
//!
//! The teacher's `boot_main` runs its stages as a flat sequence of function calls with no
//! enforcement that, say, `clock_init` can't run before `init_framebuffer`; here the sequence
//! is safety-critical (§5's ordering guarantees, `protocol`'s no-allocation-after-snapshot
//! invariant) so the steps are reified into an enum with a single legal successor per state,
//! and `loader::run` is required to advance through it one step at a time.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    ConfigParsed,
    EntrySelected,
    KernelLoaded,
    ModulesLoaded,
    PagingBuilt,
    StackReady,
    VideoSet,
    ArrayBuilt,
    HandoverArmed,
    Jumped,
}

impl State {
    fn next(self) -> Option<State> {
        use State::*;
        Some(match self {
            Init => ConfigParsed,
            ConfigParsed => EntrySelected,
            EntrySelected => KernelLoaded,
            KernelLoaded => ModulesLoaded,
            ModulesLoaded => PagingBuilt,
            PagingBuilt => StackReady,
            StackReady => VideoSet,
            VideoSet => ArrayBuilt,
            ArrayBuilt => HandoverArmed,
            HandoverArmed => Jumped,
            Jumped => return None,
        })
    }
}

/// Tracks `loader::run`'s progress. Every transition must name the exact next state; anything
/// else is a bug in the orchestration code, not a recoverable runtime condition.
pub struct StateMachine(State);

impl StateMachine {
    pub fn new() -> Self {
        Self(State::Init)
    }

    pub fn current(&self) -> State {
        self.0
    }

    pub fn advance_to(&mut self, target: State) {
        match self.0.next() {
            Some(next) if next == target => self.0 = next,
            _ => panic!("illegal load-state transition: {:?} -> {:?}", self.0, target),
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
