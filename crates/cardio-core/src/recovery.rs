use crate::request::Direction;

/// Device readiness observed after a transfer, where checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The busy poll exhausted its budget without the device going idle.
    NotReady,
    /// No poll ran for this transfer (reads do not wait on programming).
    NotChecked,
}

/// Everything the transition function needs to know about one executed plan.
#[derive(Clone, Copy, Debug)]
pub struct Observation {
    pub direction: Direction,
    /// The failed plan covered more than one block.
    pub multi_block: bool,
    /// Any of the command, data, or stop phases failed.
    pub failed: bool,
    pub removable: bool,
    pub readiness: Readiness,
}

/// What the engine should do with the current plan position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// The transfer stuck; report its bytes and move on.
    Proceed,
    /// Replan the same range one block at a time to isolate the bad sector.
    RetrySingleBlock,
    /// Reinitialize the device, then retry from the current position.
    Reinit,
    /// Evict the medium and fail what is left of the request.
    Remove,
    /// Fail what is left of the request.
    Fail,
}

/// Per-request recovery bookkeeping. Created fresh for every request and
/// discarded with it.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryState {
    attempts: u32,
    level: u32,
    single_block: bool,
}

impl RecoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// How far the escalation has progressed: 0 = nothing tried yet,
    /// 1 = reinit scheduled, 2 = remove/fail scheduled.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_single_block(&self) -> bool {
        self.single_block
    }
}

/// Pure transition: one executed plan in, one action out.
///
/// A failed multi-block read degrades to single-block transfers without
/// consuming an escalation level; the point is to find which sector is bad,
/// not to assume the device is broken. Everything else climbs one level per
/// failed cycle: reinit first, then eviction for removable media, then a
/// hard failure. `NotReady` counts as a failed cycle even when the transfer
/// itself reported no error.
pub fn decide(obs: &Observation, state: &mut RecoveryState) -> Action {
    let not_ready = obs.readiness == Readiness::NotReady;
    if !obs.failed && !not_ready {
        return Action::Proceed;
    }

    state.attempts += 1;

    if obs.failed && obs.multi_block && obs.direction == Direction::Read {
        state.single_block = true;
        return Action::RetrySingleBlock;
    }

    let action = match state.level {
        0 => Action::Reinit,
        1 if obs.removable => Action::Remove,
        _ => Action::Fail,
    };
    state.level += 1;
    action
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(direction: Direction, multi_block: bool, removable: bool) -> Observation {
        Observation {
            direction,
            multi_block,
            failed: true,
            removable,
            readiness: Readiness::NotChecked,
        }
    }

    #[test]
    fn success_proceeds_without_consuming_anything() {
        let mut state = RecoveryState::new();
        let obs = Observation {
            direction: Direction::Read,
            multi_block: true,
            failed: false,
            removable: true,
            readiness: Readiness::NotChecked,
        };
        assert_eq!(decide(&obs, &mut state), Action::Proceed);
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn multi_block_read_failure_degrades_without_escalating() {
        let mut state = RecoveryState::new();
        let action = decide(&failure(Direction::Read, true, true), &mut state);
        assert_eq!(action, Action::RetrySingleBlock);
        assert!(state.is_single_block());
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn single_block_read_failure_escalates() {
        let mut state = RecoveryState::new();
        assert_eq!(
            decide(&failure(Direction::Read, false, true), &mut state),
            Action::Reinit
        );
        assert_eq!(state.level(), 1);
    }

    #[test]
    fn removable_ladder_is_reinit_then_remove() {
        let mut state = RecoveryState::new();
        let obs = failure(Direction::Write, false, true);
        assert_eq!(decide(&obs, &mut state), Action::Reinit);
        assert_eq!(decide(&obs, &mut state), Action::Remove);
        assert_eq!(decide(&obs, &mut state), Action::Fail);
    }

    #[test]
    fn fixed_ladder_is_reinit_then_fail() {
        let mut state = RecoveryState::new();
        let obs = failure(Direction::Write, false, false);
        assert_eq!(decide(&obs, &mut state), Action::Reinit);
        assert_eq!(decide(&obs, &mut state), Action::Fail);
        assert_eq!(decide(&obs, &mut state), Action::Fail);
    }

    #[test]
    fn not_ready_counts_as_a_failed_cycle() {
        let mut state = RecoveryState::new();
        let obs = Observation {
            direction: Direction::Write,
            multi_block: false,
            failed: false,
            removable: false,
            readiness: Readiness::NotReady,
        };
        assert_eq!(decide(&obs, &mut state), Action::Reinit);
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn every_failure_sequence_terminates() {
        // Whatever mix of failures arrives, the state machine reaches a
        // terminal action within a handful of cycles.
        let shapes = [
            failure(Direction::Read, true, true),
            failure(Direction::Read, false, true),
            failure(Direction::Write, true, false),
            failure(Direction::Write, false, true),
        ];
        for first in &shapes {
            for second in &shapes {
                let mut state = RecoveryState::new();
                let mut cycles = 0;
                let mut obs = *first;
                loop {
                    cycles += 1;
                    assert!(cycles <= 8, "recovery did not terminate");
                    match decide(&obs, &mut state) {
                        Action::Remove | Action::Fail => break,
                        Action::RetrySingleBlock => {
                            // The degraded retry fails too.
                            obs = *second;
                            obs = Observation {
                                multi_block: false,
                                ..obs
                            };
                        }
                        Action::Reinit | Action::Proceed => {}
                    }
                }
                assert!(cycles <= 4);
            }
        }
    }
}
