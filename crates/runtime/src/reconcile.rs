use common::{Direction, Position};

/// What the engine should do after comparing the fresh signal against the
/// currently held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Position already matches the signal, nothing to do.
    Hold,
    /// No open position; open one in the signalled direction.
    Open(Direction),
    /// Close the held position, then open in the signalled direction.
    Reverse(Direction),
}

/// Reconcile a signal against the held position.
///
/// With `reflatten_on_match` set, a position agreeing with the signal is
/// still cycled (closed and reopened), refreshing its entry against the
/// current market state instead of holding a possibly stale fill.
pub fn decide(
    signal: Direction,
    position: Option<&Position>,
    reflatten_on_match: bool,
) -> Decision {
    match position {
        None => Decision::Open(signal),
        Some(held) if held.direction == signal => {
            if reflatten_on_match {
                Decision::Reverse(signal)
            } else {
                Decision::Hold
            }
        }
        Some(_) => Decision::Reverse(signal),
    }
}
