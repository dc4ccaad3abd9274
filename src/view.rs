/// Which entity the dashboard is showing. Exactly one mode is active at any
/// instant; `Single` carries the model id it was selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Aggregated,
    Single(i64),
}

impl ViewMode {
    pub fn model_id(&self) -> Option<i64> {
        match self {
            ViewMode::Single(model_id) => Some(*model_id),
            ViewMode::Aggregated => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Market,
    Portfolio,
}

/// Captured at fetch start; a completion is applied only while the ticket
/// still matches the live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub kind: CycleKind,
    pub mode: ViewMode,
    pub generation: u64,
}

/// Single source of truth for the active view plus the generation counter
/// that invalidates in-flight fetches. Owned exclusively by the poller task,
/// so every transition is atomic with respect to completion checks.
#[derive(Debug)]
pub struct ViewState {
    mode: ViewMode,
    generation: u64,
}

impl ViewState {
    pub fn new() -> ViewState {
        ViewState {
            mode: ViewMode::Aggregated,
            generation: 0,
        }
    }

    pub fn current(&self) -> ViewMode {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Re-selecting the already-viewed model still bumps the generation: an
    /// explicit re-select forces a fresh fetch and supersedes in-flight ones.
    pub fn select_single(&mut self, model_id: i64) -> ViewMode {
        self.generation += 1;
        self.mode = ViewMode::Single(model_id);
        self.mode
    }

    pub fn select_aggregated(&mut self) -> ViewMode {
        self.generation += 1;
        self.mode = ViewMode::Aggregated;
        self.mode
    }

    /// Falls back to the aggregated view when the deleted model is the one on
    /// screen. Returns whether the mode changed; a no-op keeps the current
    /// generation so unrelated in-flight fetches stay valid.
    pub fn on_model_deleted(&mut self, model_id: i64) -> bool {
        if self.mode == ViewMode::Single(model_id) {
            self.select_aggregated();
            true
        } else {
            false
        }
    }

    /// Invalidates every outstanding ticket without changing the mode.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn ticket(&self, kind: CycleKind) -> FetchTicket {
        FetchTicket {
            kind,
            mode: self.mode,
            generation: self.generation,
        }
    }

    pub fn accepts(&self, ticket: &FetchTicket) -> bool {
        ticket.mode == self.mode && ticket.generation == self.generation
    }
}

impl Default for ViewState {
    fn default() -> Self {
        ViewState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_single_changes_mode_and_rejects_old_tickets() {
        let mut state = ViewState::new();
        let before = state.ticket(CycleKind::Portfolio);
        assert!(state.accepts(&before));

        let mode = state.select_single(7);
        assert_eq!(mode, ViewMode::Single(7));
        assert_eq!(state.current(), ViewMode::Single(7));
        assert!(!state.accepts(&before));
        assert!(state.accepts(&state.ticket(CycleKind::Portfolio)));
    }

    #[test]
    fn test_reselecting_same_model_still_invalidates_in_flight_fetch() {
        let mut state = ViewState::new();
        state.select_single(3);
        let in_flight = state.ticket(CycleKind::Portfolio);

        let mode = state.select_single(3);
        assert_eq!(mode, ViewMode::Single(3));
        assert!(
            !state.accepts(&in_flight),
            "explicit re-select must force a fresh fetch"
        );
    }

    #[test]
    fn test_rapid_mode_switches_accept_only_the_last_ticket() {
        let mut state = ViewState::new();
        state.select_single(1);
        let ticket_a = state.ticket(CycleKind::Portfolio);
        state.select_aggregated();
        let ticket_agg = state.ticket(CycleKind::Portfolio);
        state.select_single(2);
        let ticket_b = state.ticket(CycleKind::Portfolio);

        assert!(!state.accepts(&ticket_a));
        assert!(!state.accepts(&ticket_agg));
        assert!(state.accepts(&ticket_b));
    }

    #[test]
    fn test_same_generation_but_different_mode_is_stale() {
        let mut state = ViewState::new();
        state.select_single(5);
        let ticket = FetchTicket {
            kind: CycleKind::Portfolio,
            mode: ViewMode::Aggregated,
            generation: state.generation(),
        };
        assert!(!state.accepts(&ticket));
    }

    #[test]
    fn test_deleting_viewed_model_falls_back_to_aggregated() {
        let mut state = ViewState::new();
        state.select_single(9);
        let in_flight = state.ticket(CycleKind::Portfolio);

        assert!(state.on_model_deleted(9));
        assert_eq!(state.current(), ViewMode::Aggregated);
        assert!(
            !state.accepts(&in_flight),
            "a fetch for the deleted model must be discarded"
        );
    }

    #[test]
    fn test_deleting_other_model_is_a_no_op() {
        let mut state = ViewState::new();
        state.select_single(9);
        let generation = state.generation();
        let in_flight = state.ticket(CycleKind::Portfolio);

        assert!(!state.on_model_deleted(4));
        assert_eq!(state.current(), ViewMode::Single(9));
        assert_eq!(state.generation(), generation);
        assert!(state.accepts(&in_flight));
    }

    #[test]
    fn test_invalidate_keeps_mode() {
        let mut state = ViewState::new();
        state.select_single(2);
        let in_flight = state.ticket(CycleKind::Market);
        state.invalidate();
        assert_eq!(state.current(), ViewMode::Single(2));
        assert!(!state.accepts(&in_flight));
    }
}
