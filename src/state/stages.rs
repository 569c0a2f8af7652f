use std::{collections::HashMap, time::Duration};

/// Budget applied to stage names the schedule does not recognize.
const DEFAULT_STAGE_BUDGET: Duration = Duration::from_secs(6 * 60);

/// Named phases of the workshop lifecycle, in the order rooms move through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Participants gather; nothing is timed against the group yet.
    Lobby,
    /// The facilitator greets the group and the topic is explored.
    Discovery,
    /// Free-form idea collection, summarized in the background.
    IdeaDump,
    /// Ideas are condensed into a plan for the piece.
    Planning,
    /// The facilitator produces the living draft.
    RoughDraft,
    /// The group edits the pasted draft together.
    Editing,
    /// Time-bounded wrap-up; ended by the deferred close timer, never by the tick loop.
    Final,
    /// Absorbing terminal state.
    Closed,
}

impl Stage {
    /// Full forward path through the workshop, terminal state last.
    pub const SEQUENCE: [Stage; 8] = [
        Stage::Lobby,
        Stage::Discovery,
        Stage::IdeaDump,
        Stage::Planning,
        Stage::RoughDraft,
        Stage::Editing,
        Stage::Final,
        Stage::Closed,
    ];

    /// Parse a persisted stage name.
    ///
    /// Unknown names yield `None` so a malformed record degrades instead of
    /// crashing the tick loop.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "LOBBY" => Some(Stage::Lobby),
            "DISCOVERY" => Some(Stage::Discovery),
            "IDEA_DUMP" => Some(Stage::IdeaDump),
            "PLANNING" => Some(Stage::Planning),
            "ROUGH_DRAFT" => Some(Stage::RoughDraft),
            "EDITING" => Some(Stage::Editing),
            "FINAL" => Some(Stage::Final),
            "CLOSED" => Some(Stage::Closed),
            _ => None,
        }
    }

    /// Stage name as persisted in room records.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Lobby => "LOBBY",
            Stage::Discovery => "DISCOVERY",
            Stage::IdeaDump => "IDEA_DUMP",
            Stage::Planning => "PLANNING",
            Stage::RoughDraft => "ROUGH_DRAFT",
            Stage::Editing => "EDITING",
            Stage::Final => "FINAL",
            Stage::Closed => "CLOSED",
        }
    }

    /// Stage immediately following this one in [`Stage::SEQUENCE`].
    ///
    /// The terminal state maps to itself. `Final` maps to `Closed` because it
    /// is the state immediately preceding the terminal one, but that edge is
    /// only taken by explicit application decisions (the deferred close
    /// timer); the tick loop treats `Final` as held and never asks.
    pub fn next(self) -> Stage {
        match self {
            Stage::Lobby => Stage::Discovery,
            Stage::Discovery => Stage::IdeaDump,
            Stage::IdeaDump => Stage::Planning,
            Stage::Planning => Stage::RoughDraft,
            Stage::RoughDraft => Stage::Editing,
            Stage::Editing => Stage::Final,
            Stage::Final => Stage::Closed,
            Stage::Closed => Stage::Closed,
        }
    }

    /// Whether the stage is the absorbing terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Closed)
    }

    /// Whether the stage is time-bounded but exempt from tick-driven advancing.
    pub fn is_held(self) -> bool {
        matches!(self, Stage::Final)
    }
}

/// Next stage name for a persisted stage value.
///
/// Unrecognized names and the terminal state are returned unchanged so
/// callers can detect the no-op and skip work instead of failing.
pub fn advance(stage: &str) -> &str {
    match Stage::parse(stage) {
        Some(stage) => stage.next().as_str(),
        None => stage,
    }
}

/// Per-stage time budgets used when arming stage deadlines.
#[derive(Debug, Clone)]
pub struct StageSchedule {
    budgets: HashMap<Stage, Duration>,
    default_budget: Duration,
}

impl StageSchedule {
    /// Build a schedule from an explicit budget table and fallback budget.
    pub fn new(budgets: HashMap<Stage, Duration>, default_budget: Duration) -> Self {
        Self {
            budgets,
            default_budget,
        }
    }

    /// Budget for a persisted stage name.
    ///
    /// Unknown names fall back to the default budget so one malformed record
    /// cannot stall processing for the rest of the rooms.
    pub fn budget_for(&self, stage: &str) -> Duration {
        Stage::parse(stage)
            .and_then(|stage| self.budgets.get(&stage).copied())
            .unwrap_or(self.default_budget)
    }
}

impl Default for StageSchedule {
    fn default() -> Self {
        Self {
            budgets: builtin_budgets(),
            default_budget: DEFAULT_STAGE_BUDGET,
        }
    }
}

/// Built-in budget table shipped with the binary; configuration overrides
/// individual entries.
pub fn builtin_budgets() -> HashMap<Stage, Duration> {
    HashMap::from([
        (Stage::Lobby, Duration::from_secs(5 * 60)),
        (Stage::Discovery, Duration::from_secs(8 * 60)),
        (Stage::IdeaDump, Duration::from_secs(10 * 60)),
        (Stage::Planning, Duration::from_secs(10 * 60)),
        (Stage::RoughDraft, Duration::from_secs(20 * 60)),
        (Stage::Editing, Duration::from_secs(15 * 60)),
        (Stage::Final, Duration::from_secs(10 * 60)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_round_trips_through_names() {
        for stage in Stage::SEQUENCE {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn advance_walks_the_sequence_in_order() {
        for window in Stage::SEQUENCE.windows(2) {
            assert_eq!(advance(window[0].as_str()), window[1].as_str());
        }
    }

    #[test]
    fn advance_is_a_no_op_on_terminal_and_unknown_input() {
        assert_eq!(advance("CLOSED"), "CLOSED");
        assert_eq!(advance("INTERMISSION"), "INTERMISSION");
        assert_eq!(advance(""), "");
    }

    #[test]
    fn final_precedes_closed_and_is_held() {
        assert_eq!(Stage::Final.next(), Stage::Closed);
        assert!(Stage::Final.is_held());
        assert!(!Stage::Final.is_terminal());
        assert!(Stage::Closed.is_terminal());
    }

    #[test]
    fn budget_falls_back_for_unknown_stages() {
        let schedule = StageSchedule::default();
        assert_eq!(schedule.budget_for("LOBBY"), Duration::from_secs(5 * 60));
        assert_eq!(schedule.budget_for("BANANAS"), DEFAULT_STAGE_BUDGET);
    }

    #[test]
    fn custom_schedule_overrides_budgets() {
        let schedule = StageSchedule::new(
            HashMap::from([(Stage::Lobby, Duration::from_secs(60))]),
            Duration::from_secs(90),
        );
        assert_eq!(schedule.budget_for("LOBBY"), Duration::from_secs(60));
        assert_eq!(schedule.budget_for("EDITING"), Duration::from_secs(90));
    }
}
