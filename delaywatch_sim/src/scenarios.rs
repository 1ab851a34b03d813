//! Deterministic scenarios for the watcher scheduler.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// DW-001: nothing happens; one resume exactly at the timeout
    IdleTimeout,

    /// DW-002: object and region watcher race for one guard
    GuardRace,

    /// DW-003: tracked object vanishes with nothing to land on
    VanishedObject,

    /// DW-004: change directly above the anchor never triggers
    OutsideZone,

    /// DW-005: impact planner plus gravity, end to end
    FallingBlock,

    /// DW-006: transient sampling faults around a real change
    FlakySampling,

    /// DW-007: seeded random impacts; at most one resume per event
    Barrage,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::IdleTimeout,
            ScenarioId::GuardRace,
            ScenarioId::VanishedObject,
            ScenarioId::OutsideZone,
            ScenarioId::FallingBlock,
            ScenarioId::FlakySampling,
            ScenarioId::Barrage,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::IdleTimeout => "idle_timeout",
            ScenarioId::GuardRace => "guard_race",
            ScenarioId::VanishedObject => "vanished_object",
            ScenarioId::OutsideZone => "outside_zone",
            ScenarioId::FallingBlock => "falling_block",
            ScenarioId::FlakySampling => "flaky_sampling",
            ScenarioId::Barrage => "barrage",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::IdleTimeout => "Region watcher in an unchanging world resolves once at tick 1200",
            ScenarioId::GuardRace => "Guard-sharing object and region watchers trigger a tick apart; one resume",
            ScenarioId::VanishedObject => "Object removed at tick 3, grace 3; leaves scanning at tick 6",
            ScenarioId::OutsideZone => "Cell appears above the anchor, one vanishes below; no trigger until the timeout",
            ScenarioId::FallingBlock => "Impact under a falling sand body past a nearer prop; resolves where it lands",
            ScenarioId::FlakySampling => "Five faulty ticks hide a change; detected once sampling recovers",
            ScenarioId::Barrage => "Random impacts, bodies and faults; every event resumes exactly once",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle_timeout" | "idletimeout" | "a" | "dw-001" => Ok(ScenarioId::IdleTimeout),
            "guard_race" | "guardrace" | "b" | "dw-002" => Ok(ScenarioId::GuardRace),
            "vanished_object" | "vanishedobject" | "c" | "dw-003" => Ok(ScenarioId::VanishedObject),
            "outside_zone" | "outsidezone" | "d" | "dw-004" => Ok(ScenarioId::OutsideZone),
            "falling_block" | "fallingblock" | "dw-005" => Ok(ScenarioId::FallingBlock),
            "flaky_sampling" | "flakysampling" | "dw-006" => Ok(ScenarioId::FlakySampling),
            "barrage" | "dw-007" => Ok(ScenarioId::Barrage),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("B".parse::<ScenarioId>(), Ok(ScenarioId::GuardRace));
        assert_eq!("dw-003".parse::<ScenarioId>(), Ok(ScenarioId::VanishedObject));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
