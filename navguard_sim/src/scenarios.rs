//! Wearer scenarios for deterministic simulation.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// NAV-001: Light and walk sign turn together; crossing guidance follows
    Crosswalk,

    /// NAV-002: Green light but the walk sign is never seen
    LoneGreen,

    /// NAV-003: Obstacle hovering between the hysteresis thresholds
    ObstacleLoiter,

    /// NAV-004: Range sensor and walk-sign camera die mid-walk
    StuckSensor,

    /// NAV-005: Real fall, nobody cancels, message delivered
    FallDelivered,

    /// NAV-006: Real fall, wearer cancels inside the window
    FallCanceled,

    /// NAV-007: Sitting down hard and a knock; no fall
    SitDown,

    /// NAV-008: Real fall with the notification gateway down
    GatewayOutage,

    /// NAV-009: Long commute with flickering detections and stray echoes
    NoisyCommute,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Crosswalk,
            ScenarioId::LoneGreen,
            ScenarioId::ObstacleLoiter,
            ScenarioId::StuckSensor,
            ScenarioId::FallDelivered,
            ScenarioId::FallCanceled,
            ScenarioId::SitDown,
            ScenarioId::GatewayOutage,
            ScenarioId::NoisyCommute,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Crosswalk => "crosswalk",
            ScenarioId::LoneGreen => "lone_green",
            ScenarioId::ObstacleLoiter => "obstacle_loiter",
            ScenarioId::StuckSensor => "stuck_sensor",
            ScenarioId::FallDelivered => "fall_delivered",
            ScenarioId::FallCanceled => "fall_canceled",
            ScenarioId::SitDown => "sit_down",
            ScenarioId::GatewayOutage => "gateway_outage",
            ScenarioId::NoisyCommute => "noisy_commute",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Crosswalk => "Red/no-walk, then green+walk for 5s; CROSSING follows within debounce latency",
            ScenarioId::LoneGreen => "Green light, walk sign never detected; never CROSSING",
            ScenarioId::ObstacleLoiter => "Obstacle at 30cm then hovering 56-64cm; OBSTACLE holds until it moves off",
            ScenarioId::StuckSensor => "Echo lost and walk-sign camera dead; both age out after the staleness timeout",
            ScenarioId::FallDelivered => "Fall at 5s, no cancel; exactly one notification, delivered",
            ScenarioId::FallCanceled => "Fall at 5s, cancel inside the window; nothing sent, siren stops",
            ScenarioId::SitDown => "Hard sit-down and a lone knock; never EMERGENCY",
            ScenarioId::GatewayOutage => "Fall with the gateway down; bounded retries, then siren only",
            ScenarioId::NoisyCommute => "30s of flicker, dropouts and stray echoes; no false CROSSING or EMERGENCY",
        }
    }

    /// Shortest run in which the scenario can play out.
    pub fn min_duration_secs(&self) -> f64 {
        match self {
            ScenarioId::LoneGreen | ScenarioId::ObstacleLoiter | ScenarioId::StuckSensor => 10.0,
            ScenarioId::Crosswalk | ScenarioId::SitDown => 12.0,
            ScenarioId::FallDelivered | ScenarioId::FallCanceled | ScenarioId::GatewayOutage => 20.0,
            ScenarioId::NoisyCommute => 30.0,
        }
    }

    /// Returns true if the scenario involves a fall.
    pub fn has_fall(&self) -> bool {
        matches!(
            self,
            ScenarioId::FallDelivered | ScenarioId::FallCanceled | ScenarioId::GatewayOutage
        )
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
            "crosswalk" | "nav-001" => Ok(ScenarioId::Crosswalk),
            "lone_green" | "lonegreen" | "nav-002" => Ok(ScenarioId::LoneGreen),
            "obstacle_loiter" | "obstacleloiter" | "nav-003" => Ok(ScenarioId::ObstacleLoiter),
            "stuck_sensor" | "stucksensor" | "nav-004" => Ok(ScenarioId::StuckSensor),
            "fall_delivered" | "falldelivered" | "nav-005" => Ok(ScenarioId::FallDelivered),
            "fall_canceled" | "fallcanceled" | "nav-006" => Ok(ScenarioId::FallCanceled),
            "sit_down" | "sitdown" | "nav-007" => Ok(ScenarioId::SitDown),
            "gateway_outage" | "gatewayoutage" | "nav-008" => Ok(ScenarioId::GatewayOutage),
            "noisy_commute" | "noisycommute" | "nav-009" => Ok(ScenarioId::NoisyCommute),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
