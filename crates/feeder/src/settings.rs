use std::path::Path;

use anyhow::{ensure, Context as _};
use scriba_planner::{ResampleConfig, Scaling};
use scriba_protocol::DriverConfig;
use serde::{Deserialize, Serialize};

use crate::{coordinator::CoordinatorConfig, simulator::SimulationConfig};

/// Everything that can go in the config file. Missing sections and fields
/// take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub resample: ResampleConfig,
    pub scaling: Scaling,
    pub kinematics: scriba_geom::Config,
    pub driver: DriverConfig,
    pub motion: CoordinatorConfig,
    pub simulation: SimulationConfig,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("bad config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let r = &self.resample;
        ensure!(
            r.max_dist.is_finite() && r.max_dist > 0.0,
            "resample.max_dist must be positive, not {}",
            r.max_dist
        );

        let s = &self.scaling;
        ensure!(
            [s.scale.x, s.scale.y, s.offset.x, s.offset.y]
                .iter()
                .all(|v| v.is_finite()),
            "scaling must be finite"
        );

        let k = &self.kinematics;
        ensure!(
            k.tolerance > 0.0,
            "kinematics.tolerance must be positive, not {}",
            k.tolerance
        );
        ensure!(
            k.gear_ratio != 0.0 && k.extension_per_radian != 0.0,
            "kinematics.gear_ratio and kinematics.extension_per_radian can't be zero"
        );

        ensure!(
            self.driver.steps_per_revolution * self.driver.microsteps > 0,
            "driver.steps_per_revolution and driver.microsteps can't be zero"
        );
        ensure!(
            self.motion.arrival_tolerance >= 0.0,
            "motion.arrival_tolerance can't be negative"
        );
        ensure!(
            self.simulation.tick_ms > 0,
            "simulation.tick_ms must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn partial_sections() {
        let settings = Settings::from_toml(
            r#"
            [resample]
            max_dist = 25.0

            [driver]
            reverse = true
            divisors = { pulse_div = 7, ramp_div = 8 }

            [motion]
            home = { theta1 = 1.0, theta2 = 2.0 }
            "#,
        )
        .unwrap();

        assert_eq!(settings.resample.max_dist, 25.0);
        assert_eq!(settings.resample.subdivisions, 3);
        assert!(settings.driver.reverse);
        assert_eq!(settings.driver.divisors.pulse_div, 7);
        assert_eq!(settings.driver.v_max, 400);
        assert_eq!(settings.motion.home.theta2, 2.0);
        assert_eq!(settings.motion.zero, CoordinatorConfig::default().zero);
        assert_eq!(settings.kinematics, scriba_geom::Config::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Settings::from_toml("[resample]\nmax_dist = 0.0\n").is_err());
        assert!(Settings::from_toml("[simulation]\ntick_ms = 0\n").is_err());
        assert!(Settings::from_toml("[nonsense]\n").is_err());
    }
}
