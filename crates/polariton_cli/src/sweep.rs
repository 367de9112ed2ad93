use anyhow::{Context, Result};
use polariton_core::stability::max_growth_rate;
use polariton_core::{
    write_record, Cavity, CavityConfig, IntegrationStats, ObservableAverager, Stepper,
    SweepSettings,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Result of one sweep point, also written as the JSON run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRecord {
    pub index: usize,
    pub total_steps: usize,
    pub parameter: f64,
    pub dimension: usize,
    pub stepper: Stepper,
    /// `|φᵢ|²` per polariton, `xⱼ²` per phonon, `nₖ` per reservoir.
    pub means: Vec<f64>,
    pub final_time: f64,
    pub stats: IntegrationStats,
    /// Largest real part of the Jacobian spectrum at the final state.
    pub max_growth_rate: Option<f64>,
}

fn advance(cavity: &mut Cavity, sweep: &SweepSettings) -> Result<()> {
    match sweep.stepper {
        Stepper::Fixed => cavity.step(sweep.dt)?,
        Stepper::Adaptive => {
            cavity.adaptive_step()?;
        }
    }
    Ok(())
}

/// Runs sweep point `index` of `total_steps` on a freshly parsed configuration.
pub fn run_point(
    mut config: CavityConfig,
    total_steps: usize,
    index: usize,
) -> Result<SweepRecord> {
    let sweep = config
        .sweep()
        .cloned()
        .context("configuration needs a [sweep] section for sweep runs")?;
    let parameter = sweep.value_at(total_steps, index)?;
    config.apply_sweep_value(parameter)?;

    let mut cavity = config.build()?;
    info!(
        index,
        parameter,
        dimension = cavity.dimension(),
        transient = sweep.transient,
        stationary = sweep.stationary,
        "sweep point started"
    );

    for _ in 0..sweep.transient {
        advance(&mut cavity, &sweep)
            .with_context(|| format!("transient phase failed at t = {}", cavity.time()))?;
    }
    debug!(t = cavity.time(), "transient phase done");

    let mut averager = ObservableAverager::for_cavity(&cavity);
    for _ in 0..sweep.stationary {
        averager.sample(&cavity)?;
        advance(&mut cavity, &sweep)
            .with_context(|| format!("stationary phase failed at t = {}", cavity.time()))?;
    }
    let means = averager
        .means()
        .unwrap_or_else(|| vec![f64::NAN; averager.len()]);

    let record = SweepRecord {
        index,
        total_steps,
        parameter,
        dimension: cavity.dimension(),
        stepper: sweep.stepper,
        means,
        final_time: cavity.time(),
        stats: *cavity.stats(),
        max_growth_rate: max_growth_rate(&cavity)?,
    };
    info!(index, parameter, final_time = record.final_time, "sweep point finished");
    Ok(record)
}

pub fn write_line(path: &Path, record: &SweepRecord) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("cannot create output {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_record(&mut out, record.parameter, &record.means)?;
    out.flush()?;
    Ok(())
}

pub fn write_report(path: &Path, record: &SweepRecord) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("cannot create report {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), record)
        .with_context(|| format!("failed to write report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "
[global]
random_seed = 5

[polariton site_1]
gamma = 1.0
initial_real = uniform(0, 1)

[polariton site_2]
gamma = 1.0

[phonon mech]
omega = 20
gamma = 0.05

[reservoir]
target = site_2
tau = 10
alpha = 3.25

[coupling]
from = site_1
to = site_2
phonon = mech
J = 1

[coupling]
from = site_2
to = site_1
phonon = mech
J = 1
above = false

[pairing]
phonon = mech
sites = site_1, site_2

[sweep]
stop = 4
drive = site_1
drive_scale = 0.5
pump = site_2
pump_scale = 0.5
transient = 20
stationary = 30
stepper = fixed
dt = 0.005
";

    #[test]
    fn point_record_carries_parameter_and_all_means() {
        let config: CavityConfig = CONFIG.parse().unwrap();
        let record = run_point(config, 5, 2).unwrap();
        assert_eq!(record.parameter, 2.0);
        assert_eq!(record.dimension, 7);
        assert_eq!(record.means.len(), 4);
        assert!(record.means.iter().all(|m| m.is_finite()));
        assert_eq!(record.stats.fixed_steps, 50);
        assert!((record.final_time - 0.25).abs() < 1e-12);
    }

    #[test]
    fn seeded_points_are_reproducible() {
        let a = run_point(CONFIG.parse().unwrap(), 5, 4).unwrap();
        let b = run_point(CONFIG.parse().unwrap(), 5, 4).unwrap();
        assert_eq!(a.means, b.means);
    }

    #[test]
    fn index_past_the_end_is_an_error() {
        let config: CavityConfig = CONFIG.parse().unwrap();
        assert!(run_point(config, 5, 5).is_err());
    }

    #[test]
    fn adaptive_sweep_counts_accepted_steps() {
        let text = CONFIG.replace("stepper = fixed", "stepper = adaptive");
        let record = run_point(text.parse().unwrap(), 5, 1).unwrap();
        assert_eq!(record.stepper, Stepper::Adaptive);
        assert_eq!(record.stats.accepted, 50);
    }
}
