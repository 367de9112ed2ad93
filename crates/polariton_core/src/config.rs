//! Text configuration for building a cavity from named sections.
//!
//! ```text
//! [global]
//! random_seed = 7
//!
//! [polariton site_1]
//! gamma = 1.0
//! initial_real = uniform(0, 1)
//!
//! [phonon mech]
//! omega = 20
//!
//! [coupling]
//! from = site_1
//! to = site_2
//! phonon = mech
//! ```
//!
//! Sections are resolved in a fixed order (polaritons, phonons, reservoirs, couplings,
//! pairings, global, sweep) and, within a type, in file order. That order fixes both the
//! node insertion order and the sequence of random draws, so a seeded file always yields
//! the same cavity.

use crate::cavity::{Cavity, CavityBuilder, IntegratorSettings};
use crate::modes::{PhononId, PhononMode, PolaritonId, PolaritonMode};
use crate::traits::Tolerances;
use anyhow::{anyhow, bail, Context, Result};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// A numeric value as written in a configuration file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueExpr {
    Literal(f64),
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std_dev: f64 },
}

impl ValueExpr {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        match *self {
            ValueExpr::Literal(v) => Ok(v),
            ValueExpr::Uniform { low, high } if low == high => Ok(low),
            ValueExpr::Uniform { low, high } => Ok(rng.gen_range(low..high)),
            ValueExpr::Normal { mean, std_dev } => {
                let dist = Normal::new(mean, std_dev)
                    .map_err(|e| anyhow!("invalid normal({mean}, {std_dev}): {e}"))?;
                Ok(dist.sample(rng))
            }
        }
    }
}

impl FromStr for ValueExpr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(v) = s.parse::<f64>() {
            return Ok(ValueExpr::Literal(v));
        }

        let (func, rest) = s
            .split_once('(')
            .ok_or_else(|| anyhow!("cannot parse expression '{s}'"))?;
        let args = rest
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| anyhow!("missing ')' in expression '{s}'"))?;
        let (a, b) = args
            .split_once(',')
            .ok_or_else(|| anyhow!("expected two arguments in expression '{s}'"))?;
        let a: f64 = a
            .trim()
            .parse()
            .with_context(|| format!("bad first argument in '{s}'"))?;
        let b: f64 = b
            .trim()
            .parse()
            .with_context(|| format!("bad second argument in '{s}'"))?;
        if !(a.is_finite() && b.is_finite()) {
            bail!("distribution arguments must be finite in '{s}'");
        }

        match func.trim().to_ascii_lowercase().as_str() {
            "uniform" => {
                if a > b {
                    bail!("uniform bounds are reversed in '{s}'");
                }
                Ok(ValueExpr::Uniform { low: a, high: b })
            }
            "normal" => {
                if b < 0.0 {
                    bail!("negative standard deviation in '{s}'");
                }
                Ok(ValueExpr::Normal { mean: a, std_dev: b })
            }
            other => bail!("unknown distribution '{other}' in '{s}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stepper {
    #[default]
    Adaptive,
    Fixed,
}

impl FromStr for Stepper {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adaptive" => Ok(Stepper::Adaptive),
            "fixed" => Ok(Stepper::Fixed),
            other => bail!("unknown stepper '{other}', expected 'adaptive' or 'fixed'"),
        }
    }
}

/// How a sweep index maps to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    pub start: f64,
    pub stop: f64,
    /// Polariton whose drive amplitude is `drive_scale · value`.
    pub drive: Option<String>,
    pub drive_scale: f64,
    /// Polariton whose reservoir pump power is `pump_scale · value`.
    pub pump: Option<String>,
    pub pump_scale: f64,
    pub transient: usize,
    pub stationary: usize,
    pub stepper: Stepper,
    /// Step size for [`Stepper::Fixed`].
    pub dt: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 15.0,
            drive: None,
            drive_scale: 1.0,
            pump: None,
            pump_scale: 1.0,
            transient: 1000,
            stationary: 1000,
            stepper: Stepper::Adaptive,
            dt: 0.005,
        }
    }
}

impl SweepSettings {
    /// Point `index` of `total_steps` evenly spaced values from `start` to `stop`.
    pub fn value_at(&self, total_steps: usize, index: usize) -> Result<f64> {
        if total_steps == 0 {
            bail!("sweep needs at least one step");
        }
        if index >= total_steps {
            bail!("sweep index {index} is out of range for {total_steps} steps");
        }
        if total_steps == 1 {
            return Ok(self.start);
        }
        let frac = index as f64 / (total_steps - 1) as f64;
        Ok(self.start + (self.stop - self.start) * frac)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Polariton,
    Phonon,
    Reservoir,
    Coupling,
    Pairing,
    Global,
    Sweep,
}

impl SectionKind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "polariton" => SectionKind::Polariton,
            "phonon" => SectionKind::Phonon,
            "reservoir" => SectionKind::Reservoir,
            "coupling" => SectionKind::Coupling,
            "pairing" => SectionKind::Pairing,
            "global" => SectionKind::Global,
            "sweep" => SectionKind::Sweep,
            _ => return None,
        })
    }

    fn keys(self) -> &'static [&'static str] {
        match self {
            SectionKind::Polariton => &[
                "gamma",
                "U",
                "initial_real",
                "initial_imag",
                "drive_real",
                "drive_imag",
                "drive_detuning",
            ],
            SectionKind::Phonon => &["omega", "gamma", "initial_position", "initial_velocity"],
            SectionKind::Reservoir => &["target", "coupling", "tau", "power", "alpha", "n0"],
            SectionKind::Coupling => &["from", "to", "phonon", "J", "g", "delta", "above"],
            SectionKind::Pairing => &["phonon", "sites", "g", "delta"],
            SectionKind::Global => &[
                "random_seed",
                "time",
                "abs_tolerance",
                "rel_tolerance",
                "initial_step",
                "min_step",
                "max_step",
                "max_rejections",
            ],
            SectionKind::Sweep => &[
                "start",
                "stop",
                "drive",
                "drive_scale",
                "pump",
                "pump_scale",
                "transient",
                "stationary",
                "stepper",
                "dt",
            ],
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SectionKind::Polariton => "polariton",
            SectionKind::Phonon => "phonon",
            SectionKind::Reservoir => "reservoir",
            SectionKind::Coupling => "coupling",
            SectionKind::Pairing => "pairing",
            SectionKind::Global => "global",
            SectionKind::Sweep => "sweep",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    value: String,
    line: usize,
}

#[derive(Debug, Clone)]
struct Section {
    kind: SectionKind,
    name: Option<String>,
    line: usize,
    entries: Vec<Entry>,
}

impl Section {
    /// Later assignments of the same key win.
    fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().rev().find(|e| e.key == key)
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("[{} {}] at line {}", self.kind, name, self.line),
            None => format!("[{}] at line {}", self.kind, self.line),
        }
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.entry(key).map(|e| e.value.as_str())
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.text(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("{}: missing required key '{key}'", self.label()))
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.text(key) {
            Some(v) if !v.is_empty() => matches!(v, "true" | "True" | "1" | "yes"),
            _ => default,
        }
    }

    fn count(&self, key: &str, default: usize) -> Result<usize> {
        match self.entry(key) {
            None => Ok(default),
            Some(e) => e.value.parse().with_context(|| {
                format!("line {}: '{key}' must be a non-negative integer", e.line)
            }),
        }
    }
}

fn parse_sections(text: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let header = rest
                .strip_suffix(']')
                .ok_or_else(|| anyhow!("line {line_no}: malformed section header '{line}'"))?
                .trim();
            let (kind_str, name) = match header.split_once(char::is_whitespace) {
                Some((k, n)) => (k, Some(n.trim().to_string())),
                None => (header, None),
            };
            let kind = SectionKind::parse(kind_str)
                .ok_or_else(|| anyhow!("line {line_no}: unknown section type '{kind_str}'"))?;

            match kind {
                SectionKind::Polariton | SectionKind::Phonon if name.is_none() => {
                    bail!("line {line_no}: [{kind}] section needs a name");
                }
                SectionKind::Global | SectionKind::Sweep => {
                    if sections.iter().any(|s| s.kind == kind) {
                        bail!("line {line_no}: duplicate [{kind}] section");
                    }
                }
                _ => {}
            }

            sections.push(Section {
                kind,
                name,
                line: line_no,
                entries: Vec::new(),
            });
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow!("line {line_no}: expected 'key = value', got '{line}'"))?;
        let section = sections
            .last_mut()
            .ok_or_else(|| anyhow!("line {line_no}: key outside of any section"))?;
        let key = key.trim();
        if !section.kind.keys().contains(&key) {
            warn!(line = line_no, key, section = %section.kind, "ignoring unknown key");
        }
        section.entries.push(Entry {
            key: key.to_string(),
            value: value.trim().to_string(),
            line: line_no,
        });
    }

    Ok(sections)
}

/// Draws numbers for keys, consuming randomness in resolution order.
struct Resolver {
    rng: StdRng,
}

impl Resolver {
    fn number(&mut self, section: &Section, key: &str, default: f64) -> Result<f64> {
        let Some(entry) = section.entry(key) else {
            return Ok(default);
        };
        let expr: ValueExpr = entry
            .value
            .parse()
            .with_context(|| format!("line {}: key '{key}' in {}", entry.line, section.label()))?;
        expr.sample(&mut self.rng)
            .with_context(|| format!("line {}: key '{key}' in {}", entry.line, section.label()))
    }
}

fn seed_from(global: Option<&Section>) -> Result<Option<u64>> {
    let Some(entry) = global.and_then(|g| g.entry("random_seed")) else {
        return Ok(None);
    };
    match entry.value.as_str() {
        "" | "auto" => Ok(None),
        v => v.parse().map(Some).with_context(|| {
            format!("line {}: random_seed must be an integer or 'auto'", entry.line)
        }),
    }
}

/// A fully linked cavity description with its names and run settings.
#[derive(Debug, Clone)]
pub struct CavityConfig {
    builder: CavityBuilder,
    polaritons: BTreeMap<String, PolaritonId>,
    phonons: BTreeMap<String, PhononId>,
    start_time: f64,
    seed: Option<u64>,
    sweep: Option<SweepSettings>,
}

impl FromStr for CavityConfig {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let sections = parse_sections(text)?;
        let of_kind = |kind: SectionKind| sections.iter().filter(move |s| s.kind == kind);
        let global = of_kind(SectionKind::Global).next();

        let seed = seed_from(global)?;
        let mut resolver = Resolver {
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        };

        let mut builder = CavityBuilder::new();
        let mut polaritons = BTreeMap::new();
        let mut phonons = BTreeMap::new();

        for section in of_kind(SectionKind::Polariton) {
            let name = section.name.clone().unwrap_or_default();
            let gamma = resolver.number(section, "gamma", 1.0)?;
            let u = resolver.number(section, "U", 0.0)?;
            let re = resolver.number(section, "initial_real", 0.0)?;
            let im = resolver.number(section, "initial_imag", 0.0)?;
            let drive_re = resolver.number(section, "drive_real", 0.0)?;
            let drive_im = resolver.number(section, "drive_imag", 0.0)?;
            let drive_detuning = resolver.number(section, "drive_detuning", 0.0)?;

            let mut mode = PolaritonMode::new(gamma, u).with_value(Complex64::new(re, im));
            mode.set_driving(Complex64::new(drive_re, drive_im), drive_detuning);
            let id = builder.add_polariton(mode);
            if polaritons.insert(name.clone(), id).is_some() {
                bail!("{}: duplicate polariton name '{name}'", section.label());
            }
        }

        for section in of_kind(SectionKind::Phonon) {
            let name = section.name.clone().unwrap_or_default();
            let omega = resolver.number(section, "omega", 20.0)?;
            let gamma = resolver.number(section, "gamma", 0.05)?;
            let x = resolver.number(section, "initial_position", 0.0)?;
            let v = resolver.number(section, "initial_velocity", 0.0)?;

            let id = builder.add_phonon(PhononMode::new(omega, gamma).with_state(x, v));
            if phonons.insert(name.clone(), id).is_some() {
                bail!("{}: duplicate phonon name '{name}'", section.label());
            }
        }

        let lookup_polariton = |section: &Section, name: &str| {
            polaritons
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("{}: unknown polariton '{name}'", section.label()))
        };
        let lookup_phonon = |section: &Section, name: &str| {
            phonons
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("{}: unknown phonon '{name}'", section.label()))
        };

        for section in of_kind(SectionKind::Reservoir) {
            let target = lookup_polariton(section, section.required("target")?)?;
            let coupling = resolver.number(section, "coupling", 1.0)?;
            let tau = resolver.number(section, "tau", 1.0)?;
            let power = resolver.number(section, "power", 0.0)?;
            // The file gives α²; the reservoir stores α.
            let alpha_sq = resolver.number(section, "alpha", 1.0)?;
            if alpha_sq < 0.0 {
                bail!("{}: alpha must be non-negative", section.label());
            }
            let n0 = resolver.number(section, "n0", 0.0)?;

            builder
                .add_reservoir(target, coupling, tau, power, alpha_sq.sqrt(), n0)
                .with_context(|| section.label())?;
        }

        for section in of_kind(SectionKind::Coupling) {
            let from = lookup_polariton(section, section.required("from")?)?;
            let to = lookup_polariton(section, section.required("to")?)?;
            let phonon = lookup_phonon(section, section.required("phonon")?)?;
            let j = resolver.number(section, "J", 0.0)?;
            let g = resolver.number(section, "g", 1.0)?;
            let delta = resolver.number(section, "delta", 0.0)?;
            let above = section.flag("above", true);

            builder
                .connect(from, to, phonon, j, g, delta, above)
                .with_context(|| section.label())?;
        }

        for section in of_kind(SectionKind::Pairing) {
            let phonon = lookup_phonon(section, section.required("phonon")?)?;
            let sites: Vec<&str> = section.required("sites")?.split(',').map(str::trim).collect();
            let [a, b] = sites.as_slice() else {
                bail!(
                    "{}: 'sites' must list exactly two comma-separated names",
                    section.label()
                );
            };
            let a = lookup_polariton(section, a)?;
            let b = lookup_polariton(section, b)?;
            let g = resolver.number(section, "g", 1.0)?;
            let delta = resolver.number(section, "delta", 0.0)?;

            builder
                .add_pairing(phonon, a, b, g, delta)
                .with_context(|| section.label())?;
        }

        let mut settings = IntegratorSettings::default();
        let mut start_time = 0.0;
        if let Some(global) = global {
            start_time = resolver.number(global, "time", 0.0)?;
            settings.tolerances = Tolerances::new(
                resolver.number(global, "abs_tolerance", settings.tolerances.abs)?,
                resolver.number(global, "rel_tolerance", settings.tolerances.rel)?,
            );
            settings.initial_step = resolver.number(global, "initial_step", settings.initial_step)?;
            settings.min_step = resolver.number(global, "min_step", settings.min_step)?;
            if global.entry("max_step").is_some() {
                settings.max_step = Some(resolver.number(global, "max_step", f64::INFINITY)?);
            }
            settings.max_rejections = global.count("max_rejections", settings.max_rejections)?;
        }
        settings
            .validate()
            .context("invalid integrator settings in [global]")?;

        let sweep = match of_kind(SectionKind::Sweep).next() {
            None => None,
            Some(section) => {
                let defaults = SweepSettings::default();
                let sweep = SweepSettings {
                    start: resolver.number(section, "start", defaults.start)?,
                    stop: resolver.number(section, "stop", defaults.stop)?,
                    drive: section.text("drive").map(str::to_string),
                    drive_scale: resolver.number(section, "drive_scale", defaults.drive_scale)?,
                    pump: section.text("pump").map(str::to_string),
                    pump_scale: resolver.number(section, "pump_scale", defaults.pump_scale)?,
                    transient: section.count("transient", defaults.transient)?,
                    stationary: section.count("stationary", defaults.stationary)?,
                    stepper: section
                        .text("stepper")
                        .map(str::parse::<Stepper>)
                        .transpose()
                        .with_context(|| section.label())?
                        .unwrap_or_default(),
                    dt: resolver.number(section, "dt", defaults.dt)?,
                };
                if let Some(name) = &sweep.drive {
                    lookup_polariton(section, name)?;
                }
                if let Some(name) = &sweep.pump {
                    let id = lookup_polariton(section, name)?;
                    if !builder.graph().polaritons()[id.0].has_reservoir() {
                        bail!("{}: pump target '{name}' has no reservoir", section.label());
                    }
                }
                if sweep.stepper == Stepper::Fixed && !(sweep.dt.is_finite() && sweep.dt > 0.0) {
                    bail!("{}: dt must be finite and positive", section.label());
                }
                Some(sweep)
            }
        };

        let builder = builder.with_settings(settings);
        info!(
            polaritons = polaritons.len(),
            phonons = phonons.len(),
            reservoirs = builder.graph().reservoir_count(),
            seeded = seed.is_some(),
            "configuration loaded"
        );

        Ok(Self {
            builder,
            polaritons,
            phonons,
            start_time,
            seed,
            sweep,
        })
    }
}

impl CavityConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open config file {}", path.display()))?;
        text.parse()
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn builder(&self) -> &CavityBuilder {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut CavityBuilder {
        &mut self.builder
    }

    pub fn polariton_id(&self, name: &str) -> Result<PolaritonId> {
        self.polaritons
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("polariton not found: {name}"))
    }

    pub fn phonon_id(&self, name: &str) -> Result<PhononId> {
        self.phonons
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("phonon not found: {name}"))
    }

    /// Polariton names in packing order.
    pub fn polariton_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, PolaritonId)> =
            self.polaritons.iter().map(|(n, id)| (n.as_str(), *id)).collect();
        names.sort_by_key(|(_, id)| *id);
        names.into_iter().map(|(n, _)| n).collect()
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn settings(&self) -> &IntegratorSettings {
        self.builder.settings()
    }

    pub fn sweep(&self) -> Option<&SweepSettings> {
        self.sweep.as_ref()
    }

    /// Sets the configured drive amplitude and pump power from one swept value.
    pub fn apply_sweep_value(&mut self, value: f64) -> Result<()> {
        let sweep = self
            .sweep
            .clone()
            .ok_or_else(|| anyhow!("configuration has no [sweep] section"))?;
        if sweep.drive.is_none() && sweep.pump.is_none() {
            bail!("[sweep] names neither a drive nor a pump target");
        }

        if let Some(name) = &sweep.drive {
            let id = self.polariton_id(name)?;
            let mode = self.builder.polariton_mut(id)?;
            let detuning = mode.driving().detuning;
            mode.set_driving(sweep.drive_scale * value, detuning);
        }
        if let Some(name) = &sweep.pump {
            let id = self.polariton_id(name)?;
            self.builder
                .polariton_mut(id)?
                .reservoir_mut()
                .ok_or_else(|| anyhow!("pump target '{name}' has no reservoir"))?
                .set_power(sweep.pump_scale * value);
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Cavity> {
        Ok(self.builder.clone().build(self.start_time)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SITE: &str = "
# two sites sharing one mechanical mode
[global]
random_seed = 42
abs_tolerance = 1e-8

[polariton site_1]
gamma = 1.0
U = 0.5
initial_real = uniform(0.0, 1.0)
initial_imag = normal(0.0, 0.1)

[polariton site_2]
gamma = 0.8
initial_real = 0.25

[phonon mech]
omega = 20
gamma = 0.05
initial_position = 1.5

[reservoir]
target = site_2
coupling = 2.0
tau = 600
power = 3.0
alpha = 3.25
n0 = 0.5

[coupling]
from = site_1
to = site_2
phonon = mech
J = 10
above = true

[coupling]
from = site_2
to = site_1
phonon = mech
J = 10
above = no

[pairing]
phonon = mech
sites = site_1, site_2
g = 1.0

[sweep]
drive = site_1
drive_scale = 0.5
pump = site_2
pump_scale = 0.5
transient = 10
stationary = 20
stepper = fixed
";

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn parses_literals_and_distributions() {
        assert_eq!("2.5".parse::<ValueExpr>().unwrap(), ValueExpr::Literal(2.5));
        assert_eq!(
            " Uniform(0, 1) ".parse::<ValueExpr>().unwrap(),
            ValueExpr::Uniform { low: 0.0, high: 1.0 }
        );
        assert_eq!(
            "normal(1.0, 0.5)".parse::<ValueExpr>().unwrap(),
            ValueExpr::Normal {
                mean: 1.0,
                std_dev: 0.5
            }
        );
        assert_err_contains("uniform(1, 0)".parse::<ValueExpr>(), "reversed");
        assert_err_contains("gauss(0, 1)".parse::<ValueExpr>(), "unknown distribution");
        assert_err_contains("uniform(0 1)".parse::<ValueExpr>(), "two arguments");
        assert_err_contains("abc".parse::<ValueExpr>(), "cannot parse");
    }

    #[test]
    fn uniform_samples_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let expr = ValueExpr::Uniform { low: -2.0, high: 5.0 };
        for _ in 0..1000 {
            let v = expr.sample(&mut rng).unwrap();
            assert!((-2.0..5.0).contains(&v));
        }
        let point = ValueExpr::Uniform { low: 1.0, high: 1.0 };
        assert_eq!(point.sample(&mut rng).unwrap(), 1.0);
    }

    #[test]
    fn builds_linked_graph_in_file_order() {
        let config: CavityConfig = TWO_SITE.parse().unwrap();
        assert_eq!(config.polariton_id("site_1").unwrap(), PolaritonId(0));
        assert_eq!(config.polariton_id("site_2").unwrap(), PolaritonId(1));
        assert_eq!(config.phonon_id("mech").unwrap(), PhononId(0));
        assert_eq!(config.polariton_names(), vec!["site_1", "site_2"]);
        assert_eq!(config.seed(), Some(42));
        assert_eq!(config.settings().tolerances.abs, 1e-8);

        let graph = config.builder().graph();
        let site_1 = &graph.polaritons()[0];
        assert_eq!(site_1.nonlinearity(), 0.5);
        assert!((0.0..1.0).contains(&site_1.value().re));
        assert_eq!(site_1.links().len(), 1);
        assert_eq!(site_1.links()[0].sign, 1.0);
        assert_eq!(graph.polaritons()[1].links()[0].sign, -1.0);

        let reservoir = graph.polaritons()[1].reservoir().unwrap();
        assert!((reservoir.saturation_coefficient() - 3.25f64.sqrt()).abs() < 1e-15);
        assert_eq!(reservoir.value(), 0.5);
        assert_eq!(graph.polaritons()[1].reservoir_coupling(), 2.0);
        assert_eq!(graph.phonons()[0].pairings().len(), 1);
        assert_eq!(graph.phonons()[0].position(), 1.5);

        let cavity = config.build().unwrap();
        assert_eq!(cavity.dimension(), 2 * 2 + 2 + 1);
        assert_eq!(cavity.state()[2], 0.25);
        assert_eq!(cavity.state()[6], 0.5);
    }

    #[test]
    fn seeded_loads_are_reproducible() {
        let a: CavityConfig = TWO_SITE.parse().unwrap();
        let b: CavityConfig = TWO_SITE.parse().unwrap();
        assert_eq!(a.build().unwrap().state(), b.build().unwrap().state());
    }

    #[test]
    fn sweep_section_maps_index_to_drive_and_pump() {
        let mut config: CavityConfig = TWO_SITE.parse().unwrap();
        let sweep = config.sweep().unwrap().clone();
        assert_eq!(sweep.stepper, Stepper::Fixed);
        assert_eq!(sweep.transient, 10);
        assert_eq!(sweep.stop, 15.0);
        assert_eq!(sweep.value_at(4, 0).unwrap(), 0.0);
        assert_eq!(sweep.value_at(4, 3).unwrap(), 15.0);
        assert!((sweep.value_at(4, 1).unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(sweep.value_at(1, 0).unwrap(), 0.0);
        assert_err_contains(sweep.value_at(4, 4), "out of range");

        config.apply_sweep_value(6.0).unwrap();
        let graph = config.builder().graph();
        assert_eq!(graph.polaritons()[0].driving().amplitude, Complex64::new(3.0, 0.0));
        assert_eq!(graph.polaritons()[1].reservoir().unwrap().pump_power(), 3.0);
    }

    #[test]
    fn unresolved_names_abort_the_load() {
        let text = "[polariton a]\n[phonon m]\n[coupling]\nfrom = a\nto = b\nphonon = m\n";
        assert_err_contains(text.parse::<CavityConfig>(), "unknown polariton 'b'");

        let text = "[polariton a]\n[reservoir]\ncoupling = 1\n";
        assert_err_contains(text.parse::<CavityConfig>(), "missing required key 'target'");

        let text = "[polariton a]\n[phonon m]\n[pairing]\nphonon = m\nsites = a\n";
        assert_err_contains(text.parse::<CavityConfig>(), "exactly two");
    }

    #[test]
    fn malformed_lines_name_their_location() {
        assert_err_contains("[polariton a\n".parse::<CavityConfig>(), "line 1");
        assert_err_contains("[laser x]\n".parse::<CavityConfig>(), "unknown section type");
        assert_err_contains("gamma = 1\n".parse::<CavityConfig>(), "outside of any section");
        assert_err_contains("[polariton]\n".parse::<CavityConfig>(), "needs a name");
        assert_err_contains(
            "[polariton a]\ngamma = uniform(1,\n".parse::<CavityConfig>(),
            "line 2",
        );
        assert_err_contains(
            "[polariton a]\n[polariton a]\n".parse::<CavityConfig>(),
            "duplicate polariton name",
        );
    }

    #[test]
    fn second_reservoir_on_one_polariton_is_rejected() {
        let text = "[polariton a]\n[reservoir]\ntarget = a\n[reservoir]\ntarget = a\n";
        assert_err_contains(text.parse::<CavityConfig>(), "already has a reservoir");
    }

    #[test]
    fn global_settings_are_validated() {
        let text = "[global]\nabs_tolerance = 0\nrel_tolerance = 0\n";
        assert_err_contains(text.parse::<CavityConfig>(), "invalid integrator settings");
    }

    #[test]
    fn missing_file_is_reported() {
        assert_err_contains(
            CavityConfig::load("/nonexistent/polariton.cfg"),
            "cannot open config file",
        );
    }
}
