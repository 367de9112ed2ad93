use num_complex::Complex64;
use polariton_core::{
    Cavity, CavityBuilder, CavityConfig, ObservableAverager, PhononMode, PolaritonMode,
    TrajectoryWriter,
};

fn two_site_builder() -> CavityBuilder {
    let mut builder = CavityBuilder::new();
    let a = builder.add_polariton(
        PolaritonMode::new(1.0, 0.0).with_value(Complex64::new(0.6, 0.2)),
    );
    let b = builder.add_polariton(
        PolaritonMode::new(1.0, 0.0).with_value(Complex64::new(0.1, -0.4)),
    );
    let ph = builder.add_phonon(PhononMode::new(20.0, 0.05).with_state(0.3, 1.0));
    builder.connect(a, b, ph, 0.0, 1.0, 0.0, true).unwrap();
    builder.connect(b, a, ph, 0.0, 1.0, 0.0, false).unwrap();
    builder.add_pairing(ph, a, b, 1.0, 0.0).unwrap();
    builder
}

#[test]
fn two_site_scenario_has_dimension_six_and_reproducible_steps() {
    let mut first = two_site_builder().build(0.0).unwrap();
    let mut second = two_site_builder().build(0.0).unwrap();
    assert_eq!(first.dimension(), 2 * 2 + 2 + 0);
    assert_eq!(first.reservoir_count(), 0);

    first.step(0.005).unwrap();
    second.step(0.005).unwrap();
    assert_eq!(first.state(), second.state());
    assert_eq!(first.time(), 0.005);

    let initial = two_site_builder().build(0.0).unwrap();
    assert_ne!(first.state(), initial.state());
}

#[test]
fn adaptive_and_fixed_trajectories_agree() {
    let mut fixed = two_site_builder().build(0.0).unwrap();
    let mut adaptive = two_site_builder().build(0.0).unwrap();

    for _ in 0..200 {
        fixed.step(0.001).unwrap();
    }
    loop {
        let remaining = fixed.time() - adaptive.time();
        if remaining < 1e-12 {
            break;
        }
        if adaptive.next_step_size() > remaining {
            adaptive.set_step_size(remaining).unwrap();
        }
        let report = adaptive.adaptive_step().unwrap();
        assert!(report.error <= 1.0);
    }

    assert!((adaptive.time() - fixed.time()).abs() < 1e-9);
    for (x, y) in adaptive.state().iter().zip(fixed.state()) {
        assert!((x - y).abs() < 1e-3, "{x} vs {y}");
    }
}

#[test]
fn undriven_lossy_sites_decay_while_phonon_keeps_ringing() {
    let mut cavity = two_site_builder().build(0.0).unwrap();
    for _ in 0..2_000 {
        cavity.step(0.005).unwrap();
    }
    // 10 time units of γ = 1 loss
    let p0 = cavity.polariton(0).unwrap().value().norm();
    let p1 = cavity.polariton(1).unwrap().value().norm();
    assert!(p0 < 1e-3 && p1 < 1e-3);

    let phonon = cavity.phonon(0).unwrap();
    let energy = phonon.velocity().powi(2) + 400.0 * phonon.position().powi(2);
    assert!(energy > 1e-2);
}

#[test]
fn config_driven_run_writes_trajectory_and_averages() {
    let text = "
[global]
random_seed = 11

[polariton left]
gamma = 1.0
initial_real = uniform(0.0, 1.0)
initial_imag = uniform(0.0, 1.0)

[polariton right]
gamma = 1.0
initial_real = uniform(0.0, 1.0)

[phonon mech]
omega = 20.0
gamma = 0.05
initial_position = uniform(0.0, 50.0)

[reservoir]
target = right
tau = 5
power = 2.0

[coupling]
from = left
to = right
phonon = mech
J = 10

[coupling]
from = right
to = left
phonon = mech
J = 10
above = false

[pairing]
phonon = mech
sites = left, right
";
    let config: CavityConfig = text.parse().unwrap();
    let mut cavity: Cavity = config.build().unwrap();
    assert_eq!(cavity.dimension(), 7);

    let mut writer = TrajectoryWriter::new(Vec::new());
    let mut averager = ObservableAverager::for_cavity(&cavity);
    writer.record(&cavity).unwrap();
    for _ in 0..50 {
        averager.sample(&cavity).unwrap();
        cavity.step(0.005).unwrap();
        writer.record(&cavity).unwrap();
    }

    let means = averager.means().unwrap();
    assert_eq!(means.len(), 2 + 1 + 1);
    assert!(means.iter().all(|m| m.is_finite()));
    assert!(means[3] > 0.0);

    let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 51);
    assert_eq!(lines[0].split('\t').count(), 1 + 7);
    let last_time: f64 = lines[50].split('\t').next().unwrap().parse().unwrap();
    assert!((last_time - 0.25).abs() < 1e-12);
}
