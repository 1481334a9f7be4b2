use denss::core::fft::Fft3;
use denss::core::grid::{FrequencyScale, QShells, RealSpaceGrid};
use denss::core::models::curve::ScatteringCurve;
use denss::core::models::density::DensityMap;
use denss::engine::alignment::Aligner;
use denss::engine::cancel::AbortFlag;
use denss::engine::config::{AlignmentConfig, AveragingConfig, ReconstructionConfig};
use denss::engine::pool::TaskPool;
use denss::engine::progress::ProgressReporter;
use denss::engine::refinement::Refinement;
use denss::engine::refinement::state::NoSnapshots;
use denss::workflows::output::OutputSpec;
use denss::workflows::{average, reconstruct};
use ndarray::Array3;

const RG: f64 = 15.0;
/// Three times the 1/e radius `√2·σ` of a Gaussian with radius of gyration `RG`.
const GAUSSIAN_DMAX: f64 = 37.0;

/// Guinier profile `I(q) = I0 · exp(-q² Rg² / 3)` sampled from q = 0.
fn gaussian_curve() -> ScatteringCurve {
    let q: Vec<f64> = (0..250).map(|i| i as f64 * 0.002).collect();
    let intensity: Vec<f64> = q
        .iter()
        .map(|&x| 1000.0 * (-(x * RG).powi(2) / 3.0).exp() + 1e-4)
        .collect();
    let sigma = intensity.iter().map(|v| 0.01 * v + 1e-5).collect();
    ScatteringCurve::new(q, intensity, sigma).unwrap()
}

/// Scattering of a Gaussian density with radius of gyration `RG`, computed by Fourier
/// transforming the density on the reconstruction grid and averaging |F|² over q shells.
fn transformed_gaussian_curve(config: &ReconstructionConfig) -> ScatteringCurve {
    let grid = RealSpaceGrid::from_voxel_size(config.box_side(), config.voxel_size).unwrap();
    let n = grid.n();
    let width = RG / 3f64.sqrt();
    let half = n as f64 / 2.0;
    let density = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
        let r2 = [i, j, k]
            .iter()
            .map(|&index| ((index as f64 - half) * grid.voxel_size()).powi(2))
            .sum::<f64>();
        (-r2 / (2.0 * width * width)).exp()
    });
    let spectrum = Fft3::new(n).forward_real(&density);
    let shells = QShells::new(n, grid.side(), FrequencyScale::Angular).unwrap();
    let intensity = shells.mean(spectrum.iter().map(|f| f.norm_sqr()));

    let (q, intensity): (Vec<f64>, Vec<f64>) = shells
        .centers()
        .iter()
        .copied()
        .zip(intensity)
        .filter(|&(q, i)| q <= 0.4 && i.is_finite())
        .unzip();
    let floor = 1e-7 * intensity[0];
    let sigma = intensity.iter().map(|v| 0.01 * v + floor).collect();
    ScatteringCurve::new(q, intensity, sigma).unwrap()
}

fn blob(n: usize, side: f64, center: [f64; 3], width: f64) -> DensityMap {
    let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
        let r2 = (i as f64 - center[0]).powi(2)
            + (j as f64 - center[1]).powi(2)
            + (k as f64 - center[2]).powi(2);
        (-r2 / (2.0 * width * width)).exp()
    });
    DensityMap::new(data, side).unwrap()
}

fn quick_alignment() -> AlignmentConfig {
    AlignmentConfig {
        coarse_directions: 4,
        top_candidates: 2,
        max_iterations: 10,
        max_evaluations: 40,
        ..AlignmentConfig::default()
    }
}

#[test]
fn gaussian_profile_reconstructs_with_matching_rg() {
    let config = ReconstructionConfig::builder()
        .dmax(GAUSSIAN_DMAX)
        .voxel_size(4.0)
        .seed(Some(11))
        .build()
        .unwrap();
    let curve = transformed_gaussian_curve(&config);
    assert_eq!(curve.q()[0], 0.0);

    let output = Refinement::new(&curve, &config)
        .unwrap()
        .run(None, &AbortFlag::new(), &ProgressReporter::new(), &mut NoSnapshots)
        .unwrap()
        .completed()
        .unwrap();

    let chi2 = output.trace.chi2();
    let early = chi2[..5].iter().copied().fold(f64::INFINITY, f64::min);
    assert!(output.final_chi2() < early, "chi2 {} not below {}", output.final_chi2(), early);

    let rg = output.final_rg();
    assert!((rg - RG).abs() < 0.1 * RG, "Rg {rg} too far from {RG}");

    let electrons = output.map.total() * output.map.voxel_volume();
    assert!((electrons - config.electrons).abs() < 1e-6 * config.electrons);
}

#[test]
fn seeded_workflow_runs_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let curve = gaussian_curve();
    let config = ReconstructionConfig::builder()
        .dmax(50.0)
        .voxel_size(10.0)
        .max_steps(Some(25))
        .seed(Some(3))
        .build()
        .unwrap();

    let run = |prefix: &str| {
        reconstruct::run(
            &curve,
            &config,
            &OutputSpec::new(dir.path(), prefix),
            &AbortFlag::new(),
            &ProgressReporter::new(),
        )
        .unwrap()
        .completed()
        .unwrap()
    };
    let first = run("first");
    let second = run("second");
    assert_eq!(first.map, second.map);
    assert_eq!(first.trace, second.trace);

    let stats_a = std::fs::read_to_string(dir.path().join("first_stats_by_step.dat")).unwrap();
    let stats_b = std::fs::read_to_string(dir.path().join("second_stats_by_step.dat")).unwrap();
    assert_eq!(stats_a, stats_b);
}

#[test]
fn raised_abort_stops_before_the_first_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = ReconstructionConfig::builder()
        .dmax(50.0)
        .voxel_size(10.0)
        .seed(Some(1))
        .build()
        .unwrap();
    let abort = AbortFlag::new();
    abort.raise();
    let outcome = reconstruct::run(
        &gaussian_curve(),
        &config,
        &OutputSpec::new(dir.path(), "aborted"),
        &abort,
        &ProgressReporter::new(),
    )
    .unwrap();
    assert!(outcome.is_aborted());
    assert!(!dir.path().join("aborted.mrc").exists());
}

#[test]
fn grids_always_have_an_even_number_of_points() {
    for (side, voxel) in [(150.0, 5.0), (151.0, 10.0), (97.0, 3.3), (30.0, 7.0)] {
        let grid = RealSpaceGrid::from_voxel_size(side, voxel).unwrap();
        assert_eq!(grid.n() % 2, 0, "side {side} voxel {voxel} gave n = {}", grid.n());
    }
}

#[test]
fn off_center_copy_aligns_back_with_unit_score() {
    let reference = blob(16, 40.0, [8.0, 8.0, 8.0], 1.6);
    let moving = blob(16, 40.0, [10.0, 7.0, 9.0], 1.6);
    let result = Aligner::new(quick_alignment())
        .align(&reference, &moving, &AbortFlag::new())
        .unwrap()
        .completed()
        .unwrap();
    assert!(result.score > 0.99, "alignment score {}", result.score);
    assert!((result.map.total() - moving.total()).abs() < 1e-8 * moving.total());
}

#[test]
fn averaging_workflow_reports_every_input_map() {
    let dir = tempfile::tempdir().unwrap();
    let maps: Vec<_> = (0..4)
        .map(|i| blob(12, 40.0, [6.0, 6.0, 6.0], 1.5 + 0.05 * i as f64))
        .collect();
    let config = AveragingConfig {
        alignment: quick_alignment(),
        ..AveragingConfig::default()
    };
    let result = average::run(
        &maps,
        &config,
        &OutputSpec::new(dir.path(), "ensemble"),
        &TaskPool::new(AbortFlag::new()),
        &ProgressReporter::new(),
    )
    .unwrap()
    .completed()
    .unwrap();

    assert_eq!(result.scores.len(), 4);
    assert_eq!(result.accepted.len(), 4);
    assert!(result.accepted_count() >= 1);
    assert!(dir.path().join("ensemble_average.mrc").exists());
    assert!(dir.path().join("ensemble_fsc.dat").exists());
    let summary = std::fs::read_to_string(dir.path().join("ensemble_summary.txt")).unwrap();
    assert!(summary.contains("Accepted maps"));
}
