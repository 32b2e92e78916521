use approx::assert_relative_eq;
use minflux_algorithms::{
    bins_for, estimate_resolution, first_peak_bounds, prepare_histogram, render_xy,
    robust_threshold, BinningMode, Extent2D, FrcConfig, RenderMode,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Localizations scattered around a grid of emitters, `per_emitter` each.
fn clustered_points(seed: u64, per_emitter: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in 0..8 {
        for j in 0..8 {
            let (cx, cy) = (20.0 + 20.0 * f64::from(i), 20.0 + 20.0 * f64::from(j));
            for _ in 0..per_emitter {
                x.push(cx + rng.gen_range(-3.0..3.0));
                y.push(cy + rng.gen_range(-3.0..3.0));
            }
        }
    }
    (x, y)
}

#[test]
fn test_histogram_centers_and_normalization() {
    let (x, _) = clustered_points(1, 10);
    for mode in [
        BinningMode::FreedmanDiaconis,
        BinningMode::Scott,
        BinningMode::Fixed(2.5),
    ] {
        let (counts, spec) = prepare_histogram(&x, mode, true).unwrap();
        assert_eq!(spec.edges.len(), spec.centers.len() + 1);
        for (k, c) in spec.centers.iter().enumerate() {
            assert_relative_eq!(*c, (spec.edges[k] + spec.edges[k + 1]) / 2.0, epsilon = 1e-9);
        }
        assert_relative_eq!(counts.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_constant_values_single_bin() {
    let spec = bins_for(&[5.0, 5.0, 5.0, f64::NAN], BinningMode::FreedmanDiaconis).unwrap();
    assert_eq!(spec.num_bins(), 1);
    assert_relative_eq!(spec.centers[0], 5.0);
}

#[test]
fn test_robust_threshold_with_outlier() {
    let t = robust_threshold(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0], 2.0).unwrap();
    assert_relative_eq!(t.median, 3.5);
    assert_relative_eq!(t.scaled_mad, 1.5 / 0.67449, epsilon = 1e-12);
    assert!(t.upper > 5.0 && t.upper < 100.0);
    assert_relative_eq!(t.upper - t.median, t.median - t.lower, epsilon = 1e-12);
}

#[test]
fn test_monotonic_histogram_has_no_peak() {
    let counts: Vec<f64> = (0..20).map(f64::from).collect();
    let bins: Vec<f64> = (0..20).map(|i| f64::from(i) * 0.5).collect();
    assert_eq!(first_peak_bounds(&counts, &bins, 0.01, 3).unwrap(), None);
}

#[test]
fn test_histogram_render_conserves_points() {
    let (x, y) = clustered_points(2, 5);
    let extent = Extent2D::new((0.0, 200.0), (0.0, 200.0));
    let rendered = render_xy(&x, &y, 2.0, 2.0, Some(extent), RenderMode::Histogram).unwrap();
    assert_eq!(rendered.mask.len(), x.len());
    assert_eq!(rendered.num_rendered(), x.len());
    assert_relative_eq!(rendered.image.sum(), x.len() as f64);
    assert_eq!(rendered.image.dim(), (100, 100));
    assert_eq!(rendered.xi.len(), 100);
}

#[test]
fn test_gaussian_mask_within_histogram_mask() {
    let (mut x, mut y) = clustered_points(3, 5);
    // Points near the border and off the grid.
    x.extend([0.5, 199.0, 250.0]);
    y.extend([100.0, 100.0, 100.0]);
    let extent = Extent2D::new((0.0, 200.0), (0.0, 200.0));
    let hist = render_xy(&x, &y, 2.0, 2.0, Some(extent), RenderMode::Histogram).unwrap();
    let gauss = render_xy(
        &x,
        &y,
        2.0,
        2.0,
        Some(extent),
        RenderMode::FixedGaussian { fwhm: None },
    )
    .unwrap();
    for (g, h) in gauss.mask.iter().zip(&hist.mask) {
        assert!(!g || *h);
    }
    assert!(gauss.num_rendered() < hist.num_rendered());
    assert!(!hist.mask[x.len() - 1]);
}

#[test]
fn test_frc_is_reproducible_with_seed() {
    let (x, y) = clustered_points(4, 30);
    let config = FrcConfig::default()
        .with_repetitions(3)
        .with_pixel_size(2.0, 2.0)
        .with_extent(Extent2D::new((0.0, 200.0), (0.0, 200.0)))
        .with_seed(42);
    let first = estimate_resolution(&x, &y, &config).unwrap();
    let second = estimate_resolution(&x, &y, &config).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.resolutions.len(), 3);
    assert_eq!(first.curves.len(), 3);
    assert_eq!(first.qi.len(), first.ci.len());
    assert!(first.resolution.is_finite() && first.resolution > 0.0);
    assert_relative_eq!(first.resolution_nm(), first.resolution * 1e9);
}

#[test]
fn test_frc_rejects_zero_repetitions() {
    let (x, y) = clustered_points(5, 2);
    let config = FrcConfig::default().with_repetitions(0);
    assert!(estimate_resolution(&x, &y, &config).is_err());
}
