use ndarray::Array2;
use phaseret_core::filters::pad_to_size;
use phaseret_core::transforms::to_complex;
use phaseret_core::{detect, diffract, DetectorModel, LiveParams, Solver, SolverConfig};
use rand::prelude::*;
use std::time::Instant;

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse::<T>().ok())
        .unwrap_or(default)
}

/// An off-center letter "F" on a dark background.
fn build_object(size: usize) -> Array2<f64> {
    let stroke = (size / 8).max(1);
    Array2::from_shape_fn((size, size), |(r, c)| {
        let stem = c < stroke;
        let top = r < stroke;
        let middle = (size / 2..size / 2 + stroke).contains(&r) && c < size * 3 / 4;
        if stem || top || middle {
            1.0
        } else {
            0.0
        }
    })
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let size = parse_arg(&args, "--size", 256usize);
    let iterations = parse_arg(&args, "--iterations", 500usize);
    let bit_depth = parse_arg(&args, "--bit-depth", 0u32);
    let saturation = parse_arg(&args, "--saturation", 1.0f64);
    let seed = parse_arg(&args, "--seed", 0u64);

    println!(
        "live reconstruction start size={} iterations={} bit_depth={} saturation={} seed={}",
        size, iterations, bit_depth, saturation, seed
    );

    let object = build_object(size / 4);
    let padded = pad_to_size(to_complex(object.view()).view(), size).expect("object larger than field");
    let intensity = diffract(padded.view()).expect("diffraction failed");

    let model = DetectorModel {
        saturation,
        bit_depth: (bit_depth > 0).then_some(bit_depth),
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let amplitude = detect(intensity.view(), &model, &mut rng).expect("invalid detector model");

    let config = SolverConfig {
        oversampling: 2.0,
        ..SolverConfig::seeded(seed)
    };
    let mut solver = Solver::with_config(amplitude, config).expect("solver construction failed");
    let params = LiveParams::new();

    let t0 = Instant::now();
    for i in 0..iterations {
        solver.live_step(&params).expect("live step failed");
        if (i + 1) % 100 == 0 {
            println!(
                "iteration={} support_px={} elapsed_s={:.3}",
                i + 1,
                solver.support().count(),
                t0.elapsed().as_secs_f64()
            );
        }
    }
    solver.finish_with_er().expect("final ER failed");
    solver.center().expect("center failed");
    let elapsed = t0.elapsed();

    let energy: f64 = solver.ds_image().iter().map(|z| z.norm_sqr()).sum();
    solver.gaussian_blur(params.blur_sigma).expect("display blur failed");
    let peak = solver.ds_image().iter().map(|z| z.norm()).fold(0.0, f64::max);
    println!(
        "live reconstruction done elapsed_s={:.3} per_iter_ms={:.3} support_px={} energy={:.6e} display_peak={:.3}",
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() * 1e3 / iterations.max(1) as f64,
        solver.support().count(),
        energy,
        peak
    );
}
