use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use particle_hmc::{
    keys,
    test_model::{ToyModel, ToyParticle},
    Chain, HamiltonianMonteCarlo, HmcSettings, OptimizedVariables, SamplerKind,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn make_model(n_particles: usize) -> ToyModel {
    let mut model = ToyModel::default();
    for i in 0..n_particles {
        let x = i as f64;
        model.add(
            ToyParticle::xyz(&format!("p{i}"), [x, 0., 0.])
                .radius(1.)
                .restrain(keys::X, x + 0.5, 1.)
                .restrain(keys::Y, 0., 2.)
                .restrain(keys::Z, 0., 0.5)
                .restrain(keys::RADIUS, 1., 4.),
        );
    }
    model
}

fn make_driver(n_particles: usize, sampler: SamplerKind) -> HamiltonianMonteCarlo<ToyModel> {
    let model = make_model(n_particles);
    let variables = OptimizedVariables::with_default_builders(&model);
    let settings = HmcSettings {
        sampler,
        seed: 42,
        ..Default::default()
    };
    HamiltonianMonteCarlo::new(model, variables, settings).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    for n in [10, 250] {
        c.bench_function(&format!("make driver {n}"), |b| {
            b.iter(|| make_driver(black_box(n), SamplerKind::Dynamic))
        });

        let mut hmc = make_driver(n, SamplerKind::Dynamic);
        c.bench_function(&format!("nuts step {n}"), |b| {
            b.iter(|| hmc.step().unwrap())
        });

        let mut hmc = make_driver(n, SamplerKind::Static);
        c.bench_function(&format!("static step {n}"), |b| {
            b.iter(|| hmc.step().unwrap())
        });

        c.bench_function(&format!("shuffle {n}"), |b| {
            b.iter_batched(
                || {
                    let model = make_model(n);
                    let variables = OptimizedVariables::with_default_builders(&model);
                    (model, variables, ChaCha8Rng::seed_from_u64(42))
                },
                |(mut model, variables, mut rng)| {
                    variables.shuffle(&mut model, 1., &mut rng).unwrap();
                    model
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
