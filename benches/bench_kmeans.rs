use criterion::{criterion_group, criterion_main, Criterion};
use kmeans_stepper::{generate_blobs, InitMethod, KMeans, KMeansConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn bench_kmeans(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let points = generate_blobs(20_000, 8, 8, &mut rng).expect("blob generation");
    let config = KMeansConfig {
        k: 8,
        max_iterations: 100,
    };

    for (name, method) in [
        ("kmeans_fit_random_20k_8d", InitMethod::Random),
        ("kmeans_fit_farthest_first_20k_8d", InitMethod::FarthestFirst),
        ("kmeans_fit_kmeanspp_20k_8d", InitMethod::KMeansPlusPlus),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut rng = ChaCha8Rng::seed_from_u64(42);
                let mut model = KMeans::new(config.clone());
                model
                    .initialize(&points, &method, &mut rng)
                    .expect("initialization");
                model.fit(&points).expect("fit")
            });
        });
    }

    c.bench_function("kmeans_single_step_20k_8d", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut model = KMeans::new(config.clone());
        model
            .initialize(&points, &InitMethod::KMeansPlusPlus, &mut rng)
            .expect("initialization");
        b.iter(|| model.step(&points).expect("step"));
    });
}

criterion_group!(benches, bench_kmeans);
criterion_main!(benches);
