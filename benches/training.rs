use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use serde_json::json;
use tabular_pipeline::models::{Algorithm, ModelFactory};

fn create_classification_data(n_rows: usize, n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(42);
    let x = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen::<f64>() * 10.0);
    let y = x
        .rows()
        .into_iter()
        .map(|row| if row.sum() + rng.gen::<f64>() > 5.0 * n_features as f64 { 1.0 } else { 0.0 })
        .collect();
    (x, y)
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("training");
    group.sample_size(10);

    for n_rows in [500, 2000].iter() {
        let data = create_classification_data(*n_rows, 10);

        for algo in Algorithm::ALL {
            let params = match algo {
                Algorithm::RandomForest => json!({ "n_estimators": 20, "random_state": 0 }),
                Algorithm::XGBoost => json!({ "n_estimators": 20, "max_depth": 4, "random_state": 0 }),
                Algorithm::NeuralNetwork => json!({ "epochs": 5, "random_state": 0 }),
            };
            group.bench_with_input(BenchmarkId::new(algo.tag(), n_rows), &data, |b, (x, y)| {
                b.iter(|| {
                    let mut model = ModelFactory::create(algo);
                    model.train(black_box(x), black_box(y), &params).unwrap()
                })
            });
        }
    }

    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let (x, y) = create_classification_data(2000, 10);
    let mut model = ModelFactory::create(Algorithm::RandomForest);
    model
        .train(&x, &y, &json!({ "n_estimators": 50, "random_state": 0 }))
        .unwrap();

    c.bench_function("forest_predict_2000", |b| b.iter(|| model.predict(black_box(&x)).unwrap()));
}

criterion_group!(benches, bench_training, bench_predict);
criterion_main!(benches);
