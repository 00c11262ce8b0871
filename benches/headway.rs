use criterion::{Criterion, criterion_group, criterion_main};
use headway::prelude::*;
use std::{env, hint::black_box, time::Duration};

/// A grid of straight east-west routes, `rows` apart by 400 m.
fn synthetic_network(rows: usize, stops_per_route: usize) -> NetworkData {
    let origin = Coordinate::new(59.30, 17.95);
    let routes = (0..rows)
        .map(|row| RouteData {
            id: format!("R{row}"),
            stops: (0..stops_per_route)
                .map(|i| StopData {
                    id: format!("R{row}-S{i}"),
                    coordinate: origin.with_offset(i as f64 * 450.0, row as f64 * 400.0),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
        .collect();
    NetworkData::from(routes)
}

fn load_network() -> NetworkData {
    match env::var("FEED_DATA_PATH") {
        Ok(path) => FeedReader::default()
            .from_path(path)
            .load()
            .expect("Failed to read feed"),
        Err(_) => synthetic_network(60, 40),
    }
}

fn match_single(matcher: &MapMatcher, fix: &Fix, prior: &Prior) {
    let _ = black_box(matcher.match_fix(fix, prior));
}

fn criterion_benchmark(c: &mut Criterion) {
    let config = Config::default();
    let network = RouteNetwork::from_data(load_network()).expect("Failed to build network");
    let index = SpatialIndex::build(&network, config.index.cell_size);
    let matcher = MapMatcher::new(&network, &index, &config.matcher);

    let origin = Coordinate::new(59.30, 17.95);
    let fix = Fix::new(
        "bench",
        Timestamp::from_seconds(10),
        origin.with_offset(5_000.0, 4_010.0),
    )
    .with_accuracy(10.0);
    let prior = Prior::default();

    let mut group = c.benchmark_group("Matching");
    group.warm_up_time(Duration::from_secs(3));
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("Single fix", |b| {
        b.iter(|| match_single(&matcher, &fix, &prior))
    });

    let service = TrackingService::with_network(config.clone(), network.clone());
    let fleet: Vec<Fix> = (0..500)
        .map(|vehicle| {
            let row = vehicle % 60;
            Fix::new(
                format!("v{vehicle}"),
                Timestamp::from_seconds(0),
                origin.with_offset((vehicle / 60) as f64 * 900.0, row as f64 * 400.0 + 3.0),
            )
            .with_accuracy(8.0)
        })
        .collect();
    group.bench_function("Fleet batch of 500", |b| {
        b.iter(|| {
            let batch: Vec<Fix> = fleet.clone();
            black_box(service.ingest_batch(batch))
        })
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
