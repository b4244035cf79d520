use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use diabetes_analytics::export::{CsvExporter, JsonExporter, ResultExporter};
use diabetes_analytics::prelude::*;
use diabetes_analytics::store::PatientSeed;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::hint::black_box;
use std::sync::OnceLock;

const POPULATION: usize = 20_000;

// One synthetic population shared by every benchmark
static STORE: OnceLock<MemoryStore> = OnceLock::new();

fn seed_patient(rng: &mut StdRng, id: usize) -> PatientSeed {
    let glucose: f64 = rng.gen_range(60.0..200.0);
    let bmi: f64 = rng.gen_range(15.0..45.0);
    let age = rng.gen_range(21..81) as f64;
    let age_group = match age as u32 {
        0..=29 => AgeGroup::Young,
        30..=44 => AgeGroup::Adult,
        45..=59 => AgeGroup::Mature,
        _ => AgeGroup::Senior,
    };
    let bmi_category = if bmi <= 18.4 {
        BmiCategory::Underweight
    } else if bmi <= 24.9 {
        BmiCategory::Normal
    } else if bmi <= 29.9 {
        BmiCategory::Overweight
    } else {
        BmiCategory::Obese
    };
    let glucose_level = if glucose <= 99.0 {
        GlucoseLevel::Normal
    } else if glucose <= 125.0 {
        GlucoseLevel::Prediabetes
    } else {
        GlucoseLevel::Diabetes
    };
    PatientSeed {
        id: id.to_string(),
        pregnancies: if rng.gen_bool(0.4) { 0 } else { rng.gen_range(1..12) },
        glucose,
        bmi,
        age,
        diabetic: rng.gen_bool(((glucose - 60.0) / 160.0).clamp(0.05, 0.9)),
        age_group,
        bmi_category,
        glucose_level,
    }
}

fn get_store() -> &'static MemoryStore {
    STORE.get_or_init(|| {
        let schema = KeySchema::default();
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for id in 0..POPULATION {
            store.load_patient(&schema, &seed_patient(&mut rng, id));
        }
        store
    })
}

fn benchmark_categorical(c: &mut Criterion) {
    let store = get_store();
    let mut group = c.benchmark_group("categorical");

    for parallel in [false, true] {
        let analytics = DiabetesAnalytics::new(store).with_parallel(parallel);
        group.bench_with_input(
            BenchmarkId::new("age_groups", if parallel { "parallel" } else { "sequential" }),
            &analytics,
            |b, analytics| b.iter(|| black_box(analytics.age_groups().unwrap())),
        );
    }

    let analytics = DiabetesAnalytics::new(store);
    group.bench_function("overview", |b| {
        b.iter(|| black_box(analytics.overview().unwrap()))
    });
    group.finish();
}

fn benchmark_scans(c: &mut Criterion) {
    let store = get_store();
    let mut group = c.benchmark_group("patient_scan");
    group.sample_size(10); // Full scans over every primary record

    for batch_size in [50, 500, 5_000] {
        let analytics = DiabetesAnalytics::new(store).with_batch_size(batch_size);
        group.bench_with_input(
            BenchmarkId::new("pregnancy", batch_size),
            &analytics,
            |b, analytics| b.iter(|| black_box(analytics.pregnancy().unwrap())),
        );
    }

    let analytics = DiabetesAnalytics::new(store);
    group.bench_function("high_risk", |b| {
        b.iter(|| black_box(analytics.high_risk().unwrap()))
    });
    group.finish();
}

fn benchmark_rankings_and_ranges(c: &mut Criterion) {
    let store = get_store();
    let analytics = DiabetesAnalytics::new(store);
    let mut group = c.benchmark_group("score_indices");

    group.bench_function("top_glucose", |b| {
        b.iter(|| black_box(analytics.top_glucose().unwrap()))
    });
    group.bench_function("top_bmi", |b| {
        b.iter(|| black_box(analytics.top_bmi().unwrap()))
    });
    group.sample_size(20);
    group.bench_function("detailed_range_analysis", |b| {
        b.iter(|| black_box(analytics.detailed_range_analysis().unwrap()))
    });
    group.bench_function("age_glucose_correlation", |b| {
        b.iter(|| black_box(analytics.age_glucose_correlation().unwrap()))
    });
    group.finish();
}

fn benchmark_data_types(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_types");
    let raw: HashMap<String, String> = [
        ("Pregnancies", "6"),
        ("Glucose", "148"),
        ("BMI", "33.6"),
        ("Age", "50"),
        ("Outcome", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    group.bench_function("parse_patient_record", |b| {
        b.iter(|| PatientRecord::from_fields(PatientId::new("1"), black_box(&raw)))
    });
    group.bench_function("compare_ids", |b| {
        b.iter(|| compare_ids(black_box("1042"), black_box("987")))
    });
    group.finish();
}

fn benchmark_exports(c: &mut Criterion) {
    let store = get_store();
    let rows = DiabetesAnalytics::new(store)
        .detailed_range_analysis()
        .unwrap()
        .glucose_analysis;
    let mut group = c.benchmark_group("exports");

    group.bench_function("json_rows", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            JsonExporter::new().export_rows(black_box(&rows), &mut out).unwrap();
            out
        })
    });
    group.bench_function("csv_rows", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            CsvExporter::new().export_rows(black_box(&rows), &mut out).unwrap();
            out
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_categorical,
    benchmark_scans,
    benchmark_rankings_and_ranges,
    benchmark_data_types,
    benchmark_exports
);
criterion_main!(benches);
