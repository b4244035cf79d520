//! Population fixtures shared by the integration tests

#![allow(dead_code)]

use diabetes_analytics::prelude::*;
use diabetes_analytics::store::PatientSeed;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Age group the way the ingestion pipeline assigns it
pub fn age_group(age: f64) -> AgeGroup {
    if age < 30.0 {
        AgeGroup::Young
    } else if age < 45.0 {
        AgeGroup::Adult
    } else if age < 60.0 {
        AgeGroup::Mature
    } else {
        AgeGroup::Senior
    }
}

pub fn bmi_category(bmi: f64) -> BmiCategory {
    if bmi <= 18.4 {
        BmiCategory::Underweight
    } else if bmi <= 24.9 {
        BmiCategory::Normal
    } else if bmi <= 29.9 {
        BmiCategory::Overweight
    } else {
        BmiCategory::Obese
    }
}

pub fn glucose_level(glucose: f64) -> GlucoseLevel {
    if glucose <= 99.0 {
        GlucoseLevel::Normal
    } else if glucose <= 125.0 {
        GlucoseLevel::Prediabetes
    } else {
        GlucoseLevel::Diabetes
    }
}

pub fn patient(
    id: &str,
    pregnancies: i64,
    glucose: f64,
    bmi: f64,
    age: f64,
    diabetic: bool,
) -> PatientSeed {
    PatientSeed {
        id: id.to_string(),
        pregnancies,
        glucose,
        bmi,
        age,
        diabetic,
        age_group: age_group(age),
        bmi_category: bmi_category(bmi),
        glucose_level: glucose_level(glucose),
    }
}

/// Store holding `seeds` under the default key layout
pub fn store_with(seeds: &[PatientSeed]) -> MemoryStore {
    let store = MemoryStore::new();
    let schema = KeySchema::default();
    for seed in seeds {
        store.load_patient(&schema, seed);
    }
    store
}

/// Reproducible synthetic population with values clustered around the range bounds
pub fn synthetic_seeds(count: usize, seed: u64) -> Vec<PatientSeed> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|n| {
            let glucose = (rng.gen_range(60.0..200.0_f64) * 10.0).round() / 10.0;
            let bmi = (rng.gen_range(15.0..45.0_f64) * 100.0).round() / 100.0;
            let age = rng.gen_range(21..81) as f64;
            let pregnancies = if rng.gen_bool(0.4) { 0 } else { rng.gen_range(1..12) };
            let diabetic = rng.gen_bool(((glucose - 60.0) / 160.0).clamp(0.05, 0.9));
            patient(&n.to_string(), pregnancies, glucose, bmi, age, diabetic)
        })
        .collect()
}

pub fn synthetic_store(count: usize, seed: u64) -> MemoryStore {
    store_with(&synthetic_seeds(count, seed))
}

/// Keys under the ephemeral prefix still present in the store
pub fn ephemeral_keys(store: &MemoryStore) -> Vec<String> {
    let prefix = KeySchema::default().ephemeral_prefix;
    store
        .keys()
        .into_iter()
        .filter(|key| key.starts_with(&prefix))
        .collect()
}
