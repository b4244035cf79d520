/*!
 * Integration test against a live Redis server
 *
 * Seeds a synthetic population under a private key namespace, runs every
 * aggregation through `RedisStore`, and checks the results against the same
 * population held in a `MemoryStore`. All keys of the namespace are removed
 * afterwards.
 *
 * Note: This test needs a disposable Redis instance. It is skipped unless
 * `DIABSTATS_TEST_REDIS_URL` is set, e.g.
 * `DIABSTATS_TEST_REDIS_URL=redis://127.0.0.1:6379/15 cargo test`.
 */

mod common;

use std::time::Duration;

use common::synthetic_seeds;
use diabetes_analytics::prelude::*;
use diabetes_analytics::store::PatientSeed;

const TEST_URL_VAR: &str = "DIABSTATS_TEST_REDIS_URL";

fn namespaced_schema() -> KeySchema {
    let ns = format!("diabtest:{}:", std::process::id());
    KeySchema {
        patient_prefix: format!("{}patient:", ns),
        diabetes_set: format!("{}patients:diabetes", ns),
        glucose_index: format!("{}patients:by_glucose", ns),
        bmi_index: format!("{}patients:by_bmi", ns),
        age_group_prefix: format!("{}age_group:", ns),
        bmi_category_prefix: format!("{}bmi_category:", ns),
        glucose_level_prefix: format!("{}glucose_level:", ns),
        ephemeral_prefix: format!("{}temp:", ns),
    }
}

fn seed_redis(url: &str, schema: &KeySchema, seeds: &[PatientSeed]) -> redis::RedisResult<()> {
    let client = redis::Client::open(url)?;
    let mut con = client.get_connection()?;
    for seed in seeds {
        let id = PatientId::new(seed.id.clone());
        let outcome = Outcome::from_membership(seed.diabetic).to_code();
        redis::cmd("HSET")
            .arg(schema.patient_key(&id))
            .arg(fields::PREGNANCIES)
            .arg(seed.pregnancies)
            .arg(fields::GLUCOSE)
            .arg(seed.glucose)
            .arg(fields::BMI)
            .arg(seed.bmi)
            .arg(fields::AGE)
            .arg(seed.age)
            .arg(fields::OUTCOME)
            .arg(outcome)
            .query::<()>(&mut con)?;
        redis::cmd("ZADD")
            .arg(&schema.glucose_index)
            .arg(seed.glucose)
            .arg(&seed.id)
            .query::<()>(&mut con)?;
        redis::cmd("ZADD")
            .arg(&schema.bmi_index)
            .arg(seed.bmi)
            .arg(&seed.id)
            .query::<()>(&mut con)?;
        for key in [
            schema.category_key(seed.age_group),
            schema.category_key(seed.bmi_category),
            schema.category_key(seed.glucose_level),
        ] {
            redis::cmd("SADD").arg(key).arg(&seed.id).query::<()>(&mut con)?;
        }
        if seed.diabetic {
            redis::cmd("SADD")
                .arg(&schema.diabetes_set)
                .arg(&seed.id)
                .query::<()>(&mut con)?;
        }
    }
    Ok(())
}

fn namespace_keys(store: &RedisStore, schema: &KeySchema) -> Vec<String> {
    let ns = schema
        .patient_prefix
        .trim_end_matches("patient:")
        .to_string();
    store.keys_by_prefix(&ns).unwrap()
}

#[test]
fn redis_store_matches_memory_store() {
    let Ok(url) = std::env::var(TEST_URL_VAR) else {
        println!("{} not set; skipping live Redis test", TEST_URL_VAR);
        return;
    };

    let schema = namespaced_schema();
    let seeds = synthetic_seeds(250, 99);
    seed_redis(&url, &schema, &seeds).expect("Should be able to seed Redis");

    let redis_store = RedisStore::connect_with(
        &url,
        Duration::from_secs(2),
        Duration::from_secs(5),
        50,
    )
    .expect("Should be able to connect");
    let memory_store = MemoryStore::new();
    for seed in &seeds {
        memory_store.load_patient(&schema, seed);
    }

    let live = DiabetesAnalytics::new(&redis_store)
        .with_schema(schema.clone())
        .with_batch_size(50);
    let reference = DiabetesAnalytics::new(&memory_store).with_schema(schema.clone());

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        assert_eq!(live.overview().unwrap(), reference.overview().unwrap());
        assert_eq!(live.age_groups().unwrap(), reference.age_groups().unwrap());
        assert_eq!(live.bmi_categories().unwrap(), reference.bmi_categories().unwrap());
        assert_eq!(live.glucose_levels().unwrap(), reference.glucose_levels().unwrap());
        assert_eq!(live.pregnancy().unwrap(), reference.pregnancy().unwrap());
        assert_eq!(live.high_risk().unwrap(), reference.high_risk().unwrap());
        assert_eq!(live.top_glucose().unwrap(), reference.top_glucose().unwrap());
        assert_eq!(live.top_bmi().unwrap(), reference.top_bmi().unwrap());
        assert_eq!(
            live.detailed_range_analysis().unwrap(),
            reference.detailed_range_analysis().unwrap()
        );
        assert_eq!(
            live.age_glucose_correlation().unwrap(),
            reference.age_glucose_correlation().unwrap()
        );

        let telemetry = live.telemetry().unwrap();
        assert!(telemetry.total_keys >= namespace_keys(&redis_store, &schema).len() as u64);
        assert!((0.0..=100.0).contains(&telemetry.hit_ratio));

        let leftovers = redis_store.keys_by_prefix(&schema.ephemeral_prefix).unwrap();
        assert!(leftovers.is_empty(), "leaked {:?}", leftovers);
    }));

    for key in namespace_keys(&redis_store, &schema) {
        redis_store.delete(&key).unwrap();
    }
    if let Err(panic) = outcome {
        std::panic::resume_unwind(panic);
    }
}
