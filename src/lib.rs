/*!
 * # Diabetes Population Analytics
 *
 * Aggregate statistics over a diabetes patient population held in Redis.
 *
 * Each patient is a primary record (`patient:<id>`, a field map) plus
 * membership in precomputed derived indices: the diabetes set, one set per
 * categorical value (`age_group:Senior`, `bmi_category:Obese`, ...) and
 * score-ordered sequences for Glucose and BMI. The library combines those
 * into counts, rates and rankings without ever loading the population into
 * memory.
 *
 * ## Features
 *
 * - **Categorical breakdowns**: diabetes rate per age group, BMI category and glucose level
 * - **Pregnancy and high-risk cohorts**: multi-way intersections through self-cleaning temporary sets
 * - **Rankings**: top-10 patients by Glucose or BMI with a deterministic tie-break
 * - **Range breakdowns**: fixed, contiguous numeric ranges over Glucose and BMI
 * - **Store telemetry**: memory, clients, command counts, keyspace hit ratio
 * - **Pluggable store**: `RedisStore` for production, `MemoryStore` for tests and demos
 *
 * ## Quick Start
 *
 * ```no_run
 * use diabetes_analytics::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let config = AnalyticsConfig::load(None)?;
 * let store = RedisStore::connect(&config)?;
 * let analytics = DiabetesAnalytics::from_config(&store, &config);
 *
 * for stats in analytics.age_groups()? {
 *     println!("{}: {} patients, {}% diabetic", stats.category, stats.total, stats.rate);
 * }
 *
 * analytics.overview()?.print_summary();
 * # Ok(())
 * # }
 * ```
 *
 * ## Failure Semantics
 *
 * Every aggregation is all-or-nothing: any store failure aborts the call with
 * one [`AnalyticsError`], and no partial result is returned. Temporary sets
 * created during the call are removed on success and on failure. Records with
 * missing or unparsable fields are skipped, never reported as errors.
 *
 * ```no_run
 * # use diabetes_analytics::prelude::*;
 * # use diabetes_analytics::export::response_json;
 * # fn main() -> Result<()> {
 * # let store = MemoryStore::new();
 * let analytics = DiabetesAnalytics::new(&store);
 * // {"error": "..."} when the call failed
 * let payload = response_json(&analytics.pregnancy())?;
 * println!("{}", payload);
 * # Ok(())
 * # }
 * ```
 *
 * ## Configuration
 *
 * Settings are layered: built-in defaults, then the user config file
 * (`<config dir>/diabetes-analytics/config.toml`), then `DIABSTATS_*`
 * environment variables.
 *
 * ```no_run
 * # use diabetes_analytics::prelude::*;
 * let config = ConfigBuilder::new()
 *     .redis_url("redis://cache.internal:6379/2")
 *     .command_timeout_ms(1500)
 *     .parallel(false)
 *     .build();
 * diabetes_analytics::config::set_global_config(config);
 * ```
 */

// Re-export error types from root
pub use error::{AggregationFailure, AnalyticsError, ExportFormat, Result, StoreOperation};

// Public modules
pub mod analytics;
pub mod config;
pub mod data_types;
pub mod ephemeral;
pub mod error;
pub mod export;
pub mod scan;
pub mod schema;
pub mod store;
pub mod telemetry;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use diabetes_analytics::prelude::*;
/// ```
pub mod prelude {
    pub use crate::analytics::{
        AgeGlucoseStats, CategoryStats, DetailedRangeAnalysis, DiabetesAnalytics, HighRiskStats,
        PopulationOverview, PregnancyStats, RangeStats, RankedPatient,
    };
    pub use crate::config::{AnalyticsConfig, ConfigBuilder};
    pub use crate::data_types::*;
    pub use crate::error::{AggregationFailure, AnalyticsError, Result, StoreOperation};
    pub use crate::export::{CsvExporter, JsonExporter, ResultExporter};
    pub use crate::schema::KeySchema;
    pub use crate::store::{MemoryStore, RedisStore, Store};
    pub use crate::telemetry::TelemetrySnapshot;
    pub use crate::ExportFormat;
}

/// Population data constants
pub mod constants {
    /// Number of patients in a ranking
    pub const TOP_K: usize = crate::analytics::TOP_K;

    /// Outcome code of a diabetic patient
    pub const OUTCOME_DIABETIC: &str = "1";

    /// Outcome code of a non-diabetic patient
    pub const OUTCOME_NON_DIABETIC: &str = "0";

    /// Pregnancy count at or above which a patient counts as "has been pregnant"
    pub const PREGNANCY_THRESHOLD: i64 = 1;
}

/// Common recipes
pub mod cookbook {
    use serde_json::{Map, Value};

    use crate::analytics::DiabetesAnalytics;
    use crate::data_types::ScoreMetric;
    use crate::export::response_json;
    use crate::store::Store;
    use crate::Result;

    /// Run every statistic and collect the payloads under their names
    ///
    /// A failed statistic contributes `{"error": ...}` and does not stop the
    /// others. Only a rendering failure aborts the report.
    ///
    /// # Example
    /// ```no_run
    /// # use diabetes_analytics::prelude::*;
    /// # use diabetes_analytics::cookbook::full_report;
    /// # fn main() -> Result<()> {
    /// # let store = MemoryStore::new();
    /// let report = full_report(&DiabetesAnalytics::new(&store))?;
    /// println!("{}", serde_json::to_string_pretty(&report)?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn full_report<S: Store + ?Sized>(analytics: &DiabetesAnalytics<'_, S>) -> Result<Value> {
        let mut report = Map::new();
        report.insert("overview".into(), response_json(&analytics.overview())?);
        report.insert("age_groups".into(), response_json(&analytics.age_groups())?);
        report.insert("bmi_categories".into(), response_json(&analytics.bmi_categories())?);
        report.insert("glucose_levels".into(), response_json(&analytics.glucose_levels())?);
        report.insert("pregnancy".into(), response_json(&analytics.pregnancy())?);
        report.insert("high_risk".into(), response_json(&analytics.high_risk())?);
        report.insert("top_glucose".into(), response_json(&analytics.top_glucose())?);
        report.insert("top_bmi".into(), response_json(&analytics.top_bmi())?);
        report.insert(
            "glucose_ranges".into(),
            response_json(&analytics.range_breakdown(ScoreMetric::Glucose))?,
        );
        report.insert(
            "bmi_ranges".into(),
            response_json(&analytics.range_breakdown(ScoreMetric::Bmi))?,
        );
        report.insert(
            "age_glucose_correlation".into(),
            response_json(&analytics.age_glucose_correlation())?,
        );
        report.insert("telemetry".into(), response_json(&analytics.telemetry())?);
        Ok(Value::Object(report))
    }
}
