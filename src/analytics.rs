/*!
 * Aggregation engine for diabetes prevalence statistics
 *
 * Combines primary patient records with the derived indices (membership sets
 * and score-ordered sequences) to produce counts, rates and rankings. Every
 * aggregation probes the store first, runs all-or-nothing, and releases the
 * ephemeral sets it created before returning, on success and on error.
 */

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    Result, AnalyticsError,
    config::{global_config, AnalyticsConfig},
    data_types::*,
    ephemeral::{CallScope, EphemeralSet},
    scan::{PatientScan, ScanProgress},
    schema::KeySchema,
    store::Store,
    telemetry::TelemetrySnapshot,
};

/// Size of the top-K rankings
pub const TOP_K: usize = 10;

type ProgressCallback = Arc<dyn Fn(ScanProgress) + Send + Sync>;

/// Analytics engine over a patient store
pub struct DiabetesAnalytics<'a, S: Store + ?Sized> {
    store: &'a S,
    schema: KeySchema,
    batch_size: usize,
    parallel: bool,
    scan_progress: Option<ProgressCallback>,
}

impl<'a, S: Store + ?Sized> DiabetesAnalytics<'a, S> {
    /// Create a new analytics engine with the default key layout
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            schema: KeySchema::default(),
            batch_size: 500,
            parallel: true,
            scan_progress: None,
        }
    }

    /// Create an engine using the key layout, batch size and parallelism of `config`
    pub fn from_config(store: &'a S, config: &AnalyticsConfig) -> Self {
        Self::new(store)
            .with_schema(config.keys.clone())
            .with_batch_size(config.scan_batch_size)
            .with_parallel(config.enable_parallel)
    }

    /// Create an engine from the process-wide configuration
    pub fn with_global_config(store: &'a S) -> Self {
        Self::from_config(store, &global_config())
    }

    pub fn with_schema(mut self, schema: KeySchema) -> Self {
        self.schema = schema;
        self
    }

    /// Members added to an ephemeral set per store call while scanning
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Fetch independent categories, ranges and groups in parallel
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Observe progress of full patient scans
    pub fn with_scan_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        self.scan_progress = Some(Arc::new(callback));
        self
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Liveness probe issued before any read
    pub fn ensure_connected(&self) -> Result<()> {
        match self.store.ping() {
            Ok(true) => Ok(()),
            Ok(false) => Err(AnalyticsError::Connectivity {
                message: "liveness probe returned an unexpected reply".to_string(),
                suggestion: None,
            }),
            Err(e) => Err(AnalyticsError::Connectivity {
                message: e.to_string(),
                suggestion: Some("Check that the store is running and reachable".to_string()),
            }),
        }
    }

    /// Population-wide counts
    pub fn overview(&self) -> Result<PopulationOverview> {
        self.ensure_connected()?;
        // The age dimension partitions the population
        let mut total_patients = 0;
        for group in AgeGroup::ALL {
            total_patients += self.store.set_cardinality(&self.schema.category_key(*group))?;
        }
        let diabetic_patients = self.store.set_cardinality(&self.schema.diabetes_set)?;
        Ok(PopulationOverview {
            total_patients,
            diabetic_patients,
            non_diabetic_patients: total_patients.saturating_sub(diabetic_patients),
            diabetes_rate: rate_percent(diabetic_patients, total_patients),
        })
    }

    /// Per-age-group counts and diabetes rate
    pub fn age_groups(&self) -> Result<Vec<CategoryStats>> {
        self.categorical::<AgeGroup>()
    }

    /// Per-BMI-category counts and diabetes rate
    pub fn bmi_categories(&self) -> Result<Vec<CategoryStats>> {
        self.categorical::<BmiCategory>()
    }

    /// Per-glucose-level counts and diabetes rate
    pub fn glucose_levels(&self) -> Result<Vec<CategoryStats>> {
        self.categorical::<GlucoseLevel>()
    }

    /// Counts and diabetes rate for every populated category of a dimension,
    /// in the dimension's enumeration order.
    pub fn categorical<C: Category>(&self) -> Result<Vec<CategoryStats>> {
        self.ensure_connected()?;
        let scope = CallScope::new(&self.schema);
        debug!(dimension = %C::DIMENSION, token = scope.token(), "categorical aggregation");

        let rows = self.map_ordered(C::ALL, |category| self.category_stats(&scope, *category))?;
        Ok(rows.into_iter().flatten().collect())
    }

    fn category_stats<C: Category>(&self, scope: &CallScope<'_>, category: C) -> Result<Option<CategoryStats>> {
        let key = self.schema.category_key(category);
        let total = self.store.set_cardinality(&key)?;
        if total == 0 {
            return Ok(None);
        }

        let purpose = format!("diabetic_{}_{}", C::DIMENSION, category.label());
        let diabetic_set = scope.set(self.store, &purpose);
        diabetic_set.intersect(&[self.schema.diabetes_set.as_str(), key.as_str()])?;
        let diabetic = diabetic_set.cardinality()?;
        diabetic_set.release()?;

        Ok(Some(CategoryStats::new(category.label(), total, diabetic)))
    }

    /// Patients with `Pregnancies > 0`, found by scanning every primary record
    pub fn pregnancy(&self) -> Result<PregnancyStats> {
        self.ensure_connected()?;
        let scope = CallScope::new(&self.schema);

        let pregnant = self.collect_pregnant(&scope)?;
        let total = pregnant.cardinality()?;
        let stats = if total > 0 {
            let diabetic_set = scope.set(self.store, "pregnant_diabetic");
            diabetic_set.intersect(&[pregnant.key(), self.schema.diabetes_set.as_str()])?;
            let diabetic = diabetic_set.cardinality()?;
            diabetic_set.release()?;
            PregnancyStats::new(total, diabetic)
        } else {
            PregnancyStats::new(0, 0)
        };
        pregnant.release()?;

        debug!(total = stats.total_pregnant, "pregnancy aggregation");
        Ok(stats)
    }

    /// Patients who have been pregnant, are obese and are diabetic
    pub fn high_risk(&self) -> Result<HighRiskStats> {
        self.ensure_connected()?;
        let scope = CallScope::new(&self.schema);

        let pregnant = self.collect_pregnant(&scope)?;
        let obese = self.schema.category_key(BmiCategory::Obese);
        let high_risk = scope.set(self.store, "high_risk");
        high_risk.intersect(&[
            pregnant.key(),
            obese.as_str(),
            self.schema.diabetes_set.as_str(),
        ])?;
        let high_risk_count = high_risk.cardinality()?;
        high_risk.release()?;
        pregnant.release()?;

        Ok(HighRiskStats { high_risk_count })
    }

    /// Materialize the pregnant population into an ephemeral set
    fn collect_pregnant(&self, scope: &CallScope<'_>) -> Result<EphemeralSet<'a, S>> {
        let pregnant = scope.set(self.store, "pregnant");

        let mut scan = PatientScan::start(self.store, &self.schema)?;
        if let Some(callback) = &self.scan_progress {
            let callback = Arc::clone(callback);
            scan = scan.with_progress(move |progress| callback(progress));
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut skipped = 0usize;
        for record in scan {
            let record = record?;
            if record.pregnancies.is_skipped() {
                skipped += 1;
                continue;
            }
            if record.has_been_pregnant() {
                batch.push(record.id.0);
                if batch.len() >= self.batch_size {
                    pregnant.add(&batch)?;
                    batch.clear();
                }
            }
        }
        if !batch.is_empty() {
            pregnant.add(&batch)?;
        }

        if skipped > 0 {
            debug!(skipped, "records without a usable Pregnancies value");
        }
        Ok(pregnant)
    }

    /// Top [`TOP_K`] patients by glucose
    pub fn top_glucose(&self) -> Result<Vec<RankedPatient>> {
        self.top_k(ScoreMetric::Glucose, TOP_K)
    }

    /// Top [`TOP_K`] patients by BMI
    pub fn top_bmi(&self) -> Result<Vec<RankedPatient>> {
        self.top_k(ScoreMetric::Bmi, TOP_K)
    }

    /// The `k` highest-scoring patients, annotated with diabetes status.
    ///
    /// Ties are ordered by ascending identifier ([`compare_ids`]), including
    /// ties that straddle the k-th position.
    pub fn top_k(&self, metric: ScoreMetric, k: usize) -> Result<Vec<RankedPatient>> {
        self.ensure_connected()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let index = self.schema.score_index(metric);

        let mut entries = self.store.top_by_score_descending(index, k)?;
        if entries.len() == k {
            let boundary = entries[k - 1].1;
            let tied = self.store.range_by_score(index, &ScoreRange::exactly(boundary))?;
            entries.retain(|(_, score)| *score > boundary);
            entries.extend(tied.into_iter().map(|id| (id, boundary)));
        }
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| compare_ids(&a.0, &b.0)));
        entries.truncate(k);

        entries
            .into_iter()
            .enumerate()
            .map(|(position, (id, score))| {
                let diabetic = self.store.is_member(&self.schema.diabetes_set, &id)?;
                let score = match metric.display_precision() {
                    Some(places) => round_to(score, places),
                    None => score,
                };
                Ok(RankedPatient {
                    rank: position + 1,
                    patient_id: PatientId::new(id),
                    metric,
                    score,
                    outcome: Outcome::from_membership(diabetic),
                })
            })
            .collect()
    }

    /// Diabetes rate per range of the metric's range table, in table order
    pub fn range_breakdown(&self, metric: ScoreMetric) -> Result<Vec<RangeStats>> {
        self.ensure_connected()?;
        let index = self.schema.score_index(metric);
        let ranges = score_ranges(metric.ranges());

        self.map_ordered(&ranges, |(name, range)| {
            let ids = self.store.range_by_score(index, range)?;
            let mut diabetic = 0;
            for id in &ids {
                if self.store.is_member(&self.schema.diabetes_set, id)? {
                    diabetic += 1;
                }
            }
            Ok(RangeStats::new(name, ids.len() as u64, diabetic))
        })
    }

    /// Glucose and BMI range breakdowns together
    pub fn detailed_range_analysis(&self) -> Result<DetailedRangeAnalysis> {
        Ok(DetailedRangeAnalysis {
            glucose_analysis: self.range_breakdown(ScoreMetric::Glucose)?,
            bmi_analysis: self.range_breakdown(ScoreMetric::Bmi)?,
        })
    }

    /// Mean glucose and diabetes rate per age group.
    ///
    /// Members without a usable glucose value are left out of every figure of
    /// their group; groups left without any usable value are omitted.
    /// A missing `Glucose` field is never read as a glucose of 0.
    pub fn age_glucose_correlation(&self) -> Result<Vec<AgeGlucoseStats>> {
        self.ensure_connected()?;
        let rows = self.map_ordered(AgeGroup::ALL, |group| self.age_glucose_stats(*group))?;
        Ok(rows.into_iter().flatten().collect())
    }

    fn age_glucose_stats(&self, group: AgeGroup) -> Result<Option<AgeGlucoseStats>> {
        let members = self.store.set_members(&self.schema.category_key(group))?;
        if members.is_empty() {
            return Ok(None);
        }
        // Fixed order keeps the floating-point sum reproducible
        let mut ids: Vec<String> = members.into_iter().collect();
        ids.sort_by(|a, b| compare_ids(a, b));

        let mut sum = 0.0;
        let mut count = 0u64;
        let mut diabetic_count = 0u64;
        let mut skipped = 0usize;
        for id in ids {
            let id = PatientId::new(id);
            let raw = self.store.get_hash(&self.schema.patient_key(&id))?;
            let record = PatientRecord::from_fields(id, &raw);
            match record.glucose.value() {
                Some(glucose) => {
                    sum += glucose;
                    count += 1;
                    if record.is_diabetic() {
                        diabetic_count += 1;
                    }
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(group = group.label(), skipped, "members without a usable Glucose value");
        }
        if count == 0 {
            return Ok(None);
        }

        Ok(Some(AgeGlucoseStats {
            age_group: group.label().to_string(),
            avg_glucose: round_to(sum / count as f64, 1),
            patient_count: count,
            diabetic_count,
            diabetes_rate: rate_percent(diabetic_count, count),
        }))
    }

    /// Store health summary
    pub fn telemetry(&self) -> Result<TelemetrySnapshot> {
        self.ensure_connected()?;
        let info = self.store.server_info()?;
        let total_keys = self.store.key_count()?;
        Ok(TelemetrySnapshot::from_info(&info, total_keys))
    }

    /// Map `f` over `items`, keeping input order in the output
    fn map_ordered<T, R, F>(&self, items: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            if self.parallel {
                use rayon::prelude::*;
                return items.par_iter().map(f).collect();
            }
        }
        #[cfg(not(feature = "parallel"))]
        let _ = self.parallel;

        items.iter().map(f).collect()
    }
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// `numerator / denominator * 100` to one decimal; 0 when the denominator is 0
pub fn rate_percent(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round_to(numerator as f64 / denominator as f64 * 100.0, 1).clamp(0.0, 100.0)
}

/// Population-wide counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationOverview {
    pub total_patients: u64,
    pub diabetic_patients: u64,
    pub non_diabetic_patients: u64,
    pub diabetes_rate: f64,
}

impl PopulationOverview {
    /// Print formatted statistics
    pub fn print_summary(&self) {
        println!("=== Diabetes Population Overview ===");
        println!("Total Patients: {}", self.total_patients);
        println!("  Diabetic: {}", self.diabetic_patients);
        println!("  Non-diabetic: {}", self.non_diabetic_patients);
        println!("Diabetes Rate: {:.1}%", self.diabetes_rate);
    }
}

/// Counts of one category value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: String,
    pub total: u64,
    pub diabetic: u64,
    pub non_diabetic: u64,
    pub rate: f64,
}

impl CategoryStats {
    pub fn new(category: &str, total: u64, diabetic: u64) -> Self {
        Self {
            category: category.to_string(),
            total,
            diabetic,
            non_diabetic: total.saturating_sub(diabetic),
            rate: rate_percent(diabetic, total),
        }
    }
}

/// Patients who have been pregnant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PregnancyStats {
    pub total_pregnant: u64,
    pub diabetic_pregnant: u64,
    pub non_diabetic_pregnant: u64,
    pub diabetes_rate: f64,
}

impl PregnancyStats {
    pub fn new(total: u64, diabetic: u64) -> Self {
        Self {
            total_pregnant: total,
            diabetic_pregnant: diabetic,
            non_diabetic_pregnant: total.saturating_sub(diabetic),
            diabetes_rate: rate_percent(diabetic, total),
        }
    }
}

/// Pregnant ∩ obese ∩ diabetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighRiskStats {
    pub high_risk_count: u64,
}

/// One entry of a top-K ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPatient {
    /// 1-based, in descending score order
    pub rank: usize,
    pub patient_id: PatientId,
    pub metric: ScoreMetric,
    pub score: f64,
    pub outcome: Outcome,
}

/// Counts of one numeric range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    pub range: String,
    pub total: u64,
    pub diabetic: u64,
    pub non_diabetic: u64,
    pub rate: f64,
}

impl RangeStats {
    pub fn new(range: &str, total: u64, diabetic: u64) -> Self {
        Self {
            range: range.to_string(),
            total,
            diabetic,
            non_diabetic: total.saturating_sub(diabetic),
            rate: rate_percent(diabetic, total),
        }
    }
}

/// Glucose and BMI range breakdowns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedRangeAnalysis {
    pub glucose_analysis: Vec<RangeStats>,
    pub bmi_analysis: Vec<RangeStats>,
}

/// Mean glucose and diabetes rate of one age group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeGlucoseStats {
    pub age_group: String,
    pub avg_glucose: f64,
    /// Members with a usable glucose value
    pub patient_count: u64,
    pub diabetic_count: u64,
    pub diabetes_rate: f64,
}
