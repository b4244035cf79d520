/*!
 * Data type definitions for patient records and derived indices
 *
 * Typed representations of the primary patient record, the categorical
 * dimensions the population is partitioned by, and the numeric range tables
 * used for glucose and BMI breakdowns.
 */

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::{OUTCOME_DIABETIC, OUTCOME_NON_DIABETIC};

/// Stable patient identifier as stored in membership sets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub String);

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        PatientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Natural identifier order: numeric identifiers compare by value and sort
/// before non-numeric ones, which compare lexicographically.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Diabetes outcome (`"1"` = diabetic, `"0"` = non-diabetic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "Diabetic")]
    Diabetic,
    #[serde(rename = "Non-diabetic")]
    NonDiabetic,
}

impl Outcome {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            OUTCOME_DIABETIC => Some(Outcome::Diabetic),
            OUTCOME_NON_DIABETIC => Some(Outcome::NonDiabetic),
            _ => None,
        }
    }

    pub fn to_code(&self) -> &'static str {
        match self {
            Outcome::Diabetic => OUTCOME_DIABETIC,
            Outcome::NonDiabetic => OUTCOME_NON_DIABETIC,
        }
    }

    pub fn from_membership(is_diabetic: bool) -> Self {
        if is_diabetic {
            Outcome::Diabetic
        } else {
            Outcome::NonDiabetic
        }
    }

    pub fn is_diabetic(&self) -> bool {
        matches!(self, Outcome::Diabetic)
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Diabetic => "Diabetic",
            Outcome::NonDiabetic => "Non-diabetic",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A categorical dimension partitioning the population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    AgeGroup,
    BmiCategory,
    GlucoseLevel,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::AgeGroup => write!(f, "age_group"),
            Dimension::BmiCategory => write!(f, "bmi_category"),
            Dimension::GlucoseLevel => write!(f, "glucose_level"),
        }
    }
}

/// A value of a categorical dimension.
///
/// `ALL` is the fixed enumeration order results are reported in.
pub trait Category: Copy + Send + Sync + fmt::Debug + 'static {
    const DIMENSION: Dimension;
    const ALL: &'static [Self];

    /// Label used both in store keys and in results
    fn label(&self) -> &'static str;
}

/// Age group membership sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    Young,
    Adult,
    Mature,
    Senior,
}

impl Category for AgeGroup {
    const DIMENSION: Dimension = Dimension::AgeGroup;
    const ALL: &'static [Self] = &[
        AgeGroup::Young,
        AgeGroup::Adult,
        AgeGroup::Mature,
        AgeGroup::Senior,
    ];

    fn label(&self) -> &'static str {
        match self {
            AgeGroup::Young => "Young",
            AgeGroup::Adult => "Adult",
            AgeGroup::Mature => "Mature",
            AgeGroup::Senior => "Senior",
        }
    }
}

/// BMI category membership sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl Category for BmiCategory {
    const DIMENSION: Dimension = Dimension::BmiCategory;
    const ALL: &'static [Self] = &[
        BmiCategory::Underweight,
        BmiCategory::Normal,
        BmiCategory::Overweight,
        BmiCategory::Obese,
    ];

    fn label(&self) -> &'static str {
        match self {
            BmiCategory::Underweight => "Underweight",
            BmiCategory::Normal => "Normal",
            BmiCategory::Overweight => "Overweight",
            BmiCategory::Obese => "Obese",
        }
    }
}

/// Glucose level membership sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlucoseLevel {
    Normal,
    Prediabetes,
    Diabetes,
}

impl Category for GlucoseLevel {
    const DIMENSION: Dimension = Dimension::GlucoseLevel;
    const ALL: &'static [Self] = &[
        GlucoseLevel::Normal,
        GlucoseLevel::Prediabetes,
        GlucoseLevel::Diabetes,
    ];

    fn label(&self) -> &'static str {
        match self {
            GlucoseLevel::Normal => "Normal",
            GlucoseLevel::Prediabetes => "Prediabetes",
            GlucoseLevel::Diabetes => "Diabetes",
        }
    }
}

/// Metric backed by a score-ordered sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreMetric {
    Glucose,
    Bmi,
}

impl ScoreMetric {
    /// Display precision of scores; `None` keeps the stored precision
    pub fn display_precision(&self) -> Option<u32> {
        match self {
            ScoreMetric::Glucose => None,
            ScoreMetric::Bmi => Some(1),
        }
    }

    /// Range table used for this metric's breakdown
    pub fn ranges(&self) -> &'static [MetricRange] {
        match self {
            ScoreMetric::Glucose => GLUCOSE_RANGES,
            ScoreMetric::Bmi => BMI_RANGES,
        }
    }
}

impl fmt::Display for ScoreMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreMetric::Glucose => write!(f, "glucose"),
            ScoreMetric::Bmi => write!(f, "bmi"),
        }
    }
}

/// One end of a score range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScoreBound {
    Unbounded,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// Redis `ZRANGEBYSCORE` argument for this bound
    pub fn to_redis_arg(&self, lower: bool) -> String {
        match self {
            ScoreBound::Unbounded if lower => "-inf".to_string(),
            ScoreBound::Unbounded => "+inf".to_string(),
            ScoreBound::Inclusive(v) => format!("{}", v),
            ScoreBound::Exclusive(v) => format!("({}", v),
        }
    }
}

/// Score interval queried against a score-ordered sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: ScoreBound,
    pub max: ScoreBound,
}

impl ScoreRange {
    pub fn new(min: ScoreBound, max: ScoreBound) -> Self {
        Self { min, max }
    }

    /// Only the given score
    pub fn exactly(score: f64) -> Self {
        Self::new(ScoreBound::Inclusive(score), ScoreBound::Inclusive(score))
    }

    /// Every score
    pub fn all() -> Self {
        Self::new(ScoreBound::Unbounded, ScoreBound::Unbounded)
    }

    pub fn contains(&self, score: f64) -> bool {
        let above_min = match self.min {
            ScoreBound::Unbounded => true,
            ScoreBound::Inclusive(v) => score >= v,
            ScoreBound::Exclusive(v) => score > v,
        };
        let below_max = match self.max {
            ScoreBound::Unbounded => true,
            ScoreBound::Inclusive(v) => score <= v,
            ScoreBound::Exclusive(v) => score < v,
        };
        above_min && below_max
    }
}

/// Named numeric range of a range table.
///
/// Ranges are `(previous max, max]`: the first is unbounded below and the last
/// (`max == None`) unbounded above, so a table is contiguous and exhaustive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRange {
    pub name: &'static str,
    pub max: Option<f64>,
}

/// Glucose (mg/dL) breakdown
pub const GLUCOSE_RANGES: &[MetricRange] = &[
    MetricRange { name: "Normal", max: Some(99.0) },
    MetricRange { name: "Prediabetes", max: Some(125.0) },
    MetricRange { name: "Mild diabetes", max: Some(180.0) },
    MetricRange { name: "Severe diabetes", max: None },
];

/// BMI breakdown
pub const BMI_RANGES: &[MetricRange] = &[
    MetricRange { name: "Underweight", max: Some(18.4) },
    MetricRange { name: "Normal", max: Some(24.9) },
    MetricRange { name: "Overweight", max: Some(29.9) },
    MetricRange { name: "Obese", max: None },
];

/// Resolve a range table into store score ranges, in table order
pub fn score_ranges(table: &[MetricRange]) -> Vec<(&'static str, ScoreRange)> {
    let mut lower = ScoreBound::Unbounded;
    table
        .iter()
        .map(|range| {
            let upper = match range.max {
                Some(max) => ScoreBound::Inclusive(max),
                None => ScoreBound::Unbounded,
            };
            let resolved = ScoreRange::new(lower, upper);
            if let Some(max) = range.max {
                lower = ScoreBound::Exclusive(max);
            }
            (range.name, resolved)
        })
        .collect()
}

/// Outcome of reading one field of a loosely typed record
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Present(T),
    Missing,
    Malformed(String),
}

impl<T: FromStr> Field<T> {
    /// Parse an optional raw value; whitespace around numbers is tolerated
    pub fn parse(raw: Option<&String>) -> Self {
        match raw {
            None => Field::Missing,
            Some(value) => match value.trim().parse::<T>() {
                Ok(parsed) => Field::Present(parsed),
                Err(_) => Field::Malformed(value.clone()),
            },
        }
    }
}

impl<T> Field<T> {
    /// Parsed value, or `None` when the record must be skipped for this statistic
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        !matches!(self, Field::Present(_))
    }
}

/// Field names of a primary patient record
pub mod fields {
    pub const PREGNANCIES: &str = "Pregnancies";
    pub const GLUCOSE: &str = "Glucose";
    pub const BMI: &str = "BMI";
    pub const AGE: &str = "Age";
    pub const OUTCOME: &str = "Outcome";
}

/// `"nan"` and `"inf"` parse as floats but are not measurements
fn finite(field: Field<f64>) -> Field<f64> {
    match field {
        Field::Present(value) if !value.is_finite() => Field::Malformed(value.to_string()),
        other => other,
    }
}

/// Primary patient record, parsed once at the store boundary
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord {
    pub id: PatientId,
    pub pregnancies: Field<i64>,
    pub glucose: Field<f64>,
    pub bmi: Field<f64>,
    pub age: Field<f64>,
    pub outcome: Field<Outcome>,
}

impl PatientRecord {
    /// Build a typed record from the raw field mapping of a hash record
    pub fn from_fields(id: PatientId, raw: &HashMap<String, String>) -> Self {
        let outcome = match raw.get(fields::OUTCOME) {
            None => Field::Missing,
            Some(code) => match Outcome::from_code(code) {
                Some(outcome) => Field::Present(outcome),
                None => Field::Malformed(code.clone()),
            },
        };

        Self {
            id,
            pregnancies: Field::parse(raw.get(fields::PREGNANCIES)),
            glucose: finite(Field::parse(raw.get(fields::GLUCOSE))),
            bmi: finite(Field::parse(raw.get(fields::BMI))),
            age: finite(Field::parse(raw.get(fields::AGE))),
            outcome,
        }
    }

    /// `Pregnancies > 0`; a missing or malformed count never matches
    pub fn has_been_pregnant(&self) -> bool {
        self.pregnancies
            .value()
            .is_some_and(|count| *count >= crate::constants::PREGNANCY_THRESHOLD)
    }

    /// `Outcome == "1"`
    pub fn is_diabetic(&self) -> bool {
        self.outcome.value().is_some_and(Outcome::is_diabetic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_natural_id_order() {
        assert_eq!(compare_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_ids("p2", "p3"), Ordering::Less);
        assert_eq!(compare_ids("7", "p1"), Ordering::Less);
        assert_eq!(compare_ids("42", "42"), Ordering::Equal);
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(Outcome::from_code("1"), Some(Outcome::Diabetic));
        assert_eq!(Outcome::from_code("0"), Some(Outcome::NonDiabetic));
        assert_eq!(Outcome::from_code("yes"), None);
        assert_eq!(Outcome::Diabetic.to_string(), "Diabetic");
    }

    #[test]
    fn test_record_parsing_skips() {
        let record = PatientRecord::from_fields(
            PatientId::new("5"),
            &raw(&[("Pregnancies", "2.0"), ("Glucose", " 148 "), ("Outcome", "1")]),
        );
        assert_eq!(record.pregnancies, Field::Malformed("2.0".to_string()));
        assert_eq!(record.glucose, Field::Present(148.0));
        assert_eq!(record.bmi, Field::Missing);
        assert!(!record.has_been_pregnant());
        assert!(record.is_diabetic());
    }

    #[test]
    fn test_non_finite_glucose_is_malformed() {
        let record = PatientRecord::from_fields(PatientId::new("9"), &raw(&[("Glucose", "NaN")]));
        assert!(record.glucose.is_skipped());
    }

    #[test]
    fn test_pregnancy_threshold() {
        let pregnant = PatientRecord::from_fields(PatientId::new("1"), &raw(&[("Pregnancies", "3")]));
        let never = PatientRecord::from_fields(PatientId::new("2"), &raw(&[("Pregnancies", "0")]));
        assert!(pregnant.has_been_pregnant());
        assert!(!never.has_been_pregnant());
    }

    #[test]
    fn test_range_tables_are_contiguous() {
        for table in [GLUCOSE_RANGES, BMI_RANGES] {
            let ranges = score_ranges(table);
            assert_eq!(ranges.first().map(|r| r.1.min), Some(ScoreBound::Unbounded));
            assert_eq!(ranges.last().map(|r| r.1.max), Some(ScoreBound::Unbounded));
            for pair in ranges.windows(2) {
                match (pair[0].1.max, pair[1].1.min) {
                    (ScoreBound::Inclusive(a), ScoreBound::Exclusive(b)) => assert_eq!(a, b),
                    other => panic!("ranges not contiguous: {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_bmi_boundaries_belong_to_lower_range() {
        let ranges = score_ranges(BMI_RANGES);
        let bucket = |score: f64| {
            ranges
                .iter()
                .filter(|(_, range)| range.contains(score))
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
        };
        assert_eq!(bucket(18.4), vec!["Underweight"]);
        assert_eq!(bucket(18.45), vec!["Normal"]);
        assert_eq!(bucket(29.9), vec!["Overweight"]);
        assert_eq!(bucket(29.95), vec!["Obese"]);
        assert_eq!(bucket(0.0), vec!["Underweight"]);
    }

    #[test]
    fn test_redis_bound_syntax() {
        let range = ScoreRange::new(ScoreBound::Exclusive(24.9), ScoreBound::Inclusive(29.9));
        assert_eq!(range.min.to_redis_arg(true), "(24.9");
        assert_eq!(range.max.to_redis_arg(false), "29.9");
        assert_eq!(ScoreBound::Unbounded.to_redis_arg(true), "-inf");
        assert_eq!(ScoreBound::Unbounded.to_redis_arg(false), "+inf");
    }
}
