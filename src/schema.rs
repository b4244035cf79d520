/*!
 * Key layout of the patient store
 *
 * Names every key the engine reads: primary patient hashes, the diabetes
 * membership set, the categorical membership sets, the two score-ordered
 * sequences, and the namespace ephemeral sets are created under.
 */

use serde::{Deserialize, Serialize};

use crate::data_types::{Category, Dimension, PatientId, ScoreMetric};

/// Key names and prefixes used in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySchema {
    /// Prefix of primary patient hash records (`patient:<id>`)
    pub patient_prefix: String,
    /// Membership set of diabetic patient identifiers
    pub diabetes_set: String,
    /// Score-ordered sequence of patients by glucose
    pub glucose_index: String,
    /// Score-ordered sequence of patients by BMI
    pub bmi_index: String,
    pub age_group_prefix: String,
    pub bmi_category_prefix: String,
    pub glucose_level_prefix: String,
    /// Namespace for ephemeral intersection sets
    pub ephemeral_prefix: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self {
            patient_prefix: "patient:".to_string(),
            diabetes_set: "patients:diabetes".to_string(),
            glucose_index: "patients:by_glucose".to_string(),
            bmi_index: "patients:by_bmi".to_string(),
            age_group_prefix: "age_group:".to_string(),
            bmi_category_prefix: "bmi_category:".to_string(),
            glucose_level_prefix: "glucose_level:".to_string(),
            ephemeral_prefix: "temp:".to_string(),
        }
    }
}

impl KeySchema {
    pub fn dimension_prefix(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::AgeGroup => &self.age_group_prefix,
            Dimension::BmiCategory => &self.bmi_category_prefix,
            Dimension::GlucoseLevel => &self.glucose_level_prefix,
        }
    }

    /// Membership set of one category value
    pub fn category_key<C: Category>(&self, category: C) -> String {
        format!("{}{}", self.dimension_prefix(C::DIMENSION), category.label())
    }

    pub fn score_index(&self, metric: ScoreMetric) -> &str {
        match metric {
            ScoreMetric::Glucose => &self.glucose_index,
            ScoreMetric::Bmi => &self.bmi_index,
        }
    }

    pub fn patient_key(&self, id: &PatientId) -> String {
        format!("{}{}", self.patient_prefix, id)
    }

    /// Identifier of a primary record key; `None` for keys outside the patient namespace
    pub fn patient_id_from_key(&self, key: &str) -> Option<PatientId> {
        key.strip_prefix(self.patient_prefix.as_str())
            .filter(|id| !id.is_empty())
            .map(PatientId::new)
    }

    /// Ephemeral set name for one purpose within one call
    pub fn ephemeral_key(&self, purpose: &str, token: &str) -> String {
        format!("{}{}:{}", self.ephemeral_prefix, purpose, token)
    }
}
