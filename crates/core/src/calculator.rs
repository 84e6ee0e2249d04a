//! Derived value calculations.
//!
//! All functions here are pure. Derived values are never stored; they are recomputed from a
//! result record's captured values whenever a report is rendered or a preview is requested.

use crate::capture::{CapturedValue, ResultRecord};
use crate::catalog::{ParameterRole, ParameterSpec};
use crate::constants::ADULT_AGE_YEARS;
use crate::order::Demographics;
use crate::validation::parse_number;
use lims_types::Gender;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Convert a differential percentage into an absolute count.
///
/// Returns `None` ("not computable") when either input is missing, non-finite, or outside
/// its domain (`percentage` in `0..=100`, `total_count >= 0`).
pub fn absolute_count(percentage: Option<f64>, total_count: Option<f64>) -> Option<u64> {
    let percentage = percentage.filter(|p| p.is_finite() && (0.0..=100.0).contains(p))?;
    let total_count = total_count.filter(|t| t.is_finite() && *t >= 0.0)?;
    // p * t / 100 keeps exact products exact before the division.
    Some((percentage * total_count / 100.0).floor() as u64)
}

/// [`absolute_count`] over raw operator text.
pub fn absolute_count_from_text(percentage: &str, total_count: &str) -> Option<u64> {
    absolute_count(parse_number(percentage), parse_number(total_count))
}

/// Estimated glomerular filtration rate (mL/min/1.73m²), CKD-EPI 2021 creatinine equation
/// without race coefficient.
///
/// Preconditions, not checked here: `creatinine_mg_dl > 0` and `age_years >= 18`. Callers gate
/// on both (see [`DerivedValues::compute`]).
pub fn estimated_filtration_rate(creatinine_mg_dl: f64, age_years: u32, gender: Gender) -> f64 {
    let (kappa, alpha, sex_factor) = match gender {
        Gender::Female => (0.7, -0.329, 1.012),
        Gender::Male => (0.9, -0.411, 1.0),
    };
    let ratio = creatinine_mg_dl / kappa;

    142.0
        * ratio.min(1.0).powf(alpha)
        * ratio.max(1.0).powf(-1.200)
        * 0.9938_f64.powf(f64::from(age_years))
        * sex_factor
}

/// Kidney function stage for an eGFR value.
///
/// Bands are inclusive on their lower bound: 90 is `G1`, 89.99 is `G2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FiltrationStage {
    G1,
    G2,
    G3a,
    G3b,
    G4,
    G5,
}

impl FiltrationStage {
    pub fn for_rate(egfr: f64) -> Self {
        if egfr >= 90.0 {
            FiltrationStage::G1
        } else if egfr >= 60.0 {
            FiltrationStage::G2
        } else if egfr >= 45.0 {
            FiltrationStage::G3a
        } else if egfr >= 30.0 {
            FiltrationStage::G3b
        } else if egfr >= 15.0 {
            FiltrationStage::G4
        } else {
            FiltrationStage::G5
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FiltrationStage::G1 => "G1",
            FiltrationStage::G2 => "G2",
            FiltrationStage::G3a => "G3a",
            FiltrationStage::G3b => "G3b",
            FiltrationStage::G4 => "G4",
            FiltrationStage::G5 => "G5",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FiltrationStage::G1 => "Normal or high",
            FiltrationStage::G2 => "Mildly decreased",
            FiltrationStage::G3a => "Mildly to moderately decreased",
            FiltrationStage::G3b => "Moderately to severely decreased",
            FiltrationStage::G4 => "Severely decreased",
            FiltrationStage::G5 => "Kidney failure",
        }
    }
}

impl fmt::Display for FiltrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// Outcome of the filtration-rate derivation for a creatinine panel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum FiltrationOutcome {
    Computed { egfr: f64, stage: FiltrationStage },
    /// Patient is younger than the equation allows.
    NotApplicable,
    /// Creatinine missing or not positive.
    NotComputable,
}

/// Values derived from one result record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DerivedValues {
    /// Differential parameter name → absolute count (`None` = not computable).
    pub absolute_counts: BTreeMap<String, Option<u64>>,
    /// Present only for panels with a creatinine parameter.
    pub filtration: Option<FiltrationOutcome>,
}

impl DerivedValues {
    /// Derive values for a record. `specs` must be resolved against the record's demographics.
    pub fn compute(record: &ResultRecord, specs: &[ParameterSpec]) -> Self {
        Self::from_values(specs, &record.values, record.demographics)
    }

    pub fn from_values(
        specs: &[ParameterSpec],
        values: &BTreeMap<String, CapturedValue>,
        demographics: Demographics,
    ) -> Self {
        let number_of = |name: &str| values.get(name).and_then(CapturedValue::as_number);

        let total = specs
            .iter()
            .find(|s| s.role == ParameterRole::TotalCount)
            .and_then(|s| number_of(&s.name));

        let absolute_counts = specs
            .iter()
            .filter(|s| s.role == ParameterRole::Differential)
            .map(|s| (s.name.clone(), absolute_count(number_of(&s.name), total)))
            .collect();

        let filtration = specs
            .iter()
            .find(|s| s.role == ParameterRole::Creatinine)
            .map(|s| match number_of(&s.name) {
                _ if demographics.age_years < ADULT_AGE_YEARS => FiltrationOutcome::NotApplicable,
                Some(creatinine) if creatinine > 0.0 => {
                    let egfr = estimated_filtration_rate(
                        creatinine,
                        demographics.age_years,
                        demographics.gender,
                    );
                    FiltrationOutcome::Computed {
                        egfr,
                        stage: FiltrationStage::for_rate(egfr),
                    }
                }
                _ => FiltrationOutcome::NotComputable,
            });

        Self {
            absolute_counts,
            filtration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceRangeCatalog;
    use crate::panel::PanelType;

    #[test]
    fn absolute_count_floors_the_product() {
        assert_eq!(absolute_count(Some(60.0), Some(7500.0)), Some(4500));
        assert_eq!(absolute_count(Some(33.0), Some(7777.0)), Some(2566));
        assert_eq!(absolute_count(Some(0.0), Some(7500.0)), Some(0));
        assert_eq!(absolute_count(Some(100.0), Some(0.0)), Some(0));
    }

    #[test]
    fn absolute_count_matches_definition_over_grid() {
        for p in 0..=100u32 {
            for t in [0u32, 1, 99, 4321, 10_000] {
                let expected = (f64::from(p) * f64::from(t) / 100.0).floor() as u64;
                assert_eq!(
                    absolute_count(Some(f64::from(p)), Some(f64::from(t))),
                    Some(expected)
                );
            }
        }
    }

    #[test]
    fn absolute_count_is_not_computable_for_bad_inputs() {
        assert_eq!(absolute_count(None, Some(7500.0)), None);
        assert_eq!(absolute_count(Some(60.0), None), None);
        assert_eq!(absolute_count(Some(101.0), Some(7500.0)), None);
        assert_eq!(absolute_count(Some(60.0), Some(-1.0)), None);
        assert_eq!(absolute_count(Some(f64::NAN), Some(7500.0)), None);
        assert_eq!(absolute_count_from_text("sixty", "7500"), None);
        assert_eq!(absolute_count_from_text("60", "7500"), Some(4500));
    }

    #[test]
    fn egfr_reference_values() {
        let male = estimated_filtration_rate(1.0, 50, Gender::Male);
        assert!((90.0..=95.0).contains(&male), "got {male}");

        // At Scr == kappa both power terms are 1.
        let female = estimated_filtration_rate(0.7, 40, Gender::Female);
        let expected = 142.0 * 0.9938_f64.powi(40) * 1.012;
        assert!((female - expected).abs() < 1e-9, "got {female}");
    }

    #[test]
    fn egfr_decreases_as_creatinine_rises() {
        for gender in Gender::ALL {
            let mut previous = f64::INFINITY;
            for step in 1..=60 {
                let creatinine = f64::from(step) * 0.1;
                let egfr = estimated_filtration_rate(creatinine, 60, gender);
                assert!(egfr < previous, "{gender} at {creatinine}: {egfr} >= {previous}");
                previous = egfr;
            }
        }
    }

    #[test]
    fn egfr_stays_finite_for_the_largest_ages() {
        let centenarian = estimated_filtration_rate(1.0, 100, Gender::Male);
        for age in [40_000, 3_000_000_000, u32::MAX] {
            let egfr = estimated_filtration_rate(1.0, age, Gender::Male);
            assert!(egfr.is_finite() && egfr >= 0.0, "age {age}: {egfr}");
            assert!(egfr < centenarian);
            assert_eq!(FiltrationStage::for_rate(egfr), FiltrationStage::G5);
        }
    }

    #[test]
    fn stage_boundaries_are_inclusive_below() {
        assert_eq!(FiltrationStage::for_rate(90.0), FiltrationStage::G1);
        assert_eq!(FiltrationStage::for_rate(89.99), FiltrationStage::G2);
        assert_eq!(FiltrationStage::for_rate(60.0), FiltrationStage::G2);
        assert_eq!(FiltrationStage::for_rate(59.999), FiltrationStage::G3a);
        assert_eq!(FiltrationStage::for_rate(45.0), FiltrationStage::G3a);
        assert_eq!(FiltrationStage::for_rate(30.0), FiltrationStage::G3b);
        assert_eq!(FiltrationStage::for_rate(15.0), FiltrationStage::G4);
        assert_eq!(FiltrationStage::for_rate(14.99), FiltrationStage::G5);
        assert_eq!(FiltrationStage::G3b.to_string(), "G3b (Moderately to severely decreased)");
    }

    fn number(text: &str) -> CapturedValue {
        CapturedValue::number(text).unwrap()
    }

    #[test]
    fn derives_absolute_counts_from_record_values() {
        let catalog = ReferenceRangeCatalog::builtin().unwrap();
        let specs = catalog.resolve(PanelType::FullBloodCount, 30, Gender::Male).unwrap();
        let values: BTreeMap<String, CapturedValue> = [
            ("Total White Cell Count", number("8000")),
            ("Neutrophils", number("60")),
            ("Lymphocytes", number("30")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let derived = DerivedValues::from_values(
            &specs,
            &values,
            Demographics {
                age_years: 30,
                gender: Gender::Male,
            },
        );
        assert_eq!(derived.absolute_counts["Neutrophils"], Some(4800));
        assert_eq!(derived.absolute_counts["Lymphocytes"], Some(2400));
        assert_eq!(derived.absolute_counts["Monocytes"], None);
        assert_eq!(derived.filtration, None);
    }

    #[test]
    fn filtration_is_gated_on_adult_age() {
        let catalog = ReferenceRangeCatalog::builtin().unwrap();
        let values: BTreeMap<String, CapturedValue> =
            [("Serum Creatinine".to_string(), number("1.0"))].into();

        let child = Demographics {
            age_years: 12,
            gender: Gender::Male,
        };
        let specs = catalog.resolve(PanelType::SerumCreatinine, 12, Gender::Male).unwrap();
        assert_eq!(
            DerivedValues::from_values(&specs, &values, child).filtration,
            Some(FiltrationOutcome::NotApplicable)
        );

        let adult = Demographics {
            age_years: 50,
            gender: Gender::Male,
        };
        let specs = catalog.resolve(PanelType::SerumCreatinine, 50, Gender::Male).unwrap();
        match DerivedValues::from_values(&specs, &values, adult).filtration {
            Some(FiltrationOutcome::Computed { egfr, stage }) => {
                assert!((90.0..=95.0).contains(&egfr));
                assert_eq!(stage, FiltrationStage::G1);
            }
            other => panic!("expected computed eGFR, got {other:?}"),
        }

        let empty = BTreeMap::new();
        assert_eq!(
            DerivedValues::from_values(&specs, &empty, adult).filtration,
            Some(FiltrationOutcome::NotComputable)
        );
    }
}
