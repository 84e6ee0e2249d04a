//! YAML wire model for the reference range catalog.
//!
//! The wire structs mirror the YAML file exactly and reject unknown keys. They are converted
//! into the immutable domain types in the parent module; nothing outside this file sees them.

use super::{
    Layout, PanelDefinition, ParameterDefinition, ParameterRole, RangeEntry, Subgroup, ValueKind,
};
use crate::error::{LabError, LabResult};
use crate::panel::PanelType;
use lims_types::Gender;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogWire {
    panels: Vec<PanelWire>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PanelWire {
    panel: String,
    title: String,
    layout: Layout,
    parameters: Vec<ParameterWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindWire {
    Numeric,
    Text,
    Choice,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParameterWire {
    name: String,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    kind: KindWire,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default = "required_by_default")]
    required: bool,
    #[serde(default)]
    role: ParameterRole,
    #[serde(default)]
    ranges: Vec<RangeWire>,
}

fn required_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeWire {
    #[serde(default)]
    when: SubgroupWire,
    normal: String,
    #[serde(default)]
    low: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubgroupWire {
    #[serde(default)]
    age_from: Option<u32>,
    #[serde(default)]
    age_below: Option<u32>,
    #[serde(default)]
    gender: Option<Gender>,
}

/// Parse catalog YAML into panel definitions.
///
/// Schema mismatches are reported with the path to the failing field (for example
/// `panels[0].parameters[3].kind`).
pub(super) fn parse_panels(yaml_text: &str) -> LabResult<Vec<PanelDefinition>> {
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);

    let wire = match serde_path_to_error::deserialize::<_, CatalogWire>(deserializer) {
        Ok(parsed) => parsed,
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            return Err(LabError::CatalogSchema(format!(
                "schema mismatch at {path}: {source}"
            )));
        }
    };

    wire.panels.into_iter().map(panel_to_domain).collect()
}

fn panel_to_domain(wire: PanelWire) -> LabResult<PanelDefinition> {
    let panel: PanelType = wire.panel.parse()?;
    let title = non_blank(wire.title, || format!("{panel}: title"))?;
    let parameters = wire
        .parameters
        .into_iter()
        .map(|p| parameter_to_domain(panel, p))
        .collect::<LabResult<Vec<_>>>()?;

    Ok(PanelDefinition {
        panel,
        title,
        layout: wire.layout,
        parameters,
    })
}

fn parameter_to_domain(panel: PanelType, wire: ParameterWire) -> LabResult<ParameterDefinition> {
    let name = non_blank(wire.name, || format!("{panel}: parameter name"))?;

    let kind = match (wire.kind, wire.options.is_empty()) {
        (KindWire::Choice, true) => {
            return Err(LabError::CatalogSchema(format!(
                "{panel} / {name}: choice parameters need options"
            )))
        }
        (KindWire::Choice, false) => ValueKind::Choice(wire.options),
        (_, false) => {
            return Err(LabError::CatalogSchema(format!(
                "{panel} / {name}: options are only allowed on choice parameters"
            )))
        }
        (KindWire::Numeric, true) => ValueKind::Numeric,
        (KindWire::Text, true) => ValueKind::Text,
    };

    let ranges = wire
        .ranges
        .into_iter()
        .map(|range| {
            let subgroup = Subgroup {
                age_from: range.when.age_from,
                age_below: range.when.age_below,
                gender: range.when.gender,
            };
            if let (Some(from), Some(below)) = (subgroup.age_from, subgroup.age_below) {
                if from >= below {
                    return Err(LabError::CatalogSchema(format!(
                        "{panel} / {name}: empty age band {from}..{below}"
                    )));
                }
            }
            if let (Some(low), Some(high)) = (range.low, range.high) {
                if low > high {
                    return Err(LabError::CatalogSchema(format!(
                        "{panel} / {name}: low bound {low} exceeds high bound {high}"
                    )));
                }
            }
            Ok(RangeEntry {
                subgroup,
                normal: non_blank(range.normal, || format!("{panel} / {name}: normal text"))?,
                low: range.low,
                high: range.high,
            })
        })
        .collect::<LabResult<Vec<_>>>()?;

    Ok(ParameterDefinition {
        name,
        section: wire.section.filter(|s| !s.trim().is_empty()),
        unit: wire.unit.filter(|s| !s.trim().is_empty()),
        kind,
        required: wire.required,
        role: wire.role,
        ranges,
    })
}

fn non_blank(value: String, what: impl FnOnce() -> String) -> LabResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LabError::CatalogSchema(format!("{} must not be blank", what())));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_keys_with_path() {
        let yaml = r#"panels:
  - panel: generic
    title: Report
    layout: descriptive
    parameters:
      - name: Result
        kind: text
        colour: blue
"#;
        let err = parse_panels(yaml).expect_err("unknown key must fail");
        match err {
            LabError::CatalogSchema(msg) => {
                assert!(msg.contains("parameters"), "{msg}");
                assert!(msg.contains("colour"), "{msg}");
            }
            other => panic!("expected CatalogSchema error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_panel_names() {
        let yaml = r#"panels:
  - panel: lipid-profile
    title: Lipid Profile
    layout: tabular
    parameters: []
"#;
        let err = parse_panels(yaml).expect_err("unknown panel must fail");
        assert!(matches!(err, LabError::UnknownPanelType(name) if name == "lipid-profile"));
    }

    #[test]
    fn choice_parameters_need_options() {
        let yaml = r#"panels:
  - panel: urine-full-report
    title: UFR
    layout: descriptive
    parameters:
      - name: Colour
        kind: choice
"#;
        let err = parse_panels(yaml).expect_err("choice without options");
        assert!(matches!(err, LabError::CatalogSchema(msg) if msg.contains("need options")));
    }

    #[test]
    fn parses_predicates_and_defaults() {
        let yaml = r#"panels:
  - panel: serum-creatinine
    title: Serum Creatinine
    layout: tabular
    parameters:
      - name: Serum Creatinine
        unit: mg/dL
        kind: numeric
        role: creatinine
        ranges:
          - when: { age_below: 18 }
            normal: "0.3 - 1.0"
          - when: { gender: female }
            normal: "0.6 - 1.1"
            low: 0.6
            high: 1.1
          - when: { gender: male }
            normal: "0.7 - 1.3"
"#;
        let panels = parse_panels(yaml).expect("valid catalog");
        let parameter = &panels[0].parameters[0];
        assert!(parameter.required);
        assert_eq!(parameter.role, ParameterRole::Creatinine);
        assert_eq!(parameter.ranges[0].subgroup.age_below, Some(18));
        assert_eq!(parameter.ranges[1].subgroup.gender, Some(Gender::Female));
        assert_eq!(parameter.ranges[1].high, Some(1.1));
    }

    #[test]
    fn rejects_inverted_bounds() {
        let yaml = r#"panels:
  - panel: generic
    title: Report
    layout: tabular
    parameters:
      - name: Value
        kind: numeric
        ranges:
          - normal: "10 - 1"
            low: 10
            high: 1
"#;
        assert!(matches!(
            parse_panels(yaml),
            Err(LabError::CatalogSchema(msg)) if msg.contains("exceeds")
        ));
    }
}
