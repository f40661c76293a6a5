//! 内置检查谓词
//!
//! 诊断文本保持与已有报告一致的英文格式。

use crate::registry::{parse_args, CheckOutcome, Predicate};
use rtqa_core::utils::{display_value, values_equal};
use rtqa_core::{QaError, Result, SeriesRecord};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const PRESENCE: &str = "presence";
pub const COUNT_COMPARE: &str = "count-compare";
pub const STRUCTURES_PRESENT: &str = "structures-present";
pub const META_EQUALS: &str = "meta-equals";
pub const UNIFORM_VALUE: &str = "uniform-value";
pub const CROSS_SERIES_LINK: &str = "cross-series-link";

/// 旧模板中使用的函数名
pub const LEGACY_ALIASES: [(&str, &str); 6] = [
    ("is_series_present", PRESENCE),
    ("check_series_count", COUNT_COMPARE),
    ("check_structures_present", STRUCTURES_PRESENT),
    ("check_meta_value", META_EQUALS),
    ("check_all_in_same", UNIFORM_VALUE),
    ("check_linked", CROSS_SERIES_LINK),
];

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

/// 至少选中一个序列
#[derive(Debug, Clone, Default)]
pub struct Presence;

impl Presence {
    pub fn build(args: &Map<String, Value>) -> Result<Box<dyn Predicate>> {
        let NoArgs {} = parse_args(PRESENCE, args)?;
        Ok(Box::new(Self))
    }
}

impl Predicate for Presence {
    fn evaluate(&self, selected: &[&SeriesRecord]) -> CheckOutcome {
        if selected.is_empty() {
            CheckOutcome::fail("No series found")
        } else {
            CheckOutcome::pass()
        }
    }
}

/// 数量比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOperator {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl CountOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountOperator::Eq => "eq",
            CountOperator::Gt => "gt",
            CountOperator::Lt => "lt",
            CountOperator::Gte => "gte",
            CountOperator::Lte => "lte",
        }
    }

    pub fn compare(&self, count: usize, n: usize) -> bool {
        match self {
            CountOperator::Eq => count == n,
            CountOperator::Gt => count > n,
            CountOperator::Lt => count < n,
            CountOperator::Gte => count >= n,
            CountOperator::Lte => count <= n,
        }
    }
}

impl FromStr for CountOperator {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(CountOperator::Eq),
            "gt" => Ok(CountOperator::Gt),
            "lt" => Ok(CountOperator::Lt),
            "gte" => Ok(CountOperator::Gte),
            "lte" => Ok(CountOperator::Lte),
            other => Err(QaError::Check(format!("无效的比较运算符: {}", other))),
        }
    }
}

impl fmt::Display for CountOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CountArgs {
    n: usize,
    op: String,
}

/// 所选序列数量与给定值比较
#[derive(Debug, Clone)]
pub struct CountCompare {
    pub n: usize,
    pub op: CountOperator,
}

impl CountCompare {
    pub fn build(args: &Map<String, Value>) -> Result<Box<dyn Predicate>> {
        let CountArgs { n, op } = parse_args(COUNT_COMPARE, args)?;
        Ok(Box::new(Self { n, op: op.parse()? }))
    }
}

impl Predicate for CountCompare {
    fn evaluate(&self, selected: &[&SeriesRecord]) -> CheckOutcome {
        if self.op.compare(selected.len(), self.n) {
            CheckOutcome::pass()
        } else {
            CheckOutcome::fail(format!(
                "Expected {} {} but found {}",
                self.op,
                self.n,
                selected.len()
            ))
        }
    }
}

fn default_case_sensitive() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuresArgs {
    structures: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_case_sensitive")]
    case_sensitive: bool,
}

/// 每个所选结构集都包含必需的结构（名称本身或任一别名）
#[derive(Debug, Clone)]
pub struct StructuresPresent {
    /// 结构名 → 可接受的写法，保持模板中的顺序
    pub structures: Vec<(String, Vec<String>)>,
    pub case_sensitive: bool,
}

impl StructuresPresent {
    pub fn build(args: &Map<String, Value>) -> Result<Box<dyn Predicate>> {
        // BTreeMap 只用于校验类型，顺序取自原始参数
        let StructuresArgs {
            mut structures,
            case_sensitive,
        } = parse_args(STRUCTURES_PRESENT, args)?;

        let order: Vec<String> = args
            .get("structures")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        let structures = order
            .into_iter()
            .filter_map(|name| {
                let mut variants = structures.remove(&name)?;
                variants.insert(0, name.clone());
                Some((name, variants))
            })
            .collect();

        Ok(Box::new(Self {
            structures,
            case_sensitive,
        }))
    }

    fn accepts(&self, variants: &[String], present: &[String]) -> bool {
        if self.case_sensitive {
            variants.iter().any(|v| present.contains(v))
        } else {
            let present: Vec<String> = present.iter().map(|p| p.to_lowercase()).collect();
            variants
                .iter()
                .any(|v| present.contains(&v.to_lowercase()))
        }
    }
}

impl Predicate for StructuresPresent {
    fn evaluate(&self, selected: &[&SeriesRecord]) -> CheckOutcome {
        let mut output = String::new();

        for series in selected {
            let Some(present) = &series.structure_names else {
                output.push_str(&format!(
                    "Key structure_names not found in series {}\n",
                    series.series_uid
                ));
                continue;
            };

            for (name, variants) in &self.structures {
                if !self.accepts(variants, present) {
                    output.push_str(&format!(
                        "{} not found in series {}\n",
                        name, series.series_uid
                    ));
                }
            }
        }

        CheckOutcome::from_lines(output)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MetaArgs {
    key: String,
    value: Value,
}

/// 每个所选序列的属性等于给定值
#[derive(Debug, Clone)]
pub struct MetaEquals {
    pub key: String,
    pub value: Value,
}

impl MetaEquals {
    pub fn build(args: &Map<String, Value>) -> Result<Box<dyn Predicate>> {
        let MetaArgs { key, value } = parse_args(META_EQUALS, args)?;
        Ok(Box::new(Self { key, value }))
    }
}

impl Predicate for MetaEquals {
    fn evaluate(&self, selected: &[&SeriesRecord]) -> CheckOutcome {
        let mut output = String::new();

        for series in selected {
            match series.attribute(&self.key) {
                None => output.push_str(&format!(
                    "Key {} not found in series {}\n",
                    self.key, series.series_uid
                )),
                Some(actual) if !values_equal(&actual, &self.value) => output.push_str(&format!(
                    "Value of {} not {} in series {}\n",
                    self.key,
                    display_value(&self.value),
                    series.series_uid
                )),
                Some(_) => {}
            }
        }

        CheckOutcome::from_lines(output)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyArgs {
    key: String,
}

/// 所选序列的某个属性取值唯一
#[derive(Debug, Clone)]
pub struct UniformValue {
    pub key: String,
}

impl UniformValue {
    pub fn build(args: &Map<String, Value>) -> Result<Box<dyn Predicate>> {
        let KeyArgs { key } = parse_args(UNIFORM_VALUE, args)?;
        Ok(Box::new(Self { key }))
    }
}

impl Predicate for UniformValue {
    fn evaluate(&self, selected: &[&SeriesRecord]) -> CheckOutcome {
        let mut output = String::new();
        let mut distinct: Vec<Value> = Vec::new();

        for series in selected {
            match series.attribute(&self.key) {
                Some(value) => {
                    if !distinct.iter().any(|seen| values_equal(seen, &value)) {
                        distinct.push(value);
                    }
                }
                None => output.push_str(&format!(
                    "Key {} not found in series {}\n",
                    self.key, series.series_uid
                )),
            }
        }

        if distinct.len() > 1 {
            output.push_str(&format!("{} {}s found", distinct.len(), self.key));
        }

        CheckOutcome::from_lines(output)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkArgs {
    from_name: String,
    to_name: String,
}

/// 每个 `from_name` 序列都与某个 `to_name` 序列关联
///
/// 关联条件：目标序列引用了源序列，或两者坐标系相同（空坐标系不算关联）。
#[derive(Debug, Clone)]
pub struct CrossSeriesLink {
    pub from_name: String,
    pub to_name: String,
}

impl CrossSeriesLink {
    pub fn build(args: &Map<String, Value>) -> Result<Box<dyn Predicate>> {
        let LinkArgs { from_name, to_name } = parse_args(CROSS_SERIES_LINK, args)?;
        Ok(Box::new(Self { from_name, to_name }))
    }

    fn linked(from: &SeriesRecord, to: &SeriesRecord) -> bool {
        if to.referenced_series.as_deref() == Some(from.series_uid.as_str()) {
            return true;
        }
        matches!(
            (&from.frame_of_reference, &to.frame_of_reference),
            (Some(a), Some(b)) if a == b
        )
    }
}

impl Predicate for CrossSeriesLink {
    fn evaluate(&self, selected: &[&SeriesRecord]) -> CheckOutcome {
        let targets: Vec<&SeriesRecord> = selected
            .iter()
            .copied()
            .filter(|s| has_label(s, &self.to_name))
            .collect();

        let mut output = String::new();
        for from in selected.iter().filter(|s| has_label(s, &self.from_name)) {
            if !targets.iter().any(|to| Self::linked(from, to)) {
                output.push_str(&format!(
                    "Series {} not linked to {}\n",
                    from.series_uid, self.to_name
                ));
            }
        }

        CheckOutcome::from_lines(output)
    }
}

fn has_label(series: &SeriesRecord, label: &str) -> bool {
    series.match_label.as_deref() == Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn evaluate(
        build: fn(&Map<String, Value>) -> Result<Box<dyn Predicate>>,
        config: Value,
        selected: &[SeriesRecord],
    ) -> CheckOutcome {
        let refs: Vec<&SeriesRecord> = selected.iter().collect();
        build(&args(config)).unwrap().evaluate(&refs)
    }

    fn cts(count: usize) -> Vec<SeriesRecord> {
        (1..=count)
            .map(|i| SeriesRecord::new(i.to_string(), "CT"))
            .collect()
    }

    #[test]
    fn test_presence() {
        assert_eq!(evaluate(Presence::build, json!({}), &cts(1)), CheckOutcome::pass());
        assert_eq!(
            evaluate(Presence::build, json!({}), &[]),
            CheckOutcome::fail("No series found")
        );
    }

    #[test]
    fn test_count_compare_eq() {
        let config = json!({"n": 3, "op": "eq"});
        assert_eq!(
            evaluate(CountCompare::build, config.clone(), &cts(3)),
            CheckOutcome::pass()
        );
        assert_eq!(
            evaluate(CountCompare::build, config, &cts(2)),
            CheckOutcome::fail("Expected eq 3 but found 2")
        );
    }

    #[test]
    fn test_count_compare_operators() {
        let pass = |op: &str, count: usize| {
            evaluate(CountCompare::build, json!({"n": 2, "op": op}), &cts(count)).passed
        };
        assert!(pass("gt", 3) && !pass("gt", 2));
        assert!(pass("lt", 1) && !pass("lt", 2));
        assert!(pass("gte", 2) && !pass("gte", 1));
        assert!(pass("lte", 2) && !pass("lte", 3));
    }

    #[test]
    fn test_count_compare_unknown_operator_is_fatal() {
        let err = CountCompare::build(&args(json!({"n": 3, "op": "neq"}))).unwrap_err();
        assert!(matches!(err, QaError::Check(_)));
    }

    #[test]
    fn test_structures_case_insensitive_variant() {
        let series = vec![SeriesRecord::new("5", "RTSTRUCT").with_structure_names(["BRAIN STEM"])];
        let outcome = evaluate(
            StructuresPresent::build,
            json!({"structures": {"Brainstem": ["Brain Stem"]}, "case_sensitive": false}),
            &series,
        );
        assert!(outcome.passed);
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn test_structures_reports_each_miss() {
        let series = vec![
            SeriesRecord::new("5", "RTSTRUCT").with_structure_names(["GTV", "brainstem"]),
            SeriesRecord::new("6", "RTSTRUCT"),
        ];
        let outcome = evaluate(
            StructuresPresent::build,
            json!({"structures": {"PTV": [], "Brainstem": ["Brain Stem"], "GTV": []}}),
            &series,
        );

        assert!(!outcome.passed);
        assert_eq!(
            outcome.output,
            "PTV not found in series 5\nBrainstem not found in series 5\n\
             Key structure_names not found in series 6\n"
        );
    }

    #[test]
    fn test_meta_equals() {
        let series = vec![
            SeriesRecord::new("1", "RTPLAN").with_meta("RTPlanLabel", json!("HN_70")),
            SeriesRecord::new("2", "RTPLAN").with_meta("RTPlanLabel", json!("HN_60")),
            SeriesRecord::new("3", "RTPLAN"),
        ];
        let outcome = evaluate(
            MetaEquals::build,
            json!({"key": "RTPlanLabel", "value": "HN_70"}),
            &series,
        );

        assert!(!outcome.passed);
        assert_eq!(
            outcome.output,
            "Value of RTPlanLabel not HN_70 in series 2\nKey RTPlanLabel not found in series 3\n"
        );
    }

    #[test]
    fn test_meta_equals_on_document_fields() {
        let series = vec![SeriesRecord::new("1", "RTDOSE")];
        let outcome = evaluate(
            MetaEquals::build,
            json!({"key": "frame_of_reference", "value": "F1"}),
            &series,
        );
        assert_eq!(
            outcome,
            CheckOutcome::fail("Value of frame_of_reference not F1 in series 1\n")
        );
    }

    #[test]
    fn test_uniform_value_reports_count() {
        let mut series = cts(3);
        series[0].frame_of_reference = Some("F1".to_string());
        series[1].frame_of_reference = Some("F2".to_string());
        series[2].frame_of_reference = Some("F1".to_string());

        let outcome = evaluate(
            UniformValue::build,
            json!({"key": "frame_of_reference"}),
            &series,
        );
        assert_eq!(outcome, CheckOutcome::fail("2 frame_of_references found"));

        series[1].frame_of_reference = Some("F1".to_string());
        let outcome = evaluate(
            UniformValue::build,
            json!({"key": "frame_of_reference"}),
            &series,
        );
        assert!(outcome.passed);
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let series = vec![
            SeriesRecord::new("1", "RTPLAN").with_meta("Dose", json!(70.0)),
            SeriesRecord::new("2", "RTPLAN").with_meta("Dose", json!(70)),
        ];

        let outcome = evaluate(MetaEquals::build, json!({"key": "Dose", "value": 70}), &series);
        assert!(outcome.passed, "{}", outcome.output);

        let outcome = evaluate(UniformValue::build, json!({"key": "Dose"}), &series);
        assert!(outcome.passed, "{}", outcome.output);
    }

    #[test]
    fn test_sub_second_date_time() {
        let at = |milli| {
            chrono::NaiveDate::from_ymd_opt(2021, 3, 4)
                .and_then(|d| d.and_hms_milli_opt(10, 20, 30, milli))
        };
        let mut first = SeriesRecord::new("1", "CT");
        first.date_time = at(500);
        let mut second = SeriesRecord::new("2", "CT");
        second.date_time = at(0);
        let series = vec![first, second];

        let outcome = evaluate(
            MetaEquals::build,
            json!({"key": "date_time", "value": "2021-03-04T10:20:30.500"}),
            &series[..1],
        );
        assert!(outcome.passed, "{}", outcome.output);

        let outcome = evaluate(UniformValue::build, json!({"key": "date_time"}), &series);
        assert_eq!(outcome, CheckOutcome::fail("2 date_times found"));
    }

    #[test]
    fn test_uniform_value_missing_key_fails() {
        let outcome = evaluate(UniformValue::build, json!({"key": "StudyDate"}), &cts(1));
        assert_eq!(
            outcome,
            CheckOutcome::fail("Key StudyDate not found in series 1\n")
        );
    }

    #[test]
    fn test_link_via_frame_of_reference() {
        let series = vec![
            SeriesRecord::new("1", "CT")
                .with_frame_of_reference("F1")
                .with_match("CT"),
            SeriesRecord::new("2", "RTSTRUCT")
                .with_frame_of_reference("F1")
                .with_match("RTSTRUCT"),
        ];
        let outcome = evaluate(
            CrossSeriesLink::build,
            json!({"from_name": "CT", "to_name": "RTSTRUCT"}),
            &series,
        );
        assert!(outcome.passed);
    }

    #[test]
    fn test_link_via_reference_and_missing_link() {
        let series = vec![
            SeriesRecord::new("1", "CT").with_match("CT"),
            SeriesRecord::new("7", "CT").with_match("CT"),
            SeriesRecord::new("2", "RTSTRUCT")
                .with_referenced_series("1")
                .with_match("RTSTRUCT"),
        ];
        let outcome = evaluate(
            CrossSeriesLink::build,
            json!({"from_name": "CT", "to_name": "RTSTRUCT"}),
            &series,
        );
        // 两者都没有坐标系时不视为关联
        assert_eq!(
            outcome,
            CheckOutcome::fail("Series 7 not linked to RTSTRUCT\n")
        );
    }
}
