//! 协议一致性检查演示程序
//!
//! 构造一个头颈部放疗病例的索引表，依次完成结果文档构建、序列匹配和检查

use rtqa_core::utils::generate_dicom_uid;
use rtqa_core::{Template, TracingReporter};
use rtqa_dicom::{IndexRow, IndexTable};
use rtqa_workflow::ProtocolEngine;
use serde_json::json;

fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚀 RTQA 协议检查演示\n");

    // 1. 加载模板
    let template = Template::from_value(json!({
        "expected_series": {
            "CT": {"modality": "CT"},
            "RTSTRUCT": {"modality": "RTSTRUCT", "referencedSeries": "CT"},
            "RTPLAN": {"modality": "RTPLAN", "referencedSeries": "RTSTRUCT"},
            "RTDOSE": {"modality": "RTDOSE", "referencedSeries": "RTPLAN"}
        },
        "checks": [
            {"description": "Planning CT present", "series": "CT",
             "function": "presence", "critical": true},
            {"description": "Single dose grid", "series": "RTDOSE",
             "function": "count-compare", "args": {"n": 1, "op": "eq"}},
            {"description": "Organs at risk contoured", "series": "RTSTRUCT",
             "function": "structures-present", "critical": true,
             "args": {"structures": {"Brainstem": ["Brain Stem"], "SpinalCord": ["Spinal Cord"]},
                      "case_sensitive": false}},
            {"description": "Same frame of reference", "series": ["CT", "RTSTRUCT", "RTDOSE"],
             "function": "uniform-value", "args": {"key": "frame_of_reference"}},
            {"description": "Structures drawn on CT", "series": ["CT", "RTSTRUCT"],
             "function": "cross-series-link", "args": {"from_name": "CT", "to_name": "RTSTRUCT"}},
            {"description": "Plan dose summation", "series": "RTDOSE",
             "function": "meta-equals", "args": {"key": "dose_summation_type", "value": "PLAN"}}
        ],
        "meta": ["StudyDescription"]
    }))?;
    println!("✅ 模板包含 {} 个期望序列, {} 项检查", template.expected_series.len(), template.checks.len());

    let engine = ProtocolEngine::new(template)?;

    // 2. 构造索引表
    let table = create_sample_index();
    println!("✅ 索引表共 {} 行", table.len());

    // 3. 处理
    let reporter = TracingReporter::new();
    let (collection, report) = engine.process(&table, &reporter)?;

    println!("\n📋 序列匹配:");
    for series in &collection.series {
        println!(
            "   {} {:<8} -> {}",
            series.series_uid,
            series.modality,
            series.match_label.as_deref().unwrap_or("-")
        );
    }

    println!("\n🔍 检查结果:");
    for check in collection.checks.iter().flatten() {
        let mark = if check.passed { "✅" } else { "❌" };
        println!("   {} {}", mark, check.description);
        for line in check.output.lines() {
            println!("      - {}", line);
        }
    }

    println!("\n📊 概览:");
    println!("   通过: {}", report.checks_passed);
    println!("   失败: {}", report.checks_failed);
    println!("   关键失败: {}", report.critical_failures);

    println!("\n{}", serde_json::to_string_pretty(&collection)?);
    Ok(())
}

fn create_sample_index() -> IndexTable {
    let frame = generate_dicom_uid();
    let ct_uid = generate_dicom_uid();
    let struct_uid = generate_dicom_uid();
    let plan_uid = generate_dicom_uid();
    let dose_uid = generate_dicom_uid();

    let base = |series_uid: &str, modality: &str| {
        let mut row = IndexRow::new(series_uid, modality)
            .with_patient("HN-001")
            .with_frame_of_reference(frame.clone());
        row.sop_instance_uid = Some(generate_dicom_uid());
        row.extra
            .insert("StudyDescription".to_string(), json!("Head & Neck"));
        row
    };

    let mut rows: Vec<IndexRow> = (0..5)
        .map(|i| base(&ct_uid, "CT").with_slice_location(f64::from(i) * 2.5))
        .collect();

    let mut rtstruct = base(&struct_uid, "RTSTRUCT").with_referenced_series(ct_uid.clone());
    rtstruct.structure_names = Some(vec!["BRAIN STEM".to_string(), "PTV_70".to_string()]);
    rows.push(rtstruct);

    rows.push(base(&plan_uid, "RTPLAN").with_referenced_series(struct_uid.clone()));

    let mut dose = base(&dose_uid, "RTDOSE").with_referenced_series(plan_uid.clone());
    dose.dose_summation_type = Some("PLAN".to_string());
    rows.push(dose);

    IndexTable::new(rows)
}
