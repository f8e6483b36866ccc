// Multi-persona report generation: summary, KPIs, one analysis per persona,
// next steps. Calls run one after another; any completion failure aborts the
// whole report.

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use boardroom_core::db::Database;
use boardroom_core::model::{NewReport, Report};
use boardroom_core::persona::Persona;
use boardroom_llm::{ChatBackend, LlmError};

use crate::extract::extract_or_else;
use crate::prompt;

/// Report row status written by [`save_report`].
pub const STATUS_COMPLETED: &str = "completed";

// ---------------------------------------------------------------------------
// Report document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    ExecutiveSummary,
    AgentAnalysis,
    NextSteps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    pub order_index: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiStatus {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl KpiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KpiStatus::Positive => "positive",
            KpiStatus::Neutral => "neutral",
            KpiStatus::Negative => "negative",
        }
    }

    /// Case-insensitive; anything unrecognised is neutral.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => KpiStatus::Positive,
            "negative" => KpiStatus::Negative,
            _ => KpiStatus::Neutral,
        }
    }
}

impl<'de> Deserialize<'de> for KpiStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(KpiStatus::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub metric: String,
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
    #[serde(default)]
    pub status: KpiStatus,
}

impl Kpi {
    fn new(metric: &str, value: &str, status: KpiStatus) -> Self {
        Self {
            metric: metric.to_string(),
            value: value.to_string(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl NextStep {
    fn new(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReport {
    pub title: String,
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
    pub kpi: Vec<Kpi>,
    pub next_steps: Vec<NextStep>,
}

/// Models sometimes answer `"value": 15` instead of `"value": "15"`.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// KPIs used whenever the model's reply yields none.
pub fn fallback_kpis() -> Vec<Kpi> {
    vec![
        Kpi::new("종합 점수", "85/100", KpiStatus::Positive),
        Kpi::new("실행 가능성", "높음", KpiStatus::Positive),
        Kpi::new("리스크 수준", "중간", KpiStatus::Neutral),
        Kpi::new("기대 수익", "양호", KpiStatus::Positive),
    ]
}

/// Next steps used whenever the model's reply yields none.
pub fn fallback_next_steps() -> Vec<NextStep> {
    vec![
        NextStep::new("1단계: 기획 (1개월)", "상세 기획서 작성 및 리소스 확보"),
        NextStep::new("2단계: 실행 (3개월)", "핵심 기능 개발 및 시장 테스트"),
        NextStep::new("3단계: 런칭 (1개월)", "본격 출시 및 마케팅 캠페인"),
    ]
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Summary,
    #[default]
    Detailed,
    Comprehensive,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Summary => "summary",
            DetailLevel::Detailed => "detailed",
            DetailLevel::Comprehensive => "comprehensive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "summary" => Some(DetailLevel::Summary),
            "detailed" => Some(DetailLevel::Detailed),
            "comprehensive" => Some(DetailLevel::Comprehensive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub topic: String,
    /// Persona tags in the order their sections should appear.
    pub agents: Vec<String>,
    pub conversation_id: Option<String>,
    pub detail_level: DetailLevel,
}

impl ReportOptions {
    pub fn new(topic: impl Into<String>, agents: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            agents,
            conversation_id: None,
            detail_level: DetailLevel::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Run the four-stage pipeline against `backend`.
///
/// KPI and next-step replies that do not contain a usable JSON array are
/// replaced by [`fallback_kpis`] / [`fallback_next_steps`]; the report never
/// carries an empty list for either.
pub async fn generate_report(
    backend: &dyn ChatBackend,
    options: &ReportOptions,
) -> Result<GeneratedReport, LlmError> {
    if !backend.is_configured() {
        return Err(LlmError::NotConfigured);
    }

    let topic = options.topic.as_str();
    let agents = &options.agents;
    // Auxiliary calls speak with the default persona's voice.
    let default_persona = Persona::default().as_str();

    info!(topic, agents = ?agents, detail = options.detail_level.as_str(), "generating report");

    let summary = backend
        .chat(&prompt::executive_summary(topic, agents), default_persona, None)
        .await?;

    let kpi_reply = backend
        .chat(&prompt::kpis(topic), default_persona, None)
        .await?;
    let kpi = extract_or_else(&kpi_reply.content, || {
        warn!("KPI reply unusable; using fallback KPIs");
        fallback_kpis()
    });

    let mut sections = Vec::with_capacity(agents.len());
    for (i, agent) in agents.iter().enumerate() {
        let analysis = backend
            .chat(&prompt::agent_analysis(topic, agent), agent, None)
            .await?;
        sections.push(ReportSection {
            section_type: SectionType::AgentAnalysis,
            title: format!("{agent} 분석"),
            content: analysis.content,
            order_index: i as u32 + 1,
        });
    }

    let steps_reply = backend
        .chat(&prompt::next_steps(topic, agents), default_persona, None)
        .await?;
    let next_steps = extract_or_else(&steps_reply.content, || {
        warn!("next-steps reply unusable; using fallback steps");
        fallback_next_steps()
    });

    info!(sections = sections.len(), kpis = kpi.len(), steps = next_steps.len(), "report generated");

    Ok(GeneratedReport {
        title: format!("{topic} - 종합 분석 보고서"),
        executive_summary: summary.content,
        sections,
        kpi,
        next_steps,
    })
}

/// Ask the model for a short title; falls back to the topic itself.
pub async fn generate_report_title(backend: &dyn ChatBackend, topic: &str) -> String {
    let reply = backend
        .chat(&prompt::report_title(topic), Persona::default().as_str(), None)
        .await;
    match reply {
        Ok(completion) if !completion.content.trim().is_empty() => {
            prompt::truncate_chars(completion.content.trim(), prompt::TITLE_MAX_CHARS)
        }
        Ok(_) => prompt::truncate_chars(topic, prompt::TITLE_MAX_CHARS),
        Err(e) => {
            warn!(error = %e, "report title generation failed; using topic");
            prompt::truncate_chars(topic, prompt::TITLE_MAX_CHARS)
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct StoredReport {
    topic: String,
    agents: Vec<String>,
    report: GeneratedReport,
}

/// Persist a generated report for `user_id`.
pub fn save_report(
    db: &Database,
    user_id: &str,
    options: &ReportOptions,
    report: &GeneratedReport,
) -> anyhow::Result<Report> {
    let stored = StoredReport {
        topic: options.topic.clone(),
        agents: options.agents.clone(),
        report: report.clone(),
    };
    let metadata = serde_json::to_value(&stored).context("failed to serialize report")?;
    db.create_report(
        user_id,
        &NewReport {
            conversation_id: options.conversation_id.clone(),
            title: report.title.clone(),
            report_type: options.detail_level.as_str().to_string(),
            status: STATUS_COMPLETED.to_string(),
            metadata: Some(metadata),
        },
    )
}

/// Load a report row and decode its document. `Ok(None)` if no such report.
pub fn load_report(db: &Database, id: &str) -> anyhow::Result<Option<(Report, GeneratedReport)>> {
    let Some(row) = db.get_report(id)? else {
        return Ok(None);
    };
    let metadata = row
        .metadata
        .clone()
        .with_context(|| format!("report {id} has no stored document"))?;
    let stored: StoredReport =
        serde_json::from_value(metadata).with_context(|| format!("report {id} has a malformed document"))?;
    Ok(Some((row, stored.report)))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

impl GeneratedReport {
    /// Render the report as a Markdown document.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);

        out.push_str("## 요약 (Executive Summary)\n\n");
        out.push_str(self.executive_summary.trim());
        out.push_str("\n\n");

        out.push_str("## 핵심 지표\n\n");
        out.push_str("| 지표 | 값 | 상태 |\n|---|---|---|\n");
        for kpi in &self.kpi {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                kpi.metric,
                kpi.value,
                kpi.status.as_str()
            ));
        }
        out.push('\n');

        let mut sections: Vec<&ReportSection> = self.sections.iter().collect();
        sections.sort_by_key(|s| s.order_index);
        for section in sections {
            out.push_str(&format!("## {}\n\n{}\n\n", section.title, section.content.trim()));
        }

        out.push_str("## 다음 단계\n\n");
        for (i, step) in self.next_steps.iter().enumerate() {
            out.push_str(&format!("{}. **{}**: {}\n", i + 1, step.title, step.description));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use boardroom_core::model::{MessageRole, NewUser};

    const KPI_JSON: &str = r#"[
        {"metric": "매출 성장률", "value": "+15%", "status": "positive"},
        {"metric": "투자 회수 기간", "value": 18, "status": "neutral"}
    ]"#;
    const STEPS_JSON: &str = r#"Sure:
    [{"title": "시장 테스트 (3개월)", "description": "베타 테스트 진행"}]"#;

    fn options(agents: &[&str]) -> ReportOptions {
        ReportOptions::new("AI 고객센터 도입", agents.iter().map(|a| a.to_string()).collect())
    }

    #[tokio::test]
    async fn two_agents_give_two_sections_in_order() {
        let backend = ScriptedBackend::ok(&[
            "Summary text.",
            KPI_JSON,
            "CFO view.",
            "CTO view.",
            STEPS_JSON,
        ]);
        let report = generate_report(&backend, &options(&["CFO", "CTO"])).await.unwrap();

        assert_eq!(report.title, "AI 고객센터 도입 - 종합 분석 보고서");
        assert_eq!(report.executive_summary, "Summary text.");
        assert_eq!(report.sections.len(), 2);
        assert_eq!(report.sections[0].title, "CFO 분석");
        assert_eq!(report.sections[0].content, "CFO view.");
        assert_eq!(report.sections[0].order_index, 1);
        assert_eq!(report.sections[1].title, "CTO 분석");
        assert_eq!(report.sections[1].order_index, 2);
        assert!(report
            .sections
            .iter()
            .all(|s| s.section_type == SectionType::AgentAnalysis));

        assert_eq!(report.kpi.len(), 2);
        assert_eq!(report.kpi[1].value, "18");
        assert_eq!(report.next_steps[0].title, "시장 테스트 (3개월)");
    }

    #[tokio::test]
    async fn calls_are_sequential_with_expected_personas() {
        let backend = ScriptedBackend::ok(&["s", "[]", "a", "b", "c", "[]"]);
        generate_report(&backend, &options(&["cmo", "COO", "CHRO"])).await.unwrap();

        let calls = backend.calls();
        let personas: Vec<&str> = calls.iter().map(|c| c.persona.as_str()).collect();
        assert_eq!(personas, vec!["CFO", "CFO", "cmo", "COO", "CHRO", "CFO"]);
        assert!(calls.iter().all(|c| !c.streamed));
        assert_eq!(calls[2].messages[0].role, MessageRole::System);
        assert_eq!(calls[2].messages[0].content, Persona::Cmo.analysis_prompt());
    }

    #[tokio::test]
    async fn unusable_kpi_and_steps_replies_use_fallbacks() {
        let backend = ScriptedBackend::ok(&[
            "s",
            "I'd rather not list KPIs.",
            "analysis",
            "[{\"title\": \"broken\"",
        ]);
        let report = generate_report(&backend, &options(&["CFO"])).await.unwrap();
        assert_eq!(report.kpi, fallback_kpis());
        assert_eq!(report.next_steps, fallback_next_steps());
    }

    #[test]
    fn fallback_lists_are_fixed() {
        let kpis = fallback_kpis();
        assert_eq!(kpis.len(), 4);
        assert_eq!(kpis[0], Kpi::new("종합 점수", "85/100", KpiStatus::Positive));
        assert_eq!(kpis[2].status, KpiStatus::Neutral);
        let steps = fallback_next_steps();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].title, "2단계: 실행 (3개월)");
        assert_eq!(steps[2].description, "본격 출시 및 마케팅 캠페인");
    }

    #[tokio::test]
    async fn loose_kpi_statuses_and_missing_fields_keep_model_output() {
        let backend = ScriptedBackend::ok(&[
            "s",
            r#"[{"metric":"매출 성장률","value":"+15%","status":"Positive"},
                {"metric":"이탈률","value":"3%","status":"warning"},
                {"metric":"고객 만족도","value":"4.2"},
                {"metric":"원가율","value":"62%","status":"NEGATIVE"}]"#,
            "a",
            r#"[{"title":"파일럿 운영"},{"title":"전사 확대","description":"2분기 내 적용"}]"#,
        ]);
        let report = generate_report(&backend, &options(&["CFO"])).await.unwrap();

        let metrics: Vec<&str> = report.kpi.iter().map(|k| k.metric.as_str()).collect();
        assert_eq!(metrics, vec!["매출 성장률", "이탈률", "고객 만족도", "원가율"]);
        let statuses: Vec<KpiStatus> = report.kpi.iter().map(|k| k.status).collect();
        assert_eq!(
            statuses,
            vec![
                KpiStatus::Positive,
                KpiStatus::Neutral,
                KpiStatus::Neutral,
                KpiStatus::Negative
            ]
        );

        assert_eq!(report.next_steps.len(), 2);
        assert_eq!(report.next_steps[0].title, "파일럿 운영");
        assert_eq!(report.next_steps[0].description, "");
        assert_eq!(report.next_steps[1].description, "2분기 내 적용");
    }

    #[test]
    fn kpi_status_parse_is_lenient() {
        assert_eq!(KpiStatus::parse(" Positive "), KpiStatus::Positive);
        assert_eq!(KpiStatus::parse("negative"), KpiStatus::Negative);
        assert_eq!(KpiStatus::parse("warning"), KpiStatus::Neutral);
        let kpi: Kpi = serde_json::from_str(r#"{"metric":"m","value":1,"status":null}"#).unwrap();
        assert_eq!(kpi.status, KpiStatus::Neutral);
        assert_eq!(serde_json::to_value(KpiStatus::Positive).unwrap(), "positive");
    }

    #[tokio::test]
    async fn empty_arrays_use_fallbacks() {
        let backend = ScriptedBackend::ok(&["s", "[]", "[]"]);
        let report = generate_report(&backend, &options(&[])).await.unwrap();
        assert!(report.sections.is_empty());
        assert_eq!(report.kpi.len(), 4);
        assert_eq!(report.next_steps.len(), 3);
    }

    #[tokio::test]
    async fn failure_mid_pipeline_aborts() {
        let backend = ScriptedBackend::new(vec![
            Ok("s".into()),
            Ok(KPI_JSON.into()),
            Err(LlmError::Upstream {
                status: 500,
                message: "boom".into(),
            }),
        ]);
        let err = generate_report(&backend, &options(&["CFO", "CTO"])).await.unwrap_err();
        assert!(matches!(err, LlmError::Upstream { status: 500, .. }));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn unconfigured_backend_makes_no_calls() {
        let backend = ScriptedBackend::unconfigured();
        let err = generate_report(&backend, &options(&["CFO"])).await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn report_title_falls_back_to_topic() {
        let backend = ScriptedBackend::new(vec![Err(LlmError::EmptyResponse)]);
        let topic = "아주 긴 주제 ".repeat(10);
        let title = generate_report_title(&backend, &topic).await;
        assert_eq!(title.chars().count(), prompt::TITLE_MAX_CHARS);
        assert!(topic.starts_with(&title));

        let backend = ScriptedBackend::ok(&["  Customer Service Automation  "]);
        assert_eq!(
            generate_report_title(&backend, "x").await,
            "Customer Service Automation"
        );
    }

    #[test]
    fn save_and_load_round_trip() {
        let db = Database::open(":memory:").unwrap();
        let user = db
            .create_user(&NewUser {
                email: "ceo@example.com".into(),
                full_name: "CEO".into(),
                role: "ceo".into(),
                department: None,
            })
            .unwrap();
        let report = GeneratedReport {
            title: "T - 종합 분석 보고서".into(),
            executive_summary: "Go.".into(),
            sections: vec![ReportSection {
                section_type: SectionType::AgentAnalysis,
                title: "CFO 분석".into(),
                content: "Numbers.".into(),
                order_index: 1,
            }],
            kpi: fallback_kpis(),
            next_steps: fallback_next_steps(),
        };
        let mut opts = options(&["CFO"]);
        opts.detail_level = DetailLevel::Comprehensive;

        let row = save_report(&db, &user.id, &opts, &report).unwrap();
        assert_eq!(row.report_type, "comprehensive");
        assert_eq!(row.status, STATUS_COMPLETED);
        assert_eq!(row.metadata.as_ref().unwrap()["agents"][0], "CFO");

        let (loaded_row, loaded) = load_report(&db, &row.id).unwrap().unwrap();
        assert_eq!(loaded_row.id, row.id);
        assert_eq!(loaded, report);
        assert!(load_report(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn markdown_has_all_parts_in_order() {
        let report = GeneratedReport {
            title: "T".into(),
            executive_summary: "Summary.".into(),
            sections: vec![
                ReportSection {
                    section_type: SectionType::AgentAnalysis,
                    title: "CTO 분석".into(),
                    content: "Tech.".into(),
                    order_index: 2,
                },
                ReportSection {
                    section_type: SectionType::AgentAnalysis,
                    title: "CFO 분석".into(),
                    content: "Money.".into(),
                    order_index: 1,
                },
            ],
            kpi: fallback_kpis(),
            next_steps: fallback_next_steps(),
        };
        let md = report.to_markdown();
        assert!(md.starts_with("# T\n"));
        assert!(md.contains("| 종합 점수 | 85/100 | positive |"));
        assert!(md.contains("1. **1단계: 기획 (1개월)**: 상세 기획서 작성 및 리소스 확보"));
        let cfo = md.find("## CFO 분석").unwrap();
        let cto = md.find("## CTO 분석").unwrap();
        let steps = md.find("## 다음 단계").unwrap();
        assert!(cfo < cto && cto < steps);
    }

    #[test]
    fn detail_level_parse() {
        assert_eq!(DetailLevel::parse("Summary"), Some(DetailLevel::Summary));
        assert_eq!(DetailLevel::parse("full"), None);
        assert_eq!(DetailLevel::default(), DetailLevel::Detailed);
    }

    #[test]
    fn section_type_serializes_as_type_field() {
        let section = ReportSection {
            section_type: SectionType::AgentAnalysis,
            title: "CFO 분석".into(),
            content: String::new(),
            order_index: 1,
        };
        let v = serde_json::to_value(&section).unwrap();
        assert_eq!(v["type"], "agent_analysis");
    }
}
