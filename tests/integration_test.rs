use async_trait::async_trait;
use nl2sql_core::{
    AnswerError, ChatModel, ChatPrompt, Correction, Dataset, EngineConfig, FailureCause, GenerationFailure,
    GenerationRequest, LlmClient, LlmConfig, LlmSqlGenerator, Orchestrator, RawTable, SchemaInference,
    SessionContext, SessionStore, SqlCandidate, SqlGenerator, SqlOrigin, SqlValidator, Stage,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const STAFF_CSV: &str = "\
department,daily_rate,hired,job_role
Sales,1102,2021-01-04,Manager
Research,279,2021-01-20,Scientist
Sales,1373,2021-02-11,Executive
Research,392,2021-02-28,Scientist
Sales,591,2021-03-15,Executive
HR,1005,2021-03-30,Manager
Research,1324,2021-04-02,Scientist
HR,1358,2021-04-18,Manager
Sales,216,2021-05-05,Executive
Research,1299,2021-05-21,Scientist
Sales,809,2021-06-09,Manager
HR,153,2021-06-25,Manager
";

/// Chat model double with a fixed reply and an optional delay.
struct ScriptedModel {
    reply: Result<String, GenerationFailure>,
    delay: Duration,
}

impl ScriptedModel {
    fn replying(sql: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(sql.to_string()),
            delay: Duration::ZERO,
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            reply: Ok("SELECT 1".to_string()),
            delay: Duration::from_secs(30),
        })
    }

    fn failing(failure: GenerationFailure) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(failure),
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &ChatPrompt) -> Result<String, GenerationFailure> {
        tokio::time::sleep(self.delay).await;
        self.reply.clone()
    }
}

/// Rule-path double that always emits the same SQL.
struct FixedRules(&'static str);

#[async_trait]
impl SqlGenerator for FixedRules {
    fn origin(&self) -> SqlOrigin {
        SqlOrigin::RuleBased
    }

    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<SqlCandidate, GenerationFailure> {
        Ok(SqlCandidate::rule_based(self.0, "fixed", nl2sql_core::Confidence::High))
    }
}

fn staff(config: &EngineConfig) -> Arc<Dataset> {
    let raw = RawTable::from_csv_reader(STAFF_CSV.as_bytes()).unwrap();
    Arc::new(
        Dataset::from_raw(
            "staff.csv",
            &config.table_name,
            &raw,
            &SchemaInference::new(config.categorical_ratio),
        )
        .unwrap(),
    )
}

fn with_model(config: &EngineConfig, model: Arc<dyn ChatModel>) -> Orchestrator {
    let generator = LlmSqlGenerator::new(
        model,
        SqlValidator::new(config.table_name.clone(), config.row_cap),
        Duration::from_millis(50),
    );
    Orchestrator::from_config(config).unwrap().with_llm(Arc::new(generator))
}

fn as_f64(value: &Value) -> f64 {
    value.as_f64().unwrap()
}

#[tokio::test]
async fn test_average_daily_rate_by_department() {
    let config = EngineConfig::default();
    let dataset = staff(&config);
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let answer = orchestrator
        .answer(&SessionContext::detached(dataset), "average daily rate by department")
        .await;
    let result = answer.result().unwrap();

    assert_eq!(
        result.sql(),
        r#"SELECT "department", AVG("daily_rate") AS "avg_daily_rate" FROM "data" GROUP BY "department" LIMIT 1000"#
    );
    assert_eq!(result.columns, vec!["department", "avg_daily_rate"]);
    assert_eq!(result.row_count, 3);

    let sales = result
        .rows
        .iter()
        .find(|row| row["department"] == Value::from("Sales"))
        .unwrap();
    assert!((as_f64(&sales["avg_daily_rate"]) - 818.2).abs() < 1e-9);
    assert_eq!(answer.provenance.path, Some(SqlOrigin::RuleBased));
}

#[tokio::test]
async fn test_llm_timeout_gives_same_result_via_rules() {
    let config = EngineConfig::default();
    let question = "average daily rate by department";

    let llm_answer = with_model(
        &config,
        ScriptedModel::replying(
            r#"SELECT "department", AVG("daily_rate") AS "avg_daily_rate" FROM "data" GROUP BY "department""#,
        ),
    )
    .answer(&SessionContext::detached(staff(&config)), question)
    .await;
    assert_eq!(llm_answer.provenance.path, Some(SqlOrigin::Llm));

    let fallback_answer = with_model(&config, ScriptedModel::hanging())
        .answer(&SessionContext::detached(staff(&config)), question)
        .await;
    assert_eq!(fallback_answer.provenance.path, Some(SqlOrigin::RuleBased));
    assert_eq!(
        fallback_answer.provenance.fallback.llm_failure,
        Some(FailureCause::Generation(GenerationFailure::Timeout(50)))
    );

    let from_llm = llm_answer.result().unwrap();
    let from_rules = fallback_answer.result().unwrap();
    assert_eq!(from_llm.columns, from_rules.columns);
    assert_eq!(from_llm.rows, from_rules.rows);
}

#[tokio::test]
async fn test_row_cap_is_always_enforced() {
    let config = EngineConfig {
        row_cap: 4,
        ..EngineConfig::default()
    };
    let dataset = staff(&config);
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let answer = orchestrator
        .answer(&SessionContext::detached(Arc::clone(&dataset)), "zxcv qwerty")
        .await;
    let result = answer.result().unwrap();
    assert_eq!(result.row_count, 4);
    assert!(result.truncated);
    assert_eq!(result.candidate.corrections, vec![Correction::RowCapInjected { cap: 4 }]);
    assert!(answer.provenance.low_confidence);

    let answer = orchestrator
        .answer(&SessionContext::detached(dataset), "show me the rows")
        .await;
    let result = answer.result().unwrap();
    assert_eq!(result.row_count, 4);
    assert_eq!(
        result.candidate.corrections,
        vec![Correction::LimitClamped {
            requested: "50".to_string(),
            cap: 4
        }]
    );
}

#[tokio::test]
async fn test_filter_matching_nothing_is_empty_success() {
    let config = EngineConfig::default();
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    let answer = orchestrator
        .answer(
            &SessionContext::detached(staff(&config)),
            "rows where department is Marketing",
        )
        .await;

    let result = answer.result().unwrap();
    assert_eq!(result.row_count, 0);
    assert!(result.rows.is_empty());
    assert_eq!(result.columns.len(), 4);
    assert_eq!(answer.provenance.last_stage(), Some(Stage::Done));
}

#[tokio::test]
async fn test_double_failure_uses_universal_fallback() {
    let config = EngineConfig::default();
    let orchestrator = Orchestrator::from_config(&config)
        .unwrap()
        .with_generators(vec![
            Arc::new(LlmSqlGenerator::new(
                ScriptedModel::failing(GenerationFailure::RateLimited),
                SqlValidator::new("data", config.row_cap),
                Duration::from_millis(50),
            )) as Arc<dyn SqlGenerator>,
            Arc::new(FixedRules("DELETE FROM data")) as Arc<dyn SqlGenerator>,
        ]);

    let answer = orchestrator
        .answer(&SessionContext::detached(staff(&config)), "anything at all")
        .await;

    let result = answer.result().unwrap();
    assert_eq!(result.row_count, 12);
    let provenance = &answer.provenance;
    assert!(provenance.fallback.universal_fallback_used);
    assert!(provenance.low_confidence);
    assert_eq!(
        provenance.fallback.llm_failure,
        Some(FailureCause::Generation(GenerationFailure::RateLimited))
    );
    assert_eq!(
        provenance.fallback.rule_rejection.as_ref().map(|r| r.code()),
        Some("disallowed_statement")
    );
}

#[tokio::test]
async fn test_stacked_llm_statements_never_run() {
    let config = EngineConfig::default();
    let dataset = staff(&config);
    let orchestrator = with_model(&config, ScriptedModel::replying("SELECT * FROM data; DROP TABLE data;"));

    let answer = orchestrator
        .answer(&SessionContext::detached(Arc::clone(&dataset)), "how many rows are there")
        .await;
    assert_eq!(answer.provenance.path, Some(SqlOrigin::RuleBased));
    assert_eq!(answer.result().unwrap().rows[0]["count"], Value::from(12));

    let again = orchestrator
        .answer(&SessionContext::detached(dataset), "how many rows are there")
        .await;
    assert_eq!(again.result().unwrap().rows[0]["count"], Value::from(12));
}

#[tokio::test]
async fn test_monthly_trend() {
    let config = EngineConfig::default();
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    let answer = orchestrator
        .answer(&SessionContext::detached(staff(&config)), "monthly count of hires")
        .await;

    let result = answer.result().unwrap();
    assert_eq!(result.columns, vec!["period", "count"]);
    assert_eq!(result.row_count, 6);
    assert_eq!(result.rows[0]["period"], Value::from("2021-01"));
    assert!(result.rows.iter().all(|row| row["count"] == Value::from(2)));
}

#[tokio::test]
async fn test_missing_api_key_falls_back() {
    let config = EngineConfig::default();
    let client = LlmClient::new(LlmConfig::default()).unwrap();
    let orchestrator = with_model(&config, Arc::new(client));

    let answer = orchestrator
        .answer(&SessionContext::detached(staff(&config)), "total daily rate")
        .await;
    assert!(answer.is_ok());
    assert!(matches!(
        answer.provenance.fallback.llm_failure,
        Some(FailureCause::Generation(GenerationFailure::Unavailable(_)))
    ));
}

#[tokio::test]
async fn test_session_flow() {
    let config = EngineConfig::default();
    let store = SessionStore::default();
    let raw = RawTable::from_csv_reader(STAFF_CSV.as_bytes()).unwrap();
    let id = store.insert(Dataset::from_raw("staff.csv", "data", &raw, &SchemaInference::default()).unwrap());
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let answer = orchestrator.answer_for(&store, id, "top 2 departments by total daily rate").await;
    let result = answer.result().unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[0]["department"], Value::from("Sales"));
    assert_eq!(store.context(id, 1).unwrap().history.len(), 1);

    store.remove(id);
    let gone = orchestrator.answer_for(&store, id, "total daily rate").await;
    assert!(matches!(gone.error(), Some(AnswerError::UnknownDataset { .. })));
}
