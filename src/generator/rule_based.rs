//! Rule-Based SQL Generator
//!
//! Deterministic templates, tried in this order; the first one whose columns
//! resolve wins:
//!
//! 1. `group_aggregate`  - "average daily rate by department"
//! 2. `top_n`            - "top 5 departments by total daily rate"
//! 3. `trend`            - "monthly count of hires", "daily rate over time"
//! 4. `scalar_aggregate` - "total daily rate"
//! 5. `filter`           - "rows where department is Sales"
//! 6. `preview`          - "show me some rows"
//! 7. `fallback`         - `SELECT *`, marked low confidence
//!
//! A `where/with/whose <column> <op> <value>` tail is parsed first, removed
//! from the text the other templates see, and applied as `WHERE` to all of them.

use crate::candidate::{Confidence, SqlCandidate, SqlOrigin};
use crate::dataset::{quote_ident, quote_literal};
use crate::error::GenerationFailure;
use crate::fuzzy_matcher::ColumnMatcher;
use crate::generator::{GenerationRequest, SqlGenerator};
use crate::schema::{format_datetime, parse_datetime, parse_number, ColumnSchema, ColumnType, Schema};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

pub const PREVIEW_ROWS: u64 = 50;
const DEFAULT_TOP_N: u64 = 5;

lazy_static! {
    static ref FILTER: Regex = Regex::new(
        r"(?i)\b(?:where|with|whose)\s+(?P<column>.+?)\s+(?P<op>is not equal to|is not|is equal to|is greater than or equal to|is less than or equal to|is greater than|is more than|is less than|is above|is below|is at least|is at most|greater than or equal to|less than or equal to|greater than|more than|less than|at least|at most|above|below|equal to|equals|is|!=|<>|>=|<=|=|>|<)\s+(?P<value>.+?)[\s?.!]*$"
    )
    .expect("valid filter pattern");
    static ref TOP_N: Regex =
        Regex::new(r"\b(?P<dir>top|bottom)\s+(?:(?P<n>\d+)\s+)?(?P<entity>.+?)\s+by\s+(?P<metric>.+)$")
            .expect("valid top-n pattern");
    static ref TOP_MARKER: Regex = Regex::new(r"\b(?:top|bottom)\b").expect("valid marker pattern");
    static ref GROUP_DELIMITER: Regex =
        Regex::new(r"\b(?:by|per|for each|for every|across)\b").expect("valid delimiter pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    Avg,
    Sum,
    Count,
    Max,
    Min,
}

impl Aggregate {
    fn function(&self) -> &'static str {
        match self {
            Aggregate::Avg => "AVG",
            Aggregate::Sum => "SUM",
            Aggregate::Count => "COUNT",
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Aggregate::Avg => "avg",
            Aggregate::Sum => "sum",
            Aggregate::Count => "count",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
        }
    }
}

/// Checked in order, first hit wins.
const AGGREGATE_WORDS: &[(Aggregate, &[&str])] = &[
    (Aggregate::Avg, &["average", "avg", "mean"]),
    (Aggregate::Sum, &["sum", "total"]),
    (Aggregate::Count, &["count", "number of", "how many"]),
    (Aggregate::Max, &["max", "maximum", "highest", "largest"]),
    (Aggregate::Min, &["min", "minimum", "lowest", "smallest"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grain {
    Day,
    Week,
    Month,
    Year,
}

impl Grain {
    fn format(&self) -> &'static str {
        match self {
            Grain::Day => "%Y-%m-%d",
            Grain::Week => "%Y-W%W",
            Grain::Month => "%Y-%m",
            Grain::Year => "%Y",
        }
    }
}

/// Finer grains first; generic trend words fall through to months.
const TREND_WORDS: &[(Grain, &[&str])] = &[
    (Grain::Day, &["daily", "per day", "by day", "each day", "day by day"]),
    (Grain::Week, &["weekly", "per week", "by week", "each week"]),
    (Grain::Year, &["yearly", "annual", "annually", "per year", "by year", "each year"]),
    (
        Grain::Month,
        &["monthly", "per month", "by month", "each month", "over time", "trend", "time series", "timeline"],
    ),
];

const PREVIEW_WORDS: &[&str] = &[
    "show", "preview", "sample", "first", "list", "display", "row", "record", "head", "see", "view",
];

struct Measure {
    expr: String,
    alias: String,
}

impl Measure {
    fn count_star() -> Self {
        Self {
            expr: "COUNT(*)".to_string(),
            alias: "count".to_string(),
        }
    }

    fn of(aggregate: Aggregate, metric: Option<&ColumnSchema>) -> Option<Self> {
        match (aggregate, metric) {
            (_, Some(column)) => Some(Self {
                expr: format!("{}({})", aggregate.function(), quote_ident(&column.name)),
                alias: format!("{}_{}", aggregate.prefix(), column.name),
            }),
            (Aggregate::Count, None) => Some(Self::count_star()),
            _ => None,
        }
    }

    fn select(&self) -> String {
        format!("{} AS {}", self.expr, quote_ident(&self.alias))
    }
}

struct Filter {
    clause: String,
    /// Byte offset where the filter phrase starts in the question
    start: usize,
}

/// Deterministic generator, never fails.
pub struct RuleBasedGenerator {
    matcher: ColumnMatcher,
}

impl Default for RuleBasedGenerator {
    fn default() -> Self {
        Self::new(ColumnMatcher::default())
    }
}

impl RuleBasedGenerator {
    pub fn new(matcher: ColumnMatcher) -> Self {
        Self { matcher }
    }

    /// Build the candidate for `question`. Same inputs, same SQL.
    pub fn build(&self, question: &str, schema: &Schema) -> SqlCandidate {
        let filter = self.parse_filter(question, schema);
        let intent = match filter {
            Some(ref f) => &question[..f.start],
            None => question,
        };
        let text = self.matcher.normalize(intent);
        let conditions: Vec<String> = filter.iter().map(|f| f.clause.clone()).collect();
        let table = quote_ident(schema.table());

        let matched = self
            .group_aggregate(&text, schema, &table, &conditions)
            .map(|sql| ("group_aggregate", sql))
            .or_else(|| self.top_n(&text, schema, &table, &conditions).map(|sql| ("top_n", sql)))
            .or_else(|| self.trend(&text, schema, &table, &conditions).map(|sql| ("trend", sql)))
            .or_else(|| {
                self.scalar_aggregate(&text, schema, &table, &conditions)
                    .map(|sql| ("scalar_aggregate", sql))
            });
        if let Some((name, sql)) = matched {
            // A grouping or ranking nothing above could resolve was dropped.
            let dropped_grouping = GROUP_DELIMITER.is_match(&text) || TOP_MARKER.is_match(&text);
            let confidence = if name == "scalar_aggregate" && dropped_grouping {
                debug!("Unresolved grouping in '{}', answering with a single aggregate", text);
                Confidence::Low
            } else {
                Confidence::High
            };
            debug!("Rule template '{}' matched", name);
            return SqlCandidate::rule_based(sql, name, confidence);
        }

        if !conditions.is_empty() {
            debug!("Rule template 'filter' matched");
            return SqlCandidate::rule_based(
                format!("SELECT * FROM {}{}", table, where_clause(&conditions)),
                "filter",
                Confidence::High,
            );
        }

        if PREVIEW_WORDS.iter().any(|w| contains_phrase(&text, w)) {
            debug!("Rule template 'preview' matched");
            return SqlCandidate::rule_based(
                format!("SELECT * FROM {} LIMIT {}", table, PREVIEW_ROWS),
                "preview",
                Confidence::High,
            );
        }

        debug!("No rule template matched, falling back to full scan");
        SqlCandidate::rule_based(format!("SELECT * FROM {}", table), "fallback", Confidence::Low)
    }

    fn numeric<'a>(&self, phrase: &str, schema: &'a Schema) -> Option<&'a ColumnSchema> {
        self.matcher
            .resolve_typed(phrase, schema, &[ColumnType::Numeric])
            .map(|m| m.column)
    }

    fn dimension<'a>(&self, phrase: &str, schema: &'a Schema) -> Option<&'a ColumnSchema> {
        self.matcher
            .resolve_typed(phrase, schema, &[ColumnType::Categorical, ColumnType::Text])
            .map(|m| m.column)
    }

    fn group_aggregate(&self, text: &str, schema: &Schema, table: &str, conditions: &[String]) -> Option<String> {
        if TOP_MARKER.is_match(text) {
            return None;
        }
        let delimiter = GROUP_DELIMITER.find(text)?;
        let metric_phrase = &text[..delimiter.start()];
        let aggregate = detect_aggregate(metric_phrase)?;
        let group = self.dimension(text[delimiter.end()..].trim(), schema)?;
        let measure = Measure::of(aggregate, self.numeric(metric_phrase, schema))?;

        let group = quote_ident(&group.name);
        Some(format!(
            "SELECT {}, {} FROM {}{} GROUP BY {}",
            group,
            measure.select(),
            table,
            where_clause(conditions),
            group
        ))
    }

    fn top_n(&self, text: &str, schema: &Schema, table: &str, conditions: &[String]) -> Option<String> {
        let caps = TOP_N.captures(text)?;
        let order = if &caps["dir"] == "bottom" { "ASC" } else { "DESC" };
        let n = caps
            .name("n")
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_TOP_N);
        let metric_phrase = &caps["metric"];
        let aggregate = detect_aggregate(metric_phrase).unwrap_or(Aggregate::Sum);
        let metric = self.numeric(metric_phrase, schema);

        match self.dimension(&caps["entity"], schema) {
            Some(entity) => {
                let measure = Measure::of(aggregate, metric)?;
                let entity = quote_ident(&entity.name);
                Some(format!(
                    "SELECT {}, {} FROM {}{} GROUP BY {} ORDER BY {} {} LIMIT {}",
                    entity,
                    measure.select(),
                    table,
                    where_clause(conditions),
                    entity,
                    quote_ident(&measure.alias),
                    order,
                    n
                ))
            }
            // Entity is not a column: rank whole rows by the metric.
            None => {
                let metric = metric?;
                Some(format!(
                    "SELECT * FROM {}{} ORDER BY {} {} LIMIT {}",
                    table,
                    where_clause(conditions),
                    quote_ident(&metric.name),
                    order,
                    n
                ))
            }
        }
    }

    fn trend(&self, text: &str, schema: &Schema, table: &str, conditions: &[String]) -> Option<String> {
        // "daily_rate" must not read as a daily grain.
        let masked = self.mask_columns(text, schema);
        let grain = TREND_WORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| contains_phrase(&masked, w)))
            .map(|(grain, _)| *grain)?;

        let date = self
            .matcher
            .resolve_typed(text, schema, &[ColumnType::Datetime])
            .map(|m| m.column)
            .or_else(|| schema.columns_of(ColumnType::Datetime).next())?;

        let measure = detect_aggregate(&masked)
            .and_then(|aggregate| Measure::of(aggregate, self.numeric(text, schema)))
            .unwrap_or_else(Measure::count_star);

        let date = quote_ident(&date.name);
        let mut all_conditions = vec![format!("{} IS NOT NULL", date)];
        all_conditions.extend(conditions.iter().cloned());
        Some(format!(
            "SELECT strftime('{}', {}) AS \"period\", {} FROM {}{} GROUP BY \"period\" ORDER BY \"period\"",
            grain.format(),
            date,
            measure.select(),
            table,
            where_clause(&all_conditions)
        ))
    }

    fn scalar_aggregate(&self, text: &str, schema: &Schema, table: &str, conditions: &[String]) -> Option<String> {
        let aggregate = detect_aggregate(text)?;
        let measure = Measure::of(aggregate, self.numeric(text, schema))?;
        Some(format!(
            "SELECT {} FROM {}{}",
            measure.select(),
            table,
            where_clause(conditions)
        ))
    }

    fn parse_filter(&self, question: &str, schema: &Schema) -> Option<Filter> {
        let caps = FILTER.captures(question)?;
        let start = caps.get(0)?.start();
        let column = self.matcher.resolve(&caps["column"], schema.columns())?.column;
        let value = caps["value"].trim().trim_matches(|c| c == '\'' || c == '"').trim();
        if value.is_empty() {
            return None;
        }

        let op = comparison(&caps["op"]);
        let lhs = quote_ident(&column.name);
        let clause = match column.column_type {
            ColumnType::Numeric => format!("{} {} {}", lhs, op, parse_number(value)?),
            ColumnType::Datetime => {
                let (dt, _) = parse_datetime(value)?;
                let has_time = column.stats.dates.as_ref().map_or(false, |d| d.has_time);
                format!("{} {} {}", lhs, op, quote_literal(&format_datetime(dt, has_time)))
            }
            ColumnType::Categorical | ColumnType::Text => {
                format!("{} {} {} COLLATE NOCASE", lhs, op, quote_literal(value))
            }
        };
        Some(Filter { clause, start })
    }

    fn mask_columns(&self, text: &str, schema: &Schema) -> String {
        let mut names: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| self.matcher.normalize(&c.name))
            .filter(|n| !n.is_empty())
            .collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut padded = format!(" {} ", text);
        for name in names {
            let needle = format!(" {} ", name);
            while padded.contains(&needle) {
                padded = padded.replace(&needle, " ");
            }
        }
        padded.trim().to_string()
    }
}

#[async_trait]
impl SqlGenerator for RuleBasedGenerator {
    fn origin(&self) -> SqlOrigin {
        SqlOrigin::RuleBased
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<SqlCandidate, GenerationFailure> {
        Ok(self.build(request.question, request.schema))
    }
}

fn detect_aggregate(text: &str) -> Option<Aggregate> {
    AGGREGATE_WORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| contains_phrase(text, w)))
        .map(|(aggregate, _)| *aggregate)
}

fn comparison(op: &str) -> &'static str {
    match op.to_lowercase().as_str() {
        "is not equal to" | "is not" | "!=" | "<>" => "!=",
        "is greater than or equal to" | "greater than or equal to" | "is at least" | "at least" | ">=" => ">=",
        "is less than or equal to" | "less than or equal to" | "is at most" | "at most" | "<=" => "<=",
        "is greater than" | "is more than" | "is above" | "greater than" | "more than" | "above" | ">" => ">",
        "is less than" | "is below" | "less than" | "below" | "<" => "<",
        _ => "=",
    }
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    format!(" {} ", text).contains(&format!(" {} ", phrase))
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RawTable;
    use crate::schema::SchemaInference;

    fn schema() -> Schema {
        let rows = [
            ["Sales", "1102", "2021-01-04", "Manager", "Ann"],
            ["Research", "279", "2021-01-20", "Scientist", "Bo"],
            ["Sales", "1373", "2021-02-11", "Manager", "Cy"],
            ["Research", "392", "2021-02-28", "Scientist", "Di"],
            ["Sales", "591", "2021-03-15", "Manager", "Ed"],
            ["HR", "1005", "2021-03-30", "Manager", "O'Brien"],
        ];
        let raw = RawTable::new(
            ["department", "daily_rate", "hired", "job_role", "name"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        );
        SchemaInference::default().infer("data", &raw).unwrap()
    }

    fn build(question: &str) -> SqlCandidate {
        RuleBasedGenerator::default().build(question, &schema())
    }

    #[test]
    fn test_group_aggregate() {
        let candidate = build("average daily rate by department");
        assert_eq!(
            candidate.sql,
            r#"SELECT "department", AVG("daily_rate") AS "avg_daily_rate" FROM "data" GROUP BY "department""#
        );
        assert_eq!(candidate.template.as_deref(), Some("group_aggregate"));
        assert_eq!(candidate.origin, SqlOrigin::RuleBased);
        assert!(!candidate.is_low_confidence());
    }

    #[test]
    fn test_group_count_without_metric() {
        let candidate = build("How many employees per job role?");
        assert_eq!(
            candidate.sql,
            r#"SELECT "job_role", COUNT(*) AS "count" FROM "data" GROUP BY "job_role""#
        );
    }

    #[test]
    fn test_top_n_grouped() {
        let candidate = build("top 3 departments by total daily rate");
        assert_eq!(
            candidate.sql,
            r#"SELECT "department", SUM("daily_rate") AS "sum_daily_rate" FROM "data" GROUP BY "department" ORDER BY "sum_daily_rate" DESC LIMIT 3"#
        );
        assert_eq!(candidate.template.as_deref(), Some("top_n"));
    }

    #[test]
    fn test_bottom_n_rows() {
        let candidate = build("bottom 2 employees by daily rate");
        assert_eq!(
            candidate.sql,
            r#"SELECT * FROM "data" ORDER BY "daily_rate" ASC LIMIT 2"#
        );
    }

    #[test]
    fn test_top_n_default_count() {
        let candidate = build("top departments by daily rate");
        assert!(candidate.sql.ends_with("DESC LIMIT 5"));
    }

    #[test]
    fn test_trend_monthly_count() {
        let candidate = build("monthly count of hires");
        assert_eq!(
            candidate.sql,
            r#"SELECT strftime('%Y-%m', "hired") AS "period", COUNT(*) AS "count" FROM "data" WHERE "hired" IS NOT NULL GROUP BY "period" ORDER BY "period""#
        );
        assert_eq!(candidate.template.as_deref(), Some("trend"));
    }

    #[test]
    fn test_trend_ignores_grain_words_inside_column_names() {
        let candidate = build("average daily rate over time");
        assert!(candidate.sql.contains("strftime('%Y-%m', \"hired\")"));
        assert!(candidate.sql.contains(r#"AVG("daily_rate") AS "avg_daily_rate""#));

        let candidate = build("average daily rate by month");
        assert_eq!(candidate.template.as_deref(), Some("trend"));

        let candidate = build("weekly trend of hires");
        assert!(candidate.sql.contains("'%Y-W%W'"));
    }

    #[test]
    fn test_scalar_aggregate() {
        let candidate = build("total daily rate");
        assert_eq!(
            candidate.sql,
            r#"SELECT SUM("daily_rate") AS "sum_daily_rate" FROM "data""#
        );
        assert_eq!(
            build("how many rows are there").sql,
            r#"SELECT COUNT(*) AS "count" FROM "data""#
        );
    }

    #[test]
    fn test_unresolved_grouping_is_low_confidence() {
        let raw = RawTable::new(
            vec!["department".to_string(), "daily_rate".to_string(), "job_level".to_string()],
            vec![
                vec!["Sales".to_string(), "1102".to_string(), "2".to_string()],
                vec!["Research".to_string(), "279".to_string(), "1".to_string()],
                vec!["Sales".to_string(), "1373".to_string(), "3".to_string()],
                vec!["Research".to_string(), "392".to_string(), "2".to_string()],
            ],
        );
        let schema = SchemaInference::default().infer("data", &raw).unwrap();
        let generator = RuleBasedGenerator::default();

        let candidate = generator.build("average daily rate by job level", &schema);
        assert_eq!(candidate.template.as_deref(), Some("scalar_aggregate"));
        assert_eq!(
            candidate.sql,
            r#"SELECT AVG("daily_rate") AS "avg_daily_rate" FROM "data""#
        );
        assert!(candidate.is_low_confidence());

        assert!(!generator.build("total daily rate", &schema).is_low_confidence());
    }

    #[test]
    fn test_filter_template() {
        let candidate = build("show employees where department is Sales");
        assert_eq!(
            candidate.sql,
            r#"SELECT * FROM "data" WHERE "department" = 'Sales' COLLATE NOCASE"#
        );
        assert_eq!(candidate.template.as_deref(), Some("filter"));

        assert_eq!(
            build("rows with daily rate above 1000").sql,
            r#"SELECT * FROM "data" WHERE "daily_rate" > 1000"#
        );
        assert_eq!(
            build("employees whose name is O'Brien").sql,
            r#"SELECT * FROM "data" WHERE "name" = 'O''Brien' COLLATE NOCASE"#
        );
    }

    #[test]
    fn test_filter_applies_to_aggregates() {
        let candidate = build("average daily rate by job role where department is not HR");
        assert_eq!(
            candidate.sql,
            r#"SELECT "job_role", AVG("daily_rate") AS "avg_daily_rate" FROM "data" WHERE "department" != 'HR' COLLATE NOCASE GROUP BY "job_role""#
        );

        let candidate = build("monthly count of hires where department is Sales");
        assert!(candidate
            .sql
            .contains(r#"WHERE "hired" IS NOT NULL AND "department" = 'Sales' COLLATE NOCASE"#));
    }

    #[test]
    fn test_preview_and_fallback() {
        let candidate = build("show me some rows");
        assert_eq!(candidate.sql, r#"SELECT * FROM "data" LIMIT 50"#);
        assert_eq!(candidate.template.as_deref(), Some("preview"));

        let candidate = build("zxcv qwerty");
        assert_eq!(candidate.sql, r#"SELECT * FROM "data""#);
        assert_eq!(candidate.template.as_deref(), Some("fallback"));
        assert!(candidate.is_low_confidence());
    }

    #[test]
    fn test_deterministic() {
        let generator = RuleBasedGenerator::default();
        let schema = schema();
        let first = generator.build("top 3 departments by total daily rate", &schema);
        let second = generator.build("top 3 departments by total daily rate", &schema);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_generate_never_fails() {
        let generator = RuleBasedGenerator::default();
        let schema = schema();
        let candidate = generator
            .generate(&GenerationRequest::new("", &schema))
            .await
            .unwrap();
        assert_eq!(candidate.template.as_deref(), Some("fallback"));
    }
}
