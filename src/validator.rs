//! SQL Validator / Sanitizer
//!
//! Every candidate, whatever produced it, passes through here before it may
//! touch data. Accepted: exactly one read-only query over the dataset table
//! whose identifiers all resolve against the schema. A missing or oversized
//! `LIMIT` is rewritten to the row cap instead of rejected.

use crate::candidate::{Correction, SqlCandidate, ValidationStatus};
use crate::error::ValidationRejection;
use crate::schema::Schema;
use serde::Serialize;
use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, Ident, Query, SelectItem, SetExpr, Statement, TableFactor,
    Value,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// A candidate the validator accepted. Only this module can build one, and the
/// executor accepts nothing else.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedQuery {
    candidate: SqlCandidate,
    row_cap: u64,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.candidate.sql
    }

    pub fn candidate(&self) -> &SqlCandidate {
        &self.candidate
    }

    pub fn row_cap(&self) -> u64 {
        self.row_cap
    }

    pub fn into_candidate(self) -> SqlCandidate {
        self.candidate
    }

    #[cfg(test)]
    pub(crate) fn unchecked(sql: &str, row_cap: u64) -> Self {
        let mut candidate = SqlCandidate::llm(sql);
        candidate.status = ValidationStatus::Valid;
        Self { candidate, row_cap }
    }
}

/// Outcome of a failed `check_identifiers`.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifierIssue {
    /// The text is not SQL the parser accepts.
    Unparseable(String),
    Rejected(ValidationRejection),
}

#[derive(Debug, Clone)]
pub struct RejectedCandidate {
    pub candidate: SqlCandidate,
    pub reason: ValidationRejection,
}

#[derive(Debug, Clone)]
pub struct SqlValidator {
    table: String,
    row_cap: u64,
}

impl SqlValidator {
    pub fn new(table: impl Into<String>, row_cap: u64) -> Self {
        Self {
            table: table.into(),
            row_cap,
        }
    }

    pub fn row_cap(&self) -> u64 {
        self.row_cap
    }

    pub fn validate(
        &self,
        mut candidate: SqlCandidate,
        schema: &Schema,
    ) -> Result<ValidatedQuery, RejectedCandidate> {
        match self.inspect(&candidate.sql, schema) {
            Ok((sql, corrections)) => {
                debug!("Validated {} candidate: {}", candidate.origin, sql);
                candidate.sql = sql;
                candidate.corrections.extend(corrections);
                candidate.status = ValidationStatus::Valid;
                Ok(ValidatedQuery {
                    candidate,
                    row_cap: self.row_cap,
                })
            }
            Err(reason) => {
                warn!("Rejected {} candidate ({}): {}", candidate.origin, reason.code(), candidate.sql);
                candidate.status = ValidationStatus::Rejected(reason.clone());
                Err(RejectedCandidate { candidate, reason })
            }
        }
    }

    /// Identifier check alone, for generators that want to vet their own
    /// output. Structural problems are left to `validate`.
    pub fn check_identifiers(&self, sql: &str, schema: &Schema) -> Result<(), IdentifierIssue> {
        let statements =
            Parser::parse_sql(&SQLiteDialect {}, sql).map_err(|e| IdentifierIssue::Unparseable(e.to_string()))?;
        for statement in &statements {
            if let Statement::Query(query) = statement {
                let scope = Scope::collect(query, schema, &self.table);
                scope.check(statement).map_err(IdentifierIssue::Rejected)?;
            }
        }
        Ok(())
    }

    fn inspect(&self, sql: &str, schema: &Schema) -> Result<(String, Vec<Correction>), ValidationRejection> {
        let mut statement = parse_single(sql)?;

        let query = match &statement {
            Statement::Query(query) => query,
            other => {
                return Err(ValidationRejection::DisallowedStatement(format!(
                    "only SELECT is allowed, found {}",
                    statement_keyword(other)
                )))
            }
        };
        check_body(&query.body)?;
        Scope::collect(query, schema, &self.table).check(&statement)?;

        let corrections = match &mut statement {
            Statement::Query(query) => self.enforce_row_cap(query),
            _ => Vec::new(),
        };
        Ok((statement.to_string(), corrections))
    }

    fn enforce_row_cap(&self, query: &mut Query) -> Vec<Correction> {
        let cap = self.row_cap;
        let cap_expr = Expr::Value(Value::Number(cap.to_string(), false));
        match query.limit.clone() {
            None => {
                query.limit = Some(cap_expr);
                vec![Correction::RowCapInjected { cap }]
            }
            Some(Expr::Value(Value::Number(n, _))) if n.parse::<u64>().map_or(false, |n| n <= cap) => {
                Vec::new()
            }
            Some(other) => {
                query.limit = Some(cap_expr);
                vec![Correction::LimitClamped {
                    requested: other.to_string(),
                    cap,
                }]
            }
        }
    }
}

fn parse_single(sql: &str) -> Result<Statement, ValidationRejection> {
    let dialect = SQLiteDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| ValidationRejection::DisallowedStatement(format!("unparseable SQL: {}", e)))?;

    // Comments are whitespace tokens here, so a `;` hidden in one never counts.
    match count_statements(&tokens) {
        0 => {
            return Err(ValidationRejection::DisallowedStatement(
                "empty statement".to_string(),
            ))
        }
        1 => {}
        n => return Err(ValidationRejection::MultiStatement(n)),
    }

    let mut statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| ValidationRejection::DisallowedStatement(format!("unparseable SQL: {}", e)))?;
    if statements.len() != 1 {
        return Err(ValidationRejection::MultiStatement(statements.len()));
    }
    Ok(statements.remove(0))
}

fn count_statements(tokens: &[Token]) -> usize {
    let mut count = 0;
    let mut has_content = false;
    for token in tokens {
        match token {
            Token::SemiColon => {
                if has_content {
                    count += 1;
                }
                has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_content = true,
        }
    }
    if has_content {
        count += 1;
    }
    count
}

fn check_body(body: &SetExpr) -> Result<(), ValidationRejection> {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                return Err(ValidationRejection::DisallowedStatement(
                    "SELECT INTO writes data".to_string(),
                ));
            }
            Ok(())
        }
        SetExpr::Query(query) => check_body(&query.body),
        SetExpr::SetOperation { op, .. } => Err(ValidationRejection::DisallowedStatement(format!(
            "set operation {} is not allowed",
            op
        ))),
        _ => Err(ValidationRejection::DisallowedStatement(
            "query body must be a SELECT".to_string(),
        )),
    }
}

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .map(str::to_uppercase)
        .unwrap_or_else(|| "unknown statement".to_string())
}

/// Names visible to a query: the dataset table and CTEs as relations, table
/// aliases as qualifiers, schema columns plus projection/CTE aliases as columns.
struct Scope {
    tables: HashSet<String>,
    qualifiers: HashSet<String>,
    names: HashSet<String>,
}

impl Scope {
    fn collect(query: &Query, schema: &Schema, table: &str) -> Self {
        let mut scope = Scope {
            tables: HashSet::new(),
            qualifiers: HashSet::new(),
            names: schema.columns().iter().map(|c| c.name.to_lowercase()).collect(),
        };
        scope.tables.insert(table.to_lowercase());
        scope.collect_query(query);
        scope.qualifiers.extend(scope.tables.iter().cloned());
        scope
    }

    fn collect_query(&mut self, query: &Query) {
        if let Some(ref with) = query.with {
            for cte in &with.cte_tables {
                self.tables.insert(lower(&cte.alias.name));
                self.names.extend(cte.alias.columns.iter().map(lower));
                self.collect_query(&cte.query);
            }
        }
        self.collect_set_expr(&query.body);
    }

    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.names.insert(lower(alias));
                    }
                }
                for from in &select.from {
                    self.collect_factor(&from.relation);
                    for join in &from.joins {
                        self.collect_factor(&join.relation);
                    }
                }
            }
            SetExpr::Query(query) => self.collect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            _ => {}
        }
    }

    fn collect_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { alias, .. } => {
                if let Some(alias) = alias {
                    self.qualifiers.insert(lower(&alias.name));
                }
            }
            TableFactor::Derived { subquery, alias, .. } => {
                self.collect_query(subquery);
                if let Some(alias) = alias {
                    self.qualifiers.insert(lower(&alias.name));
                    self.names.extend(alias.columns.iter().map(lower));
                }
            }
            _ => {}
        }
    }

    fn check(&self, statement: &Statement) -> Result<(), ValidationRejection> {
        let relations = visit_relations(statement, |relation| {
            let name = relation.0.last().map(|i| i.value.clone()).unwrap_or_default();
            if self.tables.contains(&name.to_lowercase()) {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(ValidationRejection::UnknownTable(name))
            }
        });
        if let ControlFlow::Break(rejection) = relations {
            return Err(rejection);
        }

        let expressions = visit_expressions(statement, |expr| match expr {
            Expr::Identifier(ident) => self.check_name(ident),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let qualifier = &parts[parts.len() - 2];
                if !self.qualifiers.contains(&lower(qualifier)) {
                    return ControlFlow::Break(ValidationRejection::UnknownTable(qualifier.value.clone()));
                }
                self.check_name(&parts[parts.len() - 1])
            }
            _ => ControlFlow::Continue(()),
        });
        if let ControlFlow::Break(rejection) = expressions {
            return Err(rejection);
        }
        Ok(())
    }

    fn check_name(&self, ident: &Ident) -> ControlFlow<ValidationRejection> {
        if self.names.contains(&lower(ident)) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(ValidationRejection::UnknownColumn(ident.value.clone()))
        }
    }
}

fn lower(ident: &Ident) -> String {
    ident.value.to_lowercase()
}
