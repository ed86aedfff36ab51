// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! SQL checks performed before any resource is fetched
//!
//! - **Read-only guard**: anything other than queries, SHOW and EXPLAIN is
//!   rejected before the cluster is touched.
//! - **Table pre-scan**: the tables a query reads are found by tokenizing the
//!   SQL, so only those resources are fetched.
//!
//! The query text itself is never rewritten.

use datafusion::error::DataFusionError;
use datafusion::sql::sqlparser::ast::Statement;
use datafusion::sql::sqlparser::dialect::GenericDialect;
use datafusion::sql::sqlparser::keywords::{Keyword, RESERVED_FOR_TABLE_ALIAS};
use datafusion::sql::sqlparser::parser::Parser;
use datafusion::sql::sqlparser::tokenizer::{Token, Tokenizer, Word};

use crate::error::{EngineError, SessionError};

/// Validate that the SQL statement is read-only
pub fn validate_read_only(sql: &str) -> Result<(), SessionError> {
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, sql).map_err(|e| {
        SessionError::Query(EngineError::DataFusion(DataFusionError::Plan(format!(
            "SQL parse error: {}",
            e
        ))))
    })?;

    let rejected = |what: &str| Err(SessionError::ReadOnly(format!("{} is not supported", what)));

    for stmt in statements {
        match stmt {
            // Allowed read-only statements
            Statement::Query(_) => {}
            Statement::ShowTables { .. } => {}
            Statement::ShowDatabases { .. } => {}
            Statement::ShowColumns { .. } => {}
            Statement::ShowVariable { .. } => {}
            Statement::ShowVariables { .. } => {}
            Statement::ShowStatus { .. } => {}
            Statement::ShowCreate { .. } => {}
            Statement::Explain { .. } => {}
            Statement::ExplainTable { .. } => {}
            Statement::Set(_) => {}

            Statement::Insert(_) => return rejected("INSERT"),
            Statement::Update { .. } => return rejected("UPDATE"),
            Statement::Delete(_) => return rejected("DELETE"),
            Statement::CreateTable(_) => return rejected("CREATE TABLE"),
            Statement::CreateView { .. } => return rejected("CREATE VIEW"),
            Statement::CreateIndex(_) => return rejected("CREATE INDEX"),
            Statement::CreateSchema { .. } => return rejected("CREATE SCHEMA"),
            Statement::CreateDatabase { .. } => return rejected("CREATE DATABASE"),
            Statement::Drop { .. } => return rejected("DROP"),
            Statement::AlterTable { .. } => return rejected("ALTER TABLE"),
            Statement::AlterView { .. } => return rejected("ALTER VIEW"),
            Statement::AlterIndex { .. } => return rejected("ALTER INDEX"),
            Statement::Truncate { .. } => return rejected("TRUNCATE"),
            Statement::Merge { .. } => return rejected("MERGE"),

            _ => return rejected("this statement type"),
        }
    }
    Ok(())
}

/// Names of the tables a query reads, lowercased, in order of first mention.
///
/// Identifiers following `FROM` (including comma-separated lists) and `JOIN`
/// are collected. Names qualified with anything other than `public` or
/// `kubetab.public` are skipped, as are names defined by a `WITH` clause. A `FROM` nested inside
/// a function call such as `EXTRACT(year FROM ts)` does not count.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let dialect = GenericDialect {};
    let tokens: Vec<Token> = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect(),
        Err(_) => return Vec::new(),
    };

    let ctes = cte_names(&tokens);
    let mut tables: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !ctes.contains(&name) && !tables.contains(&name) {
            tables.push(name);
        }
    };

    // Whether each open parenthesis starts a subquery
    let mut query_scopes = vec![true];
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            Token::LParen => {
                let subquery = matches!(
                    tokens.get(i + 1),
                    Some(Token::Word(w)) if matches!(w.keyword, Keyword::SELECT | Keyword::WITH)
                );
                query_scopes.push(subquery);
                i += 1;
            }
            Token::RParen => {
                if query_scopes.len() > 1 {
                    query_scopes.pop();
                }
                i += 1;
            }
            Token::Word(w)
                if matches!(w.keyword, Keyword::FROM | Keyword::JOIN)
                    && query_scopes.last().copied().unwrap_or(true) =>
            {
                let list = w.keyword == Keyword::FROM;
                i += 1;
                loop {
                    let Some((name, next)) = table_name_at(&tokens, i) else {
                        break;
                    };
                    if let Some(name) = name {
                        push(name);
                    }
                    i = skip_alias(&tokens, next);
                    if list && matches!(tokens.get(i), Some(Token::Comma)) {
                        i += 1;
                        continue;
                    }
                    break;
                }
            }
            _ => i += 1,
        }
    }

    tables
}

/// Read a possibly qualified name at `i`. Returns the table name (None when it
/// belongs to another schema or is a table function) and the next index.
fn table_name_at(tokens: &[Token], mut i: usize) -> Option<(Option<String>, usize)> {
    let mut parts: Vec<String> = Vec::new();
    let Some(Token::Word(first)) = tokens.get(i) else {
        return None;
    };
    parts.push(identifier(first));
    i += 1;

    while let (Some(Token::Period), Some(Token::Word(w))) = (tokens.get(i), tokens.get(i + 1)) {
        parts.push(identifier(w));
        i += 2;
    }

    if matches!(tokens.get(i), Some(Token::LParen)) {
        return Some((None, i));
    }

    let name = parts.pop()?;
    let local = match parts.as_slice() {
        [] => true,
        [schema] => schema == "public",
        [catalog, schema] => catalog == "kubetab" && schema == "public",
        _ => false,
    };
    Some((local.then_some(name), i))
}

/// Skip `AS alias` or a bare alias. Any word that cannot start the next
/// clause is an alias, including non-reserved keywords such as `status`.
fn skip_alias(tokens: &[Token], i: usize) -> usize {
    match tokens.get(i) {
        Some(Token::Word(w)) if w.keyword == Keyword::AS => i + 2,
        Some(Token::Word(w))
            if w.quote_style.is_some() || !RESERVED_FOR_TABLE_ALIAS.contains(&w.keyword) =>
        {
            i + 1
        }
        _ => i,
    }
}

/// Names declared as `name AS (`
fn cte_names(tokens: &[Token]) -> Vec<String> {
    tokens
        .windows(3)
        .filter_map(|win| match win {
            [Token::Word(name), Token::Word(kw), Token::LParen] if kw.keyword == Keyword::AS => {
                Some(identifier(name))
            }
            _ => None,
        })
        .collect()
}

fn identifier(word: &Word) -> String {
    word.value.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_allows_select() {
        assert!(validate_read_only("SELECT * FROM pods").is_ok());
        assert!(
            validate_read_only("SELECT name, namespace FROM pods WHERE namespace = 'default'")
                .is_ok()
        );
    }

    #[test]
    fn test_read_only_allows_select_with_cte() {
        assert!(validate_read_only("WITH cte AS (SELECT 1) SELECT * FROM cte").is_ok());
    }

    #[test]
    fn test_read_only_allows_show_tables() {
        assert!(validate_read_only("SHOW TABLES").is_ok());
    }

    #[test]
    fn test_read_only_allows_explain() {
        assert!(validate_read_only("EXPLAIN SELECT * FROM pods").is_ok());
    }

    #[test]
    fn test_read_only_blocks_create_table() {
        let err = validate_read_only("CREATE TABLE test (id INT)").unwrap_err();
        assert!(matches!(err, SessionError::ReadOnly(_)));
        assert_eq!(err.to_string(), "kubetab is read-only: CREATE TABLE is not supported");
    }

    #[test]
    fn test_read_only_blocks_dml() {
        for (sql, word) in [
            ("INSERT INTO test VALUES (1)", "INSERT"),
            ("UPDATE test SET id = 1", "UPDATE"),
            ("DELETE FROM test", "DELETE"),
            ("DROP TABLE test", "DROP"),
            ("ALTER TABLE test ADD COLUMN name VARCHAR", "ALTER"),
            ("TRUNCATE TABLE test", "TRUNCATE"),
        ] {
            let err = validate_read_only(sql).unwrap_err();
            assert!(err.to_string().contains(word), "{}: {}", sql, err);
        }
    }

    #[test]
    fn test_parse_error_is_query_error() {
        let err = validate_read_only("SELEC * FROM pods").unwrap_err();
        assert!(matches!(err, SessionError::Query(_)));
    }

    #[test]
    fn test_simple_from() {
        assert_eq!(referenced_tables("SELECT * FROM pods"), vec!["pods"]);
        assert_eq!(referenced_tables("select name from PODS where x = 1"), vec!["pods"]);
    }

    #[test]
    fn test_joins_and_aliases() {
        let sql = "SELECT p.name, n.name FROM pods p JOIN nodes AS n ON p.node = n.name \
                   LEFT JOIN node_taints t ON t.node = n.name";
        assert_eq!(referenced_tables(sql), vec!["pods", "nodes", "node_taints"]);
    }

    #[test]
    fn test_comma_list() {
        let sql = "SELECT * FROM pods p, nodes n WHERE p.node = n.name";
        assert_eq!(referenced_tables(sql), vec!["pods", "nodes"]);
    }

    #[test]
    fn test_keyword_aliases() {
        let sql = "SELECT * FROM pods status, nodes name WHERE status.node = name.name";
        assert_eq!(referenced_tables(sql), vec!["pods", "nodes"]);

        let sql = "SELECT * FROM jobs data, deployments \"type\" JOIN services type ON true";
        assert_eq!(referenced_tables(sql), vec!["jobs", "deployments", "services"]);

        let sql = "SELECT * FROM pods WHERE name = 'x' ORDER BY name LIMIT 1";
        assert_eq!(referenced_tables(sql), vec!["pods"]);
    }

    #[test]
    fn test_qualified_names() {
        assert_eq!(referenced_tables("SELECT * FROM public.pods"), vec!["pods"]);
        assert_eq!(referenced_tables("SELECT * FROM kubetab.public.jobs"), vec!["jobs"]);
        assert!(referenced_tables("SELECT * FROM other.public.jobs").is_empty());
        assert!(referenced_tables("SELECT * FROM information_schema.tables").is_empty());
    }

    #[test]
    fn test_ctes_excluded() {
        let sql = "WITH running AS (SELECT * FROM pods WHERE phase = 'Running') \
                   SELECT * FROM running JOIN nodes ON running.node = nodes.name";
        assert_eq!(referenced_tables(sql), vec!["pods", "nodes"]);
    }

    #[test]
    fn test_subquery() {
        let sql = "SELECT * FROM (SELECT name FROM deployments) d \
                   WHERE d.name IN (SELECT name FROM jobs)";
        assert_eq!(referenced_tables(sql), vec!["deployments", "jobs"]);
    }

    #[test]
    fn test_from_inside_function_ignored() {
        let sql = "SELECT EXTRACT(year FROM created), TRIM(BOTH ' ' FROM name) FROM pods";
        assert_eq!(referenced_tables(sql), vec!["pods"]);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let sql = "SELECT * FROM pods a JOIN pods b ON a.node = b.node";
        assert_eq!(referenced_tables(sql), vec!["pods"]);
    }

    #[test]
    fn test_no_tables() {
        assert!(referenced_tables("SELECT 1").is_empty());
        assert!(referenced_tables("SHOW TABLES").is_empty());
    }
}
