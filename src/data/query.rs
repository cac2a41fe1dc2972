//! Parameterised construction of multi-term tag searches.
//!
//! Every search term becomes one `EXISTS` predicate, so terms are ANDed with each
//! other while the tags matching a single term are ORed. User input only ever
//! reaches SQLite as bound parameters.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::error::AppError;
use crate::models::search::TypeRestriction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagQuery {
    prefix: String,
    terms: Vec<String>,
    restriction: TypeRestriction,
}

#[derive(Debug)]
struct Filter {
    sql: String,
    params: Vec<Value>,
}

impl TagQuery {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            terms: Vec::new(),
            restriction: TypeRestriction::Any,
        }
    }

    pub fn terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.terms = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        self
    }

    pub fn restrict(mut self, restriction: TypeRestriction) -> Self {
        self.restriction = restriction;
        self
    }

    fn filter(&self) -> Filter {
        let mut sql = String::from(" FROM images i WHERE substr(i.path, 1, length(?)) = ?");
        let mut params = vec![
            Value::Text(self.prefix.clone()),
            Value::Text(self.prefix.clone()),
        ];

        let tag_types = self.restriction.tag_types();
        let type_clause = tag_types.as_ref().map(|types| {
            let placeholders = vec!["?"; types.len()].join(", ");
            format!(" AND t.tag_type IN ({placeholders})")
        });

        let mut push_exists = |like: Option<String>, sql: &mut String| {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM image_tags it JOIN tags t ON t.id = it.tag_id \
                 WHERE it.image_id = i.id",
            );
            if let Some(pattern) = like {
                sql.push_str(" AND t.tag LIKE ? ESCAPE '\\'");
                params.push(Value::Text(pattern));
            }
            if let (Some(clause), Some(types)) = (&type_clause, &tag_types) {
                sql.push_str(clause);
                params.extend(types.iter().cloned().map(Value::Text));
            }
            sql.push(')');
        };

        if self.terms.is_empty() {
            if type_clause.is_some() {
                push_exists(None, &mut sql);
            }
        } else {
            for term in &self.terms {
                push_exists(Some(like_pattern(term)), &mut sql);
            }
        }

        Filter { sql, params }
    }

    /// One page of matching paths, ordered by path.
    pub fn paths(
        &self,
        conn: &Connection,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>, AppError> {
        let Filter { sql, mut params } = self.filter();
        let offset = page.saturating_mul(page_size);
        params.push(Value::Integer(to_sql_int(page_size)));
        params.push(Value::Integer(to_sql_int(offset)));

        let sql = format!("SELECT i.path{sql} ORDER BY i.path LIMIT ? OFFSET ?");
        let mut stmt = conn.prepare(&sql)?;
        let paths = stmt
            .query_map(params_from_iter(params), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    /// Every matching path, ordered by path.
    pub fn all_paths(&self, conn: &Connection) -> Result<Vec<String>, AppError> {
        let Filter { sql, params } = self.filter();
        let sql = format!("SELECT i.path{sql} ORDER BY i.path");
        let mut stmt = conn.prepare(&sql)?;
        let paths = stmt
            .query_map(params_from_iter(params), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    pub fn count(&self, conn: &Connection) -> Result<usize, AppError> {
        let Filter { sql, params } = self.filter();
        let sql = format!("SELECT COUNT(*){sql}");
        let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

/// Substring pattern with LIKE wildcards in the term taken literally.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
