use std::collections::BTreeMap;

use crate::BatchError;

use super::SqlValue;

/// Builds the page queries of a keyset-paginated read.
///
/// The first page is ordered by the sort key and limited to the page size;
/// every following page only selects rows whose sort key is greater than the
/// last one returned, so the sort key must be unique.
///
/// # Examples
///
/// ```
/// use chunk_batch::item::rdbc::PagingQueryProvider;
///
/// let provider = PagingQueryProvider::new("select people_id, name", "from people", "people_id")
///     .where_clause("where pick = :pick");
///
/// assert_eq!(
///     provider.first_page_query(10),
///     "SELECT people_id, name FROM people WHERE (pick = :pick) ORDER BY people_id ASC LIMIT 10"
/// );
/// assert_eq!(
///     provider.remaining_pages_query(10),
///     "SELECT people_id, name FROM people WHERE (pick = :pick) AND people_id > :_sort_key ORDER BY people_id ASC LIMIT 10"
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PagingQueryProvider {
    select_clause: String,
    from_clause: String,
    where_clause: Option<String>,
    sort_key: String,
}

/// Name under which the last sort key value is bound.
pub const SORT_KEY_PARAMETER: &str = "_sort_key";

impl PagingQueryProvider {
    /// Clauses may start with their keyword (`select`, `from`, `where`) or not.
    pub fn new(select_clause: &str, from_clause: &str, sort_key: &str) -> Self {
        Self {
            select_clause: strip_keyword(select_clause, "select"),
            from_clause: strip_keyword(from_clause, "from"),
            where_clause: None,
            sort_key: sort_key.trim().to_string(),
        }
    }

    pub fn where_clause(mut self, where_clause: &str) -> Self {
        let where_clause = strip_keyword(where_clause, "where");
        self.where_clause = (!where_clause.is_empty()).then_some(where_clause);
        self
    }

    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    /// Label of the sort key column in result rows, `p.people_id` giving `people_id`.
    pub fn sort_key_column(&self) -> &str {
        self.sort_key
            .rsplit('.')
            .next()
            .unwrap_or(&self.sort_key)
    }

    pub fn first_page_query(&self, page_size: usize) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select_clause, self.from_clause);
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(&format!(" WHERE ({})", where_clause));
        }
        self.push_order_and_limit(sql, page_size)
    }

    pub fn remaining_pages_query(&self, page_size: usize) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select_clause, self.from_clause);
        match &self.where_clause {
            Some(where_clause) => sql.push_str(&format!(
                " WHERE ({}) AND {} > :{}",
                where_clause, self.sort_key, SORT_KEY_PARAMETER
            )),
            None => sql.push_str(&format!(" WHERE {} > :{}", self.sort_key, SORT_KEY_PARAMETER)),
        }
        self.push_order_and_limit(sql, page_size)
    }

    fn push_order_and_limit(&self, mut sql: String, page_size: usize) -> String {
        sql.push_str(&format!(" ORDER BY {} ASC LIMIT {}", self.sort_key, page_size));
        sql
    }
}

fn strip_keyword(clause: &str, keyword: &str) -> String {
    let clause = clause.trim();
    let starts_with_keyword = clause
        .get(..keyword.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
        && clause[keyword.len()..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace);

    if starts_with_keyword {
        clause[keyword.len()..].trim().to_string()
    } else {
        clause.to_string()
    }
}

/// Replaces `:name` placeholders with `?` and lists the names in binding order.
///
/// Quoted literals and `::` casts are left untouched.
pub fn parse_named_parameters(sql: &str) -> (String, Vec<String>) {
    let mut parsed = String::with_capacity(sql.len());
    let mut names = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            parsed.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                parsed.push(c);
            }
            ':' if chars.peek() == Some(&':') => {
                parsed.push_str("::");
                chars.next();
            }
            ':' if chars.peek().is_some_and(|next| next.is_alphabetic() || *next == '_') => {
                let mut name = String::new();
                while let Some(next) = chars.peek() {
                    if next.is_alphanumeric() || *next == '_' || *next == '.' {
                        name.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                names.push(name);
                parsed.push('?');
            }
            _ => parsed.push(c),
        }
    }

    (parsed, names)
}

/// Values of `names`, in order, taken from `parameters`.
pub fn resolve_parameters(
    names: &[String],
    parameters: &BTreeMap<String, SqlValue>,
) -> Result<Vec<SqlValue>, BatchError> {
    names
        .iter()
        .map(|name| {
            parameters.get(name).cloned().ok_or_else(|| {
                BatchError::Configuration(format!("no value for query parameter :{}", name))
            })
        })
        .collect()
}
