//! Query text and resource naming helpers
//!
//! Both platforms are queried with the same clause shape:
//! `SELECT <field> FROM <resource> WHERE <field> = '<value>' AND ...`.
//! Values are escaped here; no parameter binding exists on either side.

use std::fmt;

/// Suffix turning a bare IPv4 address into a host route.
pub const HOST_ROUTE_SUFFIX: &str = "/32";

/// Escape a string value before embedding it in query text.
///
/// Backslashes, both quote styles and NUL bytes are prefixed with a backslash.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '\'' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape`], used by transports that turn filters back into
/// structured predicates.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('\0'),
            Some(next) => out.push(next),
            None => out.push('\\'),
        }
    }
    out
}

/// Normalize a caller-supplied IP for matching against stored criteria.
pub fn host_route(ip: &str) -> String {
    format!("{}{}", escape(ip), HOST_ROUTE_SUFFIX)
}

/// `customers/{account_id}`
pub fn customer_resource(account_id: &str) -> String {
    format!("customers/{}", account_id)
}

/// `customers/{account_id}/campaigns/{campaign_id}`
pub fn campaign_resource(account_id: &str, campaign_id: &str) -> String {
    format!("customers/{}/campaigns/{}", account_id, campaign_id)
}

/// A single `SELECT .. FROM .. WHERE ..` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    field: String,
    resource: String,
    filters: Vec<(String, String)>,
}

impl Query {
    /// Start a query selecting `field` from `resource`
    pub fn select(field: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            resource: resource.into(),
            filters: Vec::new(),
        }
    }

    /// Add an equality filter; the value is escaped on render.
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.filters.push((field.into(), escape(value.as_ref())));
        self
    }

    /// Add an equality filter whose value is already escaped.
    pub fn filter_eq_escaped(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", self.field, self.resource)?;
        for (i, (field, value)) in self.filters.iter().enumerate() {
            let keyword = if i == 0 { "WHERE" } else { "AND" };
            write!(f, " {} {} = '{}'", keyword, field, value)?;
        }
        Ok(())
    }
}

/// Split the WHERE clause of a rendered query back into `(field, value)`
/// pairs with values unescaped.
///
/// Only the equality shape produced by [`Query`] is understood; anything else
/// yields `None`.
pub fn parse_filters(query: &str) -> Option<Vec<(String, String)>> {
    let Some(idx) = query.find(" WHERE ") else {
        return Some(Vec::new());
    };

    let mut filters = Vec::new();
    let mut rest = &query[idx + " WHERE ".len()..];
    loop {
        let (field, after_field) = rest.split_once(" = '")?;
        let end = closing_quote(after_field)?;
        filters.push((field.trim().to_string(), unescape(&after_field[..end])));

        rest = &after_field[end + 1..];
        match rest.strip_prefix(" AND ") {
            Some(next) => rest = next,
            None if rest.trim().is_empty() => break,
            None => return None,
        }
    }
    Some(filters)
}

fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '\'' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}
