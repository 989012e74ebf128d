use hookstream_events::EventFilter;
use libsql::Value;

/// A `WHERE` clause with numbered parameters.
#[derive(Debug, Default)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<Value>,
}

impl WhereClause {
    fn push(&mut self, condition: &str, value: Value) {
        self.params.push(value);
        let placeholder = format!("?{}", self.params.len());

        self.add(&condition.replace('?', &placeholder));
    }

    fn add(&mut self, condition: &str) {
        self.sql
            .push_str(if self.sql.is_empty() { " WHERE " } else { " AND " });
        self.sql.push_str(condition);
    }

    /// Appends a parameter and returns its placeholder.
    pub fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }
}

/// Translates every criterion except paging.
pub fn where_clause(filter: &EventFilter) -> WhereClause {
    let mut clause = WhereClause::default();

    if let Some(provider) = filter.provider {
        clause.push("provider = ?", Value::Integer(provider.0));
    }

    if let Some(since) = filter.since {
        clause.push("received_at >= ?", Value::Integer(since.timestamp_millis()));
    }

    if let Some(until) = filter.until {
        clause.push("received_at < ?", Value::Integer(until.timestamp_millis()));
    }

    if !filter.delivery_ids.is_empty() {
        let placeholders: Vec<String> = filter
            .delivery_ids
            .iter()
            .map(|id| clause.bind(Value::Text(id.clone())))
            .collect();

        clause.add(&format!("delivery_id IN ({})", placeholders.join(", ")));
    }

    clause
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use hookstream_events::ProviderId;

    #[test]
    fn test_empty_filter_has_no_clause() {
        let clause = where_clause(&EventFilter::default());

        assert!(clause.sql.is_empty());
        assert!(clause.params.is_empty());
    }

    #[test]
    fn test_clause_numbers_parameters_in_order() {
        let since = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let filter = EventFilter {
            provider: Some(ProviderId(1)),
            since: Some(since),
            delivery_ids: vec!["a".to_string(), "b".to_string()],
            ..EventFilter::default()
        };

        let clause = where_clause(&filter);

        assert_eq!(
            clause.sql,
            " WHERE provider = ?1 AND received_at >= ?2 AND delivery_id IN (?3, ?4)"
        );
        assert!(matches!(
            clause.params.as_slice(),
            [
                Value::Integer(1),
                Value::Integer(millis),
                Value::Text(a),
                Value::Text(b),
            ] if *millis == since.timestamp_millis() && a == "a" && b == "b"
        ));
    }
}
