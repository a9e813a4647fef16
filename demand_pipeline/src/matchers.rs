//! Column discovery by keyword.
//!
//! Each lookup is an ordered list of predicates. The list is walked in order
//! and, for each predicate, the headers are scanned left to right; the first
//! hit wins. Comparisons are case-insensitive on trimmed header text.

#[derive(Debug, Clone, Copy)]
pub enum ColumnMatcher {
    /// Header equals the token.
    Exact(&'static str),
    /// Header contains the token.
    Contains(&'static str),
    /// Header contains every token.
    ContainsAll(&'static [&'static str]),
}

impl ColumnMatcher {
    pub fn matches(&self, header: &str) -> bool {
        let header = header.trim().to_lowercase();
        match self {
            ColumnMatcher::Exact(token) => header == *token,
            ColumnMatcher::Contains(token) => header.contains(token),
            ColumnMatcher::ContainsAll(tokens) => tokens.iter().all(|t| header.contains(t)),
        }
    }
}

pub const HOUR: &[ColumnMatcher] = &[ColumnMatcher::Exact("hora"), ColumnMatcher::Contains("hora")];

pub const DATE: &[ColumnMatcher] = &[
    ColumnMatcher::Exact("fecha"),
    ColumnMatcher::Contains("fecha"),
];

pub const SYSTEM: &[ColumnMatcher] = &[ColumnMatcher::Exact("sistema")];

pub const DEMAND_BALANCE: &[ColumnMatcher] = &[ColumnMatcher::ContainsAll(&["demanda", "balance"])];

pub const TIDY_TIMESTAMP: &[ColumnMatcher] = &[
    ColumnMatcher::Exact("fecha"),
    ColumnMatcher::Exact("datetime"),
    ColumnMatcher::Exact("timestamp"),
    ColumnMatcher::Exact("date_time"),
    ColumnMatcher::Exact("time"),
];

pub const TIDY_ZONE: &[ColumnMatcher] = &[
    ColumnMatcher::Exact("zona"),
    ColumnMatcher::Exact("region"),
    ColumnMatcher::Exact("area"),
    ColumnMatcher::Exact("sistema"),
    ColumnMatcher::Exact("zone"),
];

pub const TIDY_DEMAND: &[ColumnMatcher] = &[
    ColumnMatcher::Exact("demanda"),
    ColumnMatcher::Exact("mw"),
    ColumnMatcher::Exact("demand_mw"),
    ColumnMatcher::Exact("load_mw"),
];

/// Index of the column chosen by `matchers`.
pub fn find_column<S: AsRef<str>>(headers: &[S], matchers: &[ColumnMatcher]) -> Option<usize> {
    matchers.iter().find_map(|matcher| {
        headers
            .iter()
            .position(|header| matcher.matches(header.as_ref()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_beats_contains_regardless_of_position() {
        let headers = ["Hora de corte", "HORA", "SIN"];
        assert_eq!(find_column(&headers, HOUR), Some(1));

        let headers = ["Fecha y hora", "SIN"];
        assert_eq!(find_column(&headers, HOUR), Some(0));
    }

    #[test]
    fn test_demand_balance_first_match_wins() {
        let headers = ["Sistema", "Hora", "Demanda Neta", "DemandaBalance", "Demanda balance 2"];
        assert_eq!(find_column(&headers, DEMAND_BALANCE), Some(3));
        assert_eq!(find_column(&["Sistema", "Hora"], DEMAND_BALANCE), None);
    }

    #[test]
    fn test_tidy_priority_follows_list_order() {
        // "fecha" outranks "timestamp" even when it comes later.
        let headers = ["timestamp", "Fecha", "zone", "MW"];
        assert_eq!(find_column(&headers, TIDY_TIMESTAMP), Some(1));
        assert_eq!(find_column(&headers, TIDY_ZONE), Some(2));
        assert_eq!(find_column(&headers, TIDY_DEMAND), Some(3));
    }
}
