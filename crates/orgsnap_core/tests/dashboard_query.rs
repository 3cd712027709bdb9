mod common;

use common::{
    employee, record_employee, record_unit, rename_to_revenue, seed_sales_apac, split_into_regions,
    submit_at, ts, ts_hm, unit, TENANT,
};
use orgsnap_core::config::QueryConfig;
use orgsnap_core::db::open_db_in_memory;
use orgsnap_core::model::query::{Filter, FilterField, FilterScalar, FilterSet};
use orgsnap_core::{
    CancellationToken, DashboardQuery, DashboardResult, DashboardService, FilterMode, LineageCache,
    QueryError, TimeRange,
};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

fn year_2024() -> TimeRange {
    TimeRange::new(ts(2024, 1, 1), ts(2024, 12, 31)).unwrap()
}

fn filters(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn query(conn: &Connection, raw: Value, mode: &str) -> Result<DashboardResult, QueryError> {
    let config = QueryConfig::default();
    DashboardService::new(conn, &config).query_dashboard(&filters(raw), mode, year_2024(), TENANT)
}

/// March response under "Sales APAC", renamed to "Revenue APAC" in June.
fn renamed_unit() -> Connection {
    let conn = open_db_in_memory().unwrap();
    seed_sales_apac(&conn);
    submit_at(&conn, "emp_1", TENANT, ts_hm(2024, 3, 15, 10, 0));
    rename_to_revenue(&conn);
    conn
}

#[test]
fn historical_mode_matches_recorded_names_only() {
    let conn = renamed_unit();

    let recorded = query(&conn, json!({"department": "Sales APAC"}), "HISTORICAL").unwrap();
    assert_eq!(recorded.count, 1);
    assert_eq!(recorded.responses[0].snapshot_core.department, "Sales APAC");
    assert!(recorded.provenance.is_none());

    let renamed = query(&conn, json!({"department": "Revenue APAC"}), "HISTORICAL").unwrap();
    assert_eq!(renamed.count, 0);
}

#[test]
fn current_mode_follows_rename() {
    let conn = renamed_unit();

    let result = query(&conn, json!({"department": "Revenue APAC"}), "CURRENT").unwrap();

    assert_eq!(result.count, 1);
    assert_eq!(result.responses[0].snapshot_core.department, "Sales APAC");
    assert_eq!(result.responses[0].snapshot_core.unit_id, "unit_123");
}

#[test]
fn current_mode_follows_split_to_every_successor() {
    let conn = open_db_in_memory().unwrap();
    seed_sales_apac(&conn);
    submit_at(&conn, "emp_1", TENANT, ts_hm(2024, 3, 15, 10, 0));
    split_into_regions(&conn);

    for name in ["SEA Sales", "ANZ Sales"] {
        let result = query(&conn, json!({ "department": name }), "current").unwrap();
        assert_eq!(result.count, 1, "{name}");
        assert_eq!(result.responses[0].snapshot_core.department, "Sales APAC");
    }

    let by_id = query(&conn, json!({"unit_id": "unit_456"}), "CURRENT").unwrap();
    assert_eq!(by_id.count, 1);
}

#[test]
fn hybrid_lists_historical_matches_first_with_provenance() {
    let conn = renamed_unit();
    let july = submit_at(&conn, "emp_1", TENANT, ts_hm(2024, 7, 10, 9, 30));

    let result = query(&conn, json!({"department": "Revenue APAC"}), "HYBRID").unwrap();

    assert_eq!(result.count, 2);
    assert_eq!(result.responses[0].response_id, july.response_id);
    assert_eq!(result.responses[1].snapshot_core.department, "Sales APAC");
    let provenance = result.provenance.unwrap();
    assert_eq!(provenance.historical_count, 1);
    assert_eq!(provenance.current_count, 2);
    assert_eq!(provenance.historical_units, vec!["unit_123"]);
}

#[test]
fn unknown_name_yields_empty_result_not_error() {
    let conn = renamed_unit();

    for mode in ["HISTORICAL", "CURRENT", "HYBRID"] {
        let result = query(&conn, json!({"department": "Revenue APCA"}), mode).unwrap();
        assert_eq!(result.count, 0, "{mode}");
        assert!(result.responses.is_empty());
    }
}

#[test]
fn malformed_input_is_an_invalid_argument() {
    let conn = renamed_unit();

    let bad_mode = query(&conn, json!({"department": "Sales APAC"}), "SIDEWAYS").unwrap_err();
    assert_eq!(bad_mode.code(), "invalid_argument");

    let bad_field = query(&conn, json!({"salary": 100}), "HISTORICAL").unwrap_err();
    assert_eq!(bad_field.code(), "invalid_argument");

    let bad_type = query(&conn, json!({"age": "thirty"}), "HISTORICAL").unwrap_err();
    assert_eq!(bad_type.code(), "invalid_argument");

    let config = QueryConfig::default();
    let blank_tenant = DashboardService::new(&conn, &config)
        .query_dashboard(&Map::new(), "HISTORICAL", year_2024(), " ")
        .unwrap_err();
    assert_eq!(blank_tenant.code(), "invalid_argument");
}

#[test]
fn other_tenants_never_see_responses() {
    let conn = renamed_unit();
    let config = QueryConfig::default();

    let result = DashboardService::new(&conn, &config)
        .query_dashboard(
            &filters(json!({"department": "Revenue APAC"})),
            "HYBRID",
            year_2024(),
            "globex",
        )
        .unwrap();
    assert_eq!(result.count, 0);
}

#[test]
fn non_organizational_filters_apply_unchanged() {
    let conn = renamed_unit();

    let manager = query(
        &conn,
        json!({"department": "Revenue APAC", "role": "Manager", "age": [33, 34]}),
        "CURRENT",
    )
    .unwrap();
    assert_eq!(manager.count, 1);

    let director = query(
        &conn,
        json!({"department": "Revenue APAC", "role": "Director"}),
        "CURRENT",
    )
    .unwrap();
    assert_eq!(director.count, 0);
}

#[test]
fn time_range_bounds_submission_instant() {
    let conn = renamed_unit();
    let config = QueryConfig::default();
    let after_march = TimeRange::new(ts(2024, 4, 1), ts(2024, 12, 31)).unwrap();

    let result = DashboardService::new(&conn, &config)
        .query_dashboard(
            &filters(json!({"department": "Revenue APAC"})),
            "CURRENT",
            after_march,
            TENANT,
        )
        .unwrap();
    assert_eq!(result.count, 0);
}

#[test]
fn cancelled_query_returns_no_partial_result() {
    let conn = renamed_unit();
    let config = QueryConfig::default();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let dashboard_query = DashboardQuery::new(
        FilterSet::new().with(Filter::text(FilterField::Department, "Revenue APAC")),
        FilterMode::Hybrid,
        year_2024(),
        TENANT,
    );

    let err = DashboardService::new(&conn, &config)
        .execute(&dashboard_query, &cancel)
        .unwrap_err();
    assert!(matches!(err, QueryError::Cancelled));
    assert_eq!(err.code(), "cancelled");
}

#[test]
fn typed_filters_match_stored_snapshot_values() {
    let conn = renamed_unit();
    let config = QueryConfig::default();
    let service = DashboardService::new(&conn, &config);
    let run = |filters: FilterSet| {
        service
            .execute(
                &DashboardQuery::new(filters, FilterMode::Historical, year_2024(), TENANT),
                &CancellationToken::new(),
            )
            .unwrap()
            .count
    };

    let roles = Filter::one_of(
        FilterField::Role,
        vec![
            FilterScalar::Text("Director".to_string()),
            FilterScalar::Text("Manager".to_string()),
        ],
    );
    assert_eq!(
        run(FilterSet::new()
            .with(Filter::integer(FilterField::Age, 33))
            .with(roles.clone())),
        1
    );
    assert_eq!(
        run(FilterSet::new()
            .with(Filter::integer(FilterField::Age, 34))
            .with(roles)),
        0
    );
}

#[test]
fn shared_current_name_is_ambiguous() {
    let conn = open_db_in_memory().unwrap();
    record_unit(&conn, &unit("unit_1", "Operations", "root.ops", ts(2020, 1, 1)));
    record_unit(&conn, &unit("unit_2", "Operations", "root.emea.ops", ts(2020, 1, 1)));

    let err = query(&conn, json!({"department": "Operations"}), "CURRENT").unwrap_err();
    assert_eq!(err.code(), "ambiguous");

    let historical = query(&conn, json!({"department": "Operations"}), "HISTORICAL").unwrap();
    assert_eq!(historical.count, 0);
}

#[test]
fn results_are_newest_first_and_capped() {
    let conn = open_db_in_memory().unwrap();
    seed_sales_apac(&conn);
    record_employee(&conn, &employee("emp_2", "unit_123", ts(2020, 1, 1)));
    for (employee_id, day) in [("emp_1", 10), ("emp_2", 11), ("emp_1", 12)] {
        submit_at(&conn, employee_id, TENANT, ts_hm(2024, 3, day, 9, 0));
    }
    let config = QueryConfig { max_results: 2 };

    let result = DashboardService::new(&conn, &config)
        .query_dashboard(
            &filters(json!({"department": "Sales APAC"})),
            "HISTORICAL",
            year_2024(),
            TENANT,
        )
        .unwrap();

    assert_eq!(result.count, 2);
    assert_eq!(result.responses[0].submitted_at, ts_hm(2024, 3, 12, 9, 0));
    assert_eq!(result.responses[1].submitted_at, ts_hm(2024, 3, 11, 9, 0));
}

#[test]
fn cached_and_uncached_queries_agree() {
    let conn = open_db_in_memory().unwrap();
    seed_sales_apac(&conn);
    submit_at(&conn, "emp_1", TENANT, ts_hm(2024, 3, 15, 10, 0));
    split_into_regions(&conn);
    let config = QueryConfig::default();
    let cache = LineageCache::new();
    let raw = filters(json!({"department": ["SEA Sales", "ANZ Sales"]}));

    let uncached = DashboardService::new(&conn, &config)
        .query_dashboard(&raw, "CURRENT", year_2024(), TENANT)
        .unwrap();
    let cached_service = DashboardService::new(&conn, &config).with_cache(&cache);
    let first = cached_service
        .query_dashboard(&raw, "CURRENT", year_2024(), TENANT)
        .unwrap();
    let second = cached_service
        .query_dashboard(&raw, "CURRENT", year_2024(), TENANT)
        .unwrap();

    assert_eq!(uncached, first);
    assert_eq!(first, second);
    assert_eq!(first.count, 1);
    assert_eq!(cache.len(), 2);
}
