use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tally_core::{
    Attributes, Connection, DataSource, DimensionKey, DimensionValue, Discrepancy, EnumDomain,
    ExecutionContext, Numbering, Record, RecordType, ReportGranularity, ReportQuery, Schema,
    SchemaUpdater, SchemaValidator, SearchOperator, SearchTerm, StorageError, Store,
    TypeRegistry, Value, ValueType,
};
use tally_sqlite::SqliteDataSource;
use time::{macros::datetime, Duration, OffsetDateTime};

fn posting_kind() -> Arc<EnumDomain> {
    EnumDomain::new("posting_kind", [(1, "debit"), (2, "credit")]).unwrap()
}

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            RecordType::snapshot("account")
                .required("title", ValueType::String)
                .attribute("opened", ValueType::Timestamp)
                .attribute("active", ValueType::Boolean),
        )
        .unwrap();
    registry
        .register(
            RecordType::subtype("bank_account", "account")
                .attribute("interest_rate", ValueType::Decimal)
                .attribute("branch", ValueType::Integer),
        )
        .unwrap();
    registry
        .register(RecordType::subtype("expense_account", "account").required("category", ValueType::String))
        .unwrap();
    registry
        .register(
            RecordType::snapshot("system_property")
                .numbering(Numbering::Manual)
                .required("name", ValueType::String)
                .attribute("integer_value", ValueType::Integer),
        )
        .unwrap();
    registry
        .register(
            RecordType::instant("posting", "account")
                .required("amount", ValueType::Decimal)
                .attribute("kind", ValueType::Enum(posting_kind())),
        )
        .unwrap();
    registry
        .register(RecordType::subtype("fee_posting", "posting").attribute("fee_code", ValueType::String))
        .unwrap();
    registry
        .register(RecordType::interval("account_rate", "account").required("rate", ValueType::Decimal))
        .unwrap();
    registry
        .register(RecordType::interval("recurring_event", "account").required("amount", ValueType::Decimal))
        .unwrap();
    registry
        .register(RecordType::subtype("monthly_event", "recurring_event").required("day_of_month", ValueType::Integer))
        .unwrap();
    registry
        .register(RecordType::subtype("annual_event", "recurring_event").required("month", ValueType::Integer))
        .unwrap();
    registry
}

fn setup() -> Store<SqliteDataSource> {
    let registry = registry();
    let source = SqliteDataSource::new(":memory:").unwrap();
    {
        let schema = Schema::build(&registry);
        let mut conn = source.connect().unwrap();
        let remaining = SchemaUpdater::new(&schema).update(&mut conn).unwrap();
        assert!(remaining.is_empty());
    }
    Store::new(source, Arc::new(registry))
}

fn attrs(pairs: &[(&str, Value)]) -> Attributes {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn create_account(store: &Store<SqliteDataSource>, title: &str) -> i64 {
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let account = tx.create("account", &attrs(&[("title", title.into())])).unwrap();
    tx.commit().unwrap();
    account.id
}

fn kind(name: &str) -> Value {
    Value::Enum(posting_kind().value(name).unwrap())
}

#[test]
fn test_create_and_get_round_trip() {
    let store = setup();
    let context = ExecutionContext::new();
    let attributes = attrs(&[
        ("title", "Checking".into()),
        ("opened", datetime!(2013-04-01 9:30 UTC).into()),
        ("active", true.into()),
    ]);

    let mut tx = store.start_transaction(&context).unwrap();
    let created = tx.create("account", &attributes).unwrap();
    assert_eq!(tx.get("account", created.id).unwrap(), created);
    tx.commit().unwrap();

    let loaded = store.get("account", created.id).unwrap();
    assert_eq!(loaded.record_type, "account");
    assert_eq!(loaded.container_id, None);
    assert_eq!(loaded.attributes, attributes);
}

#[test]
fn test_numbering_scheme_is_enforced() {
    let store = setup();
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();

    let property = attrs(&[("name", "schema_version".into()), ("integer_value", 3.into())]);
    assert!(matches!(
        tx.create("system_property", &property),
        Err(StorageError::Programming(_))
    ));
    assert!(matches!(
        tx.create_with_id("account", 5, &attrs(&[("title", "Savings".into())])),
        Err(StorageError::Programming(_))
    ));

    let created = tx.create_with_id("system_property", 42, &property).unwrap();
    assert_eq!(created.id, 42);
    assert_eq!(created.integer("integer_value"), Some(3));
    tx.commit().unwrap();
}

#[test]
fn test_get_missing_record_is_not_found() {
    let store = setup();
    match store.get("account", 999) {
        Err(StorageError::NotFound { record_type, id }) => {
            assert_eq!(record_type, "account");
            assert_eq!(id, 999);
        }
        other => panic!("Expected NotFound, got {:?}", other),
    }
    assert!(store.find("account", &[SearchTerm::Id(999)]).unwrap().is_empty());
}

#[test]
fn test_partial_update_keeps_other_attributes() {
    let store = setup();
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let created = tx
        .create("account", &attrs(&[("title", "Checking".into()), ("active", true.into())]))
        .unwrap();
    let updated = tx.update(&created, &attrs(&[("title", "Everyday".into())])).unwrap();
    tx.commit().unwrap();

    assert_eq!(updated.string("title"), Some("Everyday"));
    assert_eq!(updated.boolean("active"), Some(true));
    assert_eq!(store.get("account", created.id).unwrap(), updated);
}

#[test]
fn test_invalid_attributes_write_nothing() {
    let store = setup();
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();

    let missing_required = tx.create("account", &attrs(&[("active", true.into())]));
    assert!(matches!(missing_required, Err(StorageError::Validation(_))));

    let unknown = tx.create("account", &attrs(&[("title", "A".into()), ("colour", "red".into())]));
    assert!(matches!(unknown, Err(StorageError::Validation(_))));

    let wrong_type = tx.create("account", &attrs(&[("title", 7.into())]));
    assert!(matches!(wrong_type, Err(StorageError::Validation(_))));

    let subtype_only = tx.create("account", &attrs(&[("title", "A".into()), ("interest_rate", dec!(1).into())]));
    assert!(matches!(subtype_only, Err(StorageError::Validation(_))));

    assert!(tx.find("account", &[]).unwrap().is_empty());
    tx.commit().unwrap();
}

#[test]
fn test_one_transaction_per_context() {
    let store = setup();
    let context = ExecutionContext::new();
    let tx = store.start_transaction(&context).unwrap();
    assert!(context.in_transaction());

    match store.start_transaction(&context) {
        Err(e @ StorageError::Programming(_)) => assert!(e.is_fatal()),
        Err(e) => panic!("Expected programming error, got {:?}", e),
        Ok(_) => panic!("Expected programming error, got a transaction"),
    }

    tx.rollback().unwrap();
    assert!(!context.in_transaction());
    let again = store.start_transaction(&context).unwrap();
    assert!(again.id() > 0);
    again.commit().unwrap();
}

#[test]
fn test_rollback_and_drop_discard_writes() {
    let store = setup();
    let context = ExecutionContext::new();

    let mut tx = store.start_transaction(&context).unwrap();
    tx.create("account", &attrs(&[("title", "Rolled back".into())])).unwrap();
    tx.rollback().unwrap();

    {
        let mut tx = store.start_transaction(&context).unwrap();
        tx.create("account", &attrs(&[("title", "Dropped".into())])).unwrap();
    }
    assert!(!context.in_transaction());
    assert!(store.find("account", &[]).unwrap().is_empty());

    let mut tx = store.start_transaction(&context).unwrap();
    tx.create("account", &attrs(&[("title", "Kept".into())])).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.find("account", &[]).unwrap().len(), 1);
}

#[test]
fn test_subtypes_share_the_root_table() {
    let store = setup();
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let plain = tx.create("account", &attrs(&[("title", "Plain".into())])).unwrap();
    let bank = tx
        .create(
            "bank_account",
            &attrs(&[("title", "Savings".into()), ("interest_rate", dec!(0.0125).into()), ("branch", 12.into())]),
        )
        .unwrap();
    let expense = tx
        .create("expense_account", &attrs(&[("title", "Travel".into()), ("category", "trips".into())]))
        .unwrap();
    assert!(matches!(
        tx.create("expense_account", &attrs(&[("title", "Travel".into())])),
        Err(StorageError::Validation(_))
    ));
    tx.commit().unwrap();

    let all = store.find("account", &[]).unwrap();
    let types: Vec<&str> = all.iter().map(|r| r.record_type.as_str()).collect();
    assert_eq!(types, vec!["account", "bank_account", "expense_account"]);

    let as_account = store.get("account", bank.id).unwrap();
    assert_eq!(as_account.record_type, "bank_account");
    assert_eq!(as_account.decimal("interest_rate"), Some(dec!(0.0125)));
    assert_eq!(as_account.integer("branch"), Some(12));

    let banks = store.find("bank_account", &[]).unwrap();
    assert_eq!(banks.len(), 1);
    assert_eq!(banks[0].id, bank.id);
    assert!(matches!(
        store.get("expense_account", plain.id),
        Err(StorageError::NotFound { .. })
    ));
    assert_eq!(store.get("expense_account", expense.id).unwrap().string("category"), Some("trips"));
}

#[test]
fn test_search_terms() {
    let store = setup();
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    for (title, rate) in [("Low", dec!(0.005)), ("Mid", dec!(0.02)), ("High", dec!(0.045))] {
        tx.create("bank_account", &attrs(&[("title", title.into()), ("interest_rate", rate.into())]))
            .unwrap();
    }
    tx.commit().unwrap();

    let titles = |terms: &[SearchTerm]| -> Vec<String> {
        store
            .find("bank_account", terms)
            .unwrap()
            .iter()
            .map(|r| r.string("title").unwrap().to_string())
            .collect()
    };

    assert_eq!(
        titles(&[SearchTerm::attribute("interest_rate", SearchOperator::GreaterThanOrEqual, dec!(0.02))]),
        vec!["Mid", "High"]
    );
    assert_eq!(
        titles(&[SearchTerm::or([
            SearchTerm::equals("title", "Low"),
            SearchTerm::attribute("interest_rate", SearchOperator::GreaterThan, dec!(0.04)),
        ])]),
        vec!["Low", "High"]
    );
    assert_eq!(
        titles(&[
            SearchTerm::attribute("title", SearchOperator::NotEquals, "Mid"),
            SearchTerm::attribute("interest_rate", SearchOperator::LessThan, dec!(0.01)),
        ]),
        vec!["Low"]
    );
    assert!(titles(&[SearchTerm::or([])]).is_empty());
    assert!(matches!(
        store.find("account", &[SearchTerm::equals("interest_rate", dec!(0.02))]),
        Err(StorageError::Validation(_))
    ));
}

#[test]
fn test_instants_are_found_in_order_within_range() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let other = create_account(&store, "Savings");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let postings = [
        (account, datetime!(2014-02-10 0:00 UTC), dec!(20), "debit"),
        (account, datetime!(2014-01-05 0:00 UTC), dec!(10), "credit"),
        (account, datetime!(2014-03-01 0:00 UTC), dec!(30), "credit"),
        (account, datetime!(2013-12-31 23:59 UTC), dec!(5), "credit"),
        (other, datetime!(2014-01-20 0:00 UTC), dec!(99), "credit"),
    ];
    for (container, instant, amount, k) in postings {
        let id = tx
            .insert_instant(container, "posting", instant, &attrs(&[("amount", amount.into()), ("kind", kind(k))]))
            .unwrap();
        assert!(id > 0);
    }
    tx.commit().unwrap();

    let found = store
        .find_instants(account, "posting", datetime!(2014-01-01 0:00 UTC), datetime!(2014-03-01 0:00 UTC), &[])
        .unwrap();
    let instants: Vec<OffsetDateTime> = found.iter().map(|p| p.instant).collect();
    assert_eq!(instants, vec![datetime!(2014-01-05 0:00 UTC), datetime!(2014-02-10 0:00 UTC)]);
    assert!(found.iter().all(|p| p.container_id == Some(account)));
    assert_eq!(found[0].get("kind"), Some(&kind("credit")));

    let credits = store
        .find_instants(
            account,
            "posting",
            datetime!(2013-01-01 0:00 UTC),
            datetime!(2015-01-01 0:00 UTC),
            &[SearchTerm::equals("kind", kind("credit"))],
        )
        .unwrap();
    let amounts: Vec<Decimal> = credits.iter().map(|p| p.decimal("amount").unwrap()).collect();
    assert_eq!(amounts, vec![dec!(5), dec!(10), dec!(30)]);
}

#[test]
fn test_update_and_delete_instants() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let other = create_account(&store, "Savings");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let first = tx
        .insert_instant(account, "posting", datetime!(2014-01-05 0:00 UTC), &attrs(&[("amount", dec!(10).into())]))
        .unwrap();
    tx.insert_instant(account, "posting", datetime!(2014-01-06 0:00 UTC), &attrs(&[("amount", dec!(200).into())]))
        .unwrap();
    tx.insert_instant(account, "posting", datetime!(2014-01-07 0:00 UTC), &attrs(&[("amount", dec!(300).into())]))
        .unwrap();

    let moved = tx
        .update_instant(account, "posting", first, datetime!(2014-02-01 0:00 UTC), &attrs(&[("amount", dec!(15).into())]))
        .unwrap();
    assert_eq!(moved.instant, datetime!(2014-02-01 0:00 UTC));
    assert_eq!(moved.decimal("amount"), Some(dec!(15)));
    assert!(matches!(
        tx.update_instant(other, "posting", first, datetime!(2014-02-01 0:00 UTC), &Attributes::new()),
        Err(StorageError::NotFound { .. })
    ));

    let deleted = tx
        .delete_instants(
            account,
            "posting",
            &[SearchTerm::attribute("amount", SearchOperator::GreaterThan, dec!(100))],
        )
        .unwrap();
    assert_eq!(deleted, 2);
    tx.commit().unwrap();

    let remaining = store
        .find_instants(account, "posting", datetime!(2014-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), &[])
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, first);

    let fetched = store.get_instant("posting", first).unwrap();
    assert_eq!(fetched.container_id, Some(account));
    assert_eq!(fetched.decimal("amount"), Some(dec!(15)));
    assert!(matches!(store.get_instant("posting", first + 100), Err(StorageError::NotFound { .. })));
}

#[test]
fn test_instant_subtypes_are_scoped_by_type() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let plain = tx
        .insert_instant(account, "posting", datetime!(2014-01-05 0:00 UTC), &attrs(&[("amount", dec!(10).into())]))
        .unwrap();
    let fee = tx
        .insert_instant(
            account,
            "fee_posting",
            datetime!(2014-01-06 0:00 UTC),
            &attrs(&[("amount", dec!(2).into()), ("fee_code", "wire".into())]),
        )
        .unwrap();
    tx.commit().unwrap();

    let range = (datetime!(2014-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC));
    let all = store.find_instants(account, "posting", range.0, range.1, &[]).unwrap();
    let types: Vec<(i64, &str)> = all.iter().map(|p| (p.id, p.record_type.as_str())).collect();
    assert_eq!(types, vec![(plain, "posting"), (fee, "fee_posting")]);
    assert_eq!(all[1].string("fee_code"), Some("wire"));

    let fees = store.find_instants(account, "fee_posting", range.0, range.1, &[]).unwrap();
    assert_eq!(fees.len(), 1);
    assert_eq!(fees[0].id, fee);
    assert!(matches!(store.get_instant("fee_posting", plain), Err(StorageError::NotFound { .. })));

    let mut tx = store.start_transaction(&context).unwrap();
    assert_eq!(tx.delete_instants(account, "fee_posting", &[]).unwrap(), 1);
    tx.commit().unwrap();
    let left = store.find_instants(account, "posting", range.0, range.1, &[]).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, plain);
}

fn rate(value: Decimal) -> Attributes {
    attrs(&[("rate", value.into())])
}

fn timeline(store: &Store<SqliteDataSource>, account: i64) -> Vec<(OffsetDateTime, OffsetDateTime, Decimal)> {
    store
        .find_intervals(account, "account_rate", datetime!(2000-01-01 0:00 UTC), datetime!(2100-01-01 0:00 UTC), &[])
        .unwrap()
        .iter()
        .map(|i| (i.start, i.end, i.decimal("rate").unwrap()))
        .collect()
}

#[test]
fn test_interval_overlap_left() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    tx.update_interval(account, "account_rate", datetime!(2014-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), &rate(dec!(0.03)))
        .unwrap();
    let inserted = tx
        .update_interval(account, "account_rate", datetime!(2013-01-01 0:00 UTC), datetime!(2014-06-01 0:00 UTC), &rate(dec!(0.04)))
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(inserted.container_id, Some(account));
    assert_eq!(
        timeline(&store, account),
        vec![
            (datetime!(2013-01-01 0:00 UTC), datetime!(2014-06-01 0:00 UTC), dec!(0.04)),
            (datetime!(2014-06-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), dec!(0.03)),
        ]
    );
}

#[test]
fn test_interval_update_spanning_several_entries() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let other = create_account(&store, "Savings");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    for (marker, year) in [(1, 2012), (2, 2014), (3, 2016), (4, 2018), (5, 2020)] {
        let start = datetime!(2000-01-01 0:00 UTC).replace_year(year).unwrap();
        let end = start.replace_year(year + 1).unwrap();
        tx.update_interval(account, "account_rate", start, end, &rate(Decimal::from(marker)))
            .unwrap();
    }
    tx.update_interval(other, "account_rate", datetime!(2015-01-01 0:00 UTC), datetime!(2017-01-01 0:00 UTC), &rate(dec!(9)))
        .unwrap();
    tx.update_interval(account, "account_rate", datetime!(2014-06-01 0:00 UTC), datetime!(2018-06-01 0:00 UTC), &rate(dec!(6)))
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(
        timeline(&store, account),
        vec![
            (datetime!(2012-01-01 0:00 UTC), datetime!(2013-01-01 0:00 UTC), dec!(1)),
            (datetime!(2014-01-01 0:00 UTC), datetime!(2014-06-01 0:00 UTC), dec!(2)),
            (datetime!(2014-06-01 0:00 UTC), datetime!(2018-06-01 0:00 UTC), dec!(6)),
            (datetime!(2018-06-01 0:00 UTC), datetime!(2019-01-01 0:00 UTC), dec!(4)),
            (datetime!(2020-01-01 0:00 UTC), datetime!(2021-01-01 0:00 UTC), dec!(5)),
        ]
    );
    assert_eq!(
        timeline(&store, other),
        vec![(datetime!(2015-01-01 0:00 UTC), datetime!(2017-01-01 0:00 UTC), dec!(9))]
    );
}

#[test]
fn test_nested_and_repeated_interval_updates() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    tx.update_interval(account, "account_rate", datetime!(2014-01-01 0:00 UTC), datetime!(2016-01-01 0:00 UTC), &rate(dec!(0.02)))
        .unwrap();
    let first = tx
        .update_interval(account, "account_rate", datetime!(2015-01-01 0:00 UTC), datetime!(2015-07-01 0:00 UTC), &rate(dec!(0.03)))
        .unwrap();
    let second = tx
        .update_interval(account, "account_rate", datetime!(2015-01-01 0:00 UTC), datetime!(2015-07-01 0:00 UTC), &rate(dec!(0.03)))
        .unwrap();
    assert_ne!(first.id, second.id);
    assert!(matches!(
        tx.update_interval(account, "account_rate", datetime!(2015-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), &rate(dec!(1))),
        Err(StorageError::Validation(_))
    ));
    tx.commit().unwrap();

    assert_eq!(
        timeline(&store, account),
        vec![
            (datetime!(2014-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), dec!(0.02)),
            (datetime!(2015-01-01 0:00 UTC), datetime!(2015-07-01 0:00 UTC), dec!(0.03)),
            (datetime!(2015-07-01 0:00 UTC), datetime!(2016-01-01 0:00 UTC), dec!(0.02)),
        ]
    );
}

fn events(store: &Store<SqliteDataSource>, account: i64) -> Vec<(OffsetDateTime, OffsetDateTime, String)> {
    store
        .find_intervals(account, "recurring_event", datetime!(2000-01-01 0:00 UTC), datetime!(2100-01-01 0:00 UTC), &[])
        .unwrap()
        .iter()
        .map(|i| (i.start, i.end, i.record_type.clone()))
        .collect()
}

#[test]
fn test_interval_updates_replace_sibling_subtypes() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let context = ExecutionContext::new();
    let monthly = attrs(&[("amount", dec!(50).into()), ("day_of_month", 15.into())]);
    let annual = attrs(&[("amount", dec!(600).into()), ("month", 7.into())]);

    let mut tx = store.start_transaction(&context).unwrap();
    tx.update_interval(account, "monthly_event", datetime!(2014-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), &monthly)
        .unwrap();
    tx.update_interval(account, "annual_event", datetime!(2014-06-01 0:00 UTC), datetime!(2014-09-01 0:00 UTC), &annual)
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(
        events(&store, account),
        vec![
            (datetime!(2014-01-01 0:00 UTC), datetime!(2014-06-01 0:00 UTC), "monthly_event".to_string()),
            (datetime!(2014-06-01 0:00 UTC), datetime!(2014-09-01 0:00 UTC), "annual_event".to_string()),
            (datetime!(2014-09-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), "monthly_event".to_string()),
        ]
    );
    let tail = store
        .get_interval_at(account, "recurring_event", datetime!(2014-10-01 0:00 UTC))
        .unwrap()
        .unwrap();
    assert_eq!(tail.record_type, "monthly_event");
    assert_eq!(tail.integer("day_of_month"), Some(15));
    assert!(store
        .get_interval_at(account, "monthly_event", datetime!(2014-07-01 0:00 UTC))
        .unwrap()
        .is_none());
    assert_eq!(
        store
            .find_intervals(account, "monthly_event", datetime!(2014-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), &[])
            .unwrap()
            .len(),
        2
    );

    let mut tx = store.start_transaction(&context).unwrap();
    let replaced = attrs(&[("amount", dec!(40).into()), ("day_of_month", 1.into())]);
    tx.update_interval(account, "monthly_event", datetime!(2014-08-01 0:00 UTC), datetime!(2014-10-01 0:00 UTC), &replaced)
        .unwrap();
    tx.commit().unwrap();

    let found = store
        .find_intervals(account, "recurring_event", datetime!(2000-01-01 0:00 UTC), datetime!(2100-01-01 0:00 UTC), &[])
        .unwrap();
    let spans: Vec<_> = found
        .iter()
        .map(|i| (i.start, i.end, i.record_type.as_str(), i.decimal("amount").unwrap()))
        .collect();
    assert_eq!(
        spans,
        vec![
            (datetime!(2014-01-01 0:00 UTC), datetime!(2014-06-01 0:00 UTC), "monthly_event", dec!(50)),
            (datetime!(2014-06-01 0:00 UTC), datetime!(2014-08-01 0:00 UTC), "annual_event", dec!(600)),
            (datetime!(2014-08-01 0:00 UTC), datetime!(2014-10-01 0:00 UTC), "monthly_event", dec!(40)),
            (datetime!(2014-10-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), "monthly_event", dec!(50)),
        ]
    );
    assert_eq!(found[1].integer("month"), Some(7));
    assert_eq!(found[3].integer("day_of_month"), Some(15));
}

#[test]
fn test_timestamps_are_stored_at_backend_precision() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let context = ExecutionContext::new();
    let midnight = datetime!(2014-01-01 0:00 UTC);

    let mut tx = store.start_transaction(&context).unwrap();
    let same_millisecond = tx.update_interval(
        account,
        "account_rate",
        midnight + Duration::microseconds(100),
        midnight + Duration::microseconds(900),
        &rate(dec!(0.01)),
    );
    assert!(matches!(same_millisecond, Err(StorageError::Validation(_))));

    let stored = tx
        .update_interval(
            account,
            "account_rate",
            midnight + Duration::microseconds(100),
            midnight + Duration::milliseconds(2),
            &rate(dec!(0.01)),
        )
        .unwrap();
    assert_eq!((stored.start, stored.end), (midnight, midnight + Duration::milliseconds(2)));

    let opened = datetime!(2013-04-01 9:30 UTC) + Duration::microseconds(250_700);
    let created = tx
        .create("account", &attrs(&[("title", "Savings".into()), ("opened", opened.into())]))
        .unwrap();
    assert_eq!(
        created.get("opened"),
        Some(&Value::Timestamp(datetime!(2013-04-01 9:30 UTC) + Duration::milliseconds(250)))
    );
    tx.commit().unwrap();

    assert_eq!(store.get("account", created.id).unwrap(), created);
    assert!(timeline(&store, account).iter().all(|(start, end, _)| start < end));
}

#[test]
fn test_update_is_scoped_to_the_record_type() {
    let store = setup();
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let bank = tx
        .create("bank_account", &attrs(&[("title", "Checking".into()), ("branch", 12.into())]))
        .unwrap();

    let mistyped = Record {
        record_type: "expense_account".to_string(),
        ..bank.clone()
    };
    assert!(matches!(
        tx.update(&mistyped, &attrs(&[("category", "rent".into())])),
        Err(StorageError::NotFound { .. })
    ));
    let renamed = tx.update(&bank, &attrs(&[("title", "Everyday".into())])).unwrap();
    tx.commit().unwrap();

    let loaded = store.get("account", bank.id).unwrap();
    assert_eq!(loaded, renamed);
    assert_eq!(loaded.record_type, "bank_account");
    assert_eq!(loaded.get("category"), None);
}

#[test]
fn test_interval_lookups() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    tx.update_interval(account, "account_rate", datetime!(2014-01-01 0:00 UTC), datetime!(2015-01-01 0:00 UTC), &rate(dec!(0.03)))
        .unwrap();
    tx.update_interval(account, "account_rate", datetime!(2016-01-01 0:00 UTC), datetime!(2017-01-01 0:00 UTC), &rate(dec!(0.05)))
        .unwrap();
    let inside = tx
        .get_interval_at(account, "account_rate", datetime!(2014-12-31 23:59 UTC))
        .unwrap()
        .unwrap();
    assert_eq!(inside.decimal("rate"), Some(dec!(0.03)));
    tx.commit().unwrap();

    assert!(store
        .get_interval_at(account, "account_rate", datetime!(2015-01-01 0:00 UTC))
        .unwrap()
        .is_none());
    let start = store
        .get_interval_at(account, "account_rate", datetime!(2016-01-01 0:00 UTC))
        .unwrap()
        .unwrap();
    assert!(start.contains(datetime!(2016-01-01 0:00 UTC)));

    let overlapping = store
        .find_intervals(account, "account_rate", datetime!(2014-06-01 0:00 UTC), datetime!(2016-01-01 0:00 UTC), &[])
        .unwrap();
    assert_eq!(overlapping.len(), 1);
    assert_eq!(overlapping[0].start, datetime!(2014-01-01 0:00 UTC));
}

#[test]
fn test_cumulative_month_report() {
    let store = setup();
    let account = create_account(&store, "Checking");
    let other = create_account(&store, "Savings");
    let context = ExecutionContext::new();
    let mut tx = store.start_transaction(&context).unwrap();
    let postings = [
        (account, datetime!(2014-01-31 12:00 UTC), dec!(1000)),
        (account, datetime!(2014-03-15 0:00 UTC), dec!(250.5)),
        (account, datetime!(2015-02-01 0:00 UTC), dec!(7)),
        (other, datetime!(2013-06-30 0:00 UTC), dec!(40)),
    ];
    for (container, instant, amount) in postings {
        tx.insert_instant(container, "posting", instant, &attrs(&[("amount", amount.into())]))
            .unwrap();
    }
    tx.commit().unwrap();

    let query = ReportQuery::new("posting", 2014, 2015, ReportGranularity::Month)
        .group_by_container("account")
        .measure("amount");
    let report = store.run_report(&query).unwrap();
    assert_eq!(report.boundaries().len(), 13);
    assert_eq!(report.rows().len(), 2);

    let key = DimensionKey::from([("account".to_string(), DimensionValue::Container(account))]);
    let row = report.row(&key).unwrap();
    let totals: Vec<Decimal> = row.entries().iter().map(|e| e.measure("amount")).collect();
    assert_eq!(totals[0], dec!(0));
    assert_eq!(totals[1], dec!(1000));
    assert_eq!(totals[2], dec!(1000));
    assert_eq!(totals[3], dec!(1250.5));
    assert_eq!(totals[12], dec!(1250.5));

    let key = DimensionKey::from([("account".to_string(), DimensionValue::Container(other))]);
    let row = report.row(&key).unwrap();
    assert!(row.entries().iter().all(|e| e.measure("amount") == dec!(40)));

    let filtered = store
        .run_report(&ReportQuery::new("posting", 2014, 2015, ReportGranularity::Year)
            .filter(SearchTerm::Container(account))
            .measure("amount"))
        .unwrap();
    assert_eq!(filtered.rows().len(), 1);
    let totals: Vec<Decimal> = filtered.rows()[0].entries().iter().map(|e| e.measure("amount")).collect();
    assert_eq!(totals, vec![dec!(0), dec!(1250.5)]);

    assert!(matches!(
        store.run_report(&ReportQuery::new("posting", 2014, 2015, ReportGranularity::Year).measure("kind")),
        Err(StorageError::Validation(_))
    ));
}

#[test]
fn test_schema_repairs_damaged_table() {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            RecordType::snapshot("system_property")
                .numbering(Numbering::Manual)
                .required("name", ValueType::String)
                .attribute("integer_value", ValueType::Integer),
        )
        .unwrap();
    let schema = Schema::build(&registry);
    let source = SqliteDataSource::new(":memory:").unwrap();
    {
        let mut conn = source.connect().unwrap();
        conn.execute_batch(
            "CREATE TABLE \"system_property\" (\"sys_id\" BIGINT NOT NULL PRIMARY KEY, \"name\" TEXT NOT NULL, \"other_value\" TEXT);
             INSERT INTO \"system_property\" (\"sys_id\", \"name\", \"other_value\") VALUES (7, 'schema_version', 'x');",
        )
        .unwrap();

        let table = schema.table("system_property").unwrap();
        let discrepancies = SchemaValidator::new(&schema).validate(&mut conn).unwrap();
        assert_eq!(
            discrepancies,
            vec![
                Discrepancy::ExtraColumn {
                    table: "system_property".into(),
                    column: "other_value".into(),
                },
                Discrepancy::MissingColumn {
                    table: "system_property".into(),
                    column: table.column("sys_type").unwrap().clone(),
                },
                Discrepancy::MissingColumn {
                    table: "system_property".into(),
                    column: table.column("integer_value").unwrap().clone(),
                },
            ]
        );

        let updater = SchemaUpdater::new(&schema);
        assert!(updater.update(&mut conn).unwrap().is_empty());
        assert!(SchemaValidator::new(&schema).validate(&mut conn).unwrap().is_empty());
        assert!(updater.update(&mut conn).unwrap().is_empty());
    }

    let store = Store::new(source, Arc::new(registry));
    let property = store.get("system_property", 7).unwrap();
    assert_eq!(property.record_type, "system_property");
    assert_eq!(property.string("name"), Some("schema_version"));
    assert_eq!(property.integer("integer_value"), None);
}
