//! Property-based tests for query composition and join building.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};

use relboard_core::{
    compose, contains_join_set, hop_count, DashboardQueryState, Filter, FilterKind,
    IdentityIndexResolver, JoinEndpoint, JoinFilterBuilder, JoinSet, Relation, RelationEndpoint,
    RelationRegistry,
};

fn arb_filter() -> impl Strategy<Value = Filter> {
    let kind = prop_oneof![
        "[a-z]{1,8}".prop_map(|f| Filter::exists(&f)),
        ("[a-z]{1,8}", 0i64..1000).prop_map(|(f, v)| Filter::range(&f, json!({ "gte": v }))),
        ("[a-z]{1,8}", "[a-z]{1,8}").prop_map(|(f, v)| Filter::term(&f, v)),
        "[a-z]{1,8}".prop_map(|q| Filter::query(json!({ "query_string": { "query": q } }))),
    ];
    (kind, any::<bool>(), proptest::option::of("[a-z ]{1,12}")).prop_map(
        |(filter, negate, alias)| {
            let filter = if negate { filter.negated() } else { filter };
            match alias {
                Some(alias) => filter.with_alias(alias),
                None => filter,
            }
        },
    )
}

fn arb_query() -> impl Strategy<Value = Value> {
    "[a-z*]{1,10}".prop_map(|q| json!({ "query_string": { "query": q } }))
}

proptest! {
    #[test]
    fn composition_is_idempotent(
        filters in prop::collection::vec(arb_filter(), 0..12),
        queries in prop::collection::vec(arb_query(), 0..4),
        with_time in any::<bool>(),
    ) {
        let time = json!({ "range": { "t": { "gte": 0, "lte": 1 } } });
        let time = with_time.then_some(&time);
        prop_assert_eq!(
            compose(&filters, &queries, time),
            compose(&filters, &queries, time)
        );
    }

    #[test]
    fn composition_partitions_filters(
        filters in prop::collection::vec(arb_filter(), 0..12),
        queries in prop::collection::vec(arb_query(), 0..4),
        with_time in any::<bool>(),
    ) {
        let time = json!({ "range": { "t": { "gte": 0, "lte": 1 } } });
        let composed = compose(&filters, &queries, with_time.then_some(&time));

        let positive: Vec<Value> = filters
            .iter()
            .filter(|f| !f.meta.negate)
            .map(|f| f.kind.to_query())
            .collect();
        let negative: Vec<Value> = filters
            .iter()
            .filter(|f| f.meta.negate)
            .map(|f| f.kind.to_query())
            .collect();

        let mut expected_must = positive;
        expected_must.extend(queries.iter().cloned());
        if with_time {
            expected_must.push(time.clone());
        }

        prop_assert_eq!(&composed.must, &expected_must);
        prop_assert_eq!(&composed.must_not, &negative);
        prop_assert_eq!(
            composed.must.len() + composed.must_not.len(),
            filters.len() + queries.len() + usize::from(with_time)
        );
        prop_assert!(!composed.to_query().to_string().contains("\"meta\""));
    }

    #[test]
    fn appending_a_hop_adds_exactly_one(
        hops in 0usize..6,
        negations in prop::collection::vec(any::<bool>(), 6),
    ) {
        let registry = RelationRegistry::new(vec![Relation::new(
            RelationEndpoint::new("companies", "id"),
            RelationEndpoint::new("articles", "companyid"),
        )]);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let builder = JoinFilterBuilder::new(&registry, &IdentityIndexResolver, now);

        // Walk companies -> articles -> companies -> ... `hops` times, with a
        // join_set present on every dashboard.
        let join_set = Filter::join_set(JoinSet {
            focus: "companies".to_string(),
            relations: Vec::new(),
            queries: Default::default(),
        });
        let indices = ["companies", "articles"];
        let mut carried: Option<Filter> = None;
        for hop in 0..hops {
            let mut filters = vec![join_set.clone(), Filter::exists("x")];
            if let Some(previous) = carried.take() {
                filters.push(if negations[hop] { previous.negated() } else { previous });
            }
            let state = DashboardQueryState { filters, ..Default::default() };
            let source = JoinEndpoint {
                dashboard_id: indices[hop % 2],
                index_pattern: indices[hop % 2],
                state: &state,
            };
            let next = builder
                .build_sequence(None, &source, indices[(hop + 1) % 2], &state.filters)
                .unwrap();

            let FilterKind::JoinSequence(sequence) = &next.kind else {
                panic!("expected a join sequence");
            };
            prop_assert_eq!(hop_count(sequence), hop + 1);
            prop_assert_eq!(sequence.len(), hop + 1);
            prop_assert!(!contains_join_set(sequence));
            prop_assert!(!next.meta.negate);
            carried = Some(next);
        }
    }
}
