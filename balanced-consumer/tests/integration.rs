mod common;

use common::{
    owned_by, owned_count, owner_of, start_member, test_store, wait_for_condition, POLL_INTERVAL,
    WAIT_TIMEOUT,
};

#[tokio::test]
async fn single_member_gets_all_partitions() {
    let store = test_store("single-member").await;
    let member = start_member(&store, "events", 4).await;

    for i in 0..4 {
        assert_eq!(
            owner_of(&store, "events", 0, i).await.as_deref(),
            Some(member.member_id())
        );
    }

    member.stop().await;
}

#[tokio::test]
async fn two_members_split_partitions_disjointly() {
    let store = test_store("two-members").await;
    let a = start_member(&store, "events", 4).await;
    let b = start_member(&store, "events", 4).await;

    let (a_id, b_id) = (a.member_id().to_string(), b.member_id().to_string());

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        let a_id = a_id.clone();
        async move { owned_by(&store, "events", 4, &a_id).await == 2 }
    })
    .await;

    assert_eq!(owned_by(&store, "events", 4, &a_id).await, 2);
    assert_eq!(owned_by(&store, "events", 4, &b_id).await, 2);
    assert_eq!(owned_count(&store, "events", 4).await, 4);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn join_convergence_restores_disjointness_and_coverage() {
    let store = test_store("join-convergence").await;
    let a = start_member(&store, "events", 4).await;
    let a_id = a.member_id().to_string();

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        let a_id = a_id.clone();
        async move { owned_by(&store, "events", 4, &a_id).await == 4 }
    })
    .await;

    let b = start_member(&store, "events", 4).await;
    let b_id = b.member_id().to_string();

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        let a_id = a_id.clone();
        async move { owned_by(&store, "events", 4, &a_id).await == 2 }
    })
    .await;

    assert_eq!(owned_by(&store, "events", 4, &b_id).await, 2);
    assert_eq!(owned_count(&store, "events", 4).await, 4);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn stopping_a_member_lets_the_remaining_member_reclaim_its_partitions() {
    let store = test_store("stop-reclaim").await;
    let a = start_member(&store, "events", 4).await;
    let b = start_member(&store, "events", 4).await;
    let a_id = a.member_id().to_string();

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        let a_id = a_id.clone();
        async move { owned_by(&store, "events", 4, &a_id).await == 2 }
    })
    .await;

    // `b`'s ownership records and participant record vanish along with its
    // session close, the same way a crashed member's ephemeral nodes vanish
    // when its lease expires.
    b.stop().await;

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        let a_id = a_id.clone();
        async move { owned_by(&store, "events", 4, &a_id).await == 4 }
    })
    .await;

    assert_eq!(owned_count(&store, "events", 4).await, 4);
    a.stop().await;
}

#[tokio::test]
async fn overpopulation_leaves_one_member_stopped_with_no_partitions() {
    // With 2 partitions and 3 members, exactly one member (whichever sorts
    // last among the three member ids) converges to an empty assignment
    // and self-stops; which physical member that is depends on the
    // randomly generated member ids, not join order.
    let store = test_store("overpopulation").await;
    let a = start_member(&store, "events", 2).await;
    let b = start_member(&store, "events", 2).await;
    let c = start_member(&store, "events", 2).await;

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || async {
        let mut empty = 0;
        for m in [&a, &b, &c] {
            if m.consume(false).await.is_err() {
                empty += 1;
            }
        }
        empty == 1
    })
    .await;

    assert_eq!(owned_count(&store, "events", 2).await, 2);

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test]
async fn joining_a_full_group_is_rejected_with_capacity_exceeded() {
    let store = test_store("capacity").await;
    let _a = start_member(&store, "events", 1).await;

    let result = balanced_consumer::BalancedConsumer::start(
        "test-cluster",
        "test-group",
        "events",
        store.clone(),
        std::sync::Arc::new(balanced_consumer::StaticTopicMetadata::new(common::partitions(
            "events", 1,
        ))),
        std::sync::Arc::new(balanced_consumer::inner::fake::FakeInnerConsumerFactory),
        common::test_config(),
        None,
    )
    .await;

    assert!(matches!(
        result,
        Err(balanced_consumer::Error::CapacityExceeded { .. })
    ));
}
