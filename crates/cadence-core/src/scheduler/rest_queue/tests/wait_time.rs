use super::*;

#[tokio::test]
async fn wait_is_position_times_slot_interval() {
    let f = test_setup();
    queue_posts(&f.queue, &["a", "b", "c"]);

    assert_eq!(f.queue.wait_time_for("a", ActivityType::Posts).unwrap(), Duration::ZERO);
    assert_eq!(
        f.queue.wait_time_for("c", ActivityType::Posts).unwrap(),
        Duration::from_secs(120)
    );
    assert_eq!(
        f.queue.global_wait_time(ActivityType::Posts),
        Duration::from_secs(180)
    );

    for (user, id) in [("a", 101), ("b", 102), ("c", 103)] {
        f.fetcher
            .push_fetch(user, Ok(vec![event(id, ActivityType::Posts)]));
    }

    // A full rotation later everyone is back where they started
    for _ in 0..3 {
        f.queue.dispatch_once(ActivityType::Posts).await;
    }
    assert_eq!(f.queue.queued_users(ActivityType::Posts), vec!["a", "b", "c"]);
    for (user, id) in [("a", 101), ("b", 102), ("c", 103)] {
        assert_eq!(
            f.queue.entry(user, ActivityType::Posts).unwrap().since_id,
            Some(id)
        );
    }
    assert_eq!(
        f.queue.wait_time_for("c", ActivityType::Posts).unwrap(),
        Duration::from_secs(120)
    );
}

#[test]
fn wait_for_unqueued_user_is_an_error() {
    let f = test_setup();
    queue_posts(&f.queue, &["a"]);

    assert_eq!(
        f.queue.wait_time_for("zed", ActivityType::Posts),
        Err(QueueError::NotQueued("zed".to_string(), ActivityType::Posts))
    );
    assert_eq!(
        f.queue.wait_time_for("a", ActivityType::Mentions),
        Err(QueueError::NotQueued("a".to_string(), ActivityType::Mentions))
    );
}

#[test]
fn global_wait_of_empty_rotation_is_zero() {
    let f = test_setup();
    assert_eq!(f.queue.global_wait_time(ActivityType::Mentions), Duration::ZERO);
}

#[test]
fn removal_moves_later_users_up() {
    let f = test_setup();
    queue_posts(&f.queue, &["a", "b", "c"]);

    f.queue.remove("a", ActivityType::Posts);

    assert_eq!(
        f.queue.wait_time_for("c", ActivityType::Posts).unwrap(),
        Duration::from_secs(60)
    );
}

#[test]
fn slot_interval_follows_configured_budget() {
    let mut config = test_config();
    config.mentions = BudgetConfig {
        window_secs: 60,
        quota: 12,
    };
    let f = test_setup_with_config(config);
    f.queue.add_to_queue(ActivityType::Mentions, test_entry("a", None));
    f.queue.add_to_queue(ActivityType::Mentions, test_entry("b", None));

    assert_eq!(f.queue.slot_interval(ActivityType::Mentions), Duration::from_secs(5));
    assert_eq!(
        f.queue.wait_time_for("b", ActivityType::Mentions).unwrap(),
        Duration::from_secs(5)
    );
}

#[tokio::test]
async fn in_flight_user_already_counts_from_the_tail() {
    let f = test_setup();
    queue_posts(&f.queue, &["a", "b", "c"]);
    f.fetcher.hold_fetches();

    let queue = f.queue.clone();
    let tick = tokio::spawn(async move { queue.dispatch_once(ActivityType::Posts).await });
    while f.fetcher.calls().is_empty() {
        tokio::task::yield_now().await;
    }

    assert_eq!(f.queue.wait_time_for("b", ActivityType::Posts).unwrap(), Duration::ZERO);
    assert_eq!(
        f.queue.wait_time_for("a", ActivityType::Posts).unwrap(),
        Duration::from_secs(120)
    );

    f.fetcher.release_one();
    tick.await.unwrap();
}
