use bigdecimal::BigDecimal;
use chrono::Utc;
use listing_cache::events::Topic;
use listing_cache::{
    AppState, CacheConfig, CacheError, Dispatcher, IndexScope, Item, ItemCache, LockMode,
    ReservationCoordinator, SortField,
};

fn test_item(item_id: i64, category_id: i64, seller_id: i64, price: i64) -> Item {
    Item {
        item_id,
        category_id,
        seller_id,
        title: format!("item {item_id}"),
        description: "test".into(),
        condition: "good".into(),
        image_url: "http://img/1.png".into(),
        price: BigDecimal::from(price),
        likes: 0,
        is_available: true,
        is_deleted: false,
        update_time: Utc::now(),
    }
}

#[tokio::test]
async fn concurrent_reservations_admit_exactly_one_buyer() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let cache = ItemCache::new(state.clone());
    let item = test_item(42, 3, 7, 120);
    cache.put(&item).await.unwrap();
    cache.index_upsert(&item, None).await.unwrap();

    let coordinator = ReservationCoordinator::new(state.clone());
    let mut handles = Vec::new();
    for buyer_id in 100..110 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(
            async move { coordinator.reserve(42, buyer_id).await },
        ));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => {
                wins += 1;
                assert_eq!(order.item_id, 42);
                assert_eq!(order.amount, BigDecimal::from(120));
            }
            Err(CacheError::AlreadyReserved(42)) | Err(CacheError::LockUnavailable(42)) => {
                conflicts += 1
            }
            Err(other) => panic!("unexpected reservation error: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 9);

    // Winner removed the item from both on-sale scopes but not from "all".
    assert_eq!(
        cache
            .index_count(IndexScope::OnSale, SortField::Price)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        cache
            .index_count(IndexScope::Category(3), SortField::Price)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        cache
            .index_count(IndexScope::All, SortField::Price)
            .await
            .unwrap(),
        1
    );

    let mut create_orders = 0;
    while let Ok(event) = rx.try_recv() {
        if event.topic == Topic::CreateOrder {
            create_orders += 1;
        }
    }
    assert_eq!(create_orders, 1);
    assert_eq!(state.metrics.reservation_success.get(), 1);
}

#[tokio::test]
async fn reservation_marks_the_durable_row_sold() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let cache = ItemCache::new(state.clone());
    let item = test_item(42, 3, 7, 120);
    state.items.save(item.clone()).await.unwrap();
    cache.put(&item).await.unwrap();
    cache.index_upsert(&item, None).await.unwrap();

    let coordinator = ReservationCoordinator::new(state.clone());
    let order = coordinator.reserve(42, 100).await.unwrap();
    Dispatcher::new(state.clone()).drain(&mut rx).await;

    // The flip must outlive the cache entry. A row still marked available
    // would be re-served once the reserved entry's TTL runs out.
    let row = state.items.find_by_id(42).await.unwrap().unwrap();
    assert!(!row.is_available);
    let saved = state.orders.find_by_id(&order.order_id).await.unwrap();
    assert!(saved.is_some());
}

#[tokio::test]
async fn seller_cannot_reserve_own_item() {
    let (state, _rx) = AppState::in_memory(CacheConfig::default());
    let cache = ItemCache::new(state.clone());
    let item = test_item(5, 1, 9, 40);
    cache.put(&item).await.unwrap();

    let coordinator = ReservationCoordinator::new(state);
    match coordinator.reserve(5, 9).await {
        Err(CacheError::SelfPurchase { item_id: 5, buyer_id: 9 }) => {}
        other => panic!("expected SelfPurchase, got {other:?}"),
    }
}

#[tokio::test]
async fn reserving_missing_item_is_not_found() {
    let (state, _rx) = AppState::in_memory(CacheConfig::default());
    let coordinator = ReservationCoordinator::new(state);
    assert!(matches!(
        coordinator.reserve(404, 1).await,
        Err(CacheError::NotFound(_))
    ));
}

#[tokio::test]
async fn reserved_item_rejects_later_buyers() {
    let (state, _rx) = AppState::in_memory(CacheConfig::default());
    let cache = ItemCache::new(state.clone());
    let item = test_item(8, 2, 3, 15);
    cache.put(&item).await.unwrap();
    cache.index_upsert(&item, None).await.unwrap();

    let coordinator = ReservationCoordinator::new(state);
    coordinator.reserve(8, 50).await.unwrap();
    assert!(matches!(
        coordinator.reserve(8, 51).await,
        Err(CacheError::AlreadyReserved(8))
    ));
}

#[tokio::test]
async fn disabled_lock_mode_still_reserves_and_is_flagged() {
    let config = CacheConfig {
        lock_mode: LockMode::Disabled,
        ..CacheConfig::default()
    };
    let (state, _rx) = AppState::in_memory(config);
    let cache = ItemCache::new(state.clone());
    let item = test_item(11, 4, 2, 60);
    cache.put(&item).await.unwrap();
    cache.index_upsert(&item, None).await.unwrap();

    let coordinator = ReservationCoordinator::new(state.clone());
    coordinator.reserve(11, 77).await.unwrap();
    assert!(state.metrics.reservation_degraded.get() >= 1);
    assert!(matches!(
        coordinator.reserve(11, 78).await,
        Err(CacheError::AlreadyReserved(11))
    ));
}
