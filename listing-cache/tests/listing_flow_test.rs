use bigdecimal::BigDecimal;
use listing_cache::events::Topic;
use listing_cache::repo::{ItemRepository, MemoryItemRepository};
use listing_cache::{
    AppState, CacheConfig, Dispatcher, IndexScope, ItemDraft, ItemUpdate, Listings, SortField,
};
use std::sync::Arc;

fn draft(category_id: i64, seller_id: i64, price: i64) -> ItemDraft {
    ItemDraft {
        category_id,
        seller_id,
        title: "vintage lamp".into(),
        description: "working".into(),
        condition: "used".into(),
        image_url: "http://img/lamp.png".into(),
        price: BigDecimal::from(price),
    }
}

#[tokio::test]
async fn create_serves_provisional_id_then_migrates_to_permanent() {
    let repo = Arc::new(MemoryItemRepository::with_next_id(108));
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let state = state.with_item_repository(repo.clone());
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    let provisional = listings.create_item(draft(3, 7, 50)).await.unwrap();
    assert!(provisional.item_id < 0);

    // Fully readable before any durable write happened.
    let read_back = listings.get_item(provisional.item_id).await.unwrap();
    assert_eq!(read_back.title, "vintage lamp");
    let ids = listings
        .cache()
        .page_by_index(IndexScope::Category(3), SortField::Price, 0, 10, false)
        .await
        .unwrap();
    assert_eq!(ids, vec![provisional.item_id]);

    dispatcher.drain(&mut rx).await;

    // Old id fully gone, permanent id everywhere, scores preserved.
    assert!(listings.get_item(provisional.item_id).await.is_err());
    let migrated = listings.get_item(108).await.unwrap();
    assert_eq!(migrated.title, "vintage lamp");
    for scope in [IndexScope::Category(3), IndexScope::OnSale, IndexScope::All] {
        let ids = listings
            .cache()
            .page_by_index(scope, SortField::Price, 0, 10, false)
            .await
            .unwrap();
        assert_eq!(ids, vec![108], "scope {scope}");
    }
    assert_eq!(listings.cache().seller_items(7).await.unwrap(), vec![108]);
    assert_eq!(state.metrics.migrations_completed.get(), 1);
    assert!(repo.find_by_id(108).await.unwrap().is_some());
}

#[tokio::test]
async fn category_move_is_exclusive() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    let item = listings.create_item(draft(3, 7, 50)).await.unwrap();
    dispatcher.drain(&mut rx).await;
    let item_id = listings
        .cache()
        .page_by_index(IndexScope::Category(3), SortField::Price, 0, 10, false)
        .await
        .unwrap()[0];

    listings
        .update_item(
            item_id,
            7,
            ItemUpdate {
                title: item.title.clone(),
                description: item.description.clone(),
                condition: item.condition.clone(),
                price: BigDecimal::from(55),
                category_id: 5,
                new_image_url: None,
            },
        )
        .await
        .unwrap();

    for field in SortField::ALL {
        let old = listings
            .cache()
            .page_by_index(IndexScope::Category(3), field, 0, 10, false)
            .await
            .unwrap();
        assert!(old.is_empty(), "stale membership in old category ({field:?})");
        let new = listings
            .cache()
            .page_by_index(IndexScope::Category(5), field, 0, 10, false)
            .await
            .unwrap();
        assert_eq!(new, vec![item_id]);
    }

    dispatcher.drain(&mut rx).await;
    let row = state.items.find_by_id(item_id).await.unwrap().unwrap();
    assert_eq!(row.category_id, 5);
    assert_eq!(row.price, BigDecimal::from(55));
}

#[tokio::test]
async fn favorites_persist_absolute_counts() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    listings.create_item(draft(1, 2, 30)).await.unwrap();
    dispatcher.drain(&mut rx).await;
    let item_id = listings.seller_items(2).await.unwrap()[0].item_id;

    listings.favorite(item_id).await.unwrap();
    listings.favorite(item_id).await.unwrap();
    listings.unfavorite(item_id).await.unwrap();
    dispatcher.drain(&mut rx).await;

    let row = state.items.find_by_id(item_id).await.unwrap().unwrap();
    assert_eq!(row.likes, 1);

    // Index score follows the cached count.
    let item = listings.get_item(item_id).await.unwrap();
    assert_eq!(item.likes, 1);
}

#[tokio::test]
async fn unfavorite_never_goes_negative() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    listings.create_item(draft(1, 2, 30)).await.unwrap();
    dispatcher.drain(&mut rx).await;
    let item_id = listings.seller_items(2).await.unwrap()[0].item_id;

    listings.unfavorite(item_id).await.unwrap();
    assert_eq!(listings.get_item(item_id).await.unwrap().likes, 0);
}

#[tokio::test]
async fn cold_index_page_falls_back_to_store_and_triggers_rebuild() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    // Rows exist durably but no index was ever written.
    for price in [30, 10, 20] {
        let item = state
            .items
            .insert(listing_cache::Item {
                item_id: 0,
                category_id: 9,
                seller_id: 1,
                title: format!("p{price}"),
                description: String::new(),
                condition: "used".into(),
                image_url: String::new(),
                price: BigDecimal::from(price),
                likes: 0,
                is_available: true,
                is_deleted: false,
                update_time: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert!(item.item_id > 0);
    }

    let (page, total) = listings
        .get_page(IndexScope::Category(9), SortField::Price, 0, 2, false)
        .await
        .unwrap();
    assert_eq!(total, 3);
    let prices: Vec<BigDecimal> = page.iter().map(|i| i.price.clone()).collect();
    assert_eq!(prices, vec![BigDecimal::from(10), BigDecimal::from(20)]);

    // A rebuild event was enqueued; after settling the index answers.
    let mut saw_rebuild = false;
    while let Ok(event) = rx.try_recv() {
        if event.topic == Topic::RebuildIndex {
            saw_rebuild = true;
        }
        dispatcher.dispatch(event).await;
    }
    assert!(saw_rebuild);
    assert_eq!(
        listings
            .cache()
            .index_count(IndexScope::Category(9), SortField::Price)
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn cold_page_ties_break_like_the_index() {
    let repo = Arc::new(MemoryItemRepository::with_next_id(9));
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let state = state.with_item_repository(repo);
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    // Two rows with the same price land at ids 9 and 10. The sorted index
    // orders equal scores by id string, so "10" sorts before "9".
    for _ in 0..2 {
        state
            .items
            .insert(listing_cache::Item {
                item_id: 0,
                category_id: 9,
                seller_id: 1,
                title: String::new(),
                description: String::new(),
                condition: "used".into(),
                image_url: String::new(),
                price: BigDecimal::from(25),
                likes: 0,
                is_available: true,
                is_deleted: false,
                update_time: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    let (cold, _) = listings
        .get_page(IndexScope::Category(9), SortField::Price, 0, 10, false)
        .await
        .unwrap();
    let cold_ids: Vec<i64> = cold.iter().map(|i| i.item_id).collect();
    assert_eq!(cold_ids, vec![10, 9]);

    dispatcher.drain(&mut rx).await;
    let warm_ids = listings
        .cache()
        .page_by_index(IndexScope::Category(9), SortField::Price, 0, 10, false)
        .await
        .unwrap();
    assert_eq!(warm_ids, cold_ids);
}

#[tokio::test]
async fn deleted_item_leaves_every_structure() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    listings.create_item(draft(4, 6, 80)).await.unwrap();
    dispatcher.drain(&mut rx).await;
    let item_id = listings.seller_items(6).await.unwrap()[0].item_id;

    listings.delete_item(item_id, 6, false).await.unwrap();

    assert!(listings.get_item(item_id).await.is_err());
    for scope in [IndexScope::Category(4), IndexScope::OnSale, IndexScope::All] {
        for field in SortField::ALL {
            assert_eq!(
                listings.cache().index_count(scope, field).await.unwrap(),
                0,
                "leftover membership in {scope} {field:?}"
            );
        }
    }
    assert!(listings.cache().seller_items(6).await.unwrap().is_empty());
    let row = state.items.find_by_id(item_id).await.unwrap();
    assert!(row.is_none(), "soft-deleted row must not be served");
}

#[tokio::test]
async fn non_owner_cannot_mutate() {
    let (state, mut rx) = AppState::in_memory(CacheConfig::default());
    let listings = Listings::new(state.clone());
    let dispatcher = Dispatcher::new(state.clone());

    listings.create_item(draft(1, 2, 10)).await.unwrap();
    dispatcher.drain(&mut rx).await;
    let item_id = listings.seller_items(2).await.unwrap()[0].item_id;

    assert!(matches!(
        listings.toggle_availability(item_id, false, 99).await,
        Err(listing_cache::CacheError::Forbidden { .. })
    ));
    assert!(matches!(
        listings.delete_item(item_id, 99, false).await,
        Err(listing_cache::CacheError::Forbidden { .. })
    ));
}
