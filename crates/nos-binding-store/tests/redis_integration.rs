//! Redis backend integration tests.
//!
//! Run with a local server and `NOS_TEST_REDIS_URL` pointing at a scratch
//! database, e.g. `redis://127.0.0.1:6379/15`.

use nos_binding_store::{BindingKey, BindingStore, RedisBindingStore, StoreError};

async fn store() -> RedisBindingStore {
    let url = std::env::var("NOS_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();
    RedisBindingStore::connect(&url).await.unwrap()
}

#[tokio::test]
#[ignore = "Requires a Redis server"]
async fn test_redis_binding_lifecycle() {
    let store = store().await;
    let key = BindingKey::new("port:10", 100, "10.0.0.1", "vm-1");

    store.add_binding(&key).await.unwrap();
    assert!(matches!(
        store.add_binding(&key).await,
        Err(StoreError::Duplicate { .. })
    ));

    let rows = store.get_vlan_bindings(100, "10.0.0.1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].processed);

    store.process_binding(&key).await.unwrap();
    assert!(store.get_port_binding(&key).await.unwrap()[0].processed);

    store.remove_binding(&key).await.unwrap();
    assert!(store
        .get_vlan_bindings(100, "10.0.0.1")
        .await
        .unwrap_err()
        .is_not_found());

    // The uniqueness key was released with the row.
    store.add_binding(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "Requires a Redis server"]
async fn test_redis_update_binding_vlan_moves_unique_key() {
    let store = store().await;
    store
        .add_binding(&BindingKey::new("port:11", 100, "10.0.0.1", "vm-2"))
        .await
        .unwrap();

    store.update_binding_vlan("port:11", Some(200)).await.unwrap();

    assert!(store.get_vlan_bindings(100, "10.0.0.1").await.is_err());
    store
        .add_binding(&BindingKey::new("port:11", 100, "10.0.0.1", "vm-2"))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "Requires a Redis server"]
async fn test_redis_legacy_row_reads_unprocessed() {
    let store = store().await;
    let url = std::env::var("NOS_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();

    let () = redis::pipe()
        .hset_multiple(
            "NOS_PORT_BINDING:900",
            &[
                ("port_id", "port:1"),
                ("vlan_id", "10"),
                ("switch_ip", "10.0.0.9"),
                ("instance_id", "vm-0"),
            ],
        )
        .ignore()
        .sadd("NOS_PORT_BINDING_IDS", 900)
        .ignore()
        .query_async(&mut conn)
        .await
        .unwrap();

    let rows = store.get_vlan_bindings(10, "10.0.0.9").await.unwrap();
    assert_eq!(rows[0].binding_id, 900);
    assert!(!rows[0].processed);
}

#[tokio::test]
#[ignore = "Requires a Redis server"]
async fn test_redis_failed_insert_leaves_key_free() {
    let store = store().await;
    let url = std::env::var("NOS_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();

    // The next id is 42 and its row key holds a string, so HSET fails.
    let () = redis::pipe()
        .set("NOS_PORT_BINDING_SEQ", 41)
        .ignore()
        .set("NOS_PORT_BINDING:42", "not a hash")
        .ignore()
        .query_async(&mut conn)
        .await
        .unwrap();

    let key = BindingKey::new("port:10", 100, "10.0.0.1", "vm-1");
    assert!(matches!(
        store.add_binding(&key).await,
        Err(StoreError::Redis(_))
    ));
    let claimed: bool = redis::cmd("EXISTS")
        .arg("NOS_PORT_BINDING_KEY:port:10|100|10.0.0.1|vm-1")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!claimed);

    let row = store.add_binding(&key).await.unwrap();
    assert_eq!(row.binding_id, 43);
    assert_eq!(store.get_port_binding(&key).await.unwrap().len(), 1);
}
