//! Routing Module Tests
//!
//! ## Test Scopes
//! - **Hash**: bit-for-bit compatibility of the rolling hash and its range.
//! - **Private mapper**: channel broadcast, query pinning and path hints.
//! - **Public mapper / keys**: shard 0 placement and key namespacing.

#[cfg(test)]
mod tests {
    use crate::routing::keys::KeyManager;
    use crate::routing::mapper::{hash_key, private_mapper, public_mapper, rolling_hash};
    use crate::routing::types::{Operation, Route, RoutingKey, ShardId};

    fn ids(count: usize) -> Vec<ShardId> {
        (0..count).map(ShardId).collect()
    }

    // ============================================================
    // HASH TESTS
    // ============================================================

    #[test]
    fn test_rolling_hash_matches_known_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        assert_eq!(rolling_hash("news"), 3_377_875);
        // Overflows into the negative range.
        assert_eq!(rolling_hash("sports"), -895_760_513);
        assert_eq!(rolling_hash("user:1"), -836_031_422);
    }

    #[test]
    fn test_hash_key_uses_absolute_value() {
        assert_eq!(hash_key("news", 2), 1);
        assert_eq!(hash_key("sports", 3), 2);
        assert_eq!(hash_key("user:1", 4), 2);
        assert_eq!(hash_key("weather", 2), 0);
    }

    #[test]
    fn test_hash_key_empty_input_is_zero() {
        assert_eq!(hash_key("", 5), 0);
        assert_eq!(hash_key("anything", 0), 0);
    }

    #[test]
    fn test_hash_key_hashes_utf16_units() {
        // One astral char is two UTF-16 code units.
        let expected = (0xD83Di32)
            .wrapping_mul(31)
            .wrapping_add(0xDE00);
        assert_eq!(rolling_hash("\u{1F600}"), expected);
    }

    #[test]
    fn test_hash_key_is_deterministic_and_in_range() {
        for i in 0..1000 {
            let key = format!("channel_{}", i);
            let first = hash_key(&key, 7);
            assert_eq!(first, hash_key(&key, 7));
            assert!(first < 7);
        }
    }

    // ============================================================
    // PRIVATE MAPPER TESTS
    // ============================================================

    #[test]
    fn test_private_mapper_broadcasts_channel_ops_without_key() {
        for op in [
            Operation::Publish,
            Operation::Subscribe,
            Operation::Unsubscribe,
            Operation::IsSubscribed,
        ] {
            assert_eq!(
                private_mapper(&RoutingKey::Absent, op, &ids(3)),
                Route::All(ids(3))
            );
        }
    }

    #[test]
    fn test_private_mapper_hashes_channel_name() {
        let route = private_mapper(&RoutingKey::from("news"), Operation::Subscribe, &ids(2));
        assert_eq!(route, Route::One(ShardId(1)));

        let route = private_mapper(&RoutingKey::from("news"), Operation::Publish, &ids(2));
        assert_eq!(route, Route::One(ShardId(1)), "publish follows subscribe");
    }

    #[test]
    fn test_private_mapper_query_uses_map_index() {
        let pinned = RoutingKey::Query {
            map_index: Some("sports".to_string()),
        };
        assert_eq!(
            private_mapper(&pinned, Operation::Query, &ids(3)),
            Route::One(ShardId(2))
        );
        assert_eq!(
            private_mapper(&pinned, Operation::Run, &ids(3)),
            Route::One(ShardId(2))
        );

        let unpinned = RoutingKey::Query { map_index: None };
        assert_eq!(
            private_mapper(&unpinned, Operation::Run, &ids(3)),
            Route::One(ShardId(0))
        );
    }

    #[test]
    fn test_private_mapper_path_uses_third_segment() {
        let path = RoutingKey::Path(vec![
            "__global".to_string(),
            "data".to_string(),
            "news".to_string(),
            "latest".to_string(),
        ]);
        assert_eq!(
            private_mapper(&path, Operation::Get, &ids(2)),
            Route::One(ShardId(1))
        );

        let short = RoutingKey::Path(vec!["__global".to_string(), "data".to_string()]);
        assert_eq!(
            private_mapper(&short, Operation::Get, &ids(4)),
            Route::All(ids(4))
        );
    }

    #[test]
    fn test_private_mapper_hashes_plain_data_key() {
        assert_eq!(
            private_mapper(&RoutingKey::from("sports"), Operation::Set, &ids(3)),
            Route::One(ShardId(2))
        );
    }

    // ============================================================
    // PUBLIC MAPPER / KEY TESTS
    // ============================================================

    #[test]
    fn test_public_mapper_always_shard_zero() {
        for key in ["news", "sports", "weather"] {
            assert_eq!(
                public_mapper(&RoutingKey::from(key), Operation::Set, &ids(5)),
                Route::One(ShardId(0))
            );
        }
        assert_eq!(
            public_mapper(&RoutingKey::Absent, Operation::Subscribe, &ids(5)),
            Route::One(ShardId(0))
        );
    }

    #[test]
    fn test_global_data_key_namespacing() {
        let keys = KeyManager::new();
        assert_eq!(keys.global_data_key(None), vec!["__global", "data"]);
        assert_eq!(
            keys.global_data_key(Some("users.42..name")),
            vec!["__global", "data", "users", "42", "name"]
        );
    }
}
