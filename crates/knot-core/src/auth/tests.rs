
    use super::*;

    #[test]
    fn test_register_and_validate_token() {
        let store = AuthStore::new();
        store
            .register_token(UserIdentity::new("alice"), "s3cret", "laptop")
            .unwrap();

        let identity = store.validate_token("s3cret").unwrap();
        assert_eq!(identity, UserIdentity::new("alice"));
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn test_invalid_token() {
        let store = AuthStore::new();
        let result = store.validate_token("invalid_token");
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[test]
    fn test_empty_token() {
        let store = AuthStore::new();
        let result = store.validate_token("");
        assert!(matches!(result, Err(AuthError::MissingCredentials)));
    }

    #[test]
    fn test_register_digest_from_config() {
        let store = AuthStore::new();
        let digest = AuthStore::hash_to_hex(&AuthStore::hash_token("from-config"));
        let stored = store
            .register_digest(UserIdentity::new("bob"), &digest.to_uppercase(), "config")
            .unwrap();

        assert_eq!(stored, digest);
        assert_eq!(
            store.validate_token("from-config").unwrap(),
            UserIdentity::new("bob")
        );
    }

    #[test]
    fn test_malformed_digest_rejected() {
        let store = AuthStore::new();
        assert!(matches!(
            store.register_digest(UserIdentity::new("bob"), "abc", "short"),
            Err(AuthError::Internal(_))
        ));
        let not_hex = "zz".repeat(32);
        assert!(store
            .register_digest(UserIdentity::new("bob"), &not_hex, "bad")
            .is_err());
        assert_eq!(store.active_token_count(), 0);
    }

    #[test]
    fn test_revoke_token() {
        let store = AuthStore::new();
        let hash = store
            .register_token(UserIdentity::new("alice"), "tok", "test")
            .unwrap();

        assert!(store.validate_token("tok").is_ok());

        store.revoke(&hash).unwrap();

        let result = store.validate_token("tok");
        assert!(matches!(result, Err(AuthError::TokenRevoked)));
        assert_eq!(store.active_token_count(), 0);
    }

    #[test]
    fn test_revoke_unknown_token() {
        let store = AuthStore::new();
        assert!(store.revoke("deadbeef").is_err());
    }

    #[test]
    fn test_list_tokens_hides_raw_token() {
        let store = AuthStore::new();
        store
            .register_token(UserIdentity::new("alice"), "raw-token-value", "a")
            .unwrap();
        store
            .register_token(UserIdentity::new("bob"), "other", "b")
            .unwrap();

        let list = store.list_tokens().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|t| t.token_hash.len() == 64));
        assert!(list.iter().all(|t| t.token_hash != "raw-token-value"));
    }

    #[test]
    fn test_hash_is_stable_sha256() {
        let hex = AuthStore::hash_to_hex(&AuthStore::hash_token("abc"));
        assert_eq!(
            hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_verifier_trait_object() {
        let store = AuthStore::new();
        store
            .register_token(UserIdentity::new("carol"), "t", "x")
            .unwrap();
        let verifier: std::sync::Arc<dyn CredentialVerifier> = std::sync::Arc::new(store);

        assert_eq!(
            verifier.verify("t").await.unwrap(),
            UserIdentity::new("carol")
        );
        assert!(verifier.verify("nope").await.is_err());
    }

    #[test]
    fn test_identity_display_and_ordering() {
        let a = UserIdentity::from("a");
        let b = UserIdentity::from("b".to_string());
        assert!(a < b);
        assert_eq!(a.to_string(), "a");
    }
