mod util;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use wallet_engine::core::domain::KeyType;
use wallet_engine::keyring::{ImportStrategy, KeyringController};
use wallet_engine::storage::{keys, KeyValueStore, MemoryStore};
use wallet_engine::{WalletConfig, WalletError};

fn keyring(store: Arc<dyn KeyValueStore>) -> KeyringController {
    KeyringController::new(Arc::new(WalletConfig::for_testing()), store)
}

#[tokio::test]
async fn wrong_then_right_password() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let created = keyring(store.clone())
        .create_new_vault_and_keychain(util::PASSWORD)
        .await
        .unwrap();

    // a fresh controller over the same store simulates a restart
    let keyring = keyring(store);
    assert_eq!(keyring.unlock_keyrings("wrong").await.unwrap_err(), WalletError::InvalidPassword);
    assert!(!keyring.is_unlocked().await);
    assert_eq!(keyring.get_accounts().await.unwrap_err(), WalletError::Locked);

    keyring.unlock_keyrings(util::PASSWORD).await.unwrap();
    let accounts = keyring.get_accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].derivation_index, Some(0));
    assert_eq!(accounts, created);
}

#[tokio::test]
async fn restart_restores_identical_keyrings() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let first = keyring(store.clone());
    first.create_new_vault_and_restore(util::PASSWORD, util::PHRASE).await.unwrap();
    first.create_new_account().await.unwrap();
    let imported = first
        .import_account_strategy(ImportStrategy::PrivateKey {
            private_key: "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318".into(),
        })
        .await
        .unwrap();
    let before = first.get_accounts().await.unwrap();

    let second = keyring(store.clone());
    assert_eq!(second.get_store_accounts().await.unwrap().len(), 3);
    second.unlock_keyrings(util::PASSWORD).await.unwrap();
    assert_eq!(second.get_accounts().await.unwrap(), before);
    assert_eq!(second.get_selected_address().await.unwrap(), Some(imported));

    // the stored blob never carries the phrase in the clear
    let vault = store.get(keys::VAULT).await.unwrap().unwrap().to_string();
    assert!(!vault.contains("abandon"));
}

#[tokio::test]
async fn keystore_export_reimports_same_key() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let source = keyring(store);
    let accounts = source.create_new_vault_and_restore(util::PASSWORD, util::PHRASE).await.unwrap();
    let address = accounts[0].address;

    let private_key = source.export_key(address, KeyType::Private, util::PASSWORD).await.unwrap();
    let keystore = source.export_keystore_v3(&private_key, "keystore-pass").unwrap();

    let target = keyring(Arc::new(MemoryStore::new()));
    target.create_new_vault_and_keychain(util::PASSWORD).await.unwrap();
    let imported = target
        .import_account_strategy(ImportStrategy::Json { json: keystore.clone(), password: "keystore-pass".into() })
        .await
        .unwrap();
    assert_eq!(imported, address);

    let reexported = target.export_key(address, KeyType::Private, util::PASSWORD).await.unwrap();
    assert_eq!(reexported.as_str(), private_key.as_str());

    let err = target
        .import_account_strategy(ImportStrategy::Json { json: keystore, password: "keystore-pass".into() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "DuplicateAccount");
}

#[tokio::test]
async fn export_rechecks_password() {
    let keyring = keyring(Arc::new(MemoryStore::new()));
    let accounts = keyring.create_new_vault_and_keychain(util::PASSWORD).await.unwrap();
    let err = keyring.export_key(accounts[0].address, KeyType::Private, "stale").await.unwrap_err();
    assert_eq!(err, WalletError::InvalidPassword);

    let public = keyring.export_key(accounts[0].address, KeyType::Public, util::PASSWORD).await.unwrap();
    assert_eq!(public.as_str(), accounts[0].public_key);
}
