mod util;

use ethers::types::{Address, U256};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;
use wallet_engine::transaction::{TransactionMeta, TransactionStatus, TxParams};
use wallet_engine::{Request, Response, WalletError};

fn transfer(from: Address) -> TxParams {
    TxParams {
        from,
        to: Some("0xabcabcabcabcabcabcabcabcabcabcabcabcabca".parse().unwrap()),
        value: Some(U256::exp10(18)),
        ..Default::default()
    }
}

async fn funded(t: &util::TestApp) -> Address {
    t.app.keyring.create_new_vault_and_restore(util::PASSWORD, util::PHRASE).await.unwrap()[0].address
}

async fn wait_for(t: &util::TestApp, id: Uuid, status: TransactionStatus) -> TransactionMeta {
    for _ in 0..300 {
        let meta = t.app.transactions.get_transaction(id).unwrap();
        if meta.status == status {
            return meta;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {:?}", id, status);
}

#[tokio::test]
async fn transfer_on_mainnet_is_confirmed() {
    let t = util::start(Some(util::one_gwei())).await;
    let from = funded(&t).await;

    let added = t.app.transactions.add_unapproved_transaction(transfer(from)).await.unwrap();
    assert_eq!(added.status, TransactionStatus::Unapproved);
    assert_eq!(added.chain_id, 1);

    let submitted = t.app.transactions.approve_transaction(added.id).await.unwrap();
    assert_eq!(submitted.status, TransactionStatus::Submitted);
    let hash = submitted.hash.expect("hash recorded");

    let confirmed = wait_for(&t, added.id, TransactionStatus::Confirmed).await;
    assert_eq!(confirmed.hash, Some(hash));
    assert!(confirmed.block_number.is_some());
    let path: Vec<_> = confirmed.history.iter().map(|c| c.status).collect();
    assert_eq!(
        path,
        vec![
            TransactionStatus::Unapproved,
            TransactionStatus::Signed,
            TransactionStatus::Submitted,
            TransactionStatus::Confirmed
        ]
    );
    t.app.teardown().await;
}

#[tokio::test]
async fn concurrent_sends_get_contiguous_nonces() {
    let t = util::start(Some(util::one_gwei())).await;
    let from = funded(&t).await;
    // widen the window between nonce lookup and broadcast
    t.mock.set_delay(Some(Duration::from_millis(3)));

    const N: usize = 8;
    let sends = (0..N).map(|_| t.app.transactions.send_raw_transaction(transfer(from)));
    let results = join_all(sends).await;

    let nonces: BTreeSet<u64> = results
        .into_iter()
        .map(|r| r.unwrap().tx_params.nonce.unwrap().as_u64())
        .collect();
    assert_eq!(nonces, (0..N as u64).collect::<BTreeSet<_>>());
    assert_eq!(t.mock.call_count("eth_sendRawTransaction"), N);
    t.app.teardown().await;
}

#[tokio::test]
async fn nonce_survives_restart_through_store() {
    let t = util::start(None).await;
    let from = funded(&t).await;
    t.app.transactions.send_raw_transaction(transfer(from)).await.unwrap();
    t.app.transactions.send_raw_transaction(transfer(from)).await.unwrap();
    t.app.teardown().await;

    // node still reports 0 pending, the persisted mark wins
    let store = t.store.clone();
    let restarted = wallet_engine::WalletApp::start(
        wallet_engine::WalletConfig::for_testing(),
        store,
        wallet_engine::provider::testing::MockTransportFactory::single(t.mock.clone()),
    )
    .await
    .unwrap();
    restarted.keyring.unlock_keyrings(util::PASSWORD).await.unwrap();
    let meta = restarted.transactions.send_raw_transaction(transfer(from)).await.unwrap();
    assert_eq!(meta.tx_params.nonce, Some(U256::from(2)));
    restarted.teardown().await;
}

#[tokio::test]
async fn gas_too_low_fails_without_advancing_nonce() {
    let t = util::start(None).await;
    let from = funded(&t).await;
    t.mock.on_error(
        "eth_sendRawTransaction",
        WalletError::from_rpc(-32000, "intrinsic gas too low"),
    );

    let err = t.app.transactions.send_raw_transaction(transfer(from)).await.unwrap_err();
    assert_eq!(err.kind(), "GasTooLow");
    assert_eq!(t.mock.call_count("eth_sendRawTransaction"), 1);

    // the next send reuses nonce 0
    t.mock.on("eth_sendRawTransaction", json!(format!("{:?}", ethers::types::H256::repeat_byte(7))));
    let meta = t.app.transactions.send_raw_transaction(transfer(from)).await.unwrap();
    assert_eq!(meta.tx_params.nonce, Some(U256::zero()));
    t.app.teardown().await;
}

#[tokio::test]
async fn locked_vault_cannot_sign() {
    let t = util::start(None).await;
    let from = funded(&t).await;
    t.app.keyring.set_locked().await;

    let err = t.app.transactions.send_raw_transaction(transfer(from)).await.unwrap_err();
    assert_eq!(err, WalletError::Locked);
    assert_eq!(t.mock.call_count("eth_sendRawTransaction"), 0);
    let metas = t.app.transactions.get_transactions();
    assert_eq!(metas[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn send_through_message_protocol() {
    let t = util::start(Some(util::one_gwei())).await;
    let from = funded(&t).await;

    let request: Request = serde_json::from_value(json!({
        "type": "sendRawTransaction",
        "payload": {
            "from": from,
            "to": "0xabcabcabcabcabcabcabcabcabcabcabcabcabca",
            "value": "0xde0b6b3a7640000"
        }
    }))
    .unwrap();
    let response = t.app.handle(request).await;
    let Response::Result { result } = response else { panic!("send failed: {:?}", response) };
    assert_eq!(result["status"], json!("submitted"));
    assert_eq!(result["chainId"], json!(1));

    let list = t.app.handle(Request::GetTransactions).await;
    let Response::Result { result } = list else { panic!("list failed") };
    assert_eq!(result.as_array().map(Vec::len), Some(1));
    t.app.teardown().await;
}
