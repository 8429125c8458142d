mod util;

use pretty_assertions::assert_eq;
use std::time::Duration;
use wallet_engine::gas::GasFeeEstimate;
use wallet_engine::WalletError;

#[tokio::test]
async fn pre_london_chain_never_gets_fee_market() {
    let t = util::start(None).await;
    let estimate = t.app.gas.fetch_gas_fee_estimates().await.unwrap();
    assert!(!estimate.is_eip1559());
    assert!(matches!(estimate, GasFeeEstimate::EthGasPrice(_)));
    assert_eq!(t.mock.call_count("eth_feeHistory"), 0);
    t.app.teardown().await;
}

#[tokio::test]
async fn london_chain_gets_three_tiers() {
    let t = util::start(Some(util::one_gwei())).await;
    let GasFeeEstimate::FeeMarket(market) = t.app.gas.fetch_gas_fee_estimates().await.unwrap() else {
        panic!("expected fee market estimate");
    };
    assert!(market.low.max_priority_fee_per_gas <= market.medium.max_priority_fee_per_gas);
    assert!(market.medium.max_priority_fee_per_gas <= market.high.max_priority_fee_per_gas);
    t.app.teardown().await;
}

#[tokio::test]
async fn last_token_stops_scheduled_fetches() {
    let t = util::start(None).await;
    let (first, _) = t.app.gas.get_gas_fee_estimates_and_start_polling().await.unwrap();
    let (second, _) = t.app.gas.get_gas_fee_estimates_and_start_polling().await.unwrap();
    assert_ne!(first, second);

    tokio::time::sleep(Duration::from_millis(180)).await;
    t.app.gas.disconnect_poller(first).await.unwrap();
    assert!(t.app.gas.is_polling().await, "one subscriber left");

    t.app.gas.disconnect_poller(second).await.unwrap();
    assert!(!t.app.gas.is_polling().await);

    let settled = t.mock.call_count("eth_gasPrice");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(t.mock.call_count("eth_gasPrice"), settled);

    let err = t.app.gas.disconnect_poller(first).await.unwrap_err();
    assert_eq!(err.kind(), "UnknownToken");
    t.app.teardown().await;
}

#[tokio::test]
async fn time_estimate_needs_history() {
    let t = util::start(Some(util::one_gwei())).await;
    let err = t.app.gas.get_time_estimate(util::one_gwei(), util::one_gwei()).await.unwrap_err();
    assert_eq!(err, WalletError::NoFeeHistory);

    t.app.gas.fetch_gas_fee_estimates().await.unwrap();
    let generous = t
        .app
        .gas
        .get_time_estimate(util::one_gwei() * 10, util::one_gwei() * 20)
        .await
        .unwrap();
    assert_eq!(generous.lower_bound_seconds, 0);
    t.app.teardown().await;
}
