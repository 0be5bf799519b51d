//! End-to-end fulfillment tests against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Duration;
use chrono::Utc;
use common::{CredentialId, UserId};
use domain::{CartItem, CredentialRecord, OrderStatus, Points, ProductId};
use fulfillment::{FulfillmentEngine, FulfillmentError, TransactionRequest};
use store::{
    BalanceLedger, CredentialStore, MemoryStore, OrderLedger, ProductCatalog, StoreError,
};

type MemoryEngine = FulfillmentEngine<MemoryStore, MemoryStore, MemoryStore>;

fn engine(store: &MemoryStore) -> MemoryEngine {
    FulfillmentEngine::new(store.clone(), store.clone(), store.clone())
}

/// Opt-in log output: `RUST_LOG=debug cargo test -p fulfillment`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Seeds a product with `n` credentials at strictly increasing creation
/// times and returns their ids in creation order.
async fn seed_pool(store: &MemoryStore, product: &str, n: usize) -> Vec<CredentialId> {
    store
        .upsert_product(&ProductId::new(product), product)
        .await
        .unwrap();

    let base = Utc::now();
    let mut ids = Vec::new();
    for i in 0..n {
        let mut cred = CredentialRecord::new(product, format!("acct{i}@mail.test"), "hunter2");
        cred.created_at = base + Duration::seconds(i as i64);
        ids.push(cred.id);
        store.insert_credential(cred).await.unwrap();
    }
    ids
}

async fn buyer_with(store: &MemoryStore, balance: i64) -> UserId {
    let user = UserId::new();
    store.credit(user, Points::new(balance)).await.unwrap();
    user
}

fn request(user: UserId, items: Vec<CartItem>) -> TransactionRequest {
    TransactionRequest {
        user_id: user,
        user_email: "buyer@mail.test".to_string(),
        items,
    }
}

#[tokio::test]
async fn test_happy_path_sells_and_debits() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 3).await;
    let user = buyer_with(&store, 500).await;

    let receipt = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix 1 Month", Points::new(75), 2)],
        ))
        .await
        .unwrap();

    assert_eq!(receipt.order.status, OrderStatus::Completed);
    assert!(receipt.order.completed_at.is_some());
    assert_eq!(receipt.order.total.amount(), 150);
    assert_eq!(receipt.processed_items.len(), 1);
    assert_eq!(receipt.processed_items[0].credentials.len(), 2);

    // Exactly two sold, one still available.
    assert_eq!(store.sold_count(), 2);
    assert_eq!(
        store
            .count_unsold(&ProductId::new("netflix-1m"))
            .await
            .unwrap(),
        1
    );

    // Balance debited by exactly the total.
    assert_eq!(store.balance(user).await.unwrap().amount(), 350);

    // The durable order matches the receipt.
    let stored = store.get_order(receipt.order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Completed);
    let items = store.get_items(receipt.order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].credential_ids.len(), 2);
}

#[tokio::test]
async fn test_oldest_credential_is_assigned_first() {
    let store = MemoryStore::new();
    let ids = seed_pool(&store, "netflix-1m", 2).await;
    let user = buyer_with(&store, 500).await;

    let receipt = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await
        .unwrap();

    assert_eq!(receipt.processed_items[0].credentials[0].id, ids[0]);
    let newer = store.get_credential(ids[1]).await.unwrap().unwrap();
    assert!(newer.is_available());
}

#[tokio::test]
async fn test_multi_line_cart_fulfills_each_product() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 2).await;
    seed_pool(&store, "spotify-1m", 1).await;
    let user = buyer_with(&store, 1_000).await;

    let receipt = engine(&store)
        .process_transaction(request(
            user,
            vec![
                CartItem::new("netflix-1m", "Netflix", Points::new(75), 2),
                CartItem::new("spotify-1m", "Spotify", Points::new(40), 1),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(receipt.order.total.amount(), 190);
    assert_eq!(receipt.processed_items.len(), 2);
    assert_eq!(receipt.processed_items[0].credentials.len(), 2);
    assert_eq!(receipt.processed_items[1].credentials.len(), 1);
    for processed in &receipt.processed_items {
        assert!(processed.item.is_fully_assigned());
        for cred in &processed.credentials {
            assert!(cred.is_sold);
            assert_eq!(cred.order_id, Some(receipt.order.id));
        }
    }
    assert_eq!(store.sold_count(), 3);
    assert_eq!(store.balance(user).await.unwrap().amount(), 810);
}

#[tokio::test]
async fn test_shortfall_is_rejected_with_detail() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 1).await;
    let user = buyer_with(&store, 500).await;

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 2)],
        ))
        .await;

    match result {
        Err(FulfillmentError::InsufficientStock { issues }) => {
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].available(), 1);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // Nothing was created or sold, balance untouched.
    assert_eq!(store.order_count(), 0);
    assert_eq!(store.sold_count(), 0);
    assert_eq!(store.balance(user).await.unwrap().amount(), 500);
}

#[tokio::test]
async fn test_insufficient_balance_rejected_with_deficit() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 3).await;
    let user = buyer_with(&store, 100).await;

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(75), 2)],
        ))
        .await;

    match result {
        Err(FulfillmentError::InsufficientBalance { deficit }) => {
            assert_eq!(deficit.amount(), 50);
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }
    assert_eq!(store.order_count(), 0);
    assert_eq!(store.sold_count(), 0);
    assert_eq!(store.balance(user).await.unwrap().amount(), 100);
}

#[tokio::test]
async fn test_claim_failure_cancels_order_and_releases() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 2).await;
    let user = buyer_with(&store, 500).await;
    store.set_fail_on_claim(true);

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await;

    assert!(matches!(result, Err(FulfillmentError::SoldMarkingFailed(_))));

    // The order exists but is cancelled; no credential stayed sold and
    // the balance was never touched.
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.sold_count(), 0);
    assert_eq!(store.balance(user).await.unwrap().amount(), 500);
}

#[tokio::test]
async fn test_link_failure_rolls_back_claimed_credentials() {
    let store = MemoryStore::new();
    let ids = seed_pool(&store, "netflix-1m", 2).await;
    let user = buyer_with(&store, 500).await;
    store.set_fail_on_link(true);

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 2)],
        ))
        .await;

    assert!(matches!(result, Err(FulfillmentError::LinkingFailed(_))));
    assert_eq!(store.sold_count(), 0);
    for id in ids {
        let cred = store.get_credential(id).await.unwrap().unwrap();
        assert!(cred.is_available());
        assert!(cred.order_id.is_none());
    }
    assert_eq!(store.balance(user).await.unwrap().amount(), 500);
}

#[tokio::test]
async fn test_debit_failure_rolls_back_everything() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 1).await;
    let user = buyer_with(&store, 500).await;
    store.set_fail_on_debit(true);

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await;

    assert!(matches!(result, Err(FulfillmentError::BalanceDebitFailed(_))));
    assert_eq!(store.sold_count(), 0);
    assert_eq!(store.balance(user).await.unwrap().amount(), 500);
    // The attempt left only a cancelled order behind.
    assert_eq!(store.order_count(), 1);
}

#[tokio::test]
async fn test_item_insert_failure_deletes_the_order() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 1).await;
    let user = buyer_with(&store, 500).await;
    store.set_fail_on_insert_items(true);

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await;

    assert!(matches!(result, Err(FulfillmentError::ItemCreationFailed(_))));
    // The bare order was deleted, not cancelled.
    assert_eq!(store.order_count(), 0);
    assert_eq!(store.sold_count(), 0);
}

#[tokio::test]
async fn test_completion_failure_keeps_goods_and_debit() {
    let store = MemoryStore::new();
    let ids = seed_pool(&store, "netflix-1m", 1).await;
    let user = buyer_with(&store, 500).await;
    store.set_fail_on_complete(true);

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await;

    let order_id = match result {
        Err(FulfillmentError::CompletionFailed { order_id, .. }) => order_id,
        other => panic!("expected CompletionFailed, got {other:?}"),
    };

    // Debit and claim are durable; the order stays pending with its
    // credentials linked, awaiting reconciliation. Nothing was undone.
    assert_eq!(store.balance(user).await.unwrap().amount(), 450);
    let cred = store.get_credential(ids[0]).await.unwrap().unwrap();
    assert!(cred.is_sold);
    assert_eq!(cred.order_id, Some(order_id));

    let order = store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    let items = store.get_items(order_id).await.unwrap();
    assert_eq!(items[0].credential_ids, vec![ids[0]]);
}

#[tokio::test]
async fn test_processing_transition_failure_rolls_back() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 1).await;
    let user = buyer_with(&store, 500).await;
    store.set_fail_on_mark_processing(true);

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await;

    assert!(matches!(result, Err(FulfillmentError::Store(_))));
    // No credential was touched yet; the order is cancelled.
    assert_eq!(store.sold_count(), 0);
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.balance(user).await.unwrap().amount(), 500);
}

#[tokio::test]
async fn test_rollback_failure_does_not_mask_the_cause() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 1).await;
    let user = buyer_with(&store, 500).await;
    store.set_fail_on_debit(true);
    store.set_fail_on_cancel(true);
    store.set_fail_on_release(true);

    let result = engine(&store)
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await;

    // The original debit failure surfaces even though both compensation
    // legs failed too.
    assert!(matches!(result, Err(FulfillmentError::BalanceDebitFailed(_))));
}

/// Balance port whose debit always loses to a concurrent spend and whose
/// backend drops after the first read, so only the precondition check
/// sees a balance.
struct FlakyBalances {
    inner: MemoryStore,
    reads: AtomicUsize,
}

#[async_trait]
impl BalanceLedger for FlakyBalances {
    async fn balance(&self, user_id: UserId) -> store::Result<Points> {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            self.inner.balance(user_id).await
        } else {
            Err(StoreError::backend("connection lost"))
        }
    }

    async fn credit(&self, user_id: UserId, amount: Points) -> store::Result<()> {
        self.inner.credit(user_id, amount).await
    }

    async fn try_debit(&self, _user_id: UserId, _amount: Points) -> store::Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_failed_deficit_read_surfaces_store_error() {
    let store = MemoryStore::new();
    seed_pool(&store, "netflix-1m", 1).await;
    let user = buyer_with(&store, 500).await;

    let balances = FlakyBalances {
        inner: store.clone(),
        reads: AtomicUsize::new(0),
    };
    let engine = FulfillmentEngine::new(store.clone(), store.clone(), balances);

    let result = engine
        .process_transaction(request(
            user,
            vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
        ))
        .await;

    // The failed re-read must not masquerade as a deficit figure.
    assert!(matches!(result, Err(FulfillmentError::Store(_))));
    assert_eq!(store.sold_count(), 0);
}

#[tokio::test]
async fn test_two_buyers_one_credential() {
    init_tracing();
    let store = MemoryStore::new();
    seed_pool(&store, "disney-1m", 1).await;
    let alice = buyer_with(&store, 500).await;
    let bob = buyer_with(&store, 500).await;

    let cart =
        |user: UserId| request(user, vec![CartItem::new("disney-1m", "Disney", Points::new(50), 1)]);

    let store_a = store.clone();
    let store_b = store.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { engine(&store_a).process_transaction(cart(alice)).await }),
        tokio::spawn(async move { engine(&store_b).process_transaction(cart(bob)).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one buyer should get the credential");
    assert_eq!(store.sold_count(), 1);

    for result in &results {
        match result {
            Ok(receipt) => {
                assert_eq!(receipt.order.status, OrderStatus::Completed);
                let stored = store.get_order(receipt.order.id).await.unwrap().unwrap();
                assert_eq!(stored.status, OrderStatus::Completed);
            }
            Err(e) => {
                // The loser failed on stock, either up front or at claim
                // time, and nothing of theirs survived.
                assert!(
                    matches!(
                        e,
                        FulfillmentError::InsufficientStock { .. }
                            | FulfillmentError::AccountAssignmentFailed { .. }
                    ),
                    "unexpected loser error: {e:?}"
                );
            }
        }
    }

    // Exactly one balance was debited.
    let spent = 1_000
        - store.balance(alice).await.unwrap().amount()
        - store.balance(bob).await.unwrap().amount();
    assert_eq!(spent, 50);
}

#[tokio::test]
async fn test_contention_never_double_sells() {
    init_tracing();
    let store = MemoryStore::new();
    let pool = seed_pool(&store, "netflix-1m", 3).await;

    // Eight buyers chase three credentials.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let user = buyer_with(&store, 500).await;
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let result = engine(&store)
                .process_transaction(request(
                    user,
                    vec![CartItem::new("netflix-1m", "Netflix", Points::new(50), 1)],
                ))
                .await;
            (user, result)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (user, result) = handle.await.unwrap();
        if let Ok(receipt) = result {
            winners.push((user, receipt));
        }
    }

    // Never more sales than stock.
    assert!(winners.len() <= 3);
    assert_eq!(store.sold_count(), winners.len());

    // Each sold credential belongs to exactly one completed order, and
    // each winner paid exactly once.
    let mut seen = Vec::new();
    for (user, receipt) in &winners {
        assert_eq!(store.balance(*user).await.unwrap().amount(), 450);
        for cred in &receipt.processed_items[0].credentials {
            assert!(pool.contains(&cred.id));
            assert!(!seen.contains(&cred.id), "credential sold twice");
            seen.push(cred.id);
        }
    }

    // Every remaining credential is cleanly available again.
    for id in pool {
        let cred = store.get_credential(id).await.unwrap().unwrap();
        assert!(cred.is_consistent());
        if !seen.contains(&id) {
            assert!(cred.is_available());
        }
    }
}
