mod common;

use common::{config, key, ledger_for, payment, start};
use walletflow::config::{DedupePolicy, PipelineConfig};
use walletflow::domain::balance::Balance;
use walletflow::domain::transaction::TransactionType;
use walletflow::infrastructure::in_memory::{InMemoryBalanceStore, InMemoryEventLog};

#[tokio::test]
async fn test_sufficient_funds_credit_recipient() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let mut pipeline = start(config(4), &log, &store).await;
    let producer = pipeline.producer();

    producer
        .seed_credit(&key("A"), 100, "open", "opening balance")
        .await
        .unwrap();
    producer
        .submit_payment(&key("A"), &payment(30, "B", "p-1"))
        .await
        .unwrap();
    pipeline.run_until_idle().await.unwrap();

    assert_eq!(pipeline.balance(&key("A")).await.unwrap(), Balance::new(70));
    assert_eq!(pipeline.balance(&key("B")).await.unwrap(), Balance::new(30));

    let received = ledger_for(&log, 4, &key("B")).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].r#type, TransactionType::Credit);
    assert_eq!(received[0].amount, 30);
    assert_eq!(received[0].reference, "p-1");
}

#[tokio::test]
async fn test_insufficient_funds_reverse_to_payer() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let mut pipeline = start(config(4), &log, &store).await;
    let producer = pipeline.producer();

    producer
        .seed_credit(&key("A"), 10, "open", "opening balance")
        .await
        .unwrap();
    producer
        .submit_payment(&key("A"), &payment(30, "B", "p-1"))
        .await
        .unwrap();
    pipeline.run_until_idle().await.unwrap();

    assert_eq!(pipeline.balance(&key("A")).await.unwrap(), Balance::new(10));
    assert_eq!(pipeline.balance(&key("B")).await.unwrap(), Balance::ZERO);
    assert!(ledger_for(&log, 4, &key("B")).await.is_empty());

    let history = ledger_for(&log, 4, &key("A")).await;
    let types: Vec<_> = history.iter().map(|tx| (tx.r#type, tx.amount)).collect();
    assert_eq!(
        types,
        vec![
            (TransactionType::Credit, 10),
            (TransactionType::Debit, 30),
            (TransactionType::Credit, 30),
        ]
    );
    // The reversal carries the debit's correlation id.
    assert_eq!(history[1].correlation_id, history[2].correlation_id);
}

#[tokio::test]
async fn test_exact_balance_is_sufficient() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let mut pipeline = start(config(2), &log, &store).await;
    let producer = pipeline.producer();

    producer.seed_credit(&key("A"), 30, "open", "").await.unwrap();
    producer
        .submit_payment(&key("A"), &payment(30, "B", "p-1"))
        .await
        .unwrap();
    pipeline.run_until_idle().await.unwrap();

    assert_eq!(pipeline.balance(&key("A")).await.unwrap(), Balance::ZERO);
    assert_eq!(pipeline.balance(&key("B")).await.unwrap(), Balance::new(30));
}

#[tokio::test]
async fn test_credits_never_retrigger() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let mut pipeline = start(config(3), &log, &store).await;
    let producer = pipeline.producer();

    producer.seed_credit(&key("A"), 50, "open", "").await.unwrap();
    producer
        .submit_payment(&key("A"), &payment(20, "B", "p-1"))
        .await
        .unwrap();
    producer
        .submit_payment(&key("A"), &payment(100, "B", "p-2"))
        .await
        .unwrap();

    // 2 payments + seed credit + 2 debits + 2 resulting credits
    assert_eq!(pipeline.run_until_idle().await.unwrap(), 7);
    assert_eq!(pipeline.run_until_idle().await.unwrap(), 0);
    assert_eq!(pipeline.lag().await.unwrap(), 0);

    assert_eq!(ledger_for(&log, 3, &key("A")).await.len(), 4);
    assert_eq!(ledger_for(&log, 3, &key("B")).await.len(), 1);
    assert_eq!(pipeline.balance(&key("A")).await.unwrap(), Balance::new(30));
    assert_eq!(pipeline.balance(&key("B")).await.unwrap(), Balance::new(20));
}

#[tokio::test]
async fn test_debits_for_one_account_apply_in_order() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let mut pipeline = start(config(4), &log, &store).await;
    let producer = pipeline.producer();

    producer.seed_credit(&key("A"), 50, "open", "").await.unwrap();
    for (i, amount) in [20, 20, 20].into_iter().enumerate() {
        producer
            .submit_payment(&key("A"), &payment(amount, "B", &format!("p-{i}")))
            .await
            .unwrap();
    }
    pipeline.run_until_idle().await.unwrap();

    // The third debit takes A to -10 and is the only one reversed.
    assert_eq!(pipeline.balance(&key("A")).await.unwrap(), Balance::new(10));
    assert_eq!(pipeline.balance(&key("B")).await.unwrap(), Balance::new(40));
    let reversed: Vec<_> = ledger_for(&log, 4, &key("A"))
        .await
        .into_iter()
        .filter(|tx| tx.r#type == TransactionType::Credit && tx.reference.starts_with("p-"))
        .map(|tx| tx.reference)
        .collect();
    assert_eq!(reversed, vec!["p-2".to_string()]);
}

#[tokio::test]
async fn test_forwarded_funds_can_be_spent_downstream() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let mut pipeline = start(config(4), &log, &store).await;
    let producer = pipeline.producer();

    producer.seed_credit(&key("A"), 100, "open", "").await.unwrap();
    producer
        .submit_payment(&key("A"), &payment(60, "B", "p-1"))
        .await
        .unwrap();
    pipeline.run_until_idle().await.unwrap();

    producer
        .submit_payment(&key("B"), &payment(50, "C", "p-2"))
        .await
        .unwrap();
    pipeline.run_until_idle().await.unwrap();

    let balances = pipeline.balances().await.unwrap();
    assert_eq!(
        balances,
        vec![
            (key("A"), Balance::new(40)),
            (key("B"), Balance::new(10)),
            (key("C"), Balance::new(50)),
        ]
    );
}

#[tokio::test]
async fn test_duplicate_payments_without_dedupe() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let mut pipeline = start(config(2), &log, &store).await;
    let producer = pipeline.producer();

    producer.seed_credit(&key("A"), 100, "open", "").await.unwrap();
    for _ in 0..2 {
        producer
            .submit_payment(&key("A"), &payment(10, "B", "same-ref"))
            .await
            .unwrap();
    }
    pipeline.run_until_idle().await.unwrap();

    assert_eq!(pipeline.balance(&key("B")).await.unwrap(), Balance::new(20));
}

#[tokio::test]
async fn test_duplicate_payments_with_dedupe_window() {
    let (log, store) = (InMemoryEventLog::new(), InMemoryBalanceStore::new());
    let config = PipelineConfig {
        partitions: 2,
        dedupe: DedupePolicy::Window { capacity: 32 },
        ..Default::default()
    };
    let mut pipeline = start(config, &log, &store).await;
    let producer = pipeline.producer();

    producer.seed_credit(&key("A"), 100, "open", "").await.unwrap();
    for _ in 0..2 {
        producer
            .submit_payment(&key("A"), &payment(10, "B", "same-ref"))
            .await
            .unwrap();
    }
    pipeline.run_until_idle().await.unwrap();

    assert_eq!(pipeline.balance(&key("A")).await.unwrap(), Balance::new(90));
    assert_eq!(pipeline.balance(&key("B")).await.unwrap(), Balance::new(10));
    assert_eq!(pipeline.lag().await.unwrap(), 0);
}
