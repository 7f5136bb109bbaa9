use std::sync::Arc;
use std::time::Duration;

use keychain_account::{AccountSettings, AccountState, NonceCache, SyncOutcome};
use keychain_provider::{
    MockBackend, MockChainProvider, MockPaymaster, PaymasterError, PaymasterMode, ProviderError,
    RpcEvent, WaitOptions,
};
use keychain_session::{SessionPolicyStore, SessionSettings};
use keychain_signer::{CredentialSigner, KeySigner, MockCurve, MockHasher};
use keychain_store::{InMemoryStore, Storage};
use keychain_types::{
    AccountStatus, Call, ErrorCode, Felt, InvocationDetails, PendingRegistration, Policy,
};
use serde_json::json;

use crate::{
    ExecuteOptions, ExecutionCoordinator, ExecutionError, ExecutionOutcome, ExecutionPath,
    ExecutorSettings,
};

const CHAIN: &str = "SN_TEST";
const ORIGIN: &str = "https://game.example";
const ADDRESS: Felt = Felt::from_u64(0xacc);
const CLASS: Felt = Felt::from_u64(0xc1a55);

fn wait() -> WaitOptions {
    WaitOptions {
        initial_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(10),
        timeout: Duration::from_secs(2),
    }
}

struct Fixture {
    provider: MockChainProvider,
    signer: Arc<dyn CredentialSigner>,
    coordinator: ExecutionCoordinator,
}

async fn fixture(provider: MockChainProvider, paymaster: Option<MockPaymaster>) -> Fixture {
    let storage = Storage::new(Arc::new(InMemoryStore::new()));
    let backend = MockBackend::new();
    provider.set_class_hash(ADDRESS, CLASS).await;

    let signer: Arc<dyn CredentialSigner> =
        Arc::new(KeySigner::new(Felt::from_u64(7), Arc::new(MockCurve)).unwrap());
    let account = Arc::new(AccountState::new(
        ADDRESS,
        CHAIN,
        signer.public_key(),
        storage.clone(),
        Arc::new(provider.clone()),
        Arc::new(backend),
        AccountSettings {
            wait: wait(),
            ..AccountSettings::default()
        },
    ));
    account.force_sync().await;

    let mut coordinator = ExecutionCoordinator::new(
        account,
        NonceCache::new(storage.clone(), Arc::new(provider.clone()), ADDRESS, CHAIN),
        SessionPolicyStore::new(storage, ADDRESS, SessionSettings::default()),
        signer.clone(),
        Arc::new(MockHasher),
        Arc::new(provider.clone()),
    )
    .with_settings(ExecutorSettings {
        wait: wait(),
        ..ExecutorSettings::default()
    });
    if let Some(paymaster) = paymaster {
        coordinator = coordinator.with_paymaster(Arc::new(paymaster));
    }
    provider.clear_events().await;

    Fixture {
        provider,
        signer,
        coordinator,
    }
}

fn transfer() -> Vec<Call> {
    vec![Call::new("0xabc", "transfer", ["0x1", "100", "0"])]
}

async fn approve_transfer(f: &Fixture) {
    f.coordinator
        .sessions()
        .approve(ORIGIN, &[Policy::new("0xabc", "transfer")], None)
        .await
        .unwrap();
}

fn submitted_hash(outcome: &ExecutionOutcome, expected: ExecutionPath) -> Felt {
    match outcome {
        ExecutionOutcome::Submitted {
            transaction_hash,
            path,
        } => {
            assert_eq!(*path, expected);
            *transaction_hash
        }
        other => panic!("expected submission, got {other:?}"),
    }
}

fn is_estimate(event: &RpcEvent) -> bool {
    matches!(event, RpcEvent::EstimateFee { .. })
}

#[tokio::test]
async fn test_unapproved_call_requires_interaction() {
    let f = fixture(MockChainProvider::new(CHAIN), Some(MockPaymaster::sponsoring())).await;

    let outcome = f
        .coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap();

    let ExecutionOutcome::UserInteractionRequired { pending } = outcome else {
        panic!("expected user interaction");
    };
    assert_eq!(pending.calls, transfer());
    assert_eq!(pending.missing_policies.len(), 1);
    assert_eq!(f.coordinator.pending_execution().await, Some(pending));
    assert!(f.provider.submitted().await.is_empty());
}

#[tokio::test]
async fn test_approved_call_goes_through_paymaster() {
    let paymaster = MockPaymaster::sponsoring();
    let f = fixture(MockChainProvider::new(CHAIN), Some(paymaster.clone())).await;
    approve_transfer(&f).await;

    let outcome = f
        .coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(
        submitted_hash(&outcome, ExecutionPath::Paymaster),
        Felt::from_u64(0xface_0001)
    );
    assert!(!f.provider.events().await.iter().any(is_estimate));

    let requests = paymaster.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].address, ADDRESS);
    assert_eq!(requests[0].chain_id, CHAIN);
    assert_eq!(requests[0].outside_execution.calls[0].entrypoint, "transfer");
    assert!(f.coordinator.pending_execution().await.is_none());
}

#[tokio::test]
async fn test_unsupported_paymaster_falls_back_to_self_paid() {
    let paymaster = MockPaymaster::unsupported();
    let f = fixture(MockChainProvider::new(CHAIN), Some(paymaster.clone())).await;
    approve_transfer(&f).await;

    let outcome = f
        .coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap();

    let hash = submitted_hash(&outcome, ExecutionPath::SelfPaid);
    assert_eq!(paymaster.requests().await.len(), 1);
    assert!(f.provider.events().await.iter().any(is_estimate));

    let submitted = f.provider.submitted().await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, hash);
    // default fee 1000 with the 1.5 margin
    assert_eq!(submitted[0].1.max_fee, Felt::from_u64(1_500));
    assert!(!submitted[0].1.signature.is_empty());
}

#[tokio::test]
async fn test_explicit_max_fee_skips_estimate() {
    let f = fixture(MockChainProvider::new(CHAIN), None).await;

    let options = ExecuteOptions {
        max_fee: Some(Felt::from_u64(42)),
        skip_authorization: true,
    };
    f.coordinator.execute(ORIGIN, &transfer(), &options).await.unwrap();

    assert!(!f.provider.events().await.iter().any(is_estimate));
    assert_eq!(f.provider.submitted().await[0].1.max_fee, Felt::from_u64(42));
}

#[tokio::test]
async fn test_paymaster_rejection_is_terminal() {
    let paymaster = MockPaymaster::new(PaymasterMode::Reject {
        message: "execution reverted".into(),
        data: Some(r#"{"revert_reason":"insufficient balance"}"#.into()),
    });
    let f = fixture(MockChainProvider::new(CHAIN), Some(paymaster)).await;
    approve_transfer(&f).await;

    let err = f
        .coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Paymaster(PaymasterError::Rejected { .. })
    ));
    assert_eq!(
        err.to_structured().data,
        Some(json!({"revert_reason": "insufficient balance"}))
    );
    assert!(f.provider.submitted().await.is_empty());
}

#[tokio::test]
async fn test_counterfactual_account_is_fatal() {
    let provider = MockChainProvider::new(CHAIN);
    let storage = Storage::new(Arc::new(InMemoryStore::new()));
    let account = Arc::new(AccountState::new(
        ADDRESS,
        CHAIN,
        Felt::ONE,
        storage.clone(),
        Arc::new(provider.clone()),
        Arc::new(MockBackend::new()),
        AccountSettings::default(),
    ));
    assert_eq!(
        account.force_sync().await,
        SyncOutcome::Synced(AccountStatus::Counterfactual)
    );
    let coordinator = ExecutionCoordinator::new(
        account,
        NonceCache::new(storage.clone(), Arc::new(provider.clone()), ADDRESS, CHAIN),
        SessionPolicyStore::new(storage, ADDRESS, SessionSettings::default()),
        Arc::new(KeySigner::new(Felt::from_u64(7), Arc::new(MockCurve)).unwrap()),
        Arc::new(MockHasher),
        Arc::new(provider),
    );

    let err = coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::AccountNotDeployed);

    let err = coordinator.estimate_invoke_fee(&transfer()).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::AccountNotDeployed);
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    let f = fixture(MockChainProvider::new(CHAIN), None).await;
    let err = f
        .coordinator
        .execute(ORIGIN, &[], &ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::EmptyBatch));
    assert_eq!(err.error_code(), ErrorCode::InvalidRequest);
}

#[tokio::test]
async fn test_nonce_monotonic_under_confirmation_lag() {
    let provider = MockChainProvider::new(CHAIN);
    provider.set_nonce(ADDRESS, 2).await;
    provider.set_nonce_lag(true).await;
    let f = fixture(provider, None).await;
    approve_transfer(&f).await;

    for _ in 0..3 {
        f.coordinator
            .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
            .await
            .unwrap();
    }
    f.coordinator.drain_watchers().await;

    let nonces: Vec<u64> = f.provider.submitted().await.iter().map(|(_, tx)| tx.nonce).collect();
    assert_eq!(nonces, vec![2, 3, 4]);
    assert_eq!(f.provider.chain_nonce(ADDRESS).await, 2);
    assert_eq!(f.coordinator.nonces().cached().await.unwrap(), Some(5));
}

#[tokio::test]
async fn test_failed_transaction_resets_nonce_cache() {
    let provider = MockChainProvider::new(CHAIN);
    provider.set_nonce_lag(true).await;
    provider.reject_nonce(0).await;
    let f = fixture(provider, None).await;
    approve_transfer(&f).await;

    f.coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap();

    f.coordinator.drain_watchers().await;
    assert_eq!(f.coordinator.nonces().cached().await.unwrap(), None);
    assert_eq!(f.coordinator.nonces().current().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_executions_do_not_interleave() {
    let provider = MockChainProvider::new(CHAIN).with_latency(Duration::from_millis(10));
    let f = fixture(provider, None).await;
    approve_transfer(&f).await;

    let calls = transfer();
    let options = ExecuteOptions::default();
    let (a, b) = tokio::join!(
        f.coordinator.execute(ORIGIN, &calls, &options),
        f.coordinator.execute(ORIGIN, &calls, &options),
    );
    a.unwrap();
    b.unwrap();

    let events: Vec<RpcEvent> = f
        .provider
        .events()
        .await
        .into_iter()
        .filter(|e| !matches!(e, RpcEvent::GetReceipt(_)))
        .collect();
    assert_eq!(events.len(), 6);
    for (i, window) in events.chunks(3).enumerate() {
        let nonce = i as u64;
        assert!(matches!(window[0], RpcEvent::GetNonce(_)));
        assert_eq!(window[1], RpcEvent::EstimateFee { nonces: vec![nonce] });
        assert!(matches!(window[2], RpcEvent::AddInvoke { nonce: n, .. } if n == nonce));
    }
}

async fn cache_registration(f: &Fixture, nonce: u64) -> PendingRegistration {
    let call = Call::new(ADDRESS.to_hex(), "add_public_key", [f.signer.public_key().to_hex()])
        .normalize()
        .unwrap();
    let transaction = f
        .signer
        .sign_transaction(
            &MockHasher,
            ADDRESS,
            &[call],
            &InvocationDetails::new(nonce, Felt::from_u64(5_000), CHAIN),
        )
        .await
        .unwrap();
    let registration = PendingRegistration {
        transaction,
        public_key: f.signer.public_key(),
        created_at: 0,
    };
    f.coordinator
        .account()
        .cache_registration(&registration)
        .await
        .unwrap();
    registration
}

#[tokio::test]
async fn test_pending_registration_bundled_with_call() {
    let provider = MockChainProvider::new(CHAIN);
    provider.set_nonce(ADDRESS, 3).await;
    provider.set_auto_finalize(false).await;
    let f = fixture(provider, Some(MockPaymaster::sponsoring())).await;
    approve_transfer(&f).await;
    let registration = cache_registration(&f, 3).await;
    assert_eq!(
        f.coordinator.account().status().await.unwrap(),
        AccountStatus::PendingRegister
    );

    let outcome = f
        .coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap();
    let hash = submitted_hash(&outcome, ExecutionPath::Bundled);

    let submitted = f.provider.submitted().await;
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].1, registration.transaction);
    assert_eq!(submitted[1].0, hash);
    assert_eq!(submitted[1].1.nonce, 4);
    assert_eq!(f.coordinator.nonces().cached().await.unwrap(), Some(5));
    assert!(f
        .provider
        .events()
        .await
        .contains(&RpcEvent::EstimateFee { nonces: vec![3, 4] }));

    let account = f.coordinator.account();
    assert_eq!(account.status().await.unwrap(), AccountStatus::Registering);
    assert!(account.pending_registration().await.unwrap().is_none());

    f.provider.finalize_pending().await;
    f.coordinator.drain_watchers().await;
    assert_eq!(account.status().await.unwrap(), AccountStatus::Registered);
}

#[tokio::test]
async fn test_prepare_registration_caches_signed_key_invocation() {
    let provider = MockChainProvider::new(CHAIN);
    provider.set_nonce(ADDRESS, 2).await;
    let f = fixture(provider, None).await;

    let registration = f
        .coordinator
        .prepare_registration()
        .await
        .unwrap()
        .expect("deployed account gets a registration");
    assert_eq!(registration.public_key, f.signer.public_key());
    assert_eq!(registration.nonce(), 2);
    assert_eq!(
        registration.transaction.calldata,
        keychain_types::build_execute_calldata(&[keychain_types::NormalizedCall {
            contract_address: ADDRESS,
            entrypoint: crate::REGISTRATION_ENTRYPOINT.to_string(),
            calldata: vec![f.signer.public_key()],
        }])
    );
    assert_eq!(registration.transaction.signature.len(), 2);
    // signed, not sent
    assert!(f.provider.submitted().await.is_empty());

    let account = f.coordinator.account();
    assert_eq!(account.status().await.unwrap(), AccountStatus::PendingRegister);
    assert_eq!(
        account.pending_registration().await.unwrap(),
        Some(registration)
    );

    // nothing more to do until it is sent
    assert!(f.coordinator.prepare_registration().await.unwrap().is_none());
}

#[tokio::test]
async fn test_prepare_registration_skips_registered_account() {
    let provider = MockChainProvider::new(CHAIN);
    provider
        .set_call_result(ADDRESS, keychain_account::PLUGIN_KEY_ENTRYPOINT, vec![Felt::ONE])
        .await;
    let f = fixture(provider, None).await;
    assert_eq!(
        f.coordinator.account().status().await.unwrap(),
        AccountStatus::Registered
    );

    assert!(f.coordinator.prepare_registration().await.unwrap().is_none());
    assert!(f
        .coordinator
        .account()
        .pending_registration()
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_failed_registration_resets_nonce() {
    let provider = MockChainProvider::new(CHAIN);
    provider.set_nonce(ADDRESS, 1).await;
    let f = fixture(provider, None).await;
    approve_transfer(&f).await;
    cache_registration(&f, 1).await;
    f.coordinator.nonces().advance_to(1).await.unwrap();

    f.provider
        .fail_invokes(Some(ProviderError::ConnectionFailed("node down".into())))
        .await;
    let err = f
        .coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::NetworkError);
    assert!(err.error_code().is_retryable());
    let account = f.coordinator.account();
    assert_eq!(f.coordinator.nonces().cached().await.unwrap(), None);
    assert_eq!(account.status().await.unwrap(), AccountStatus::Deployed);
    assert!(account.pending_registration().await.unwrap().is_none());
}

#[tokio::test]
async fn test_stale_registration_dropped() {
    let provider = MockChainProvider::new(CHAIN);
    provider.set_nonce(ADDRESS, 4).await;
    let f = fixture(provider, None).await;
    approve_transfer(&f).await;
    cache_registration(&f, 2).await;

    let outcome = f
        .coordinator
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await
        .unwrap();

    submitted_hash(&outcome, ExecutionPath::SelfPaid);
    let submitted = f.provider.submitted().await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].1.nonce, 4);
    assert_eq!(
        f.coordinator.account().status().await.unwrap(),
        AccountStatus::Deployed
    );
}

#[tokio::test]
async fn test_estimate_invoke_fee() {
    let provider = MockChainProvider::new(CHAIN);
    provider.set_overall_fee(777).await;
    let f = fixture(provider, None).await;

    let estimate = f.coordinator.estimate_invoke_fee(&transfer()).await.unwrap();
    assert_eq!(estimate.overall_fee, 777);
    assert!(f.provider.submitted().await.is_empty());
}
