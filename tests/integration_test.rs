use std::sync::Arc;

use keychain::config::ControllerConfig;
use keychain::executor::ExecuteOptions;
use keychain::provider::{MockBackend, MockChainProvider, MockPaymaster, RpcEvent};
use keychain::signer::{CredentialSigner, KeySigner, MockCurve, MockHasher};
use keychain::store::{keys, InMemoryStore, Storage};
use keychain::types::{
    AccountRecord, AccountStatus, Call, Credential, CredentialKind, DeploymentRecord, Felt,
    InvocationDetails, PendingRegistration, Policy, ResponseCode, Session,
};
use keychain::{ConnectOutcome, Controller, HeadlessConnectResponse};

// ═══════════════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

const CHAIN: &str = "SN_KATANA";
const ORIGIN: &str = "https://game.example";
const ADDRESS: Felt = Felt::from_u64(0xacc);
const CLASS: Felt = Felt::from_u64(0xc1a55);
const PRIVATE_KEY: Felt = Felt::from_u64(7);

fn config() -> ControllerConfig {
    let mut config = ControllerConfig::local();
    config.account.sync_interval_secs = 0;
    config.account.sync_debounce_ms = 0;
    config.account.register_on_connect = false;
    config.execution.poll_initial_ms = 2;
    config.execution.poll_max_ms = 10;
    config.execution.finality_timeout_secs = 2;
    config
}

fn account_record() -> AccountRecord {
    AccountRecord {
        address: ADDRESS,
        username: "alice".to_string(),
        credential: Credential::Starknet {
            private_key: PRIVATE_KEY,
        },
    }
}

struct Harness {
    storage: Storage,
    provider: MockChainProvider,
    controller: Controller,
}

async fn harness_with(
    storage: Storage,
    provider: MockChainProvider,
    paymaster: Option<MockPaymaster>,
) -> Harness {
    provider.set_class_hash(ADDRESS, CLASS).await;
    let backend = MockBackend::new();
    backend.insert_account(account_record()).await;

    let mut builder = Controller::builder()
        .with_config(config())
        .with_storage(storage.clone())
        .with_provider(Arc::new(provider.clone()))
        .with_backend(Arc::new(backend))
        .with_curve(Arc::new(MockCurve))
        .with_hasher(Arc::new(MockHasher));
    if let Some(paymaster) = paymaster {
        builder = builder.with_paymaster(Arc::new(paymaster));
    }

    Harness {
        storage,
        provider,
        controller: builder.build().unwrap(),
    }
}

async fn harness(paymaster: Option<MockPaymaster>) -> Harness {
    harness_with(
        Storage::new(Arc::new(InMemoryStore::new())),
        MockChainProvider::new(CHAIN),
        paymaster,
    )
    .await
}

async fn connect(h: &Harness) {
    let response = h
        .controller
        .headless_connect("alice", CredentialKind::Starknet, None)
        .await
        .unwrap();
    assert_eq!(response, HeadlessConnectResponse::Success { address: ADDRESS });
    h.provider.clear_events().await;
}

async fn approve_transfer(h: &Harness) {
    let outcome = h
        .controller
        .connect(ORIGIN, &[Policy::new("0xabc", "transfer")], true)
        .await
        .unwrap();
    assert!(matches!(outcome, ConnectOutcome::Connected { .. }));
}

fn transfer() -> Vec<Call> {
    vec![Call::new("0xabc", "transfer", ["0x1", "100", "0"])]
}

fn estimated(events: &[RpcEvent]) -> bool {
    events
        .iter()
        .any(|event| matches!(event, RpcEvent::EstimateFee { .. }))
}

// ═══════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_unauthorized_call_requires_user_interaction() {
    let h = harness(Some(MockPaymaster::sponsoring())).await;
    connect(&h).await;

    let response = h
        .controller
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await;

    assert_eq!(response.code, ResponseCode::UserInteractionRequired);
    assert_eq!(response.calls, Some(transfer()));
    assert!(h.provider.submitted().await.is_empty());

    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["code"], "USER_INTERACTION_REQUIRED");
}

#[tokio::test]
async fn test_approved_call_is_sponsored_without_fee_estimate() {
    let h = harness(Some(MockPaymaster::sponsoring())).await;
    connect(&h).await;
    approve_transfer(&h).await;

    let response = h
        .controller
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await;

    assert_eq!(response.code, ResponseCode::Success);
    assert_eq!(response.transaction_hash, Some(Felt::from_u64(0xface_0001)));
    assert!(!estimated(&h.provider.events().await));
    assert!(h.provider.submitted().await.is_empty());
}

#[tokio::test]
async fn test_unsupported_paymaster_falls_back_to_self_paid() {
    let h = harness(Some(MockPaymaster::unsupported())).await;
    connect(&h).await;
    approve_transfer(&h).await;

    let response = h
        .controller
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await;

    assert_eq!(response.code, ResponseCode::Success);
    assert!(estimated(&h.provider.events().await));
    let submitted = h.provider.submitted().await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(response.transaction_hash, Some(submitted[0].0));
    assert_eq!(submitted[0].1.nonce, 0);
    h.controller.drain().await;
}

#[tokio::test]
async fn test_pending_registration_bundled_with_next_call() {
    let storage = Storage::new(Arc::new(InMemoryStore::new()));
    let provider = MockChainProvider::new(CHAIN);
    provider.set_nonce(ADDRESS, 3).await;
    provider.set_auto_finalize(false).await;

    // a registration signed in an earlier run, still waiting to be sent
    let signer = KeySigner::new(PRIVATE_KEY, Arc::new(MockCurve)).unwrap();
    let registration_call = Call::new(
        ADDRESS.to_hex(),
        "add_public_key",
        [signer.public_key().to_hex()],
    )
    .normalize()
    .unwrap();
    let transaction = signer
        .sign_transaction(
            &MockHasher,
            ADDRESS,
            &[registration_call],
            &InvocationDetails::new(3, Felt::from_u64(5_000), CHAIN),
        )
        .await
        .unwrap();
    storage
        .set_json(
            &keys::registration(&ADDRESS, CHAIN),
            &PendingRegistration {
                transaction: transaction.clone(),
                public_key: signer.public_key(),
                created_at: 0,
            },
        )
        .await
        .unwrap();
    storage
        .set_json(
            &keys::deployment(&ADDRESS, CHAIN),
            &DeploymentRecord {
                status: AccountStatus::PendingRegister,
                class_hash: Some(CLASS),
                ..DeploymentRecord::default()
            },
        )
        .await
        .unwrap();

    let h = harness_with(storage, provider, Some(MockPaymaster::sponsoring())).await;
    connect(&h).await;
    approve_transfer(&h).await;
    assert_eq!(
        h.controller.probe(ORIGIN).await.unwrap().status,
        AccountStatus::PendingRegister
    );

    let response = h
        .controller
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await;
    assert_eq!(response.code, ResponseCode::Success);

    let submitted = h.provider.submitted().await;
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].1, transaction);
    assert_eq!(submitted[1].1.nonce, 4);
    assert_eq!(response.transaction_hash, Some(submitted[1].0));

    // not registered until both land
    assert_eq!(
        h.controller.probe(ORIGIN).await.unwrap().status,
        AccountStatus::Registering
    );

    h.provider.finalize_pending().await;
    h.controller.drain().await;
    assert_eq!(
        h.controller.probe(ORIGIN).await.unwrap().status,
        AccountStatus::Registered
    );
    assert!(h
        .storage
        .get_json::<PendingRegistration>(&keys::registration(&ADDRESS, CHAIN))
        .await
        .unwrap()
        .is_none());
}

// ═══════════════════════════════════════════════════════════════════════════
// PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_sequential_executions_keep_nonce_ahead_of_lagging_chain() {
    let h = harness(None).await;
    h.provider.set_nonce(ADDRESS, 2).await;
    h.provider.set_nonce_lag(true).await;
    connect(&h).await;
    approve_transfer(&h).await;

    for _ in 0..3 {
        let response = h
            .controller
            .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
            .await;
        assert_eq!(response.code, ResponseCode::Success);
    }

    let nonces: Vec<u64> = h
        .provider
        .submitted()
        .await
        .into_iter()
        .map(|(_, tx)| tx.nonce)
        .collect();
    assert_eq!(nonces, vec![2, 3, 4]);
    h.controller.drain().await;
}

#[tokio::test]
async fn test_concurrent_executions_are_serialized() {
    let h = harness(None).await;
    connect(&h).await;
    approve_transfer(&h).await;

    let options = ExecuteOptions::default();
    let calls = transfer();
    let (first, second) = futures::join!(
        h.controller.execute(ORIGIN, &calls, &options),
        h.controller.execute(ORIGIN, &calls, &options)
    );
    assert_eq!(first.code, ResponseCode::Success);
    assert_eq!(second.code, ResponseCode::Success);

    let mut nonces: Vec<u64> = h
        .provider
        .submitted()
        .await
        .into_iter()
        .map(|(_, tx)| tx.nonce)
        .collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1]);
    h.controller.drain().await;
}

#[tokio::test]
async fn test_legacy_storage_is_migrated_on_open() {
    let legacy_session = Session {
        address: ADDRESS,
        origin: ORIGIN.to_string(),
        policies: vec![Policy::new("0xabc", "transfer").with_authorized(true)],
        max_fee: None,
        expires_at: u64::MAX,
        verified: false,
        created_at: 0,
    };
    let store = InMemoryStore::with_entries([
        (keys::VERSION.to_string(), "\"0.0.2\"".to_string()),
        (keys::ACTIVE.to_string(), "\"0xacc\"".to_string()),
        (
            keys::account(&ADDRESS),
            serde_json::to_string(&account_record()).unwrap(),
        ),
        (
            format!("@session/{ORIGIN}"),
            serde_json::to_string(&legacy_session).unwrap(),
        ),
    ]);
    let storage = Storage::open(Arc::new(store)).await.unwrap();
    let h = harness_with(storage, MockChainProvider::new(CHAIN), None).await;

    assert_eq!(h.controller.restore(None).await.unwrap(), Some(ADDRESS));
    let probe = h.controller.probe(ORIGIN).await.unwrap();
    assert_eq!(probe.session.map(|s| s.origin), Some(ORIGIN.to_string()));

    let response = h
        .controller
        .execute(ORIGIN, &transfer(), &ExecuteOptions::default())
        .await;
    assert_eq!(response.code, ResponseCode::Success);
    h.controller.drain().await;
}
