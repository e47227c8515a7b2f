//! Tracing tests for single transactions, whole blocks and the standard
//! dump-to-file path.

use retrace_evm::{
    test_utils as programs,
    tracers::{ScriptedTracer, Step, StopSignal, TracerError, TracerRegistry, TxContext},
};
use retrace_primitives::{
    hex, Address, Block, BlockNumberOrTag, Bytes, ChainSpec, Header, B256,
};
use retrace_provider::{
    test_utils::{ChainBuilder, MockChainProvider, TestAccount},
    BlockReader, ChainSpecProvider, Consensus, ConsensusError, NoopConsensus,
    StateProviderFactory,
};
use retrace_rpc::{DebugApi, DebugApiError, NotFoundKind, TracingCallGuard};
use retrace_rpc_types::{StdTraceOptions, TraceFrame, TraceOptions, TraceResult};
use std::{sync::Arc, time::Duration};

pub(crate) fn debug_api(provider: MockChainProvider) -> DebugApi<MockChainProvider> {
    DebugApi::new(
        provider,
        Arc::new(NoopConsensus),
        Arc::new(TracerRegistry::new()),
        TracingCallGuard::new(8),
    )
}

fn default_frame(result: &TraceResult) -> retrace_rpc_types::DefaultFrame {
    result
        .clone()
        .into_frame()
        .expect("trace succeeded")
        .into_default_frame()
        .expect("struct logger frame")
}

/// A scripted tracer whose per-step work is slow, used to exercise the
/// deadline stop.
#[derive(Default)]
struct SleepyTracer {
    steps: u64,
}

impl ScriptedTracer for SleepyTracer {
    fn capture_state(&mut self, _step: &Step<'_>) {
        std::thread::sleep(Duration::from_millis(5));
        self.steps += 1;
    }

    fn into_result(self: Box<Self>) -> Result<serde_json::Value, TracerError> {
        Ok(serde_json::json!({ "steps": self.steps }))
    }
}

fn register_sleepy(api: &DebugApi<MockChainProvider>) {
    api.tracer_registry().register(
        "sleepy",
        Arc::new(|_: &TxContext, _: StopSignal| {
            Box::new(SleepyTracer::default()) as Box<dyn ScriptedTracer>
        }),
    );
}

#[tokio::test]
async fn traces_a_block_in_transaction_order() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let txs = vec![
        builder.tx(&alice, bob.address, 1_000, Bytes::new()),
        builder.tx(&alice, bob.address, 0, programs::revert_program(b"insufficient funds")),
        builder.tx(&alice, bob.address, 0, programs::sstore_program(1, 7)),
    ];
    builder.add_block(txs);
    let api = debug_api(builder.finish());

    let results = api
        .debug_trace_block(BlockNumberOrTag::Number(1), TraceOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 3);

    let transfer = default_frame(&results[0]);
    assert!(!transfer.failed);
    assert!(transfer.struct_logs.is_empty());

    // a revert is a successful trace with `failed` set and the revert
    // payload as return value
    let reverted = default_frame(&results[1]);
    assert!(reverted.failed);
    assert_eq!(reverted.return_value, hex::encode(b"insufficient funds"));
    assert!(!reverted.struct_logs.is_empty());

    let sstore = default_frame(&results[2]);
    assert!(!sstore.failed);
    assert!(sstore.struct_logs.iter().any(|log| log.op == "SSTORE"));

    // tracing the same block twice is byte-identical
    let again = api
        .debug_trace_block(BlockNumberOrTag::Number(1), TraceOptions::default())
        .await
        .unwrap();
    assert_eq!(results, again);

    // all pinned roots were released
    assert_eq!(api.provider().trie_db().cached_nodes(), 0);
}

#[tokio::test]
async fn missing_parent_fails_with_not_found() {
    let alice = TestAccount::random();
    let builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, 1_000_000)]);
    let api = debug_api(builder.finish());

    let orphan = Block {
        header: Header {
            parent_hash: B256::repeat_byte(0xaa),
            number: 1,
            base_fee_per_gas: 7,
            gas_limit: 30_000_000,
            ..Default::default()
        },
        body: Vec::new(),
    };
    let encoded = retrace_primitives::alloy_rlp::encode(&orphan);

    let err = api
        .debug_trace_raw_block(encoded.into(), TraceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DebugApiError::NotFound { kind: NotFoundKind::Parent, .. }));

    let err = api
        .debug_trace_raw_block(Bytes::from_static(b"\xde\xad"), TraceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DebugApiError::DecodeFailed(_)));
}

#[tokio::test]
async fn consensus_rejections_abort_the_trace() {
    struct RejectAll;

    impl Consensus for RejectAll {
        fn validate_header(
            &self,
            _header: &retrace_primitives::SealedHeader,
        ) -> Result<(), ConsensusError> {
            Err(ConsensusError::InvalidHeader { reason: "bad seal".to_string() })
        }
    }

    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let tx = builder.tx(&alice, Address::repeat_byte(2), 1, Bytes::new());
    builder.add_block(vec![tx]);

    let api = DebugApi::new(
        builder.finish(),
        Arc::new(RejectAll),
        Arc::new(TracerRegistry::new()),
        TracingCallGuard::new(8),
    );
    let err = api
        .debug_trace_block(BlockNumberOrTag::Number(1), TraceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DebugApiError::Consensus(_)));
}

#[tokio::test]
async fn trace_transaction_regenerates_pruned_history() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let mut last_tx_hash = None;
    for _ in 0..50 {
        let tx = builder.tx(&alice, bob.address, 10, Bytes::new());
        last_tx_hash = Some(tx.hash());
        builder.add_block(vec![tx]);
    }
    // only the genesis state is retained; everything else must be
    // regenerated by replaying ancestors
    let api = debug_api(builder.finish());

    let frame = api
        .debug_trace_transaction(last_tx_hash.unwrap(), TraceOptions::default())
        .await
        .unwrap();
    let frame = frame.into_default_frame().unwrap();
    assert!(!frame.failed);
    assert_eq!(frame.gas, 21_000);

    // regeneration released every pinned root again
    assert_eq!(api.provider().trie_db().cached_nodes(), 0);
}

#[tokio::test]
async fn trace_transaction_matches_the_block_trace() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let txs = vec![
        builder.tx(&alice, bob.address, 100, Bytes::new()),
        builder.tx(&alice, bob.address, 0, programs::sstore_program(3, 9)),
        builder.tx(&alice, bob.address, 0, programs::sload_program(3)),
    ];
    let target = txs[2].hash();
    builder.add_block(txs);
    let api = debug_api(builder.finish());

    let from_block = api
        .debug_trace_block(BlockNumberOrTag::Number(1), TraceOptions::default())
        .await
        .unwrap();
    let standalone = api
        .debug_trace_transaction(target, TraceOptions::default())
        .await
        .unwrap();

    assert_eq!(from_block[2].clone().into_frame().unwrap(), standalone);
}

#[tokio::test]
async fn genesis_transactions_are_not_traceable() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, 1_000_000)]);
    // splice a transaction-bearing genesis replacement into the store
    let tx = builder.tx(&alice, Address::repeat_byte(1), 1, Bytes::new());
    let tx_hash = tx.hash();
    let provider = builder.finish();
    let mut genesis = provider.block_by_number(0).unwrap().unwrap().unseal();
    genesis.body.push(tx);
    provider.add_block(genesis.seal_slow());

    let api = debug_api(provider);
    let err = api.debug_trace_transaction(tx_hash, TraceOptions::default()).await.unwrap_err();
    assert!(matches!(err, DebugApiError::NotTraceable));
}

#[tokio::test]
async fn reexec_limit_bounds_the_ancestor_walk() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    for _ in 0..12 {
        let tx = builder.tx(&alice, Address::repeat_byte(5), 1, Bytes::new());
        builder.add_block(vec![tx]);
    }
    let api = debug_api(builder.finish());

    let err = api
        .debug_trace_block(
            BlockNumberOrTag::Number(12),
            TraceOptions::default().with_reexec(4),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DebugApiError::HistoricalStateUnavailable { reexec: 4 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn scripted_tracer_deadlines_leave_siblings_unaffected() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let txs = vec![
        builder.tx(&alice, bob.address, 0, programs::loop_program()),
        builder.tx(&alice, bob.address, 5, Bytes::new()),
    ];
    builder.add_block(txs);
    let api = debug_api(builder.finish());
    register_sleepy(&api);

    let opts = TraceOptions::default()
        .with_tracer("sleepy")
        .with_timeout(Duration::from_millis(500));
    let started = std::time::Instant::now();
    let results = api.debug_trace_block(BlockNumberOrTag::Number(1), opts).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    // the looping transaction was stopped by the deadline, in-band
    assert_eq!(results[0], TraceResult::error("execution timeout"));
    // its sibling completed normally under the same scripted tracer
    let TraceFrame::Custom(artifact) = results[1].clone().into_frame().unwrap() else {
        panic!("scripted tracers produce custom artifacts")
    };
    assert_eq!(artifact, serde_json::json!({ "steps": 0 }));
}

#[tokio::test]
async fn unknown_tracer_names_are_rejected() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let tx = builder.tx(&alice, Address::repeat_byte(2), 1, Bytes::new());
    let tx_hash = tx.hash();
    builder.add_block(vec![tx]);
    let api = debug_api(builder.finish());

    let err = api
        .debug_trace_transaction(tx_hash, TraceOptions::default().with_tracer("nope"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "unknown tracer: nope");
}

#[tokio::test]
async fn builtin_opcode_count_tracer_runs() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let tx = builder.tx(&alice, Address::repeat_byte(2), 0, programs::add_program(1, 2));
    let tx_hash = tx.hash();
    builder.add_block(vec![tx]);
    let api = debug_api(builder.finish());

    let frame = api
        .debug_trace_transaction(tx_hash, TraceOptions::default().with_tracer("opcodeCount"))
        .await
        .unwrap();
    let TraceFrame::Custom(artifact) = frame else { panic!("custom artifact expected") };
    assert_eq!(artifact, serde_json::json!({ "PUSH1": 2, "ADD": 1, "STOP": 1 }));
}

#[tokio::test]
async fn log_config_disables_captures() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let tx = builder.tx(&alice, Address::repeat_byte(2), 0, programs::sstore_program(1, 2));
    let tx_hash = tx.hash();
    builder.add_block(vec![tx]);
    let api = debug_api(builder.finish());

    let opts: TraceOptions = serde_json::from_str(
        r#"{"disableStack":true,"disableMemory":true,"disableStorage":true}"#,
    )
    .unwrap();
    let frame = api.debug_trace_transaction(tx_hash, opts).await.unwrap();
    let frame = frame.into_default_frame().unwrap();
    assert!(!frame.struct_logs.is_empty());
    for log in &frame.struct_logs {
        assert_eq!(log.stack, None);
        assert_eq!(log.memory, None);
        assert_eq!(log.storage, None);
    }
}

#[tokio::test]
async fn standard_trace_writes_one_dump_per_transaction() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let txs = vec![
        builder.tx(&alice, bob.address, 0, programs::sstore_program(1, 9)),
        builder.tx(&alice, bob.address, 77, Bytes::new()),
    ];
    let second = txs[1].hash();
    let block = builder.add_block(txs);
    let api = debug_api(builder.finish());

    let dumps = api
        .debug_standard_trace_block_to_file(block.hash(), StdTraceOptions::default())
        .await
        .unwrap();
    assert_eq!(dumps.len(), 2);
    for (index, path) in dumps.iter().enumerate() {
        assert!(path.contains(&format!("block_0x{}-{index}-", hex::encode(&block.hash()[..4]))));
        let contents = std::fs::read_to_string(path).unwrap();
        let last = contents.lines().last().unwrap();
        let summary: serde_json::Value = serde_json::from_str(last).unwrap();
        assert!(summary["gasUsed"].is_string());
        std::fs::remove_file(path).unwrap();
    }

    // a single-transaction trace stops right after the target
    let dumps = api
        .debug_standard_trace_block_to_file(
            block.hash(),
            StdTraceOptions { tx_hash: Some(second), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(dumps.len(), 1);
    assert!(dumps[0].contains("-1-"));
    std::fs::remove_file(&dumps[0]).unwrap();

    // a transaction that is not part of the block is rejected up front
    let err = api
        .debug_standard_trace_block_to_file(
            block.hash(),
            StdTraceOptions { tx_hash: Some(B256::repeat_byte(0x99)), ..Default::default() },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DebugApiError::NotFound { kind: NotFoundKind::Transaction, .. }));
}

#[tokio::test]
async fn standard_trace_fork_overrides_apply_to_the_traced_block_only() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let tx = builder.tx(&alice, Address::repeat_byte(2), 0, programs::sload_program(1));
    let block = builder.add_block(vec![tx]);
    let api = debug_api(builder.finish());

    let sload_cost = |dumps: Vec<String>| {
        let contents = std::fs::read_to_string(&dumps[0]).unwrap();
        let cost = contents
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .find(|step| step["op"] == "SLOAD")
            .map(|step| step["gasCost"].as_u64().unwrap())
            .unwrap();
        std::fs::remove_file(&dumps[0]).unwrap();
        cost
    };

    let dumps = api
        .debug_standard_trace_block_to_file(block.hash(), StdTraceOptions::default())
        .await
        .unwrap();
    assert_eq!(sload_cost(dumps), 200);

    // enabling berlin from block 0 reprices the same SLOAD; the shared
    // chain spec itself stays untouched
    let opts: StdTraceOptions =
        serde_json::from_str(r#"{"overrides":{"berlinBlock":0}}"#).unwrap();
    let dumps =
        api.debug_standard_trace_block_to_file(block.hash(), opts).await.unwrap();
    assert_eq!(sload_cost(dumps), 2100);
    assert_eq!(api.provider().chain_spec().berlin_block, None);
}
