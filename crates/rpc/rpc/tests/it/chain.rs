//! Chain trace pipeline tests: ordering, backpressure, cancellation and
//! trie-pin balance.

use crate::trace::debug_api;
use futures::StreamExt;
use retrace_evm::test_utils as programs;
use retrace_primitives::{Address, Bytes, ChainSpec, Transaction, TransactionSigned, TxKind, U256};
use retrace_provider::test_utils::{ChainBuilder, TestAccount, BASE_FEE};
use retrace_provider::{BlockReader, StateProviderFactory};
use retrace_rpc::DebugApiError;
use retrace_rpc_types::{TraceOptions, TraceResult};
use retrace_state::TrieDb;
use std::{sync::Arc, time::Duration};

/// Polls until every cached trie node has been released, proving all pins
/// were returned and the pipeline shut down.
async fn assert_cache_drains(trie: &Arc<TrieDb>) {
    for _ in 0..100 {
        if trie.cached_nodes() == 0 {
            return
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("trie cache did not drain: {} nodes still pinned", trie.cached_nodes());
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_ordered_results_over_the_range() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    for _ in 0..100 {
        let tx = builder.tx(&alice, bob.address, 1, Bytes::new());
        builder.add_block(vec![tx]);
    }
    // the state at block 100 is retained, so tracing (100, 105] only
    // regenerates forward from there
    builder.persist_latest();
    let mut tx_counts = Vec::new();
    for number in 101..=104u64 {
        let txs = (0..(number % 3 + 1))
            .map(|_| builder.tx(&alice, bob.address, 1, Bytes::new()))
            .collect::<Vec<_>>();
        tx_counts.push(txs.len());
        builder.add_block(txs);
    }
    // the final block is empty and must still terminate the stream
    builder.add_block(Vec::new());
    tx_counts.push(0);
    let api = debug_api(builder.finish());
    let trie = api.provider().trie_db();

    let stream = api
        .debug_trace_chain(100.into(), 105.into(), TraceOptions::default().with_reexec(8))
        .await
        .unwrap();
    let results: Vec<_> = stream.collect().await;

    // strict height order, one result per block in (100, 105]
    assert_eq!(results.iter().map(|r| r.block).collect::<Vec<_>>(), vec![101, 102, 103, 104, 105]);
    for (result, expected) in results.iter().zip(&tx_counts) {
        assert_eq!(result.traces.len(), *expected);
        assert!(result.traces.iter().all(|trace| matches!(
            trace,
            Some(TraceResult::Success { .. })
        )));
        let stored = api.provider().block_by_number(result.block).unwrap().unwrap();
        assert_eq!(result.hash, stored.hash());
    }

    // no pinned roots remain
    assert_cache_drains(&trie).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_blocks_are_suppressed_mid_stream() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    builder.add_block(Vec::new());
    let tx = builder.tx(&alice, Address::repeat_byte(9), 1, Bytes::new());
    builder.add_block(vec![tx]);
    builder.add_block(Vec::new());
    let api = debug_api(builder.finish());

    let stream =
        api.debug_trace_chain(0.into(), 3.into(), TraceOptions::default()).await.unwrap();
    let results: Vec<_> = stream.collect().await;

    // block 1 is empty and mid-stream, so only 2 and the (empty) final 3
    // are emitted
    assert_eq!(results.iter().map(|r| r.block).collect::<Vec<_>>(), vec![2, 3]);
    assert!(results[1].traces.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_invalid_ranges() {
    let alice = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let tx = builder.tx(&alice, Address::repeat_byte(9), 1, Bytes::new());
    builder.add_block(vec![tx]);
    let api = debug_api(builder.finish());

    let err = api
        .debug_trace_chain(1.into(), 1.into(), TraceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DebugApiError::RangeInvalid { start: 1, end: 1 }));

    let err = api
        .debug_trace_chain(0.into(), 9.into(), TraceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DebugApiError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_the_subscriber_tears_the_pipeline_down() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    for _ in 0..30 {
        let tx = builder.tx(&alice, bob.address, 1, Bytes::new());
        builder.add_block(vec![tx]);
    }
    let api = debug_api(builder.finish());
    let trie = api.provider().trie_db();

    let mut stream =
        api.debug_trace_chain(0.into(), 30.into(), TraceOptions::default()).await.unwrap();
    let first = stream.next().await.unwrap();
    let second = stream.next().await.unwrap();
    assert_eq!((first.block, second.block), (1, 2));
    drop(stream);

    // the feeder observes the closure within one unit of work and every
    // pinned root is dereferenced
    assert_cache_drains(&trie).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_errors_surface_in_band_and_leave_gaps() {
    let alice = TestAccount::random();
    let bob = TestAccount::random();
    let mut builder = ChainBuilder::new(ChainSpec::default(), &[(&alice, u64::MAX / 2)]);
    let tx = builder.tx(&alice, bob.address, 1, Bytes::new());
    builder.add_block(vec![tx]);
    let provider = builder.provider();

    // splice a block whose first transaction cannot execute (future nonce)
    // on top of block 1
    let parent = provider.block_by_number(1).unwrap().unwrap();
    let bad = Transaction {
        chain_id: ChainSpec::default().chain_id,
        nonce: 99,
        gas_limit: 100_000,
        max_fee_per_gas: BASE_FEE + 10,
        max_priority_fee_per_gas: 1,
        to: TxKind::Call(bob.address),
        value: U256::from(1u64),
        input: Bytes::new(),
        access_list: Vec::new(),
    };
    let signature =
        retrace_primitives::sign_message(alice.secret, bad.signature_hash()).unwrap();
    let bad = TransactionSigned { transaction: bad, signature };
    let good = builder.tx(&alice, bob.address, 1, programs::stop_program());
    let block = retrace_primitives::Block {
        header: retrace_primitives::Header {
            parent_hash: parent.hash(),
            state_root: parent.state_root,
            beneficiary: Address::repeat_byte(0xcb),
            number: 2,
            gas_limit: 30_000_000,
            base_fee_per_gas: BASE_FEE,
            timestamp: parent.timestamp + 12,
        },
        body: vec![bad, good],
    };
    provider.add_block(block.seal_slow());
    drop(builder);

    let api = debug_api(provider);
    let stream =
        api.debug_trace_chain(1.into(), 2.into(), TraceOptions::default()).await.unwrap();
    let results: Vec<_> = stream.collect().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].block, 2);
    // the failing slot carries the error, the rest of the block is left
    // unfilled but the result is still published
    assert_eq!(results[0].traces.len(), 2);
    assert!(matches!(&results[0].traces[0], Some(TraceResult::Error { error }) if error.contains("nonce too high")));
    assert!(results[0].traces[1].is_none());
}
