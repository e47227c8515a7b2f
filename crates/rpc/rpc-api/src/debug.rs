use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use retrace_primitives::{BlockNumberOrTag, Bytes, TxHash, B256};
use retrace_rpc_types::{BlockTraceResult, TraceFrame, TraceResult};

pub use retrace_rpc_types::{StdTraceOptions, TraceOptions};

/// Debug rpc interface.
#[rpc(server, namespace = "debug")]
pub trait DebugApi {
    /// Returns an RLP-encoded header.
    #[method(name = "getRawHeader")]
    async fn raw_header(&self, block_id: BlockNumberOrTag) -> RpcResult<Bytes>;

    /// Returns an RLP-encoded block.
    #[method(name = "getRawBlock")]
    async fn raw_block(&self, block_id: BlockNumberOrTag) -> RpcResult<Bytes>;

    /// Returns the RLP encoding of the transaction with the given hash.
    #[method(name = "getRawTransaction")]
    async fn raw_transaction(&self, hash: TxHash) -> RpcResult<Bytes>;

    /// Re-executes all blocks in the range (excluding `start`, including
    /// `end`) and streams one result object per block, ordered by height.
    ///
    /// Tracing a chain is a long operation, so it is only available over
    /// subscription-capable transports.
    #[subscription(
        name = "subscribeTraceChain" => "traceChainNotification",
        unsubscribe = "unsubscribeTraceChain",
        item = BlockTraceResult
    )]
    async fn trace_chain(
        &self,
        start: BlockNumberOrTag,
        end: BlockNumberOrTag,
        opts: Option<TraceOptions>,
    ) -> jsonrpsee::core::SubscriptionResult;

    /// Replays the block with the given number and returns one trace result
    /// per transaction.
    #[method(name = "traceBlockByNumber")]
    async fn trace_block_by_number(
        &self,
        block: BlockNumberOrTag,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>>;

    /// Replays the block with the given hash and returns one trace result
    /// per transaction.
    #[method(name = "traceBlockByHash")]
    async fn trace_block_by_hash(
        &self,
        block: B256,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>>;

    /// Replays an RLP-encoded block. The parent of the block must be
    /// present.
    #[method(name = "traceBlock")]
    async fn trace_block(
        &self,
        rlp_block: Bytes,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>>;

    /// Like `debug_traceBlock`, reading the RLP-encoded block from a local
    /// file.
    #[method(name = "traceBlockFromFile")]
    async fn trace_block_from_file(
        &self,
        path: String,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>>;

    /// Re-executes the transaction with the given hash in the exact
    /// conditions it was included under and returns its trace artifact.
    #[method(name = "traceTransaction")]
    async fn trace_transaction(
        &self,
        tx_hash: TxHash,
        opts: Option<TraceOptions>,
    ) -> RpcResult<TraceFrame>;

    /// Traces the block with the given hash into one standard-JSON dump
    /// file per traced transaction, returning the file names.
    #[method(name = "standardTraceBlockToFile")]
    async fn standard_trace_block_to_file(
        &self,
        block: B256,
        opts: Option<StdTraceOptions>,
    ) -> RpcResult<Vec<String>>;
}
