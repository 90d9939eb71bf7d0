use super::types::JobDescriptor;
use async_trait::async_trait;

/// Business logic plugged into the engine.
///
/// `handle_datum` may run more than once for the same item (a crashed batch is retried by
/// another machine, a failed item is retried on the next run), so it must be idempotent.
#[async_trait]
pub trait Work: Send + Sync + 'static {
    type Param: JobDescriptor;
    type Datum: Send + 'static;

    /// Total number of items in the job. Called once per job across the cluster.
    async fn select_data_total(&self, param: &Self::Param) -> anyhow::Result<u64>;

    /// Items of the batch selected by `param.page_num()` (1-based), at most `page_size` of them.
    ///
    /// Must return the same items in the same order every time it is asked for a given batch,
    /// otherwise resumed batches skip the wrong ordinals.
    async fn select_data_list(&self, param: &Self::Param) -> anyhow::Result<Vec<Self::Datum>>;

    async fn handle_datum(&self, param: &Self::Param, datum: Self::Datum) -> anyhow::Result<()>;
}
