//! Tile reducer client
//!
//! Issues one grouped-sum reduction per grid cell with bounded concurrency.
//! A failing cell is recorded and the run continues; a deadline, cancellation
//! or exhausted request budget abandons the remaining cells while keeping the
//! ones that already completed.

use futures::StreamExt;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::backend::{GroupSum, GroupedReduceRequest, LayerExpr, RasterBackend, WireGeometry};
use crate::core::config::ScalePolicy;
use crate::core::error::Error;
use crate::core::tiler::GridCell;

/// Progress callback receiving (finished cells, total cells)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// What happened to one cell's reduction
#[derive(Debug, Clone, PartialEq)]
pub enum TileOutcome {
    /// Backend answered; `groups` may be empty when the cell has no loss pixels
    Reported {
        groups: Vec<GroupSum>,
        scale_m: Option<f64>,
    },
    /// Backend call failed; the cell contributes nothing
    Failed { reason: String },
    /// Never issued or not finished before the deadline, cancellation or budget
    Abandoned,
}

/// Raw grouped-sum output for one grid cell
#[derive(Debug, Clone, PartialEq)]
pub struct TileResult {
    pub cell_id: usize,
    pub scale_policy: ScalePolicy,
    pub outcome: TileOutcome,
}

impl TileResult {
    pub fn reported(cell_id: usize, scale_policy: ScalePolicy, groups: Vec<GroupSum>) -> Self {
        Self {
            cell_id,
            scale_policy,
            outcome: TileOutcome::Reported {
                groups,
                scale_m: None,
            },
        }
    }

    /// Group records, empty unless the cell reported
    pub fn groups(&self) -> &[GroupSum] {
        match &self.outcome {
            TileOutcome::Reported { groups, .. } => groups,
            _ => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, TileOutcome::Failed { .. })
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self.outcome, TileOutcome::Abandoned)
    }
}

/// Value and grouping layers for the loss reduction
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionLayers {
    pub value: LayerExpr,
    pub group: LayerExpr,
}

/// Fan-out limits and hooks for one aggregation
#[derive(Clone)]
pub struct ReduceOptions {
    pub scale_policy: ScalePolicy,
    pub max_pixels: u64,
    /// Maximum reductions in flight; further cells wait their turn
    pub max_concurrency: usize,
    /// Maximum reductions issued in total
    pub request_budget: Option<usize>,
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    pub progress: Option<ProgressCallback>,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            scale_policy: ScalePolicy::default(),
            max_pixels: 1_000_000_000,
            max_concurrency: 8,
            request_budget: None,
            deadline: None,
            cancel: None,
            progress: None,
        }
    }
}

impl std::fmt::Debug for ReduceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReduceOptions")
            .field("scale_policy", &self.scale_policy)
            .field("max_pixels", &self.max_pixels)
            .field("max_concurrency", &self.max_concurrency)
            .field("request_budget", &self.request_budget)
            .field("deadline", &self.deadline)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Reduce a single cell, turning any backend failure into a recorded outcome
async fn reduce_cell<B>(
    backend: &B,
    cell: &GridCell,
    layers: &ReductionLayers,
    options: &ReduceOptions,
) -> TileResult
where
    B: RasterBackend + ?Sized,
{
    let request = GroupedReduceRequest {
        value: layers.value.clone(),
        group: layers.group.clone(),
        geometry: WireGeometry::from(&cell.geometry),
        scale_policy: options.scale_policy,
        max_pixels: options.max_pixels,
    };

    let outcome = match backend.reduce_grouped(&request).await {
        Ok(response) => {
            debug!(
                "Cell {} reported {} groups at scale {:?}",
                cell.id,
                response.groups.len(),
                response.scale_m
            );
            TileOutcome::Reported {
                groups: response.groups,
                scale_m: response.scale_m,
            }
        }
        Err(e) => {
            let failure = Error::TileReduction {
                cell_id: cell.id,
                reason: e.to_string(),
            };
            warn!("⚠️  {failure}");
            TileOutcome::Failed {
                reason: e.to_string(),
            }
        }
    };

    TileResult {
        cell_id: cell.id,
        scale_policy: options.scale_policy,
        outcome,
    }
}

/// Reduce every cell, returning one [`TileResult`] per cell in cell order.
///
/// Results are collected as they complete; completion order has no effect on
/// the returned vector.
pub async fn reduce_cells<B>(
    backend: &B,
    cells: &[GridCell],
    layers: &ReductionLayers,
    options: &ReduceOptions,
) -> Vec<TileResult>
where
    B: RasterBackend + ?Sized,
{
    let total = cells.len();
    let issued = options.request_budget.map_or(total, |budget| budget.min(total));
    if issued < total {
        warn!(
            "⚠️  Request budget allows {issued} of {total} cells; the rest will be abandoned"
        );
    }

    let mut slots: Vec<Option<TileResult>> = vec![None; total];
    let finished = AtomicU64::new(0);
    let cancel = options.cancel.clone().unwrap_or_default();

    let deadline = async {
        match options.deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => futures::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let stream = futures::stream::iter(cells[..issued].iter().enumerate())
        .map(|(idx, cell)| async move { (idx, reduce_cell(backend, cell, layers, options).await) })
        .buffer_unordered(options.max_concurrency.max(1));
    tokio::pin!(stream);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("⚠️  Aggregation cancelled; abandoning outstanding cells");
                break;
            }
            _ = &mut deadline => {
                warn!("⚠️  Deadline reached; abandoning outstanding cells");
                break;
            }
            next = stream.next() => {
                let Some((idx, result)) = next else { break };
                slots[idx] = Some(result);
                let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(progress) = &options.progress {
                    progress(done, total as u64);
                }
            }
        }
    }

    slots
        .into_iter()
        .zip(cells)
        .map(|(slot, cell)| {
            slot.unwrap_or(TileResult {
                cell_id: cell.id,
                scale_policy: options.scale_policy,
                outcome: TileOutcome::Abandoned,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{
        BoundaryFeature, BoundaryQuery, GroupedReduceResponse, LayerHandle, PublishLayerRequest,
    };
    use crate::core::error::Result;
    use async_trait::async_trait;
    use geo::{polygon, BoundingRect, MultiPolygon, Rect};
    use std::sync::atomic::AtomicUsize;

    /// Backend whose answer depends on the cell's west edge; counts concurrency
    struct ColumnBackend {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl ColumnBackend {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl RasterBackend for ColumnBackend {
        async fn check_available(&self) -> Result<()> {
            Ok(())
        }

        async fn lookup_boundaries(&self, _query: &BoundaryQuery) -> Result<Vec<BoundaryFeature>> {
            Ok(vec![])
        }

        async fn boundary_names(&self, _dataset: &str, _property: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn reduce_grouped(
            &self,
            request: &GroupedReduceRequest,
        ) -> Result<GroupedReduceResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let geometry = MultiPolygon::try_from(&request.geometry)?;
            let west = geometry.bounding_rect().map(|r| r.min().x).unwrap_or_default();
            if west >= 3.0 {
                return Err(Error::CapacityExceeded("Too many pixels".to_string()));
            }
            Ok(GroupedReduceResponse {
                groups: vec![GroupSum {
                    group: 1,
                    sum: west + 1.0,
                }],
                scale_m: Some(30.0),
            })
        }

        async fn publish_layer(&self, _request: &PublishLayerRequest) -> Result<LayerHandle> {
            Err(Error::Backend("not supported".to_string()))
        }
    }

    fn cells(n: usize) -> Vec<GridCell> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                let square = polygon![(x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 1.0)];
                GridCell {
                    id: i,
                    bounds: Rect::new((x, 0.0), (x + 1.0, 1.0)),
                    geometry: MultiPolygon(vec![square]),
                }
            })
            .collect()
    }

    fn layers() -> ReductionLayers {
        ReductionLayers {
            value: LayerExpr::PixelArea,
            group: LayerExpr::constant(1.0),
        }
    }

    #[tokio::test]
    async fn test_failed_cell_is_recorded_not_fatal() {
        let backend = ColumnBackend::new(Duration::from_millis(1));
        let results = reduce_cells(&backend, &cells(4), &layers(), &ReduceOptions::default()).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().map(|r| r.cell_id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(results[3].is_failed());
        assert_eq!(results[0].groups(), &[GroupSum { group: 1, sum: 1.0 }]);
        assert_eq!(results.iter().filter(|r| r.is_failed()).count(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_limit_queues_excess_cells() {
        let backend = ColumnBackend::new(Duration::from_millis(20));
        let options = ReduceOptions {
            max_concurrency: 2,
            ..Default::default()
        };
        let results = reduce_cells(&backend, &cells(3), &layers(), &options).await;

        assert!(results.iter().all(|r| !r.is_failed() && !r.is_abandoned()));
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_request_budget_abandons_remaining_cells() {
        let backend = ColumnBackend::new(Duration::from_millis(1));
        let options = ReduceOptions {
            request_budget: Some(2),
            ..Default::default()
        };
        let results = reduce_cells(&backend, &cells(3), &layers(), &options).await;

        assert!(!results[0].is_abandoned());
        assert!(!results[1].is_abandoned());
        assert!(results[2].is_abandoned());
    }

    #[tokio::test]
    async fn test_deadline_keeps_completed_cells() {
        let backend = ColumnBackend::new(Duration::from_millis(300));
        let options = ReduceOptions {
            max_concurrency: 1,
            deadline: Some(Duration::from_millis(450)),
            ..Default::default()
        };
        let results = reduce_cells(&backend, &cells(3), &layers(), &options).await;

        assert!(matches!(results[0].outcome, TileOutcome::Reported { .. }));
        assert!(results[1].is_abandoned());
        assert!(results[2].is_abandoned());
    }

    #[tokio::test]
    async fn test_cancellation_abandons_everything_outstanding() {
        let backend = ColumnBackend::new(Duration::from_millis(50));
        let token = CancellationToken::new();
        token.cancel();
        let options = ReduceOptions {
            cancel: Some(token),
            ..Default::default()
        };
        let results = reduce_cells(&backend, &cells(2), &layers(), &options).await;
        assert!(results.iter().all(|r| r.is_abandoned()));
    }

    #[tokio::test]
    async fn test_progress_reports_every_cell() {
        let backend = ColumnBackend::new(Duration::from_millis(1));
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        let options = ReduceOptions {
            progress: Some(Arc::new(move |done, total| {
                assert_eq!(total, 3);
                seen_clone.store(done, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        reduce_cells(&backend, &cells(3), &layers(), &options).await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
