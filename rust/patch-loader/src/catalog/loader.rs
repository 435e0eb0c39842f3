// rust/patch-loader/src/catalog/loader.rs

use std::collections::BTreeSet;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::{RowCatalog, SampleRows};
use crate::error::{LoaderError, Result};
use crate::store::RowStore;
use crate::types::{ClassLabel, SampleId};

/// Reads every row key from `store` and groups it by sample and class.
///
/// The distinct samples are sorted and then shuffled with `seed`, so the
/// catalog order depends only on the store contents and the seed. Row-key
/// queries are issued at most `concurrency` at a time; each list is shuffled
/// right after retrieval so that consuming from the front is unbiased.
///
/// # Errors
///
/// Any failed query aborts the load; no partial catalog is returned.
pub async fn load_catalog(
    store: &dyn RowStore,
    num_classes: usize,
    concurrency: usize,
    seed: u64,
) -> Result<RowCatalog> {
    if concurrency == 0 {
        return Err(LoaderError::config("catalog concurrency must be greater than 0"));
    }
    let started = Instant::now();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let listed = store.list_distinct_samples().await?;
    let distinct: BTreeSet<SampleId> = listed.into_iter().map(|(sample, _)| sample).collect();
    let mut samples: Vec<SampleId> = distinct.into_iter().collect();
    samples.shuffle(&mut rng);
    debug!(
        samples = samples.len(),
        backend = store.backend_type(),
        "listed distinct samples"
    );

    let requests: Vec<(usize, ClassLabel)> = ClassLabel::all(num_classes)
        .flat_map(|label| (0..samples.len()).map(move |index| (index, label)))
        .collect();

    let fetched: Vec<_> = stream::iter(requests)
        .map(|(index, label)| {
            let sample = &samples[index];
            async move {
                let keys = store.fetch_row_keys(sample, label).await?;
                Ok::<_, LoaderError>((index, label, keys))
            }
        })
        .buffered(concurrency)
        .try_collect()
        .await?;

    let mut grouped: Vec<SampleRows> = samples
        .iter()
        .map(|sample| SampleRows {
            sample: sample.clone(),
            rows: vec![Vec::new(); num_classes],
        })
        .collect();
    // `buffered` yields in request order, so the shuffles below consume the
    // rng in a fixed sequence.
    for (index, label, mut keys) in fetched {
        keys.shuffle(&mut rng);
        grouped[index].rows[label.index()] = keys;
    }

    let catalog = RowCatalog::from_samples(num_classes, grouped)?;
    info!(
        samples = catalog.num_samples(),
        rows = catalog.total_rows(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded row catalog"
    );
    Ok(catalog)
}
