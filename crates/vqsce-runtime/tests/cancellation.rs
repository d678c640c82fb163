mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use vqsce_runtime::pipeline::{Pipeline, RuntimeCaps, StreamEvent};

use common::{plan, SyntheticSource, PATCH_BYTES};

fn tight_caps() -> RuntimeCaps {
    RuntimeCaps {
        max_inflight_bytes: 64 * PATCH_BYTES,
        max_queue_batches: 1,
        max_queue_patches: 2,
        num_workers: 4,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_unblocks_workers_waiting_on_full_queues() -> Result<()> {
    let pipeline = Pipeline::new(tight_caps());
    let metrics = pipeline.metrics();
    let mut stream = pipeline.spawn_stream(Arc::new(SyntheticSource::new(1_000)), plan(4, 5, 0))?;

    assert!(matches!(stream.next().await, Some(StreamEvent::Batch(_))));
    // Let every queue fill up behind the idle consumer.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let produced_before = metrics.produced_patches_total.get();

    let cancel = stream.cancel_handle();
    cancel.cancel();
    assert!(cancel.is_cancelled());
    assert!(stream.next().await.is_none());

    let summary = tokio::time::timeout(Duration::from_secs(5), stream.finish()).await??;
    assert!(summary.cancelled);
    assert!(summary.epochs.is_empty());
    assert!(metrics.produced_patches_total.get() <= produced_before + 4);
    assert_eq!(metrics.delivered_batches_total.get(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_unblocks_producer_waiting_for_inflight_budget() -> Result<()> {
    let pipeline = Pipeline::new(RuntimeCaps {
        max_inflight_bytes: 4 * PATCH_BYTES,
        ..tight_caps()
    });
    let mut stream = pipeline.spawn_stream(Arc::new(SyntheticSource::new(200)), plan(4, 1, 0))?;

    let held = match stream.next().await {
        Some(StreamEvent::Batch(lease)) => lease,
        other => anyhow::bail!("unexpected event {other:?}"),
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.cancel_handle().cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), stream.finish()).await??;
    assert!(summary.cancelled);
    drop(held);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_from_another_task_ends_the_stream() -> Result<()> {
    let pipeline = Pipeline::new(tight_caps());
    let source = SyntheticSource::new(400).draw_delay(Duration::from_millis(1));
    let mut stream = pipeline.spawn_stream(Arc::new(source), plan(4, 3, 0))?;

    let cancel = stream.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let mut batches = 0;
    while let Some(event) = stream.next().await {
        if let StreamEvent::Batch(_) = event {
            batches += 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    canceller.await?;
    assert!(batches < 300, "cancellation did not stop production");
    assert!(stream.next().await.is_none());
    let summary = stream.finish().await?;
    assert!(summary.cancelled);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_consumer_observes_cancellation() -> Result<()> {
    let pipeline = Pipeline::new(tight_caps());
    let mut stream = pipeline.spawn_stream(Arc::new(SyntheticSource::new(1_000)), plan(4, 2, 0))?;
    let cancel = stream.cancel_handle();

    let consumer = tokio::task::spawn_blocking(move || {
        let mut batches = 0usize;
        while let Some(event) = stream.blocking_next() {
            if let StreamEvent::Batch(_) = event {
                batches += 1;
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        (stream, batches)
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    cancel.cancel();
    let (stream, batches) = tokio::time::timeout(Duration::from_secs(5), consumer).await??;
    assert!(batches < 500);
    let summary = stream.finish().await?;
    assert!(summary.cancelled);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finish_returns_while_a_lease_is_held() -> Result<()> {
    let pipeline = Pipeline::new(RuntimeCaps {
        max_inflight_bytes: 4 * PATCH_BYTES,
        ..tight_caps()
    });
    let mut stream = pipeline.spawn_stream(Arc::new(SyntheticSource::new(200)), plan(4, 1, 0))?;

    let held = match stream.next().await {
        Some(StreamEvent::Batch(lease)) => lease,
        other => anyhow::bail!("unexpected event {other:?}"),
    };
    // The producer is now waiting for budget the held lease occupies.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let summary = tokio::time::timeout(Duration::from_secs(3), stream.finish()).await??;
    assert!(summary.cancelled);
    assert!(summary.epochs.is_empty());
    drop(held);
    Ok(())
}
