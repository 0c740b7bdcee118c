use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use coalescer::{Registry, metric};
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{WorkloadsConfig, prepare_workload};

struct Report {
    concurrency: usize,
    task_durations: DDSketch,
    failures: usize,
    invocations: usize,
    clears: usize,
}

pub async fn perform_stresstest(workloads: WorkloadsConfig, duration: Duration) -> Result<()> {
    let registry = Registry::new();

    // initialize workloads
    let workloads = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| prepare_workload(i, workload, Arc::clone(&registry)).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(workloads = workloads.len(), "starting stresstest");

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for workload in workloads {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);

        let task = tokio::spawn(async move {
            let concurrency = workload.concurrency;
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let failures = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            let clearer = workload.clear_every.map(|period| {
                let workload = Arc::clone(&workload);
                tokio::spawn(async move {
                    let mut clears = 0;
                    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                workload.fetch().clear();
                                clears += 1;
                            }
                            _ = tokio::time::sleep_until(deadline) => break,
                        }
                    }
                    clears
                })
            });

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let task_durations = Arc::clone(&task_durations);
                        let failures = Arc::clone(&failures);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            if let Err(error) = workload.run_once().await {
                                tracing::trace!(error = %error, "call failed");
                                failures.fetch_add(1, Ordering::Relaxed);
                            }

                            let elapsed = task_start.elapsed();
                            metric!(timer("stress.call") = elapsed, "operation" => workload.fetch().name());
                            if let Ok(mut task_durations) = task_durations.lock() {
                                task_durations.add(elapsed.as_secs_f64());
                            }

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations = match task_durations.lock() {
                Ok(mut task_durations) => std::mem::take(&mut *task_durations),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            let clears = match clearer {
                Some(clearer) => clearer.await.unwrap_or_default(),
                None => 0,
            };

            Report {
                concurrency,
                task_durations,
                failures: failures.load(Ordering::Relaxed),
                invocations: workload.backend().invocations(),
                clears,
            }
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let report = task?;
        print_report(i, &report, duration);
    }

    Ok(())
}

fn print_report(i: usize, report: &Report, duration: Duration) {
    let Report {
        concurrency,
        ref task_durations,
        failures,
        invocations,
        clears,
    } = *report;

    let ops = task_durations.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

    let ratio = match invocations {
        0 => 0.0,
        invocations => ops as f64 / invocations as f64,
    };
    println!(
        "  invocations: {invocations}; coalescing ratio: {ratio:.2}; failures: {failures}; clears: {clears}"
    );

    if ops == 0 {
        return;
    }
    let quantile = |q| {
        let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs)
    };
    let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
    let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
    println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
}
