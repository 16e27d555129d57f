use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use sdrflow_core::{
    EngineConfig, EngineStatus, KernelHandle, PoolConfig, Priority, SpectrumEngine, SpectrumEvent,
    StubKernel, WorkerPool,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

fn recv_event_with_timeout(
    rx: &mut broadcast::Receiver<SpectrumEvent>,
    timeout: Duration,
) -> SpectrumEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) => return ev,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for spectrum event");
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("spectrum channel closed unexpectedly"),
        }
    }
}

/// Interleaved IQ of a unit-amplitude complex tone on `bin`.
#[cfg(feature = "fft")]
fn tone_frame(size: usize, bin: usize) -> Vec<f32> {
    let step = 2.0 * std::f64::consts::PI * bin as f64 / size as f64;
    (0..size)
        .flat_map(|n| {
            let phase = step * n as f64;
            [phase.cos() as f32, phase.sin() as f32]
        })
        .collect()
}

#[cfg(feature = "fft")]
fn peak_bin(bins: &[f32]) -> usize {
    bins.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(bin, _)| bin)
        .expect("non-empty spectrum")
}

#[test]
fn tasks_with_distinct_priorities_each_complete_exactly_once() {
    const TASKS: usize = 40;
    let pool = WorkerPool::new(&PoolConfig::fft().with_workers(3)).expect("spawn pool");
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..TASKS).map(|_| AtomicUsize::new(0)).collect());
    let (tx, rx) = crossbeam_channel::unbounded();

    for k in 0..TASKS {
        let runs = Arc::clone(&runs);
        let tx = tx.clone();
        pool.submit_with_callback(
            move |k: usize| {
                runs[k].fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_micros(300));
                Ok(k * k)
            },
            k,
            Priority(k as i32 * 7 - 100),
            move |outcome| {
                let _ = tx.send((k, outcome));
            },
        );
    }
    drop(tx);

    let mut completed = vec![0usize; TASKS];
    for _ in 0..TASKS {
        let (k, outcome) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("task completion");
        assert_eq!(outcome.expect("task succeeded"), k * k);
        completed[k] += 1;
    }
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    assert!(completed.iter().all(|&c| c == 1), "completions: {completed:?}");
    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));

    let metrics = pool.metrics().get_metrics();
    assert_eq!(metrics.queue_depth, 0);
    assert_eq!(metrics.total_operations, TASKS as u64);
    assert!(metrics.min_processing_time <= metrics.avg_processing_time);
    assert!(metrics.avg_processing_time <= metrics.max_processing_time);
}

#[cfg(feature = "fft")]
#[test]
fn fft_tasks_resolve_each_tone_to_its_bin() {
    use sdrflow_core::{FftKernel, SpectrumKernel};

    const SIZE: usize = 256;
    let pool = WorkerPool::new(&PoolConfig::fft().with_workers(4)).expect("spawn pool");
    let kernel = Arc::new(FftKernel::new(SIZE).expect("plan fft"));

    let handles: Vec<_> = (0..32usize)
        .map(|bin| {
            let kernel = Arc::clone(&kernel);
            let handle = pool.submit(
                move |frame: Vec<f32>| kernel.process(&frame),
                tone_frame(SIZE, bin),
                Priority(bin as i32),
            );
            (bin, handle)
        })
        .collect();

    for (bin, handle) in handles {
        let spectrum = handle.wait().expect("fft task");
        assert_eq!(spectrum.len(), SIZE);
        assert_eq!(peak_bin(&spectrum), bin + SIZE / 2);
    }
    assert_eq!(pool.metrics().queue_depth(), 0);
}

#[cfg(feature = "fft")]
#[test]
fn engine_streams_fft_spectra_from_the_ring() {
    use sdrflow_core::FftKernel;

    const SIZE: usize = 512;
    let config = EngineConfig {
        ring_capacity: 1 << 16,
        frame_len: 2 * SIZE,
        center_frequency_hz: 145.5e6,
        fft_pool: PoolConfig::fft().with_workers(2),
        dsp_pool: PoolConfig::dsp().with_workers(1),
        drain_idle_ms: Some(1),
        ..EngineConfig::default()
    };
    let kernel = KernelHandle::new(FftKernel::new(SIZE).expect("plan fft"));
    let engine = SpectrumEngine::new(config, kernel).expect("engine");
    let mut spectra = engine.subscribe_spectra();
    let mut producer = engine.start().expect("start");

    let frame = tone_frame(SIZE, 40);
    for _ in 0..6 {
        assert_eq!(producer.write(&frame), frame.len());
    }

    let mut seen = Vec::new();
    for _ in 0..6 {
        let event = recv_event_with_timeout(&mut spectra, Duration::from_secs(3));
        assert_eq!(event.bins.len(), SIZE);
        assert_eq!(event.center_frequency_hz, 145.5e6);
        assert_eq!(peak_bin(&event.bins), 40 + SIZE / 2);
        seen.push(event.frame);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..6).collect::<Vec<u64>>());

    engine.stop().expect("stop");
    assert_eq!(engine.status(), EngineStatus::Stopped);
    assert_eq!(engine.diagnostics_snapshot().spectra_emitted, 6);
}

#[test]
fn engine_survives_restart_with_stub_kernel() {
    let config = EngineConfig {
        ring_capacity: 4_096,
        frame_len: 128,
        fft_pool: PoolConfig::fft().with_workers(1),
        dsp_pool: PoolConfig::dsp().with_workers(1),
        drain_idle_ms: Some(1),
        ..EngineConfig::default()
    };
    let engine = SpectrumEngine::new(config, KernelHandle::new(StubKernel::new())).expect("engine");
    let mut spectra = engine.subscribe_spectra();

    for run in 0..2 {
        let mut producer = engine.start().expect("start");
        producer.write(&[0.5; 128]);
        let event = recv_event_with_timeout(&mut spectra, Duration::from_secs(2));
        assert_eq!(event.frame, 0, "frame index restarts with each run");
        assert_eq!(event.seq, run);
        engine.stop().expect("stop");
        assert_eq!(engine.diagnostics_snapshot().frames_in, 1);
    }
    assert_eq!(engine.metrics().total_operations, 2);
}
