fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sdrflow=info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("pipeline bench failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use sdrflow_core::{
        DiagnosticsSnapshot, EngineConfig, KernelHandle, MetricsSnapshot, PoolConfig, PoolStats,
        SampleProducer, SpectrumEngine, SpectrumEvent,
    };
    use serde::Serialize;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError};

    #[derive(Debug)]
    struct Args {
        frames: usize,
        fft_size: usize,
        workers: usize,
        tone_bin: usize,
        seed: u64,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Summary {
        kernel: String,
        frames: usize,
        fft_size: usize,
        workers: usize,
        elapsed_ms: f64,
        frames_per_sec: f64,
        spectra_received: usize,
        spectra_lagged: u64,
        tone_bin: usize,
        peak_bin: Option<usize>,
        diagnostics: DiagnosticsSnapshot,
        metrics: MetricsSnapshot,
        buffers: PoolStats,
    }

    #[derive(Default)]
    struct Receiver {
        received: usize,
        lagged: u64,
        last: Option<SpectrumEvent>,
    }

    impl Receiver {
        fn drain(&mut self, rx: &mut broadcast::Receiver<SpectrumEvent>) {
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        self.received += 1;
                        self.last = Some(event);
                    }
                    Err(TryRecvError::Lagged(n)) => self.lagged += n,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
                }
            }
        }
    }

    fn parse_args() -> Result<Args, String> {
        let mut args = Args {
            frames: 2_000,
            fft_size: 1_024,
            workers: 0,
            tone_bin: 100,
            seed: 7,
            output: None,
        };

        fn value<T: std::str::FromStr>(
            it: &mut impl Iterator<Item = String>,
            flag: &str,
        ) -> Result<T, String> {
            let Some(v) = it.next() else {
                return Err(format!("missing value for {flag}"));
            };
            v.parse::<T>()
                .map_err(|_| format!("invalid value for {flag}: {v}"))
        }

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--frames" => args.frames = value::<usize>(&mut it, "--frames")?.max(1),
                "--fft-size" => args.fft_size = value::<usize>(&mut it, "--fft-size")?.clamp(2, 1 << 16),
                "--workers" => args.workers = value(&mut it, "--workers")?,
                "--tone-bin" => args.tone_bin = value(&mut it, "--tone-bin")?,
                "--seed" => args.seed = value(&mut it, "--seed")?,
                "--output" => args.output = Some(PathBuf::from(value::<String>(&mut it, "--output")?)),
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p sdrflow-core --release --bin pipeline_bench -- \\
  [--frames <n>] [--fft-size <n>] [--workers <n>] [--tone-bin <k>] [--seed <n>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }
        args.tone_bin %= args.fft_size;
        Ok(args)
    }

    /// One frame of interleaved IQ: a complex tone on `tone_bin` plus uniform noise.
    fn synth_frame(rng: &mut StdRng, fft_size: usize, tone_bin: usize, start: usize) -> Vec<f32> {
        let step = 2.0 * std::f64::consts::PI * tone_bin as f64 / fft_size as f64;
        let mut frame = Vec::with_capacity(2 * fft_size);
        for n in 0..fft_size {
            let phase = step * (start + n) as f64;
            let noise_i: f32 = rng.gen_range(-0.01..0.01);
            let noise_q: f32 = rng.gen_range(-0.01..0.01);
            frame.push(0.5 * phase.cos() as f32 + noise_i);
            frame.push(0.5 * phase.sin() as f32 + noise_q);
        }
        frame
    }

    fn write_all(producer: &mut SampleProducer, mut samples: &[f32]) {
        while !samples.is_empty() {
            let written = producer.write(samples);
            samples = &samples[written..];
            if written == 0 {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
    }

    let args = parse_args()?;

    #[cfg(feature = "fft")]
    let kernel = KernelHandle::new(
        sdrflow_core::FftKernel::new(args.fft_size).map_err(|e| e.to_string())?,
    );
    #[cfg(not(feature = "fft"))]
    let kernel = KernelHandle::new(sdrflow_core::StubKernel::new());

    let frame_len = 2 * args.fft_size;
    let config = EngineConfig {
        ring_capacity: (frame_len * 16 + 1).max(1 << 16),
        frame_len,
        fft_pool: PoolConfig::fft().with_workers(args.workers),
        drain_idle_ms: Some(1),
        ..EngineConfig::default()
    };

    let engine = SpectrumEngine::new(config, kernel.clone()).map_err(|e| e.to_string())?;
    let workers = engine.fft_pool().size();
    println!(
        "Running sdrflow pipeline bench: kernel={} frames={} fft_size={} workers={}",
        kernel.name(),
        args.frames,
        args.fft_size,
        workers
    );

    let mut spectra = engine.subscribe_spectra();
    let mut producer = engine.start().map_err(|e| e.to_string())?;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut receiver = Receiver::default();

    let started = Instant::now();
    for i in 0..args.frames {
        let frame = synth_frame(&mut rng, args.fft_size, args.tone_bin, i * args.fft_size);
        write_all(&mut producer, &frame);
        receiver.drain(&mut spectra);
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        receiver.drain(&mut spectra);
        let d = engine.diagnostics_snapshot();
        let settled = d.frames_in == args.frames
            && d.spectra_emitted + d.kernel_errors + d.frames_shed == d.frames_in;
        if settled || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    let elapsed = started.elapsed();
    engine.stop().map_err(|e| e.to_string())?;
    receiver.drain(&mut spectra);

    let peak_bin = receiver.last.as_ref().and_then(|event| {
        event
            .bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin)
    });

    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let summary = Summary {
        kernel: kernel.name().to_string(),
        frames: args.frames,
        fft_size: args.fft_size,
        workers,
        elapsed_ms,
        frames_per_sec: if elapsed_ms > 0.0 {
            args.frames as f64 / (elapsed_ms / 1000.0)
        } else {
            0.0
        },
        spectra_received: receiver.received,
        spectra_lagged: receiver.lagged,
        tone_bin: args.tone_bin,
        peak_bin,
        diagnostics: engine.diagnostics_snapshot(),
        metrics: engine.metrics(),
        buffers: engine.buffer_stats(),
    };

    println!(
        "Done. frames={} shed={} {:.0} frames/s avg={:.3}ms",
        summary.frames,
        summary.diagnostics.frames_shed,
        summary.frames_per_sec,
        summary.metrics.avg_processing_time
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote bench report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
