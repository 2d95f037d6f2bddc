use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use lvcsr::audio::preprocess::Preprocessor;
use lvcsr::audio::resample::Down48Source;
use lvcsr::audio::segmenter::{AdinStatus, ControlFlow, Segmenter};
use lvcsr::audio::source::{
    AdinnetSource, AudioSource, FileSource, MicSource, SourceKind, StdinSource,
};
use lvcsr::cli::{expand_jconf_args, AdinToolConfig, Args};
use lvcsr::output::adinnet::AdinnetSink;
use lvcsr::output::file::FileSink;
use lvcsr::output::stdout::StdoutSink;
use lvcsr::output::vecnet::{EnergyFrontend, VecnetSink};
use lvcsr::output::{NullSink, SegmentSink, SinkKind};
use lvcsr::session::AdinSession;

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().collect();
    let expanded = match expand_jconf_args(raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(1);
        }
    };
    let args = match Args::try_parse_from(expanded) {
        Ok(args) => args,
        Err(e) => {
            // clap renders help/usage itself
            e.print().ok();
            return ExitCode::from(1);
        }
    };

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match AdinToolConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn build_source(config: &AdinToolConfig) -> Result<Box<dyn AudioSource>> {
    let capture_rate = if config.down48 { 48000 } else { config.freq };
    let source: Box<dyn AudioSource> = match config.source {
        SourceKind::Mic => Box::new(MicSource::new(
            config.device.clone(),
            capture_rate,
            config.segmenter.chunk_size,
        )),
        SourceKind::File => Box::new(FileSource::new(config.infiles.clone(), capture_rate)),
        SourceKind::Stdin => Box::new(StdinSource::new()),
        SourceKind::Adinnet => Box::new(AdinnetSource::new(config.inport)),
    };
    if config.down48 {
        Ok(Box::new(Down48Source::new(source, config.freq)?))
    } else {
        Ok(source)
    }
}

fn build_sink(config: &AdinToolConfig) -> Box<dyn SegmentSink> {
    match config.sink {
        SinkKind::File => Box::new(FileSink::new(
            config.filename.clone().unwrap_or_default(),
            config.use_raw,
            config.continuous,
            config.freq,
            config.start_id,
        )),
        SinkKind::Stdout => Box::new(StdoutSink),
        SinkKind::Adinnet => Box::new(AdinnetSink::new(config.endpoints.clone(), config.sync)),
        SinkKind::Vecnet => {
            // MFCC-class front-ends plug in through the FeatureExtractor
            // trait; the bundled one only guarantees framing and dimensions
            let frame_size = config.freq as usize * 25 / 1000;
            let frame_shift = config.freq as usize * 10 / 1000;
            Box::new(VecnetSink::new(
                config.endpoints.clone(),
                config.sync,
                Box::new(EnergyFrontend::new(config.veclen, frame_size, frame_shift)),
                config.freq,
            ))
        }
        SinkKind::None => Box::new(NullSink),
    }
}

fn log_banner(config: &AdinToolConfig, sink: &dyn SegmentSink) {
    info!("----------------------------------------");
    info!("INPUT");
    info!("    InputSource: {}", config.source);
    if config.segmenter.silence_cut {
        if config.continuous {
            info!("   Segmentation: on, continuous");
        } else {
            info!("   Segmentation: on, only one snapshot");
        }
        if config.down48 {
            info!("     SampleRate: 48000Hz -> {} Hz", config.freq);
        } else {
            info!("     SampleRate: {} Hz", config.freq);
        }
        info!("          Level: {} / 32767", config.segmenter.level_thres);
        info!("      ZeroCross: {} per sec.", config.segmenter.zc_thres);
        info!("     HeadMargin: {} msec.", config.segmenter.head_margin_msec);
        info!("     TailMargin: {} msec.", config.segmenter.tail_margin_msec);
    } else {
        info!("   Segmentation: OFF");
    }
    info!(
        "     ZeroFrames: {}",
        if config.preprocess.strip_zero { "drop" } else { "keep" }
    );
    info!(
        "      DCRemoval: {}",
        if config.preprocess.zmean { "on" } else { "off" }
    );
    info!("      AutoPause: {}", if config.autopause { "on" } else { "off" });
    info!(
        "      LooseSync: {}",
        if config.sync == lvcsr::output::control::SyncMode::Loose { "on" } else { "off" }
    );
    if config.segmenter.rewind_msec > 0 {
        info!("         Rewind: {} msec", config.segmenter.rewind_msec);
    } else {
        info!("         Rewind: no");
    }
    info!("OUTPUT");
    info!("       OutputTo: {}", sink.describe());
    if let Some(paramtype) = &config.paramtype {
        info!("      ParamType: {}", paramtype);
        info!("      VectorLen: {}", config.veclen);
    }
    info!("----------------------------------------");
}

fn run(config: AdinToolConfig) -> lvcsr::Result<()> {
    let mut source = build_source(&config).map_err(|e| {
        lvcsr::LvcsrError::Config(format!("failed to initialize input: {}", e))
    })?;
    let mut sink = build_sink(&config);
    log_banner(&config, sink.as_ref());

    let mut session = AdinSession::new(config.freq);
    if let Err(e) = session.install_signal_handler() {
        log::warn!("signal interruption may collapse output: {}", e);
    }

    sink.open_session()?;

    let mut segmenter = Segmenter::new(config.segmenter.clone());
    segmenter.set_terminate_flag(session.flags.terminate_handle());
    let mut preprocessor = Preprocessor::new(config.preprocess.clone());

    info!("[start recording]");

    'streams: loop {
        match source.begin() {
            Ok(true) => {}
            Ok(false) => break 'streams,
            Err(e) => {
                error!("failed to begin input stream: {}", e);
                break 'streams;
            }
        }
        segmenter.reset();
        preprocessor.reset();

        // segments within one input stream
        loop {
            if session.flags.terminate_requested() {
                break 'streams;
            }
            if config.source == SourceKind::Mic {
                info!("<<< please speak >>>");
            }

            let status = segmenter.run(source.as_mut(), &mut preprocessor, sink.as_mut());
            let speechlen = segmenter.speech_len();
            session.record_segment(segmenter.segment_start(), speechlen);

            match status {
                AdinStatus::Terminated => info!("[terminated by server]"),
                AdinStatus::Error => info!("[error]"),
                AdinStatus::EndOfStream => info!("[eof]"),
                AdinStatus::Segmented => info!("[segmented]"),
            }

            if status == AdinStatus::Error {
                sink.close_session()?;
                return Err(lvcsr::LvcsrError::Config(
                    "device or output error while capturing".to_string(),
                ));
            }

            if speechlen > 0 && matches!(config.sink, SinkKind::Adinnet | SinkKind::Vecnet) {
                session.log_segment_summary(speechlen);
            }

            // pause/resume against the remote servers
            let should_wait = (config.autopause || sink.pause_pending())
                && matches!(config.sink, SinkKind::Adinnet | SinkKind::Vecnet);
            if should_wait {
                if config.segmenter.rewind_msec == 0 {
                    source.pause();
                }
                let flow = sink.wait_resume();
                if config.segmenter.rewind_msec == 0 {
                    source.resume();
                }
                segmenter.notify_resume();
                if flow == ControlFlow::Fatal {
                    sink.close_session()?;
                    return Err(lvcsr::LvcsrError::Config(
                        "control channel failed while waiting for resume".to_string(),
                    ));
                }
            }

            // a terminate that did not come with a pause/resume cycle means
            // the input itself is gone
            let continues = match status {
                AdinStatus::Segmented => config.continuous,
                AdinStatus::Terminated => config.continuous && should_wait,
                _ => false,
            };
            if config.oneshot && speechlen > 0 {
                break 'streams;
            }
            if !continues {
                break;
            }
        }

        source.end();
    }

    sink.close_session()?;

    if session.segments_emitted > 0 {
        info!(
            "recorded total {} samples ({:.2} sec.) in {} segment(s)",
            session.total_speechlen,
            session.total_speechlen as f64 / config.freq as f64,
            session.segments_emitted,
        );
    }
    Ok(())
}
