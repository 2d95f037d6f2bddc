//! Command-line surface of the `adintool` binary.
//!
//! Option parsing is two-stage: jconf includes are spliced into the raw
//! argument vector first, then clap parses the whole stream, and finally the
//! parsed options are validated into a frozen [`AdinToolConfig`]. Invalid
//! combinations come back as errors; the binary maps them to exit code 1.

use clap::Parser;
use std::path::PathBuf;

use adinnet_protocol::{ADINNET_PORT, VECNET_PORT};

use crate::audio::preprocess::PreprocessConfig;
use crate::audio::segmenter::SegmenterConfig;
use crate::audio::source::SourceKind;
use crate::error::{LvcsrError, Result};
use crate::jconf;
use crate::output::control::SyncMode;
use crate::output::SinkKind;

#[derive(Parser, Debug)]
#[command(name = "adintool")]
#[command(about = "Record, split, send and receive speech segments")]
pub struct Args {
    /// Input source: mic, file, stdin, adinnet
    #[arg(long = "in", value_name = "SOURCE", default_value = "mic")]
    pub input: String,

    /// Output target: file, stdout, adinnet, vecnet, none
    #[arg(long = "out", value_name = "SINK", default_value = "none")]
    pub output: String,

    /// adinnet/vecnet server host(s), comma separated
    #[arg(long, value_name = "HOST[,HOST,...]")]
    pub server: Option<String>,

    /// adinnet/vecnet server port(s), comma separated
    #[arg(long, value_name = "PORT[,PORT,...]")]
    pub port: Option<String>,

    /// Listening port for `--in adinnet`
    #[arg(long, default_value_t = ADINNET_PORT)]
    pub inport: u16,

    /// Output file base path for `--out file`
    #[arg(long, value_name = "PATH")]
    pub filename: Option<PathBuf>,

    /// First value for continuous file numbering
    #[arg(long, default_value_t = 0)]
    pub startid: u32,

    /// Input file(s) for `--in file`
    #[arg(value_name = "FILE")]
    pub infiles: Vec<PathBuf>,

    /// Sampling frequency in Hz
    #[arg(long, default_value_t = 16000)]
    pub freq: u32,

    /// Capture at 48 kHz and down-sample to --freq
    #[arg(long)]
    pub down48: bool,

    /// Input device name (microphone selection)
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,

    /// Level threshold for speech detection (0..32767)
    #[arg(long, default_value_t = 2000)]
    pub lv: i32,

    /// Zero-cross count threshold per second
    #[arg(long, default_value_t = 60)]
    pub zc: u32,

    /// Head margin in milliseconds
    #[arg(long, default_value_t = 300)]
    pub headmargin: u32,

    /// Tail margin in milliseconds
    #[arg(long, default_value_t = 400)]
    pub tailmargin: u32,

    /// Samples read and evaluated per step
    #[arg(long, default_value_t = 1000)]
    pub chunksize: usize,

    /// DC offset added before detection
    #[arg(long, default_value_t = 0)]
    pub offset: i32,

    /// Keep leading zero samples
    #[arg(long)]
    pub nostrip: bool,

    /// Remove DC mean from input
    #[arg(long)]
    pub zmean: bool,

    /// Amplitude scaling factor (0.0 mutes)
    #[arg(long, default_value_t = 1.0)]
    pub lvscale: f32,

    /// Disable speech detection; the whole input is one segment
    #[arg(long)]
    pub nosegment: bool,

    /// Stop after the first detected segment
    #[arg(long)]
    pub oneshot: bool,

    /// Pause after every segment and wait for resume commands
    #[arg(long)]
    pub autopause: bool,

    /// Loose multi-server resume synchronization
    #[arg(long)]
    pub loosesync: bool,

    /// Rewind this many milliseconds on re-trigger after pause
    #[arg(long, default_value_t = 0)]
    pub rewind: u32,

    /// Feature parameter type name for `--out vecnet` (e.g. MFCC_E_D_N_Z)
    #[arg(long, value_name = "TYPE")]
    pub paramtype: Option<String>,

    /// Feature vector length for `--out vecnet`
    #[arg(long, value_name = "N")]
    pub veclen: Option<usize>,

    /// Write raw PCM instead of WAV
    #[arg(long)]
    pub raw: bool,

    /// Read options from a jconf file (repeatable)
    #[arg(short = 'C', long = "config", value_name = "JCONF")]
    pub config: Vec<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Frozen, validated tool configuration.
#[derive(Debug)]
pub struct AdinToolConfig {
    pub source: SourceKind,
    pub sink: SinkKind,
    pub infiles: Vec<PathBuf>,
    pub device: Option<String>,
    pub inport: u16,
    pub endpoints: Vec<(String, u16)>,
    pub filename: Option<PathBuf>,
    pub start_id: u32,
    pub use_raw: bool,
    pub freq: u32,
    pub down48: bool,
    pub segmenter: SegmenterConfig,
    pub preprocess: PreprocessConfig,
    pub continuous: bool,
    pub oneshot: bool,
    pub autopause: bool,
    pub sync: SyncMode,
    pub paramtype: Option<String>,
    pub veclen: usize,
    pub verbose: bool,
}

/// Splice jconf file contents into the raw argument stream, in place of
/// each `-C`/`--config` occurrence, so later command-line options override
/// earlier file options.
pub fn expand_jconf_args(raw: Vec<String>) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.into_iter();
    if let Some(program) = iter.next() {
        out.push(program);
    }
    while let Some(arg) = iter.next() {
        if arg == "-C" || arg == "--config" {
            let path = iter.next().ok_or_else(|| {
                LvcsrError::Config(format!("missing file name after {}", arg))
            })?;
            out.extend(jconf::expand_file(&PathBuf::from(path))?);
        } else if let Some(path) = arg.strip_prefix("--config=") {
            out.extend(jconf::expand_file(&PathBuf::from(path))?);
        } else {
            out.push(arg);
        }
    }
    Ok(out)
}

fn parse_source(name: &str) -> Result<SourceKind> {
    match name {
        "mic" | "alsa" | "oss" | "pulseaudio" => Ok(SourceKind::Mic),
        "file" => Ok(SourceKind::File),
        "stdin" => Ok(SourceKind::Stdin),
        "adinnet" => Ok(SourceKind::Adinnet),
        other => Err(LvcsrError::Config(format!("unknown input source: {}", other))),
    }
}

fn parse_sink(name: &str) -> Result<SinkKind> {
    match name {
        "file" => Ok(SinkKind::File),
        "stdout" => Ok(SinkKind::Stdout),
        "adinnet" => Ok(SinkKind::Adinnet),
        "vecnet" => Ok(SinkKind::Vecnet),
        "none" => Ok(SinkKind::None),
        other => Err(LvcsrError::Config(format!("unknown output target: {}", other))),
    }
}

impl AdinToolConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        let source = parse_source(&args.input)?;
        let sink = parse_sink(&args.output)?;

        if sink == SinkKind::File && args.filename.is_none() {
            return Err(LvcsrError::Config(
                "output filename not specified (--filename)".to_string(),
            ));
        }
        if source == SourceKind::File && args.infiles.is_empty() {
            return Err(LvcsrError::Config(
                "no input file given for --in file".to_string(),
            ));
        }

        let servers: Vec<String> = args
            .server
            .as_deref()
            .map(|s| s.split(',').map(|h| h.trim().to_string()).filter(|h| !h.is_empty()).collect())
            .unwrap_or_default();
        let ports: Vec<u16> = match args.port.as_deref() {
            Some(p) => p
                .split(',')
                .map(|n| {
                    n.trim()
                        .parse::<u16>()
                        .map_err(|_| LvcsrError::Config(format!("invalid port: {}", n)))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let needs_servers = matches!(sink, SinkKind::Adinnet | SinkKind::Vecnet);
        if needs_servers && servers.is_empty() {
            return Err(LvcsrError::Config(
                "server name for output not specified (--server)".to_string(),
            ));
        }
        if source == SourceKind::Adinnet && !needs_servers && !servers.is_empty() {
            // an output server list makes no sense for an inbound-only run
            return Err(LvcsrError::Config(
                "--server given but output is not adinnet/vecnet; use --inport for the input port"
                    .to_string(),
            ));
        }

        let endpoints: Vec<(String, u16)> = if needs_servers {
            if ports.len() == servers.len() {
                servers.into_iter().zip(ports).collect()
            } else if ports.is_empty() && servers.len() == 1 {
                let default_port = if sink == SinkKind::Vecnet { VECNET_PORT } else { ADINNET_PORT };
                servers.into_iter().map(|h| (h, default_port)).collect()
            } else {
                return Err(LvcsrError::Config(
                    "specify one port per server (--server a,b --port 5530,5530)".to_string(),
                ));
            }
        } else {
            Vec::new()
        };

        let veclen = if sink == SinkKind::Vecnet {
            match (args.paramtype.as_ref(), args.veclen) {
                (Some(_), Some(n)) if n > 0 => n,
                _ => {
                    return Err(LvcsrError::Config(
                        "--out vecnet requires both --paramtype and --veclen".to_string(),
                    ))
                }
            }
        } else {
            0
        };

        if args.nosegment && args.oneshot {
            return Err(LvcsrError::Config(
                "--nosegment and --oneshot are mutually exclusive".to_string(),
            ));
        }

        let silence_cut = !args.nosegment;
        // without segmentation there is nothing to number continuously
        let continuous = silence_cut && !args.oneshot;

        let segmenter = SegmenterConfig {
            sample_rate: args.freq,
            level_thres: args.lv,
            zc_thres: args.zc,
            head_margin_msec: args.headmargin,
            tail_margin_msec: args.tailmargin,
            chunk_size: args.chunksize,
            offset: args.offset,
            silence_cut,
            rewind_msec: args.rewind,
        };
        let preprocess = PreprocessConfig {
            strip_zero: !args.nostrip,
            zmean: args.zmean,
            level_coef: args.lvscale,
        };

        // stdout always writes raw
        let use_raw = args.raw || sink == SinkKind::Stdout;

        Ok(AdinToolConfig {
            source,
            sink,
            infiles: args.infiles,
            device: args.device,
            inport: args.inport,
            endpoints,
            filename: args.filename,
            start_id: args.startid,
            use_raw,
            freq: args.freq,
            down48: args.down48,
            segmenter,
            preprocess,
            continuous,
            oneshot: args.oneshot,
            autopause: args.autopause,
            sync: if args.loosesync { SyncMode::Loose } else { SyncMode::Strict },
            paramtype: args.paramtype,
            veclen,
            verbose: args.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<AdinToolConfig> {
        let mut full = vec!["adintool"];
        full.extend_from_slice(argv);
        let args = Args::try_parse_from(full)
            .map_err(|e| LvcsrError::Config(e.to_string()))?;
        AdinToolConfig::from_args(args)
    }

    #[test]
    fn file_output_requires_filename() {
        assert!(parse(&["--in", "stdin", "--out", "file"]).is_err());
        assert!(parse(&["--in", "stdin", "--out", "file", "--filename", "x"]).is_ok());
    }

    #[test]
    fn adinnet_output_requires_server() {
        assert!(parse(&["--in", "stdin", "--out", "adinnet"]).is_err());
        let cfg = parse(&["--in", "stdin", "--out", "adinnet", "--server", "localhost"]).unwrap();
        assert_eq!(cfg.endpoints, vec![("localhost".to_string(), ADINNET_PORT)]);
    }

    #[test]
    fn single_server_gets_protocol_default_port() {
        let cfg = parse(&["--in", "stdin", "--out", "vecnet", "--server", "h", "--paramtype",
            "MFCC_E_D_N_Z", "--veclen", "25"]).unwrap();
        assert_eq!(cfg.endpoints, vec![("h".to_string(), VECNET_PORT)]);
    }

    #[test]
    fn server_port_count_mismatch_is_rejected() {
        assert!(parse(&[
            "--in", "stdin", "--out", "adinnet", "--server", "a,b", "--port", "5530"
        ])
        .is_err());
        let cfg = parse(&[
            "--in", "stdin", "--out", "adinnet", "--server", "a,b", "--port", "5530,5531",
        ])
        .unwrap();
        assert_eq!(
            cfg.endpoints,
            vec![("a".to_string(), 5530), ("b".to_string(), 5531)]
        );
    }

    #[test]
    fn vecnet_requires_paramtype_and_veclen() {
        assert!(parse(&["--in", "stdin", "--out", "vecnet", "--server", "h"]).is_err());
        assert!(parse(&[
            "--in", "stdin", "--out", "vecnet", "--server", "h", "--paramtype", "MFCC_E", "--veclen", "25",
        ])
        .is_ok());
    }

    #[test]
    fn inbound_adinnet_with_output_servers_is_rejected() {
        assert!(parse(&["--in", "adinnet", "--out", "file", "--filename", "x", "--server", "h"])
            .is_err());
        // fine when the output itself is adinnet
        assert!(parse(&["--in", "adinnet", "--out", "adinnet", "--server", "h"]).is_ok());
    }

    #[test]
    fn stdout_is_always_raw() {
        let cfg = parse(&["--in", "stdin", "--out", "stdout"]).unwrap();
        assert!(cfg.use_raw);
    }

    #[test]
    fn nosegment_disables_continuous() {
        let cfg = parse(&["--in", "stdin", "--out", "none", "--nosegment"]).unwrap();
        assert!(!cfg.segmenter.silence_cut);
        assert!(!cfg.continuous);
    }
}
