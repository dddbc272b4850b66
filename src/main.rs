use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use log_merge::{
    Consumer, JsonLinesConsumer, JsonLinesSource, LogMerger, LogMergerBuilder, LogSource, MergeError, SourceErrorPolicy,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let strategy: Strategy = arg_parser.value_of_t_or_exit("strategy");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let shard_threshold: usize = arg_parser.value_of_t_or_exit("shard_threshold");
    let buf_size: Option<u64> = arg_parser
        .value_of("buf_size")
        .map(|v| v.parse::<ByteSize>().map(|size| size.as_u64()))
        .transpose()
        .unwrap_or_else(|err| {
            log::error!("buffer size format incorrect: {}", err);
            process::exit(1);
        });
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let inputs = arg_parser.values_of("input").into_iter().flatten();
    let mut sources = Vec::new();
    for input in inputs {
        match JsonLinesSource::<_, serde_json::Value>::open(path::Path::new(input), None) {
            Ok(source) => sources.push(source),
            Err(err) => {
                log::error!("input file {} opening error: {}", input, err);
                process::exit(1);
            }
        }
    }

    let output_stream: Box<dyn Write> = match arg_parser.value_of("output") {
        Some(output) => match fs::File::create(output) {
            Ok(file) => Box::new(file),
            Err(err) => {
                log::error!("output file creation error: {}", err);
                process::exit(1);
            }
        },
        None => Box::new(io::stdout()),
    };

    let mut merger_builder = LogMergerBuilder::new()
        .with_strategy(match strategy {
            Strategy::InMemory => log_merge::Strategy::InMemory,
            Strategy::External => log_merge::Strategy::External,
        })
        .with_shard_threshold(shard_threshold);

    if let Some(threads) = threads {
        merger_builder = merger_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        merger_builder = merger_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(buf_size) = buf_size {
        merger_builder = merger_builder.with_rw_buf_size(buf_size as usize);
    }

    if arg_parser.is_present("skip_failed_sources") {
        merger_builder = merger_builder.with_source_error_policy(SourceErrorPolicy::Skip);
    }

    let merger: LogMerger = match merger_builder.build() {
        Ok(merger) => merger,
        Err(err) => {
            log::error!("merger initialization error: {}", err);
            process::exit(1);
        }
    };

    match merge_to(&merger, sources, output_stream) {
        Ok(merged) => log::info!("{} entries merged", merged),
        Err(err) => {
            log::error!("log merging error: {}", err);
            process::exit(1);
        }
    }
}

/// Merges the sources into `output` as JSON lines.
/// Entries emitted before a failure are flushed to `output` before the error is returned.
fn merge_to<S, W>(merger: &LogMerger, sources: Vec<S>, output: W) -> Result<u64, MergeError>
where
    S: LogSource<Payload = serde_json::Value> + Send,
    W: Write,
{
    log::info!("merging {} files (strategy: {:?})", sources.len(), merger.strategy());

    let mut consumer = JsonLinesConsumer::new(io::BufWriter::new(output));
    let result = merger.merge(sources, &mut consumer);

    if result.is_err() {
        if let Err(err) = Consumer::<serde_json::Value>::complete(&mut consumer) {
            log::error!("data flushing error: {}", err);
        }
    }

    return result;
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Strategy {
    InMemory,
    External,
}

impl Strategy {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Strategy::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Strategy as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("log-merge")
        .about("chronological merge of time-ordered JSON lines logs")
        .arg(
            clap::Arg::new("input")
                .help("time-ordered JSON lines files to be merged")
                .required(true)
                .multiple_occurrences(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file (standard output if omitted)")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("strategy")
                .short('s')
                .long("strategy")
                .help("merge strategy")
                .takes_value(true)
                .default_value("in-memory")
                .possible_values(Strategy::possible_values()),
        )
        .arg(
            clap::Arg::new("shard_threshold")
                .short('c')
                .long("shard-threshold")
                .help("maximum number of entries per shard")
                .takes_value(true)
                .default_value("1000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Shard threshold must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Shard threshold format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("buf_size")
                .short('b')
                .long("buf-size")
                .help("shard and result store read/write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sharding")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("skip_failed_sources")
                .long("skip-failed-sources")
                .help("treat failing sources as exhausted instead of aborting the merge"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
