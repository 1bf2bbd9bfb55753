use std::path::PathBuf;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;
use log4rs::Handle;

fn get_level() -> (LevelFilter, &'static str) {
    match std::env::var("ENDCOUNT_LOG").as_deref() {
        Ok("debug") => (LevelFilter::Debug, "debug"),
        Ok("trace") => (LevelFilter::Trace, "trace"),
        _ => (LevelFilter::Info, "info"),
    }
}

pub fn init_logging(log_fp: Option<&PathBuf>) -> Option<Handle> {
    let (level, level_label) = get_level();
    let console_append = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("> {m}{n}")))
        .build();

    let config = if let Some(fp) = log_fp {
        let file_append = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "[{f}::{L}][{d(%Y-%m-%d %H:%M:%S%.3f)}][{l}] {m}{n}",
            )))
            .build(fp);
        match file_append {
            Ok(file_append) => Config::builder()
                .appender(
                    Appender::builder()
                        .filter(Box::new(ThresholdFilter::new(level)))
                        .build("logfile", Box::new(file_append)),
                )
                .appender(
                    Appender::builder()
                        .filter(Box::new(ThresholdFilter::new(
                            LevelFilter::Info,
                        )))
                        .build("stderr", Box::new(console_append)),
                )
                .build(
                    Root::builder()
                        .appender("logfile")
                        .appender("stderr")
                        .build(level),
                )
                .ok(),
            Err(e) => {
                eprintln!(
                    "failed to make file appender at {fp:?}, {}",
                    e.to_string()
                );
                None
            }
        }
    } else {
        Config::builder()
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(LevelFilter::Info)))
                    .build("stderr", Box::new(console_append)),
            )
            .build(Root::builder().appender("stderr").build(LevelFilter::Info))
            .ok()
    };

    let handle = config.and_then(|config| log4rs::init_config(config).ok());
    if handle.is_some() && log_fp.is_some() {
        log::info!("writing {level_label}-level logs to file");
    }
    handle
}
