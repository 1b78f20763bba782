use log::{LevelFilter, Log, Metadata, Record};

/// Fans log records out to several loggers, each with its own level.
pub struct MultiLogger {
    sinks: Vec<(Box<dyn Log>, LevelFilter)>,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Adds a logger that receives records up to `level`.
    pub fn with_logger(mut self, logger: Box<dyn Log>, level: LevelFilter) -> Self {
        self.add_logger(logger, level);
        self
    }

    pub fn add_logger(&mut self, logger: Box<dyn Log>, level: LevelFilter) {
        self.sinks.push((logger, level));
    }

    /// Most verbose level any logger accepts.
    pub fn max_level(&self) -> LevelFilter {
        self.sinks
            .iter()
            .map(|(_, level)| *level)
            .max()
            .unwrap_or(LevelFilter::Off)
    }

    /// Registers the logger globally.
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.max_level());
        log::set_boxed_logger(Box::new(self))
    }
}

fn accepts(metadata: &Metadata, logger: &dyn Log, level: LevelFilter) -> bool {
    metadata.level() <= level && logger.enabled(metadata)
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.sinks
            .iter()
            .any(|(logger, level)| accepts(metadata, logger.as_ref(), *level))
    }

    fn log(&self, record: &Record) {
        for (logger, level) in &self.sinks {
            if accepts(record.metadata(), logger.as_ref(), *level) {
                logger.log(record);
            }
        }
    }

    fn flush(&self) {
        self.sinks.iter().for_each(|(logger, _)| logger.flush());
    }
}
