//! Everything a pipeline stage needs, built once from an [`IsmConfig`].

use crate::cache::FrameInfoCache;
use crate::config::IsmConfig;
use crate::error::Result;
use crate::pool::TaskPool;
use crate::progress::{NoOpReporter, ProgressReporter};
use crate::registry::Registry;
use crate::tools::Tools;

pub struct Context {
    pub config: IsmConfig,
    pub tools: Tools,
    pub pool: TaskPool,
    pub cache: FrameInfoCache,
    reporter: Box<dyn ProgressReporter>,
}

impl Context {
    /// Context running the real external tools.
    pub fn new(config: IsmConfig) -> Result<Self> {
        let tools = Tools::new(config.tools.clone());
        Self::with_tools(config, tools)
    }

    pub fn with_tools(config: IsmConfig, tools: Tools) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool: TaskPool::from_config(&config.pool),
            cache: FrameInfoCache::new(config.paths.cache_dir.clone()),
            tools,
            config,
            reporter: Box::new(NoOpReporter),
        })
    }

    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn reporter(&self) -> &dyn ProgressReporter {
        self.reporter.as_ref()
    }

    /// Open a connection to the reference registry.
    pub fn registry(&self) -> Result<Registry> {
        Registry::open(&self.config.paths.registry_path)
    }
}
