//! Pool configuration.
//!
//! Defaults match the smallest production target. The environment can
//! override them (`FRAMECRAB_POOL_SIZE`, `FRAMECRAB_GC_STRESS`), and the
//! command line overrides the environment.

use crate::memory::POOL_ALIGN;
use anyhow::{Context, Result, bail};

pub const DEFAULT_POOL_SIZE: u16 = 1024;
pub const MIN_POOL_SIZE: u16 = 64;
pub const MAX_POOL_SIZE: u16 = 65532;

pub const POOL_SIZE_VAR: &str = "FRAMECRAB_POOL_SIZE";
pub const GC_STRESS_VAR: &str = "FRAMECRAB_GC_STRESS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Total pool size in bytes, including the reserved null word.
    pub pool_size: u16,
    /// Run a full collection before every allocation.
    pub gc_stress: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            gc_stress: false,
        }
    }
}

impl PoolConfig {
    /// Loads the defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the defaults overlaid with whatever `lookup` returns for each
    /// configuration variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(size) = lookup(POOL_SIZE_VAR) {
            config.pool_size = size
                .trim()
                .parse()
                .with_context(|| format!("Invalid {POOL_SIZE_VAR} value '{size}'"))?;
        }
        if let Some(flag) = lookup(GC_STRESS_VAR) {
            config.gc_stress = match flag.trim() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => bail!("Invalid {GC_STRESS_VAR} value '{other}'"),
            };
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_pool_size(mut self, pool_size: u16) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_gc_stress(mut self, gc_stress: bool) -> Self {
        self.gc_stress = gc_stress;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&self.pool_size) {
            bail!(
                "Pool size {} out of range {}..={}",
                self.pool_size,
                MIN_POOL_SIZE,
                MAX_POOL_SIZE
            );
        }
        if !(self.pool_size as usize).is_multiple_of(POOL_ALIGN) {
            bail!(
                "Pool size {} is not a multiple of {}",
                self.pool_size,
                POOL_ALIGN
            );
        }
        Ok(())
    }
}
