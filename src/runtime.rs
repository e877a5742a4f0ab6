use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::error::Result;
use crate::pool::Pool;
use crate::settings::Settings;
use crate::sign_policy::{load_policies, PolicyMap};
use crate::signal::{CompletionSignal, LogSignal};
use crate::views::ViewRefresher;

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Supplies the per-code sign rules for one import.
pub trait SignPolicySource: Send + Sync {
    fn load(&self, conn: &Connection) -> Result<PolicyMap>;
}

/// Reads the `sign_policies` reference table.
#[derive(Debug, Default, Clone, Copy)]
pub struct DbSignPolicies;

impl SignPolicySource for DbSignPolicies {
    fn load(&self, conn: &Connection) -> Result<PolicyMap> {
        load_policies(conn)
    }
}

/// A fixed rule set, independent of the database.
#[derive(Debug, Default, Clone)]
pub struct StaticPolicies(pub PolicyMap);

impl SignPolicySource for StaticPolicies {
    fn load(&self, _conn: &Connection) -> Result<PolicyMap> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    /// Lets a file already imported for a period be imported again.
    pub allow_reimport: bool,
}

/// Everything an import needs from its environment.
pub struct Runtime {
    pub pool: Pool,
    pub clock: Box<dyn Clock>,
    pub sign_policies: Box<dyn SignPolicySource>,
    pub views: ViewRefresher,
    pub signal: Box<dyn CompletionSignal>,
    pub settings: ImportSettings,
}

impl Runtime {
    /// Production wiring: system clock, database sign rules, default views,
    /// completion events sent to the log.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            clock: Box::new(SystemClock),
            sign_policies: Box::new(DbSignPolicies),
            views: ViewRefresher::default(),
            signal: Box::new(LogSignal),
            settings: ImportSettings::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let pool = Pool::new(&settings.database_path(), settings.timeouts(), settings.pool_size);
        let mut rt = Self::new(pool);
        rt.settings.allow_reimport = settings.allow_reimport;
        rt
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_sign_policies(mut self, source: impl SignPolicySource + 'static) -> Self {
        self.sign_policies = Box::new(source);
        self
    }

    pub fn with_signal(mut self, signal: impl CompletionSignal + 'static) -> Self {
        self.signal = Box::new(signal);
        self
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }
}
