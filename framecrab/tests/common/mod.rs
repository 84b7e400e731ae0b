//! Common test utilities and macros

use framecrab::{PoolConfig, Runtime, Value};

#[derive(Debug)]
pub enum TestResult {
    Success,
    SuccessWithValue(Value),
    Error(String),
    ErrorRegex(String),
}

impl PartialEq for TestResult {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TestResult::Success, TestResult::Success) => true,
            (TestResult::SuccessWithValue(a), TestResult::SuccessWithValue(b)) => a == b,
            (TestResult::Error(a), TestResult::Error(b)) => a == b,
            (TestResult::ErrorRegex(pattern), TestResult::Error(msg)) => {
                regex::Regex::new(pattern).unwrap().is_match(msg)
            }
            (TestResult::Error(msg), TestResult::ErrorRegex(pattern)) => {
                regex::Regex::new(pattern).unwrap().is_match(msg)
            }
            _ => false,
        }
    }
}

/// Outcome of a scenario: the value it wants compared, if any.
pub type ScenarioResult = anyhow::Result<Option<Value>>;

/// Small pool that collects before every allocation, so every object moves
/// whenever anything is allocated.
pub fn stress_config() -> PoolConfig {
    PoolConfig::default()
        .with_pool_size(256)
        .with_gc_stress(true)
}

pub fn run_scenario(
    config: PoolConfig,
    scenario: fn(&mut Runtime) -> ScenarioResult,
) -> TestResult {
    let mut rt = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => return TestResult::Error(format!("Invalid configuration: {e}")),
    };
    match scenario(&mut rt) {
        Ok(None) => TestResult::Success,
        Ok(Some(value)) => TestResult::SuccessWithValue(value),
        Err(e) => TestResult::Error(format!("{e:#}")),
    }
}

#[macro_export]
macro_rules! check_scenario {
    ($test_name:ident, scenario=$scenario:expr, result=$expected:expr) => {
        check_scenario!(
            $test_name,
            scenario = $scenario,
            config = framecrab::PoolConfig::default(),
            result = $expected
        );
    };
    ($test_name:ident, scenario=$scenario:expr, config=$config:expr, result=$expected:expr) => {
        #[test]
        fn $test_name() {
            let result = crate::common::run_scenario($config, $scenario);
            assert_eq!(result, $expected);
        }
    };
}

/// Checks a scenario twice: on the default pool, and under collection stress
/// on a small pool.
#[macro_export]
macro_rules! check_relocating {
    ($test_name:ident, $stress_name:ident, scenario=$scenario:expr, result=$expected:expr) => {
        check_scenario!($test_name, scenario = $scenario, result = $expected);
        check_scenario!(
            $stress_name,
            scenario = $scenario,
            config = crate::common::stress_config(),
            result = $expected
        );
    };
}
