//! Scripted call-stack workload.
//!
//! Drives the frame manager the way an interpreter would: nested calls that
//! bind a formal and a handful of locals, bump a shared global through a
//! `global` declaration, and check every binding again on the way back up.
//! Strings are allocated while frames grow, so with collection stress on
//! every object moves between any two steps.

use crate::config::PoolConfig;
use crate::error::FrameError;
use crate::memory::PoolStats;
use crate::runtime::Runtime;
use crate::value::{Id, Value};
use anyhow::{Context, Result, anyhow, bail, ensure};
use tracing::{debug, info};

/// Formal parameter of every call.
const ARG: Id = Id(1);
/// Global counter bumped once per call.
const COUNTER: Id = Id(2);
/// First identifier used for locals.
const FIRST_LOCAL: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    /// Nesting depth of each round.
    pub depth: u16,
    /// Locals bound in every frame.
    pub locals: u16,
    pub rounds: u32,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            depth: 8,
            locals: 4,
            rounds: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub calls: usize,
    /// Bindings checked while unwinding.
    pub verified: usize,
    pub stats: PoolStats,
}

/// Runs `workload` on a fresh runtime.
///
/// # Returns
/// * `Ok(Report)` - Every binding read back what was written
/// * `Err(anyhow::Error)` - Invalid configuration, out of memory, or a
///   binding that did not survive
pub fn run_workload(config: PoolConfig, workload: &Workload) -> Result<Report> {
    let mut rt = Runtime::new(config)?;
    info!(
        "Running {} rounds of depth {} with {} locals ({} byte pool{})",
        workload.rounds,
        workload.depth,
        workload.locals,
        config.pool_size,
        if config.gc_stress { ", gc stress" } else { "" }
    );

    rt.set(COUNTER, int(0)?)?;
    let mut report = Report {
        calls: 0,
        verified: 0,
        stats: PoolStats::default(),
    };
    for round in 0..workload.rounds {
        descend(&mut rt, workload, round).with_context(|| format!("Round {round} failed"))?;
        report.calls += workload.depth as usize;
        report.verified += unwind(&mut rt, workload, round)
            .with_context(|| format!("Round {round} failed to unwind"))?;
        debug!("Round {} done, {:?}", round, rt.stats());
    }

    let expected = workload.rounds as i64 * workload.depth as i64;
    let counter = rt.get(COUNTER)?;
    ensure!(
        counter.as_int().map(i64::from) == Some(expected),
        "Global counter is {:?}, expected {}",
        counter,
        expected
    );
    rt.delete_global(COUNTER)?;
    ensure!(
        rt.get(COUNTER) == Err(FrameError::Unbound(COUNTER)),
        "Global counter still bound after deletion"
    );

    report.stats = rt.stats();
    info!(
        "Workload finished: {} calls, {} bindings verified, {} collections",
        report.calls, report.verified, report.stats.collections
    );
    Ok(report)
}

/// Pushes `depth` frames, binding everything that `unwind` checks.
fn descend(rt: &mut Runtime, workload: &Workload, round: u32) -> Result<()> {
    for level in 1..=workload.depth {
        let code = rt.alloc_code(&code_for(round, level))?;
        rt.push(Some(code), level, 1)?;
        rt.set_formal(0, ARG, int(level as i32)?);

        for local in 0..workload.locals {
            let value = if local % 2 == 0 {
                rt.alloc_str(&text_for(round, level, local))?
            } else {
                int(number_for(level, local))?
            };
            rt.set(local_id(local)?, value)?;
        }

        rt.mark_global(COUNTER)?;
        let count = rt
            .get(COUNTER)?
            .as_int()
            .ok_or_else(|| anyhow!("Global counter is not an integer"))?;
        rt.set(COUNTER, int(count + 1)?)?;
    }
    Ok(())
}

/// Pops every frame `descend` pushed, checking bindings and resume points.
fn unwind(rt: &mut Runtime, workload: &Workload, round: u32) -> Result<usize> {
    let mut verified = 0;
    for level in (1..=workload.depth).rev() {
        expect(rt, ARG, int(level as i32)?)?;
        for local in 0..workload.locals {
            let id = local_id(local)?;
            if local % 2 == 0 {
                let value = rt.get(id)?;
                let text = text_for(round, level, local);
                ensure!(
                    rt.str_value(value) == Some(text.as_str()),
                    "{} is {:?}, expected \"{}\"",
                    id,
                    value,
                    text
                );
            } else {
                expect(rt, id, int(number_for(level, local))?)?;
            }
            verified += 1;
        }
        ensure!(rt.is_local(COUNTER), "Global declaration lost at level {}", level);

        let resume = rt
            .pop()
            .ok_or_else(|| anyhow!("Call stack empty at level {}", level))?;
        ensure!(
            resume.resume_point == level,
            "Resumed at {}, expected {}",
            resume.resume_point,
            level
        );
        let code = resume
            .code
            .ok_or_else(|| anyhow!("Frame at level {} lost its code", level))?;
        ensure!(
            rt.code_bytes(code) == code_for(round, level),
            "Code at level {} was corrupted",
            level
        );
        verified += 1;
    }
    if let Some(resume) = rt.pop() {
        bail!("Call stack not empty after round {}: {:?}", round, resume);
    }
    Ok(verified)
}

fn expect(rt: &Runtime, id: Id, expected: Value) -> Result<()> {
    let value = rt.get(id)?;
    ensure!(value == expected, "{} is {:?}, expected {:?}", id, value, expected);
    Ok(())
}

fn int(n: i32) -> Result<Value> {
    Value::int(n).ok_or_else(|| anyhow!("{} does not fit in an integer value", n))
}

fn local_id(local: u16) -> Result<Id> {
    FIRST_LOCAL
        .checked_add(local)
        .map(Id)
        .ok_or_else(|| anyhow!("Too many locals"))
}

fn number_for(level: u16, local: u16) -> i32 {
    level as i32 * 1000 + local as i32
}

fn text_for(round: u32, level: u16, local: u16) -> String {
    format!("r{round}.d{level}.l{local}")
}

fn code_for(round: u32, level: u16) -> [u8; 6] {
    let [a, b, c, d] = round.to_le_bytes();
    let [e, f] = level.to_le_bytes();
    [a, b, c, d, e, f]
}
