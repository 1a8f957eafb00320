//! Fault rules.
//!
//! A rule is a comma-separated `key=value` list, for example
//! `which=dal,func=write,pod=2,cap=-1,mode=fail,fail_freq=1.0,ret=5`.
//!
//! | key          | values                                   |
//! |--------------|------------------------------------------|
//! | `which`      | `dal` (driver calls) or `udal` (blocks)  |
//! | `func`       | `open`, `read`, `write`, `close`         |
//! | `pod`/`cap`/`blk` | index, `-1` matches any             |
//! | `mode`       | `fail` or `stall`                        |
//! | `fail_freq`  | probability in 0..=1 (fail mode)         |
//! | `ret`        | status returned by a failed call         |
//! | `stall_time` | seconds to block (stall mode)            |
//! | `stall_freq` | probability in 0..=1 (stall mode)        |
//! | `seed`       | seed of the rule's random stream         |

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::ec::{BlockFaultHook, IoKind};
use crate::error::{DalError, DalResult};
use crate::mc::Placement;

/// Which operations a rule gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Calls on the wrapping driver.
    Dal,
    /// Per-block operations inside the erasure engine.
    Block,
}

/// What a triggered rule does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleAction {
    /// Return `code` instead of running the call.
    Fail {
        /// Trigger probability.
        freq: f64,
        /// Status returned to the caller.
        code: i32,
    },
    /// Sleep, then run the call.
    Stall {
        /// Trigger probability.
        freq: f64,
        /// How long to block.
        duration: Duration,
    },
}

impl RuleAction {
    fn freq(&self) -> f64 {
        match self {
            RuleAction::Fail { freq, .. } | RuleAction::Stall { freq, .. } => *freq,
        }
    }
}

/// One parsed fault rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultRule {
    /// Operations gated by the rule.
    pub scope: RuleScope,
    /// Kind of call matched.
    pub func: IoKind,
    /// Pod filter, `None` matches any.
    pub pod: Option<u32>,
    /// Capacitor filter, `None` matches any.
    pub cap: Option<u32>,
    /// Block filter, `None` matches any. Ignored for driver-level rules.
    pub blk: Option<u32>,
    /// Effect when triggered.
    pub action: RuleAction,
    /// Seed of the rule's random stream.
    pub seed: u64,
}

fn syntax(rule: &str, reason: impl Into<String>) -> DalError {
    DalError::RuleSyntax {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

fn parse_num<T: std::str::FromStr>(rule: &str, key: &str, value: &str) -> DalResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| syntax(rule, format!("bad value '{}' for '{}'", value, key)))
}

fn parse_filter(rule: &str, key: &str, value: &str) -> DalResult<Option<u32>> {
    match parse_num::<i64>(rule, key, value)? {
        -1 => Ok(None),
        v => u32::try_from(v)
            .map(Some)
            .map_err(|_| syntax(rule, format!("'{}' must be -1 or a non-negative index", key))),
    }
}

impl FaultRule {
    /// Parses one rule.
    pub fn parse(text: &str) -> DalResult<Self> {
        let mut scope = None;
        let mut func = None;
        let mut mode = None;
        let (mut pod, mut cap, mut blk) = (None, None, None);
        let mut fail_freq = 0.0f64;
        let mut code = 0i32;
        let mut stall_time = 0u64;
        let mut stall_freq = 0.0f64;
        let mut seed = 0u64;

        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| syntax(text, format!("token '{}' is not key=value", token)))?;
            match key.trim() {
                "which" => {
                    scope = Some(match value.trim() {
                        "dal" => RuleScope::Dal,
                        "udal" => RuleScope::Block,
                        other => return Err(syntax(text, format!("unknown scope '{}'", other))),
                    })
                }
                "func" => {
                    func = Some(
                        IoKind::parse(value.trim())
                            .ok_or_else(|| syntax(text, format!("unknown function '{}'", value)))?,
                    )
                }
                "mode" => {
                    mode = match value.trim() {
                        "fail" | "stall" => Some(value.trim().to_string()),
                        other => return Err(syntax(text, format!("unknown mode '{}'", other))),
                    }
                }
                "pod" => pod = parse_filter(text, "pod", value)?,
                "cap" => cap = parse_filter(text, "cap", value)?,
                "blk" => blk = parse_filter(text, "blk", value)?,
                "fail_freq" => fail_freq = parse_num(text, "fail_freq", value)?,
                "ret" => code = parse_num(text, "ret", value)?,
                "stall_time" => stall_time = parse_num(text, "stall_time", value)?,
                "stall_freq" => stall_freq = parse_num(text, "stall_freq", value)?,
                "seed" => seed = parse_num(text, "seed", value)?,
                other => return Err(syntax(text, format!("unknown key '{}'", other))),
            }
        }

        let scope = scope.ok_or_else(|| syntax(text, "missing 'which'"))?;
        let func = func.ok_or_else(|| syntax(text, "missing 'func'"))?;
        let action = match mode.as_deref() {
            Some("fail") => {
                if !(fail_freq >= 0.0) {
                    return Err(syntax(text, "fail_freq must be >= 0"));
                }
                RuleAction::Fail {
                    freq: fail_freq,
                    code,
                }
            }
            Some(_) => {
                if stall_time == 0 {
                    return Err(syntax(text, "stall_time must be > 0"));
                }
                if !(stall_freq >= 0.0) {
                    return Err(syntax(text, "stall_freq must be >= 0"));
                }
                RuleAction::Stall {
                    freq: stall_freq,
                    duration: Duration::from_secs(stall_time),
                }
            }
            None => return Err(syntax(text, "missing 'mode'")),
        };

        Ok(Self {
            scope,
            func,
            pod,
            cap,
            blk: if scope == RuleScope::Block { blk } else { None },
            action,
            seed,
        })
    }

    /// Returns true if the rule applies to a `func` call at `placement`
    /// (and `blk`, for block rules). Without a placement only rules that
    /// leave pod and capacitor open can match.
    pub fn matches(&self, func: IoKind, placement: Option<Placement>, blk: Option<u32>) -> bool {
        fn open_or_eq(filter: Option<u32>, value: Option<u32>) -> bool {
            match filter {
                None => true,
                Some(f) => value == Some(f),
            }
        }
        self.func == func
            && open_or_eq(self.pod, placement.map(|p| p.pod))
            && open_or_eq(self.cap, placement.map(|p| p.cap))
            && open_or_eq(self.blk, blk)
    }
}

/// Outcome of consulting the rules for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Run the call.
    Proceed,
    /// Return this status instead.
    Fail(i32),
}

/// A rule together with its own random stream.
#[derive(Debug)]
pub struct ArmedRule {
    rule: FaultRule,
    rng: Mutex<StdRng>,
}

impl ArmedRule {
    fn new(rule: FaultRule) -> Self {
        let rng = Mutex::new(StdRng::seed_from_u64(rule.seed));
        Self { rule, rng }
    }

    /// The parsed rule.
    pub fn rule(&self) -> &FaultRule {
        &self.rule
    }

    /// Rolls the rule's dice and applies its action. May sleep.
    pub fn execute(&self) -> Verdict {
        let roll: u32 = self.rng.lock().gen_range(0..=100);
        let freq = self.rule.action.freq();
        let triggered = freq > 0.0 && f64::from(roll) <= freq * 100.0;
        debug!("rule {:?} rolled {} (triggered={})", self.rule.func, roll, triggered);
        if !triggered {
            return Verdict::Proceed;
        }
        match self.rule.action {
            // a zero code means "no error"
            RuleAction::Fail { code: 0, .. } => Verdict::Proceed,
            RuleAction::Fail { code, .. } => {
                warn!("injecting {} failure with code {}", self.rule.func, code);
                Verdict::Fail(code)
            }
            RuleAction::Stall { duration, .. } => {
                warn!("stalling {} for {:?}", self.rule.func, duration);
                thread::sleep(duration);
                Verdict::Proceed
            }
        }
    }
}

/// The rules of one configured fault-injection driver, split by scope.
/// Fixed once configured.
#[derive(Debug, Default)]
pub struct RuleSet {
    dal: Vec<ArmedRule>,
    block: Vec<ArmedRule>,
}

impl RuleSet {
    /// Parses every rule, sorting each into its scope.
    pub fn parse<'a>(rules: impl IntoIterator<Item = &'a str>) -> DalResult<Self> {
        let mut set = Self::default();
        for text in rules {
            let rule = FaultRule::parse(text)?;
            debug!("parsed fault rule {:?}", rule);
            match rule.scope {
                RuleScope::Dal => set.dal.push(ArmedRule::new(rule)),
                RuleScope::Block => set.block.push(ArmedRule::new(rule)),
            }
        }
        Ok(set)
    }

    /// Driver-level rules.
    pub fn dal_rules(&self) -> &[ArmedRule] {
        &self.dal
    }

    /// Block-level rules.
    pub fn block_rules(&self) -> &[ArmedRule] {
        &self.block
    }

    /// Applies the first driver-level rule matching the call, if any.
    pub fn check_dal(&self, func: IoKind, placement: Option<Placement>) -> Verdict {
        self.dal
            .iter()
            .find(|r| r.rule.matches(func, placement, None))
            .map_or(Verdict::Proceed, ArmedRule::execute)
    }

    /// Applies the first block-level rule matching the call, if any.
    pub fn check_block(&self, func: IoKind, placement: Placement, blk: u32) -> Verdict {
        self.block
            .iter()
            .find(|r| r.rule.matches(func, Some(placement), Some(blk)))
            .map_or(Verdict::Proceed, ArmedRule::execute)
    }
}

/// Block fault hook driven by the block-level rules of a [`RuleSet`].
pub struct BlockRuleHook {
    rules: Arc<RuleSet>,
    placement: Placement,
}

impl BlockRuleHook {
    /// Hook for the blocks of an object at `placement`.
    pub fn new(rules: Arc<RuleSet>, placement: Placement) -> Self {
        Self { rules, placement }
    }
}

impl BlockFaultHook for BlockRuleHook {
    fn before_block(&self, kind: IoKind, block: u32) -> DalResult<()> {
        match self.rules.check_block(kind, self.placement, block) {
            Verdict::Proceed => Ok(()),
            Verdict::Fail(code) => Err(DalError::Injected { code }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(pod: u32, cap: u32) -> Option<Placement> {
        Some(Placement {
            pod,
            cap,
            start_block: 0,
            scatter: 0,
        })
    }

    #[test]
    fn test_parse_fail_rule() {
        let rule =
            FaultRule::parse("which=dal,func=write,pod=2,cap=-1,mode=fail,fail_freq=1.0,ret=5")
                .unwrap();
        assert_eq!(rule.scope, RuleScope::Dal);
        assert_eq!(rule.func, IoKind::Write);
        assert_eq!(rule.pod, Some(2));
        assert_eq!(rule.cap, None);
        assert_eq!(rule.action, RuleAction::Fail { freq: 1.0, code: 5 });
    }

    #[test]
    fn test_parse_stall_rule() {
        let rule = FaultRule::parse(
            "which=udal,func=read,blk=3,mode=stall,stall_time=2,stall_freq=0.5,seed=9",
        )
        .unwrap();
        assert_eq!(rule.scope, RuleScope::Block);
        assert_eq!(rule.blk, Some(3));
        assert_eq!(rule.seed, 9);
        assert_eq!(
            rule.action,
            RuleAction::Stall {
                freq: 0.5,
                duration: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "func=write,mode=fail",
            "which=dal,mode=fail",
            "which=dal,func=write",
            "which=x,func=write,mode=fail",
            "which=dal,func=stat,mode=fail",
            "which=dal,func=write,mode=explode",
            "which=dal,func=write,mode=fail,fail_freq=-0.5",
            "which=dal,func=write,mode=stall,stall_freq=1",
            "which=dal,func=write,mode=stall,stall_time=1,stall_freq=-1",
            "which=dal,func=write,mode=fail,pod=-7",
            "which=dal,func=write,mode=fail,bogus=1",
            "which=dal,func=write,mode=fail,pod",
        ] {
            assert!(
                matches!(FaultRule::parse(bad), Err(DalError::RuleSyntax { .. })),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_matching() {
        let rule = FaultRule::parse("which=dal,func=write,pod=2,cap=-1,mode=fail,fail_freq=1,ret=5")
            .unwrap();
        assert!(rule.matches(IoKind::Write, at(2, 0), None));
        assert!(rule.matches(IoKind::Write, at(2, 7), None));
        assert!(!rule.matches(IoKind::Write, at(1, 0), None));
        assert!(!rule.matches(IoKind::Read, at(2, 0), None));
        assert!(!rule.matches(IoKind::Write, None, None));

        let any = FaultRule::parse("which=dal,func=open,mode=fail,fail_freq=1,ret=5").unwrap();
        assert!(any.matches(IoKind::Open, None, None));
    }

    #[test]
    fn test_certain_failure_always_fires() {
        let set = RuleSet::parse(["which=dal,func=write,pod=2,cap=-1,mode=fail,fail_freq=1.0,ret=5"])
            .unwrap();
        for _ in 0..200 {
            assert_eq!(set.check_dal(IoKind::Write, at(2, 3)), Verdict::Fail(5));
            assert_eq!(set.check_dal(IoKind::Write, at(3, 3)), Verdict::Proceed);
        }
    }

    #[test]
    fn test_zero_frequency_never_fires() {
        let set = RuleSet::parse(["which=dal,func=read,mode=fail,fail_freq=0,ret=5"]).unwrap();
        for _ in 0..500 {
            assert_eq!(set.check_dal(IoKind::Read, None), Verdict::Proceed);
        }
    }

    #[test]
    fn test_seeded_stream_is_reproducible() {
        let text = "which=dal,func=read,mode=fail,fail_freq=0.5,ret=7,seed=42";
        let a = RuleSet::parse([text]).unwrap();
        let b = RuleSet::parse([text]).unwrap();
        let run = |s: &RuleSet| -> Vec<Verdict> {
            (0..64).map(|_| s.check_dal(IoKind::Read, None)).collect()
        };
        let (ra, rb) = (run(&a), run(&b));
        assert_eq!(ra, rb);
        assert!(ra.contains(&Verdict::Fail(7)));
        assert!(ra.contains(&Verdict::Proceed));
    }

    #[test]
    fn test_rules_split_by_scope() {
        let set = RuleSet::parse([
            "which=dal,func=open,mode=fail,fail_freq=1,ret=1",
            "which=udal,func=write,blk=0,mode=fail,fail_freq=1,ret=2",
            "which=udal,func=read,mode=fail,fail_freq=1,ret=3",
        ])
        .unwrap();
        assert_eq!(set.dal_rules().len(), 1);
        assert_eq!(set.block_rules().len(), 2);
    }

    #[test]
    fn test_block_hook() {
        let set = Arc::new(
            RuleSet::parse(["which=udal,func=write,pod=1,blk=4,mode=fail,fail_freq=1,ret=-5"])
                .unwrap(),
        );
        let placement = Placement {
            pod: 1,
            cap: 0,
            start_block: 0,
            scatter: 0,
        };
        let hook = BlockRuleHook::new(set, placement);
        assert!(matches!(
            hook.before_block(IoKind::Write, 4),
            Err(DalError::Injected { code: -5 })
        ));
        assert!(hook.before_block(IoKind::Write, 3).is_ok());
        assert!(hook.before_block(IoKind::Read, 4).is_ok());
    }

    #[test]
    fn test_zero_code_proceeds() {
        let set = RuleSet::parse(["which=dal,func=close,mode=fail,fail_freq=1,ret=0"]).unwrap();
        assert_eq!(set.check_dal(IoKind::Close, None), Verdict::Proceed);
    }
}
