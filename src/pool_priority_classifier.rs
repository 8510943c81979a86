// Pool Priority Classifier - assigns tracked pools to collection tiers
// Decides per invocation hour which tiers run and in what order

use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::types::PoolRef;

/// Collection tier, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Pools with an active position: every run
    Active = 1,
    /// Watchlist pools: every 6 hours
    Watchlist = 2,
    /// Top pools by TVL: once a day at 06:00 UTC
    TopTvl = 3,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Active => "tier1_active",
            Tier::Watchlist => "tier2_watchlist",
            Tier::TopTvl => "tier3_top_tvl",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier {}", self.as_u8())
    }
}

/// Hour (UTC) at which the top-by-TVL sweep runs.
pub const TOP_TVL_HOUR: u32 = 6;
/// Watchlist cadence in hours.
pub const WATCHLIST_EVERY_HOURS: u32 = 6;

/// Tiers that run at `hour`, in processing order.
pub fn tiers_for_hour(hour: u32) -> Vec<Tier> {
    let mut tiers = vec![Tier::Active];
    if hour % WATCHLIST_EVERY_HOURS == 0 {
        tiers.push(Tier::Watchlist);
    }
    if hour == TOP_TVL_HOUR {
        tiers.push(Tier::TopTvl);
    }
    tiers
}

/// Pools selected for one pass, already de-duplicated across tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPlan {
    pub hour: u32,
    pub active: Vec<PoolRef>,
    pub watchlist: Vec<PoolRef>,
    pub top_tvl: Vec<PoolRef>,
}

impl TierPlan {
    /// Pools in processing order with their tier.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &PoolRef)> {
        self.active
            .iter()
            .map(|p| (Tier::Active, p))
            .chain(self.watchlist.iter().map(|p| (Tier::Watchlist, p)))
            .chain(self.top_tvl.iter().map(|p| (Tier::TopTvl, p)))
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.watchlist.len() + self.top_tvl.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the plan for `hour` from the source lists.
///
/// Tiers that do not run at `hour` come out empty. A pool keeps only its
/// highest tier: active pools are dropped from the watchlist, and the TVL
/// sweep skips both. Tier 3 is capped at `top_tvl_cap`.
pub fn assign_tiers(
    hour: u32,
    active: Vec<PoolRef>,
    watchlist: Vec<PoolRef>,
    top_tvl: Vec<PoolRef>,
    top_tvl_cap: usize,
) -> TierPlan {
    let tiers = tiers_for_hour(hour);
    let mut seen: HashSet<String> = HashSet::new();

    let mut take = |pools: Vec<PoolRef>, cap: usize| -> Vec<PoolRef> {
        pools
            .into_iter()
            .filter(|p| seen.insert(p.pool_address.to_ascii_lowercase()))
            .take(cap)
            .collect()
    };

    let active = take(active, usize::MAX);
    let watchlist = if tiers.contains(&Tier::Watchlist) {
        take(watchlist, usize::MAX)
    } else {
        // Still reserve the ids so Tier 3 never re-collects them
        take(watchlist, usize::MAX);
        Vec::new()
    };
    let top_tvl = if tiers.contains(&Tier::TopTvl) {
        take(top_tvl, top_tvl_cap)
    } else {
        Vec::new()
    };

    debug!(
        "🗂️ [TierPlan] hour={} active={} watchlist={} top_tvl={}",
        hour,
        active.len(),
        watchlist.len(),
        top_tvl.len()
    );

    TierPlan {
        hour,
        active,
        watchlist,
        top_tvl,
    }
}
