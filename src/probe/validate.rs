//! Heuristic checks run against a host's reported settings.
//!
//! Each protocol generation reports a different subset of fields, so the rule set is a
//! table keyed by [`Generation`] rather than one function per protocol.

use super::settings::{Settings, SettingsView};
use crate::network::Generation;
use crate::version::{parse_release, SemVer};

/// 30 days of 10 minute blocks.
pub const MIN_CONTRACT_DURATION: u64 = 144 * 30;
/// Blocks a host may drift from the tracked tip before it is considered out of sync.
pub const TIP_HEIGHT_TOLERANCE: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Warning(String),
    Error(String),
}

/// External state the reported settings are compared against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub latest_release: &'a SemVer,
    pub tip_height: u64,
    pub dialed_address: &'a str,
}

pub type Check = fn(&SettingsView<'_>, &ValidationContext<'_>) -> Option<Finding>;

const V2_CHECKS: &[Check] = &[
    accepting_contracts,
    net_address,
    max_collateral,
    collateral,
    max_duration,
    release,
];

const V3_CHECKS: &[Check] = &[max_collateral, collateral, tip_height];

const V4_CHECKS: &[Check] = &[
    accepting_contracts,
    max_collateral,
    max_duration,
    collateral,
    tip_height,
    release,
    net_address,
];

pub fn checks(generation: Generation) -> &'static [Check] {
    match generation {
        Generation::V2 => V2_CHECKS,
        Generation::V3 => V3_CHECKS,
        Generation::V4 => V4_CHECKS,
    }
}

/// Runs every check for the settings' generation, in table order.
pub fn validate(settings: &Settings, ctx: &ValidationContext<'_>) -> Vec<Finding> {
    let view = settings.view();
    checks(settings.generation())
        .iter()
        .filter_map(|check| check(&view, ctx))
        .collect()
}

fn warning(message: impl Into<String>) -> Option<Finding> {
    Some(Finding::Warning(message.into()))
}

fn accepting_contracts(view: &SettingsView<'_>, _: &ValidationContext<'_>) -> Option<Finding> {
    match view.accepting_contracts {
        Some(false) => warning("host is not accepting contracts"),
        _ => None,
    }
}

fn max_collateral(view: &SettingsView<'_>, _: &ValidationContext<'_>) -> Option<Finding> {
    view.max_collateral
        .is_zero()
        .then(|| Finding::Warning("host has no max collateral".to_string()))
}

fn max_duration(view: &SettingsView<'_>, _: &ValidationContext<'_>) -> Option<Finding> {
    match view.max_duration {
        Some(duration) if duration < MIN_CONTRACT_DURATION => {
            warning("host has a max contract duration less than 1 month")
        }
        _ => None,
    }
}

fn collateral(view: &SettingsView<'_>, _: &ValidationContext<'_>) -> Option<Finding> {
    if view.collateral.is_zero() {
        warning("host has no collateral price")
    } else if view.collateral < view.storage_price {
        warning("host's collateral price is less than storage price")
    } else if view
        .storage_price
        .checked_mul(2)
        .map_or(true, |doubled| doubled > view.collateral)
    {
        warning("host's collateral price is less than double the storage price")
    } else {
        None
    }
}

fn tip_height(view: &SettingsView<'_>, ctx: &ValidationContext<'_>) -> Option<Finding> {
    let reported = view.height?;
    (reported.abs_diff(ctx.tip_height) > TIP_HEIGHT_TOLERANCE).then(|| {
        Finding::Error(format!(
            "host's tip height {} does not match the current tip height {}",
            reported, ctx.tip_height
        ))
    })
}

fn release(view: &SettingsView<'_>, ctx: &ValidationContext<'_>) -> Option<Finding> {
    let reported = view.release?;
    match parse_release(reported) {
        Err(_) => warning(format!(
            "host is running an unknown version {reported:?}, which may not be stable"
        )),
        Ok(version) if version < *ctx.latest_release => warning(format!(
            "host is running an outdated version \"{}\", latest is \"{}\"",
            version, ctx.latest_release
        )),
        Ok(_) => None,
    }
}

fn net_address(view: &SettingsView<'_>, ctx: &ValidationContext<'_>) -> Option<Finding> {
    let announced = view.net_address?;
    (announced != ctx.dialed_address).then(|| {
        Finding::Warning(format!(
            "announced net address {:?} does not match dialed address {:?}",
            announced, ctx.dialed_address
        ))
    })
}
