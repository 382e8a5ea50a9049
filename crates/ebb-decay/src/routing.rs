//! Routing of decayed value to the network reserve and the treasury.

use ebb_core::constants::BPS_PRECISION;
use ebb_core::error::DecayError;
use ebb_core::types::DecayRouting;

/// Split `decayed_total` by `network_bps`; the treasury takes the remainder,
/// so nothing is lost to rounding.
pub fn split_decayed(decayed_total: u64, network_bps: u64) -> Result<DecayRouting, DecayError> {
    let network = (decayed_total as u128)
        .checked_mul(network_bps.min(BPS_PRECISION) as u128)
        .ok_or(DecayError::ArithmeticOverflow)?
        / BPS_PRECISION as u128;
    let network_credit = network as u64;
    Ok(DecayRouting {
        decayed_total,
        network_credit,
        treasury_credit: decayed_total - network_credit,
    })
}
