use super::*;
use crate::gateway::SimGateway;
use crate::stats::StatsAggregator;

fn get_data() -> Vec<Tick> {
    // one tick per minute, prices walking up through an ROI target and later
    // down through a stoploss
    let prices = [
        100.0, 100.0, 101.0, 103.0, 102.0, 100.0, 100.0, 99.0, 97.0, 100.0,
    ];
    prices
        .iter()
        .enumerate()
        .map(|(i, price)| Tick::new(i as u64, *price, 1.0, 60_000 * i as i64).unwrap())
        .collect()
}

fn policy() -> ExitPolicy {
    ExitPolicy::new(RoiLadder::new([(5.0, 0.02)]).unwrap(), -0.02).unwrap()
}

// Drives the engine pieces by hand, the way a runner does: exit check at tick
// granularity, entries at bar closes.
fn replay(
    ticks: &[Tick],
    entry_bars: &[usize],
    policy: &ExitPolicy,
    lifecycle: &mut PositionLifecycle,
    gateway: &mut SimGateway,
) -> Vec<ClosedTrade> {
    let mut aggregator = BarAggregator::new(BarRule::Ticks(2)).unwrap();
    let mut trades = Vec::new();
    let mut bar_index = 0;

    for tick in ticks {
        let verdict = lifecycle
            .open_position()
            .and_then(|p| policy.evaluate(p, tick.price(), tick.time()));
        if let Some(reason) = verdict {
            if let Some(trade) = lifecycle
                .request_exit(reason, tick.price(), tick.time(), gateway)
                .unwrap()
            {
                trades.push(trade);
            }
        }

        if let Some(bar) = aggregator.accumulate(tick) {
            if entry_bars.contains(&bar_index) {
                lifecycle
                    .request_entry(bar.close(), bar.close_time(), gateway)
                    .unwrap();
            }
            bar_index += 1;
        }
    }
    trades
}

#[test]
fn test_roi_round_trip() {
    let data = get_data();
    let mut lifecycle = PositionLifecycle::new("BTCUSDT", "bt", OrderType::Market, 100.0).unwrap();
    let mut gateway = SimGateway::new(0.0).unwrap();

    // enter on the first closed bar (close 100 at minute 1)
    let trades = replay(&data[..5], &[0], &policy(), &mut lifecycle, &mut gateway);

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].sell_reason(), SellReason::Roi);
    assert_eq!(trades[0].end_price(), 103.0);
    assert!(trades[0].income() > 0.0);
    assert_eq!(lifecycle.state(), TradeState::Flat);
}

#[test]
fn test_stoploss_round_trip() {
    let data = get_data();
    let mut lifecycle = PositionLifecycle::new("BTCUSDT", "bt", OrderType::Market, 100.0).unwrap();
    let mut gateway = SimGateway::new(0.0).unwrap();

    // enter on bar 3 (close 99 at minute 7), the walk down hits -2% at 97
    let trades = replay(&data, &[3], &policy(), &mut lifecycle, &mut gateway);

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].sell_reason(), SellReason::Stoploss);
    assert!(trades[0].income() < 0.0);
    assert_eq!(lifecycle.state(), TradeState::Flat);
}

#[test]
fn test_two_round_trips_two_trades() {
    let data = get_data();
    let mut lifecycle = PositionLifecycle::new("BTCUSDT", "bt", OrderType::Market, 100.0).unwrap();
    let mut gateway = SimGateway::new(0.0).unwrap();

    // re-enter after the ROI exit; the second trip ends on the stoploss
    let trades = replay(&data, &[0, 3], &policy(), &mut lifecycle, &mut gateway);

    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].sell_reason(), SellReason::Roi);
    assert_eq!(trades[1].sell_reason(), SellReason::Stoploss);
    assert_eq!(lifecycle.state(), TradeState::Flat);
}

#[test]
fn test_stats_fold_over_replay() {
    let data = get_data();
    let mut lifecycle = PositionLifecycle::new("BTCUSDT", "bt", OrderType::Market, 100.0).unwrap();
    let mut gateway = SimGateway::new(0.0).unwrap();
    let stats = StatsAggregator::new();

    for trade in replay(&data, &[0, 3], &policy(), &mut lifecycle, &mut gateway) {
        stats.record(&trade).unwrap();
    }

    let stat = stats.pair_stat("BTCUSDT").unwrap();
    assert_eq!(stat.total(), 2);
    assert_eq!(stat.num_wins(), 1);
    assert_eq!(stat.num_losses(), 1);
    assert_eq!(stat.net(), stat.cumulative_profit() - stat.cumulative_loss());
}

#[test]
fn test_tick_exit_outranks_bar_signal() {
    // a price that satisfies ROI on the very tick that closes a bar must be
    // reported as ROI, not as a SELL signal
    let ticks = [
        Tick::new(0, 100.0, 1.0, 0).unwrap(),
        Tick::new(1, 100.0, 1.0, 60_000).unwrap(),
        Tick::new(2, 100.5, 1.0, 120_000).unwrap(),
        Tick::new(3, 103.0, 1.0, 180_000).unwrap(),
    ];
    let policy = policy();
    let mut lifecycle = PositionLifecycle::new("BTCUSDT", "bt", OrderType::Market, 100.0).unwrap();
    let mut gateway = SimGateway::new(0.0).unwrap();
    let mut aggregator = BarAggregator::new(BarRule::Ticks(2)).unwrap();
    let mut trades = Vec::new();

    for tick in &ticks {
        let verdict = lifecycle
            .open_position()
            .and_then(|p| policy.evaluate(p, tick.price(), tick.time()));
        if let Some(reason) = verdict {
            if let Some(trade) = lifecycle
                .request_exit(reason, tick.price(), tick.time(), &mut gateway)
                .unwrap()
            {
                trades.push(trade);
            }
        }

        if let Some(bar) = aggregator.accumulate(tick) {
            // the strategy would say SELL here; by the time the bar closes the
            // position is already gone, so the signal is a no-op
            if lifecycle.state() == TradeState::Flat && bar.close() == 100.0 {
                lifecycle
                    .request_entry(bar.close(), bar.close_time(), &mut gateway)
                    .unwrap();
            } else if let Some(trade) = lifecycle
                .request_exit(SellReason::SellSignal, bar.close(), bar.close_time(), &mut gateway)
                .unwrap()
            {
                trades.push(trade);
            }
        }
    }

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].sell_reason(), SellReason::Roi);
}
