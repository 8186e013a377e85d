//! End-to-end lifecycle tests: signal in, orders out, closures detected,
//! stops re-priced, state archived and restored.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use signal_engine::application::services::{
    BreakevenConfig, BreakevenEngine, MonitorConfig, OrchestratorConfig,
    OrderPlacementOrchestrator, PositionMonitor, RealtimeSyncBroadcaster, SyncConfig,
};
use signal_engine::{
    CloseReason, Direction, EntryPrice, EventBus, GatewayError, InMemoryTradeStore, PaperBroker,
    PaperConfig, RetryPolicy, RetryingGateway, ScriptedBroker, Signal, TradeEvent,
    TradeRepository, TradeStatus,
};

struct Harness {
    gateway: Arc<ScriptedBroker>,
    store: Arc<InMemoryTradeStore>,
    repository: Arc<TradeRepository<InMemoryTradeStore>>,
    orchestrator: OrderPlacementOrchestrator<ScriptedBroker, InMemoryTradeStore>,
    monitor: PositionMonitor<ScriptedBroker, InMemoryTradeStore>,
    events: EventBus,
}

fn harness() -> Harness {
    let gateway = Arc::new(ScriptedBroker::new());
    let store = Arc::new(InMemoryTradeStore::new());
    let repository = Arc::new(TradeRepository::new(Arc::clone(&store)));
    let events = EventBus::new(128);

    let orchestrator = OrderPlacementOrchestrator::new(
        OrchestratorConfig {
            order_pacing: Duration::ZERO,
            default_lot_size: dec!(0.10),
        },
        Arc::clone(&gateway),
        Arc::clone(&repository),
        events.clone(),
    );
    let breakeven = BreakevenEngine::new(
        BreakevenConfig {
            offset: dec!(0.0001),
            min_stop_distance: dec!(0.0005),
        },
        Arc::clone(&gateway),
        Arc::clone(&repository),
        events.clone(),
    );
    let monitor = PositionMonitor::new(
        MonitorConfig {
            tick_interval: Duration::from_secs(1),
            contract_size: dec!(100000),
        },
        Arc::clone(&gateway),
        Arc::clone(&repository),
        breakeven,
        events.clone(),
    );

    Harness {
        gateway,
        store,
        repository,
        orchestrator,
        monitor,
        events,
    }
}

fn eurusd_signal() -> Signal {
    Signal::new(
        "EURUSD",
        Direction::Long,
        EntryPrice::Level(dec!(1.0850)),
        dec!(1.0800),
        vec![dec!(1.0900), dec!(1.0950), dec!(1.1000)],
    )
    .with_lot_size(dec!(1.0))
}

#[tokio::test]
async fn first_target_moves_surviving_stops_to_their_own_entries() {
    let h = harness();
    h.gateway.push_fill("t1", dec!(1.0850));
    h.gateway.push_fill("t2", dec!(1.0851));
    h.gateway.push_fill("t3", dec!(1.0852));

    let outcome = h.orchestrator.execute(eurusd_signal()).await;
    assert_eq!(outcome.placed, 3);
    let trade_id = outcome.trade_id.unwrap();

    // Market reaches the first target.
    for ticket in ["t1", "t2", "t3"] {
        h.gateway.set_open(ticket, dec!(1.0900), dec!(500));
    }
    h.monitor.tick().await;

    // The broker closes leg 1 at its target.
    h.gateway.remove_open("t1");
    h.monitor.tick().await;

    let trade = h.repository.get(trade_id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Partial);
    assert_eq!(trade.legs[0].close_reason, Some(CloseReason::TargetHit));
    assert!(trade.breakeven_applied);

    // Each surviving stop derives from that leg's own fill plus the offset:
    // 1.0851 -> 1.0852 and 1.0852 -> 1.0853. Not 1.0851 (leg 1's fill), not
    // any shared value.
    assert_eq!(trade.legs[1].stop_loss, dec!(1.0852));
    assert_eq!(trade.legs[2].stop_loss, dec!(1.0853));
    assert_eq!(
        h.gateway.modify_calls(),
        vec![
            ("t2".to_string(), dec!(1.0852)),
            ("t3".to_string(), dec!(1.0853)),
        ]
    );
}

#[tokio::test]
async fn post_breakeven_stops_respect_the_minimum_price_buffer() {
    let h = harness();
    h.gateway.push_fill("t1", dec!(1.0850));
    h.gateway.push_fill("t2", dec!(1.0851));
    h.gateway.push_fill("t3", dec!(1.0852));
    h.orchestrator.execute(eurusd_signal()).await;

    // Price hovers just above the entries, so entry-based candidates would
    // land inside the noise buffer.
    for ticket in ["t1", "t2", "t3"] {
        h.gateway.set_open(ticket, dec!(1.0854), dec!(40));
    }
    h.monitor.tick().await;

    h.gateway.remove_open("t1");
    h.monitor.tick().await;

    for (_, stop) in h.gateway.modify_calls() {
        assert!((dec!(1.0854) - stop).abs() >= dec!(0.0005));
    }
}

#[tokio::test]
async fn rejected_leg_produces_no_placeholder_record() {
    let h = harness();
    h.gateway.push_fill("t1", dec!(1.0850));
    h.gateway.push_fill_error(GatewayError::Rejected {
        reason: "insufficient margin".to_string(),
    });
    h.gateway.push_fill("t3", dec!(1.0852));

    let outcome = h.orchestrator.execute(eurusd_signal()).await;

    assert_eq!(outcome.requested, 3);
    assert_eq!(outcome.placed, 2);
    let trade = h.repository.get(outcome.trade_id.unwrap()).await.unwrap();
    assert_eq!(trade.legs.len(), 2);
    assert_eq!(trade.legs[0].tp_index, 0);
    assert_eq!(trade.legs[1].tp_index, 2);
    assert_eq!(trade.legs[0].take_profit, dec!(1.0900));
    assert_eq!(trade.legs[1].take_profit, dec!(1.1000));
}

#[tokio::test]
async fn breakeven_applies_at_most_once() {
    let h = harness();
    h.gateway.push_fill("t1", dec!(1.0850));
    h.gateway.push_fill("t2", dec!(1.0851));
    h.gateway.push_fill("t3", dec!(1.0852));
    let trade_id = h
        .orchestrator
        .execute(eurusd_signal())
        .await
        .trade_id
        .unwrap();

    for ticket in ["t1", "t2", "t3"] {
        h.gateway.set_open(ticket, dec!(1.0900), dec!(500));
    }
    h.monitor.tick().await;

    h.gateway.remove_open("t1");
    h.monitor.tick().await;
    let modify_count_after_first = h.gateway.modify_calls().len();

    // The second closure must not re-trigger the transition.
    h.gateway.set_open("t2", dec!(1.0950), dec!(990));
    h.gateway.set_open("t3", dec!(1.0950), dec!(980));
    h.monitor.tick().await;
    h.gateway.remove_open("t2");
    h.monitor.tick().await;

    assert_eq!(h.gateway.modify_calls().len(), modify_count_after_first);
    let trade = h.repository.get(trade_id).await.unwrap();
    assert!(trade.breakeven_applied);
    assert_eq!(trade.last_closed_tp, Some(1));
}

#[tokio::test]
async fn lifecycle_events_arrive_in_order() {
    let h = harness();
    let mut rx = h.events.subscribe();
    h.gateway.push_fill("t1", dec!(1.0850));
    h.gateway.push_fill("t2", dec!(1.0851));
    h.orchestrator
        .execute(
            Signal::new(
                "EURUSD",
                Direction::Long,
                EntryPrice::Level(dec!(1.0850)),
                dec!(1.0800),
                vec![dec!(1.0900), dec!(1.0950)],
            )
            .with_lot_size(dec!(1.0)),
        )
        .await;

    for ticket in ["t1", "t2"] {
        h.gateway.set_open(ticket, dec!(1.0900), dec!(500));
    }
    h.monitor.tick().await;
    h.gateway.remove_open("t1");
    h.monitor.tick().await;
    h.gateway.set_open("t2", dec!(1.0950), dec!(990));
    h.monitor.tick().await;
    h.gateway.remove_open("t2");
    h.monitor.tick().await;

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let signal_engine::EngineEvent::Trade(trade_event) = event {
            kinds.push(match trade_event {
                TradeEvent::Opened { .. } => "opened",
                TradeEvent::LegClosed { .. } => "leg_closed",
                TradeEvent::BreakevenApplied { .. } => "breakeven_applied",
                TradeEvent::Closed { .. } => "closed",
            });
        }
    }
    assert_eq!(
        kinds,
        vec![
            "opened",
            "leg_closed",
            "breakeven_applied",
            "leg_closed",
            "closed"
        ]
    );
}

#[tokio::test]
async fn restart_roundtrip_restores_and_reconciles() {
    let store = Arc::new(InMemoryTradeStore::new());
    let trade_id;

    // First process lifetime: place a trade, observe prices, go down.
    {
        let gateway = Arc::new(ScriptedBroker::new());
        let repository = Arc::new(TradeRepository::new(Arc::clone(&store)));
        let events = EventBus::new(16);
        let orchestrator = OrderPlacementOrchestrator::new(
            OrchestratorConfig {
                order_pacing: Duration::ZERO,
                default_lot_size: dec!(0.10),
            },
            Arc::clone(&gateway),
            Arc::clone(&repository),
            events.clone(),
        );
        let breakeven = BreakevenEngine::new(
            BreakevenConfig {
                offset: dec!(0.0001),
                min_stop_distance: dec!(0.0005),
            },
            Arc::clone(&gateway),
            Arc::clone(&repository),
            events.clone(),
        );
        let monitor = PositionMonitor::new(
            MonitorConfig {
                tick_interval: Duration::from_secs(1),
                contract_size: dec!(100000),
            },
            Arc::clone(&gateway),
            Arc::clone(&repository),
            breakeven,
            events,
        );

        gateway.push_fill("t1", dec!(1.0850));
        gateway.push_fill("t2", dec!(1.0851));
        gateway.push_fill("t3", dec!(1.0852));
        trade_id = orchestrator
            .execute(eurusd_signal())
            .await
            .trade_id
            .unwrap();

        for ticket in ["t1", "t2", "t3"] {
            gateway.set_open(ticket, dec!(1.0900), dec!(500));
        }
        monitor.tick().await;
    }

    // Second process lifetime: t1 closed at its target while we were down.
    let repository = Arc::new(TradeRepository::new(Arc::clone(&store)));
    let restored = repository.restore().await.unwrap();
    assert_eq!(restored, 1);

    let loaded = repository.get(trade_id).await.unwrap();
    assert_eq!(loaded.legs.len(), 3);
    assert_eq!(loaded.legs[1].entry_fill_price, dec!(1.0851));
    assert_eq!(loaded.legs[0].current_price, Some(dec!(1.0900)));

    let live: HashSet<String> = ["t2".to_string(), "t3".to_string()].into_iter().collect();
    let summary = repository.reconcile(&live, dec!(100000)).await;
    assert_eq!(summary.legs_closed, 1);

    let trade = repository.get(trade_id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Partial);
    assert!(trade.legs[0].closed);
    assert_eq!(trade.legs[0].close_reason, Some(CloseReason::TargetHit));
    assert!(!trade.legs[1].closed);
    assert!(!trade.legs[2].closed);
}

#[tokio::test]
async fn paper_broker_end_to_end() {
    let gateway = Arc::new(RetryingGateway::new(
        PaperBroker::new(PaperConfig {
            slippage: dec!(0.0001),
            starting_balance: dec!(10000),
            contract_size: dec!(100000),
            leverage: dec!(100),
        }),
        RetryPolicy::default(),
    ));
    let store = Arc::new(InMemoryTradeStore::new());
    let repository = Arc::new(TradeRepository::new(Arc::clone(&store)));
    let events = EventBus::new(64);
    let orchestrator = OrderPlacementOrchestrator::new(
        OrchestratorConfig {
            order_pacing: Duration::ZERO,
            default_lot_size: dec!(0.10),
        },
        Arc::clone(&gateway),
        Arc::clone(&repository),
        events.clone(),
    );
    let breakeven = BreakevenEngine::new(
        BreakevenConfig {
            offset: dec!(0.0001),
            min_stop_distance: dec!(0.0005),
        },
        Arc::clone(&gateway),
        Arc::clone(&repository),
        events.clone(),
    );
    let monitor = PositionMonitor::new(
        MonitorConfig {
            tick_interval: Duration::from_secs(1),
            contract_size: dec!(100000),
        },
        Arc::clone(&gateway),
        Arc::clone(&repository),
        breakeven,
        events.clone(),
    );

    let outcome = orchestrator.execute(eurusd_signal()).await;
    assert_eq!(outcome.placed, 3);
    let trade_id = outcome.trade_id.unwrap();

    // All legs fill long at entry + slippage.
    let trade = repository.get(trade_id).await.unwrap();
    for leg in &trade.legs {
        assert_eq!(leg.entry_fill_price, dec!(1.0851));
    }

    // Drift below the first target, then cross it: the paper broker closes
    // leg 1 broker-side, the monitor detects it and re-prices the rest.
    gateway.inner().set_price("EURUSD", dec!(1.0890));
    monitor.tick().await;
    gateway.inner().set_price("EURUSD", dec!(1.0900));
    monitor.tick().await;

    let trade = repository.get(trade_id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Partial);
    assert_eq!(trade.closed_leg_count(), 1);
    assert!(trade.breakeven_applied);
    for leg in trade.open_legs() {
        // Own fill plus the offset.
        assert_eq!(leg.stop_loss, dec!(1.0852));
    }
}

#[tokio::test]
async fn broadcaster_keeps_store_and_observers_in_sync() {
    let h = harness();
    let broadcaster = RealtimeSyncBroadcaster::new(
        SyncConfig::default(),
        Arc::clone(&h.gateway),
        Arc::clone(&h.repository),
        Arc::clone(&h.store),
        h.events.clone(),
    );

    let first = broadcaster.tick(None, false).await.unwrap();
    assert_eq!(h.store.snapshot_count(), 1);

    // Nothing changed: no push.
    assert!(broadcaster.tick(Some(&first), false).await.is_none());

    // A new trade appears: positions and stats change, push happens.
    h.gateway.push_fill("t1", dec!(1.0850));
    h.orchestrator
        .execute(
            Signal::new(
                "EURUSD",
                Direction::Long,
                EntryPrice::Level(dec!(1.0850)),
                dec!(1.0800),
                vec![dec!(1.0900)],
            )
            .with_lot_size(dec!(1.0)),
        )
        .await;

    let second = broadcaster.tick(Some(&first), false).await.unwrap();
    assert_eq!(second.positions.len(), 1);
    assert_eq!(h.store.snapshot_count(), 2);

    let recorded = h.store.last_snapshot().unwrap();
    assert_eq!(recorded.positions.len(), 1);
    assert_eq!(recorded.positions[0].ticket, "t1");
}
