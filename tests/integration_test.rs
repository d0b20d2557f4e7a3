//! End-to-end engine tests over small hand-built panels.
//!
//! Tests cover:
//! - Constant-price run: entry, extension, open position at the end
//! - Exact-target profit exit and fill pricing for profit and stop exits
//! - Entry selection between competing candidates
//! - DCA buy budget per cycle
//! - Determinism, lock-step/parallel agreement, rejected tuples
//! - Missing-row policies and expanding cutoffs

mod common;

use approx::assert_relative_eq;
use common::*;
use evsweep::domain::backtest::{replay, run_sweep, EngineOptions, Execution, TupleSimulation};
use evsweep::domain::execution::ExitType;
use evsweep::domain::grid::{Cutoff, CutoffMode, ParamSpace, ParameterGrid, ResolvedParams};
use evsweep::domain::panel::Panel;
use evsweep::domain::params::{MissingRowPolicy, RuleSet, StopPricing};
use evsweep::domain::position::{DayEvent, Phase};
use evsweep::adapters::csv_adapter::read_rows;
use evsweep::ports::data_port::PanelSource;

const CAPITAL: f64 = 40_000_000.0;

fn fixed(params: evsweep::domain::params::StrategyParams, cutoff: f64) -> ResolvedParams {
    ResolvedParams {
        param_index: 0,
        params,
        cutoff: Cutoff::Fixed(cutoff),
    }
}

fn sweep_space() -> ParamSpace {
    ParamSpace {
        ev_quantiles: vec![0.5, 0.7, 0.9],
        profit_targets: vec![0.03, 0.08],
        max_holding_days: vec![3, 10, 25],
        stop_levels: vec![0.0, -0.05],
        rules: RuleSet::default(),
    }
}

mod constant_price {
    use super::*;

    #[test]
    fn fifty_flat_days_stay_open_in_extension() {
        let panel = Panel::new(flat_series("AAA", 50, 100.0, 0.9)).unwrap();
        let tuple = fixed(make_params(0.5, 0.10, 40, -0.10), 0.5);
        let options = EngineOptions {
            record_equity: true,
            ..EngineOptions::default()
        };

        let mut sim = TupleSimulation::new(&tuple, &options);
        let mut phases = Vec::new();
        for (i, day) in panel.days().enumerate() {
            let event = sim.step(&day).unwrap();
            if i == 0 {
                assert!(matches!(event, DayEvent::Entered { ref ticker, .. } if ticker == "AAA"));
            }
            assert!(!matches!(event, DayEvent::Exited(_)));
            phases.push(sim.state().phase());
        }

        assert_eq!(phases[0], Phase::Holding);
        assert_eq!(phases[38], Phase::Holding);
        assert_eq!(phases[39], Phase::Extending);
        assert_eq!(phases[49], Phase::Extending);

        let open = sim.state().open.clone().unwrap();
        assert_eq!(open.holding_days, 50);
        assert_eq!(open.buy_count, 40);
        let cash = sim.state().cash;
        let expected_equity = cash + open.total_shares * 100.0;

        let outcome = sim.finish("flat");
        let summary = &outcome.summary;
        assert_eq!(summary.cycle_count, 0);
        assert!(summary.open_position);
        assert_relative_eq!(summary.final_equity, expected_equity);
        assert_relative_eq!(summary.final_equity, CAPITAL, max_relative = 1e-12);
        assert!(summary.max_drawdown <= 0.0);
        assert_relative_eq!(
            summary.max_drawdown,
            evsweep::domain::metrics::drawdown_from_curve(CAPITAL, &outcome.equity_curve)
        );
        assert_relative_eq!(summary.max_drawdown, 0.0, epsilon = 1e-12);
    }
}

mod exits {
    use super::*;

    #[test]
    fn profit_exit_at_exact_target_on_day_five() {
        let params = make_params(0.5, 0.10, 40, -0.10);
        let target = params.profit_price(100.0);
        let mut rows = vec![flat_row("AAA", 0, 100.0, 0.9)];
        // above the DCA band, below the target
        for n in 1..4 {
            rows.push(flat_row("AAA", n, 106.0, 0.9));
        }
        rows.push(make_row("AAA", 4, target, 104.0, 107.0, 0.9));
        let panel = Panel::new(rows).unwrap();

        let outcome = replay(&panel, &fixed(params, 0.5), &EngineOptions::default()).unwrap();
        assert_eq!(outcome.cycles.len(), 1);
        let cycle = &outcome.cycles[0];
        assert_eq!(cycle.exit_type, ExitType::Profit);
        assert_eq!(cycle.start_date, day(0));
        assert_eq!(cycle.end_date, day(4));
        assert_eq!(cycle.holding_days, 5);
        assert_eq!(cycle.buy_count, 1);
        assert_relative_eq!(cycle.proceeds, 10_000.0 * target);
        assert_relative_eq!(outcome.summary.success_rate, 1.0);
        assert_eq!(outcome.summary.cycle_count, 1);
    }

    #[test]
    fn profit_fills_at_target_not_high() {
        let panel = Panel::new(vec![
            flat_row("AAA", 0, 100.0, 0.9),
            make_row("AAA", 1, 115.0, 101.0, 112.0, 0.9),
        ])
        .unwrap();
        let outcome = replay(
            &panel,
            &fixed(make_params(0.5, 0.10, 40, -0.10), 0.5),
            &EngineOptions::default(),
        )
        .unwrap();
        let cycle = &outcome.cycles[0];
        // 10,000 shares at an average of 100
        assert_relative_eq!(cycle.proceeds / 10_000.0, 110.0, max_relative = 1e-12);
        assert_relative_eq!(cycle.cycle_return, 0.10, epsilon = 1e-12);
    }

    #[test]
    fn stop_fills_at_stop_line_not_low() {
        let panel = Panel::new(vec![
            flat_row("AAA", 0, 100.0, 0.9),
            make_row("AAA", 1, 100.0, 85.0, 95.0, 0.9),
        ])
        .unwrap();
        // two-day horizon so the second day is already in extension
        let outcome = replay(
            &panel,
            &fixed(make_params(0.5, 0.10, 2, -0.10), 0.5),
            &EngineOptions::default(),
        )
        .unwrap();
        let cycle = &outcome.cycles[0];
        assert_eq!(cycle.exit_type, ExitType::Stop);
        assert_relative_eq!(cycle.proceeds / 200_000.0, 90.0, max_relative = 1e-12);
        assert_relative_eq!(cycle.cycle_return, -0.10, epsilon = 1e-12);
        assert_relative_eq!(outcome.summary.max_loss_rate, -0.10, epsilon = 1e-12);
        assert_relative_eq!(outcome.summary.success_rate, 0.0);
    }

    #[test]
    fn stop_at_day_close_variant_uses_close() {
        let panel = Panel::new(vec![
            flat_row("AAA", 0, 100.0, 0.9),
            make_row("AAA", 1, 100.0, 85.0, 95.0, 0.9),
        ])
        .unwrap();
        let mut params = make_params(0.5, 0.10, 2, -0.10);
        params.rules.stop_pricing = StopPricing::AtDayClose;
        let outcome = replay(&panel, &fixed(params, 0.5), &EngineOptions::default()).unwrap();
        assert_relative_eq!(outcome.cycles[0].proceeds / 200_000.0, 95.0, max_relative = 1e-12);
    }

    #[test]
    fn stop_at_day_close_with_blank_close_uses_stop_line() {
        let csv = "Date,Ticker,Open,High,Low,Close,EV\n\
                   2024-01-01,AAA,100,100,100,100,0.9\n\
                   2024-01-02,AAA,100,101,85,,0.9\n\
                   2024-01-03,AAA,100,100,100,100,0.9\n";
        let panel = Panel::new(read_rows(csv.as_bytes()).unwrap()).unwrap();
        let mut params = make_params(0.5, 0.10, 2, -0.10);
        params.rules.stop_pricing = StopPricing::AtDayClose;

        let outcome = replay(&panel, &fixed(params, 0.5), &EngineOptions::default()).unwrap();
        assert_eq!(outcome.cycles.len(), 1);
        assert_eq!(outcome.cycles[0].exit_type, ExitType::Stop);
        assert_relative_eq!(outcome.cycles[0].proceeds, 200_000.0 * 90.0, max_relative = 1e-12);

        let s = &outcome.summary;
        assert!(s.final_equity.is_finite());
        assert!(s.seed_multiple.is_finite());
        assert!(s.max_drawdown < 0.0);
        // re-entered on the last day with the remaining cash
        assert!(s.open_position);
    }
}

mod entry_selection {
    use super::*;

    #[test]
    fn highest_score_wins() {
        let panel = Panel::new(vec![
            flat_row("LOW", 0, 100.0, 0.6),
            flat_row("HIGH", 0, 100.0, 0.8),
        ])
        .unwrap();
        let tuple = fixed(make_params(0.5, 0.10, 40, -0.10), 0.5);
        let mut sim = TupleSimulation::new(&tuple, &EngineOptions::default());
        let first = panel.days().next().unwrap();
        match sim.step(&first).unwrap() {
            DayEvent::Entered { ticker, .. } => assert_eq!(ticker, "HIGH"),
            other => panic!("expected entry, got {other:?}"),
        }
    }

    #[test]
    fn nothing_above_cutoff_is_idle() {
        let panel = Panel::new(flat_series("AAA", 5, 100.0, 0.2)).unwrap();
        let outcome = replay(
            &panel,
            &fixed(make_params(0.5, 0.10, 40, -0.10), 0.5),
            &EngineOptions::default(),
        )
        .unwrap();
        assert_eq!(outcome.summary.idle_days, 5);
        assert_relative_eq!(outcome.summary.final_equity, CAPITAL);
    }
}

mod dca {
    use super::*;

    #[test]
    fn buys_per_cycle_never_exceed_max_holding_days() {
        let mut rows: Vec<_> = (0..60)
            .map(|n| flat_row("AAA", n, 100.0 - 0.1 * n as f64, 0.9))
            .collect();
        // rally well past any average to close the cycle
        rows.push(flat_row("AAA", 60, 150.0, 0.9));
        let panel = Panel::new(rows).unwrap();

        let outcome = replay(
            &panel,
            &fixed(make_params(0.5, 0.10, 40, -0.99), 0.5),
            &EngineOptions::default(),
        )
        .unwrap();
        let cycle = &outcome.cycles[0];
        assert_eq!(cycle.exit_type, ExitType::Profit);
        assert_eq!(cycle.buy_count, 40);
        assert_relative_eq!(cycle.total_invested, CAPITAL, max_relative = 1e-12);
        assert_relative_eq!(cycle.start_seed, CAPITAL);
    }

    #[test]
    fn half_unit_inside_threshold_band() {
        let panel = Panel::new(vec![
            flat_row("AAA", 0, 100.0, 0.9),
            flat_row("AAA", 1, 103.0, 0.9),
        ])
        .unwrap();
        let tuple = fixed(make_params(0.5, 0.10, 40, -0.10), 0.5);
        let mut sim = TupleSimulation::new(&tuple, &EngineOptions::default());
        let days: Vec<_> = panel.days().collect();
        sim.step(&days[0]).unwrap();
        match sim.step(&days[1]).unwrap() {
            DayEvent::Added { amount, price } => {
                assert_relative_eq!(amount, 500_000.0);
                assert_relative_eq!(price, 103.0);
            }
            other => panic!("expected add, got {other:?}"),
        }
    }
}

mod sweep {
    use super::*;

    #[test]
    fn runs_are_bit_identical() {
        let panel = synthetic_panel(300);
        let grid = ParameterGrid::build(&sweep_space(), &panel, CutoffMode::FullSample);
        let options = EngineOptions {
            record_ledger: true,
            ..EngineOptions::default()
        };
        let first = run_sweep(&panel, &grid, &options).unwrap();
        let second = run_sweep(&panel, &grid, &options).unwrap();
        assert_eq!(first.summaries, second.summaries);
        assert_eq!(first.ledger, second.ledger);
    }

    #[test]
    fn lock_step_matches_parallel() {
        let panel = synthetic_panel(300);
        for mode in [CutoffMode::FullSample, CutoffMode::Expanding] {
            let grid = ParameterGrid::build(&sweep_space(), &panel, mode);
            let parallel = run_sweep(&panel, &grid, &EngineOptions::default()).unwrap();
            let lock_step = run_sweep(
                &panel,
                &grid,
                &EngineOptions {
                    execution: Execution::LockStep,
                    ..EngineOptions::default()
                },
            )
            .unwrap();
            assert_eq!(parallel.summaries, lock_step.summaries);
        }
    }

    #[test]
    fn cycle_counts_add_up_and_nothing_fails() {
        let panel = synthetic_panel(300);
        let grid = ParameterGrid::build(&sweep_space(), &panel, CutoffMode::FullSample);
        let outcome = run_sweep(&panel, &grid, &EngineOptions::default()).unwrap();

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.summaries.len(), sweep_space().len());
        assert!(outcome.summaries.iter().any(|s| s.cycle_count > 0));
        for s in &outcome.summaries {
            assert_eq!(s.cycle_count, s.profit_exits + s.stop_exits);
            assert!((0.0..=1.0).contains(&s.success_rate));
            assert!(s.max_drawdown <= 0.0);
            assert!(s.max_loss_rate <= 0.0);
        }
    }

    #[test]
    fn ledger_matches_summary_counts() {
        let panel = synthetic_panel(200);
        let grid = ParameterGrid::build(&sweep_space(), &panel, CutoffMode::FullSample);
        let outcome = run_sweep(
            &panel,
            &grid,
            &EngineOptions {
                record_ledger: true,
                ..EngineOptions::default()
            },
        )
        .unwrap();
        for s in &outcome.summaries {
            let cycles: Vec<_> = outcome.cycles_for(s.param_index).collect();
            assert_eq!(cycles.len(), s.cycle_count);
            if let Some(max) = cycles.iter().map(|c| c.holding_days).max() {
                assert_eq!(max, s.actual_max_holding_days);
            }
            for c in cycles {
                assert!(i64::from(c.buy_count) <= c.params.max_holding_days);
                assert!(c.end_date >= c.start_date);
            }
        }
    }

    #[test]
    fn rejected_tuples_do_not_stop_the_sweep() {
        let panel = synthetic_panel(100);
        let space = ParamSpace {
            max_holding_days: vec![0, 10],
            profit_targets: vec![-0.05, 0.05],
            ..sweep_space()
        };
        let grid = ParameterGrid::build(&space, &panel, CutoffMode::FullSample);
        let outcome = run_sweep(&panel, &grid, &EngineOptions::default()).unwrap();

        assert_eq!(outcome.rejected.len() + outcome.summaries.len(), space.len());
        assert_eq!(outcome.summaries.len(), 3 * 2);
        assert!(outcome
            .summaries
            .iter()
            .all(|s| s.params.max_holding_days == 10 && s.params.profit_target > 0.0));
        assert!(outcome.rejected.iter().all(|r| !r.reason.is_empty()));
    }

    #[test]
    fn best_tuple_replays_to_the_same_summary() {
        let panel = synthetic_panel(250);
        let grid = ParameterGrid::build(&sweep_space(), &panel, CutoffMode::FullSample);
        let outcome = run_sweep(&panel, &grid, &EngineOptions::default()).unwrap();
        let best = outcome.ranked_by_seed_multiple()[0];
        assert!(outcome
            .summaries
            .iter()
            .all(|s| s.seed_multiple <= best.seed_multiple));

        let single = replay(&panel, grid.get(best.param_index).unwrap(), &EngineOptions::default()).unwrap();
        assert_eq!(&single.summary, best);
        assert_eq!(outcome.summary_for(best.param_index), Some(best));
    }
}

mod missing_rows {
    use super::*;

    fn gappy_panel() -> Panel {
        Panel::new(vec![
            flat_row("AAA", 0, 100.0, 0.9),
            flat_row("AAA", 1, 106.0, 0.1),
            flat_row("BBB", 2, 50.0, 0.1),
            flat_row("AAA", 3, 106.0, 0.1),
        ])
        .unwrap()
    }

    #[test]
    fn skip_policy_holds_through_the_gap() {
        let outcome = replay(
            &gappy_panel(),
            &fixed(make_params(0.5, 0.10, 40, -0.10), 0.5),
            &EngineOptions::default(),
        )
        .unwrap();
        assert!(outcome.cycles.is_empty());
        assert_eq!(outcome.summary.skipped_days, 1);
        assert!(outcome.summary.open_position);
        // equity on the gap day is marked at the last known close
        assert_relative_eq!(outcome.equity_curve[2].equity, outcome.equity_curve[1].equity);
    }

    #[test]
    fn liquidate_policy_sells_at_last_close() {
        let mut params = make_params(0.5, 0.10, 40, -0.10);
        params.rules.missing_row = MissingRowPolicy::Liquidate;
        let outcome = replay(&gappy_panel(), &fixed(params, 0.5), &EngineOptions::default()).unwrap();
        assert_eq!(outcome.cycles.len(), 1);
        let cycle = &outcome.cycles[0];
        assert_eq!(cycle.exit_type, ExitType::Liquidation);
        assert_eq!(cycle.end_date, day(2));
        assert_relative_eq!(cycle.proceeds, 10_000.0 * 106.0, max_relative = 1e-12);
        assert_eq!(outcome.summary.cycle_count, 1);
        assert_eq!(outcome.summary.liquidation_exits, 1);
    }
}

mod cutoffs {
    use super::*;

    #[test]
    fn expanding_cutoff_ignores_future_scores() {
        // day 0's only score is modest; every later score is far higher
        let mut rows = vec![flat_row("AAA", 0, 100.0, 0.3)];
        for n in 1..10 {
            rows.push(flat_row("AAA", n, 106.0, 5.0));
        }
        let panel = Panel::new(rows).unwrap();
        let params = make_params(0.5, 0.10, 40, -0.10);

        let full = ParameterGrid::from_params(vec![params], &panel, CutoffMode::FullSample);
        let expanding = ParameterGrid::from_params(vec![params], &panel, CutoffMode::Expanding);

        let full_run = replay(&panel, &full.tuples[0], &EngineOptions::default()).unwrap();
        let expanding_run = replay(&panel, &expanding.tuples[0], &EngineOptions::default()).unwrap();

        // full sample: the cutoff is 5.0, so day 0 is idle and entry waits for day 1
        assert_eq!(full_run.summary.idle_days, 1);
        assert_relative_eq!(full_run.summary.ev_cutoff, 5.0);
        // expanding: day 0 only sees its own score
        assert_eq!(expanding_run.summary.idle_days, 0);
    }
}

mod panel_source {
    use super::*;

    #[test]
    fn mock_source_feeds_the_engine() {
        let mut rows = flat_series("BBB", 5, 50.0, 0.9);
        rows.extend(flat_series("AAA", 5, 100.0, 0.8));
        let source = MockPanelSource::new(rows);
        let panel = Panel::from_unsorted(source.load_rows().unwrap()).unwrap();
        assert_eq!(panel.day_count(), 5);
        assert_eq!(panel.tickers(), vec!["AAA", "BBB"]);

        let grid = single_tuple_grid(&panel, make_params(0.5, 0.10, 40, -0.10));
        let outcome = run_sweep(&panel, &grid, &EngineOptions::default()).unwrap();
        assert_eq!(outcome.summaries.len(), 1);
    }

    #[test]
    fn source_errors_surface() {
        let err = MockPanelSource::failing("disk on fire").load_rows().unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn unsorted_rows_without_sorting_are_rejected() {
        let rows = vec![flat_row("AAA", 1, 100.0, 0.5), flat_row("AAA", 0, 100.0, 0.5)];
        assert!(Panel::new(rows.clone()).is_err());
        assert!(Panel::from_unsorted(rows).is_ok());
    }

    #[test]
    fn resolved_helper_uses_panel_quantile() {
        let panel = Panel::new(flat_series("AAA", 4, 100.0, 0.5)).unwrap();
        let tuple = resolved(&panel, make_params(0.9, 0.10, 40, -0.10));
        assert_relative_eq!(tuple.cutoff.at(0), 0.5);
    }
}
