mod common;

use std::time::{Duration, Instant};

use common::*;
use interpath_engine::options::{InterpolationOptions, InterpolationStrategy, OrderingStrategy};
use interpath_engine::program::BlockFormulas;
use interpath_engine::trace::verify_interpolants;
use interpath_engine::{CounterexampleTraceAnalyzer, CounterexampleTraceResult, RefinementError};
use interpath_smt::backends::bounded::BoundedSolverFactory;
use interpath_smt::solver::ModelValue;
use interpath_smt::terms::SmtTerm;

fn analyzer(
    factory: FakeFactory,
    options: InterpolationOptions,
) -> CounterexampleTraceAnalyzer<FakeFactory> {
    CounterexampleTraceAnalyzer::new(factory, options)
}

#[test]
fn single_block_requests_no_interpolants() -> TestResult {
    let factory = FakeFactory::default();
    let mut analyzer = analyzer(factory.clone(), InterpolationOptions::default());

    let feasible =
        analyzer.build_counterexample_trace(&BlockFormulas::new(vec![x(0).eq(SmtTerm::int(0))]), None)?;
    assert_eq!(feasible.model().get_int("x@0"), Some(0));

    let infeasible =
        analyzer.build_counterexample_trace(&BlockFormulas::new(vec![SmtTerm::bool(false)]), None)?;
    assert!(infeasible.interpolants().is_empty());
    assert_eq!(factory.counters.interpolation_calls(), 0);
    Ok(())
}

#[test]
fn two_contradicting_blocks_yield_separating_interpolant() -> TestResult {
    let x = || SmtTerm::var("x");
    let formulas = vec![x().eq(SmtTerm::int(0)), x().eq(SmtTerm::int(1))];
    let factory = FakeFactory::default();
    let mut analyzer = analyzer(factory.clone(), InterpolationOptions::default());

    let result = analyzer.build_counterexample_trace(&BlockFormulas::new(formulas.clone()), None)?;
    let itps = result.interpolants();
    assert_eq!(itps.len(), 1);
    verify_interpolants(&BoundedSolverFactory::default(), &formulas, itps)?;
    assert_eq!(Counters::get(&factory.counters.interpolant_calls), 1);
    Ok(())
}

#[test]
fn every_ordering_and_strategy_yields_valid_interpolants() -> TestResult {
    let formulas = counting_trace(4);
    for ordering in OrderingStrategy::ALL {
        for strategy in InterpolationStrategy::ALL {
            let factory = FakeFactory::new(FakeBehaviour {
                tree_support: true,
                ..FakeBehaviour::default()
            });
            let options = InterpolationOptions {
                ordering,
                strategy,
                verify_interpolants: true,
                random_seed: 11,
                ..InterpolationOptions::default()
            };
            let result = analyzer(factory, options)
                .build_counterexample_trace(&BlockFormulas::new(formulas.clone()), None)
                .map_err(|e| format!("{ordering}/{strategy}: {e}"))?;
            assert_eq!(result.interpolants().len(), 3, "{ordering}/{strategy}");
        }
    }
    Ok(())
}

#[test]
fn sequential_native_issues_one_query() -> TestResult {
    let factory = FakeFactory::default();
    let options = InterpolationOptions {
        strategy: InterpolationStrategy::SequentialNative,
        ..InterpolationOptions::default()
    };
    let result = analyzer(factory.clone(), options)
        .build_counterexample_trace(&BlockFormulas::new(counting_trace(4)), None)?;
    assert_eq!(result.interpolants().len(), 3);
    assert_eq!(Counters::get(&factory.counters.sequence_calls), 1);
    assert_eq!(Counters::get(&factory.counters.interpolant_calls), 0);
    Ok(())
}

#[test]
fn slow_solver_hits_time_limit() {
    let factory = FakeFactory::new(FakeBehaviour {
        check_delay: Some(Duration::from_secs(5)),
        ..FakeBehaviour::default()
    });
    let options = InterpolationOptions {
        time_limit_ms: 50,
        ..InterpolationOptions::default()
    };
    let mut analyzer = analyzer(factory, options);

    let started = Instant::now();
    let result = analyzer.build_counterexample_trace(&BlockFormulas::new(counting_trace(3)), None);
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(RefinementError::Timeout { .. })), "{result:?}");
    assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");
}

#[test]
fn fallback_check_shares_the_time_limit() {
    let formulas = counting_trace(3);
    let factory = FakeFactory::new(FakeBehaviour {
        check_delay: Some(Duration::from_millis(150)),
        fail_when_bottom: Some(formulas[0].clone()),
        ..FakeBehaviour::default()
    });
    let options = InterpolationOptions {
        time_limit_ms: 200,
        retry_on_failure: false,
        fallback_without_interpolation: true,
        ..InterpolationOptions::default()
    };
    let mut analyzer = analyzer(factory, options);

    let started = Instant::now();
    let result = analyzer.build_counterexample_trace(&BlockFormulas::new(formulas), None);
    let elapsed = started.elapsed();

    assert!(
        matches!(result, Err(RefinementError::Timeout { limit }) if limit == Duration::from_millis(200)),
        "{result:?}"
    );
    assert!(elapsed < Duration::from_millis(280), "took {elapsed:?}");
}

#[test]
fn retry_turning_unsat_into_sat_is_an_invariant_violation() {
    let formulas = counting_trace(4);
    let factory = FakeFactory::new(FakeBehaviour {
        fail_when_bottom: Some(formulas[0].clone()),
        sat_when_bottom: Some(formulas[3].clone()),
        ..FakeBehaviour::default()
    });
    let options = InterpolationOptions {
        retry_on_failure: true,
        fallback_without_interpolation: true,
        ..InterpolationOptions::default()
    };
    let err = analyzer(factory.clone(), options)
        .build_counterexample_trace(&BlockFormulas::new(formulas), None)
        .expect_err("reordering must not flip the verdict");
    assert!(matches!(err, RefinementError::InvariantViolation(_)), "{err}");
    // First attempt and reversed retry only: no fallback session.
    assert_eq!(Counters::get(&factory.counters.sessions), 2);
}

#[test]
fn failed_interpolation_is_retried_in_reverse_order() -> TestResult {
    let formulas = counting_trace(4);
    let factory = FakeFactory::new(FakeBehaviour {
        fail_when_bottom: Some(formulas[0].clone()),
        ..FakeBehaviour::default()
    });
    let options = InterpolationOptions {
        retry_on_failure: true,
        fallback_without_interpolation: false,
        ..InterpolationOptions::default()
    };

    let result = analyzer(factory.clone(), options)
        .build_counterexample_trace(&BlockFormulas::new(formulas.clone()), None)?;
    let itps = result.interpolants();
    assert_eq!(itps.len(), 3);
    verify_interpolants(&BoundedSolverFactory::default(), &formulas, itps)?;
    // The retry runs on a fresh session and pushes the last block first.
    assert_eq!(Counters::get(&factory.counters.sessions), 2);
    let pushed = factory.pushed();
    assert_eq!(pushed[formulas.len()], formulas[3].to_string());
    Ok(())
}

#[test]
fn failed_interpolation_without_retry_falls_back_to_refinement_failure() {
    let formulas = counting_trace(4);
    let factory = FakeFactory::new(FakeBehaviour {
        fail_when_bottom: Some(formulas[0].clone()),
        ..FakeBehaviour::default()
    });
    let options = InterpolationOptions {
        retry_on_failure: false,
        fallback_without_interpolation: true,
        ..InterpolationOptions::default()
    };
    let err = analyzer(factory, options)
        .build_counterexample_trace(&BlockFormulas::new(formulas), None)
        .expect_err("infeasible trace without interpolants cannot be refined");
    let RefinementError::RefinementFailed { cause } = err else {
        panic!("expected a refinement failure, got {err}");
    };
    assert!(cause.is_solver_failure());
}

#[test]
fn failed_fallback_does_not_affect_later_feasible_checks() -> TestResult {
    let formulas = vec![x(0).eq(SmtTerm::int(0)), SmtTerm::bool(false)];
    let factory = FakeFactory::new(FakeBehaviour {
        fail_when_bottom: Some(formulas[0].clone()),
        ..FakeBehaviour::default()
    });
    let options = InterpolationOptions {
        retry_on_failure: false,
        ..InterpolationOptions::default()
    };
    let mut analyzer = analyzer(factory, options);
    let err = analyzer
        .build_counterexample_trace(&BlockFormulas::new(formulas), None)
        .expect_err("interpolation fails and the trace is infeasible");
    assert!(matches!(err, RefinementError::RefinementFailed { .. }));

    let sat = analyzer.build_counterexample_trace(
        &BlockFormulas::new(vec![x(0).eq(SmtTerm::int(0)), x(1).eq(SmtTerm::int(2))]),
        None,
    )?;
    assert_eq!(sat.model().get_int("x@1"), Some(2));
    Ok(())
}

#[test]
fn tree_strategy_without_backend_support_is_a_solver_error() {
    let options = InterpolationOptions {
        strategy: InterpolationStrategy::Tree,
        retry_on_failure: false,
        fallback_without_interpolation: false,
        ..InterpolationOptions::default()
    };
    let err = analyzer(FakeFactory::default(), options)
        .build_counterexample_trace(&BlockFormulas::new(counting_trace(3)), None)
        .expect_err("backend has no tree interpolation");
    assert!(err.is_solver_failure(), "{err}");
}

#[test]
fn reused_session_pushes_only_the_changed_suffix() -> TestResult {
    let factory = FakeFactory::default();
    let options = InterpolationOptions {
        reuse_session: true,
        ..InterpolationOptions::default()
    };
    let mut analyzer = analyzer(factory.clone(), options);

    let first = counting_trace(5);
    analyzer.build_counterexample_trace(&BlockFormulas::new(first.clone()), None)?;
    assert_eq!(Counters::get(&factory.counters.pushes), 5);

    let mut second = first.clone();
    second[3] = x(3).gt(SmtTerm::int(7));
    second[4] = x(3).eq(SmtTerm::int(2));
    analyzer.build_counterexample_trace(&BlockFormulas::new(second), None)?;

    // Three blocks are shared, two are replaced.
    assert_eq!(Counters::get(&factory.counters.pushes), 5 + 2);
    assert_eq!(Counters::get(&factory.counters.pops), 2);
    assert_eq!(Counters::get(&factory.counters.sessions), 1);
    Ok(())
}

#[test]
fn without_reuse_every_call_opens_a_session() -> TestResult {
    let factory = FakeFactory::default();
    let mut analyzer = analyzer(factory.clone(), InterpolationOptions::default());
    for _ in 0..3 {
        analyzer.build_counterexample_trace(&BlockFormulas::new(counting_trace(3)), None)?;
    }
    assert_eq!(Counters::get(&factory.counters.sessions), 3);
    assert_eq!(Counters::get(&factory.counters.pops), 0);
    Ok(())
}

#[test]
fn incremental_check_stops_checking_once_unsat() -> TestResult {
    let factory = FakeFactory::default();
    let options = InterpolationOptions {
        incremental_check: true,
        ..InterpolationOptions::default()
    };
    let mut formulas = vec![SmtTerm::bool(false)];
    formulas.extend(counting_trace(3));
    let result = analyzer(factory.clone(), options)
        .build_counterexample_trace(&BlockFormulas::new(formulas), None)?;
    assert_eq!(result.interpolants().len(), 3);
    assert_eq!(Counters::get(&factory.counters.checks), 1);
    Ok(())
}

#[test]
fn without_interpolation_reports_verdict_only() -> TestResult {
    let factory = FakeFactory::default();
    let mut analyzer = analyzer(factory.clone(), InterpolationOptions::default());
    let result =
        analyzer.build_counterexample_trace_without_interpolation(&BlockFormulas::new(counting_trace(4)), None)?;
    assert_eq!(
        result,
        CounterexampleTraceResult::Infeasible {
            interpolants: Vec::new()
        }
    );
    assert_eq!(factory.counters.interpolation_calls(), 0);
    Ok(())
}

#[test]
fn dump_template_writes_one_script_per_check() -> TestResult {
    let dir = tempfile::tempdir()?;
    let options = InterpolationOptions {
        dump_path_template: Some(dir.path().join("trace-%d.smt2").display().to_string()),
        ..InterpolationOptions::default()
    };
    let mut analyzer = analyzer(FakeFactory::default(), options);
    analyzer.build_counterexample_trace(&BlockFormulas::new(counting_trace(3)), None)?;
    analyzer.build_counterexample_trace(&BlockFormulas::new(counting_trace(4)), None)?;

    let mut names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["trace-0000.smt2", "trace-0001.smt2"]);
    let script = std::fs::read_to_string(dir.path().join("trace-0001.smt2"))?;
    assert!(script.contains(":named IP_3"));
    Ok(())
}

#[test]
fn options_round_trip_through_json() -> TestResult {
    let options = InterpolationOptions {
        ordering: OrderingStrategy::LoopFreeFirstBackwards,
        strategy: InterpolationStrategy::TreeWellScoped,
        time_limit_ms: 1500,
        ..InterpolationOptions::default()
    };
    let json = serde_json::to_string(&options)?;
    assert!(json.contains("\"loop-free-first-backwards\""));
    assert!(json.contains("\"tree-well-scoped\""));
    assert!(json.contains("\"time-limit-ms\":1500"));
    let parsed: InterpolationOptions = serde_json::from_str(&json)?;
    assert_eq!(parsed, options);

    let partial: InterpolationOptions = serde_json::from_str(r#"{"ordering":"zigzag"}"#)?;
    assert_eq!(partial.ordering, OrderingStrategy::ZigZag);
    assert!(partial.retry_on_failure);
    Ok(())
}

#[test]
fn feasible_result_carries_branch_decisions() -> TestResult {
    use interpath_engine::program::BranchPointId;
    use std::collections::BTreeMap;

    let blocks = BlockFormulas::new(vec![
        x(0).eq(SmtTerm::int(3)),
        x(1).eq(x(0).sub(SmtTerm::int(1))),
    ])
    .with_branching(BTreeMap::from([(BranchPointId(4), x(1).ge(SmtTerm::int(5)))]));
    let result = analyzer(FakeFactory::default(), InterpolationOptions::default())
        .build_counterexample_trace(&blocks, None)?;
    let CounterexampleTraceResult::Feasible { model, branching, formulas, precise_path } = result else {
        panic!("trace should be feasible");
    };
    assert_eq!(model.values.get("x@1"), Some(&ModelValue::Int(2)));
    assert_eq!(branching.get(&BranchPointId(4)), Some(&false));
    assert_eq!(formulas, blocks);
    assert!(precise_path.is_none());
    Ok(())
}
