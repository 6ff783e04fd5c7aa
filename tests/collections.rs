use bids_variables::data::filter::entity_filter;
use bids_variables::data::loader::{load_collection, load_table};
use bids_variables::data::writer::{save_collection, write_table};
use bids_variables::sample::{merged_collection, run_collections, SampleSpec, VARIABLE_NAMES};
use bids_variables::{
    merge_collections, DenseRunVariable, Event, ExportOptions, Interpolation, MatchType,
    ResampleOptions, RunVariableCollection, SparseRunVariable, TableFormat, Value, Variable,
    VariableError,
};
use proptest::prelude::*;
use rstest::{fixture, rstest};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Three subjects with three one-minute runs each.
#[fixture]
fn spec() -> SampleSpec {
    SampleSpec {
        n_subjects: 3,
        n_runs: 3,
        scan_length: 60.0,
        ..SampleSpec::default()
    }
}

#[fixture]
fn run_coll(spec: SampleSpec) -> RunVariableCollection {
    merged_collection(&spec).unwrap()
}

#[fixture]
fn run_coll_list(spec: SampleSpec) -> Vec<RunVariableCollection> {
    run_collections(&spec).unwrap()
}

/// A dense variable covering the same runs as `coll`.
fn dense_like(coll: &RunVariableCollection, name: &str, rate: f64) -> DenseRunVariable {
    let runs = coll["RT"].run_info().to_vec();
    let n: usize = runs.iter().map(|r| r.n_samples(rate)).sum();
    DenseRunVariable::new(name, "regressors", vec![1.0; n], rate, runs).unwrap()
}

fn column_names(table: &bids_variables::Table) -> Vec<String> {
    table.column_names().map(str::to_string).collect()
}

// ---------------------------------------------------------------------------
// Construction and accessors
// ---------------------------------------------------------------------------

#[rstest]
fn collection_init(run_coll: RunVariableCollection) {
    assert_eq!(run_coll.len(), VARIABLE_NAMES.len());
    assert_eq!(run_coll.names().collect::<Vec<_>>(), VARIABLE_NAMES);
    assert_eq!(run_coll.sampling_rate().unwrap(), 10.0);
    assert!(run_coll.all_sparse());

    let gain = run_coll["gain"].as_sparse().unwrap();
    assert_eq!(gain.run_info().len(), 9);
    assert_eq!(gain.source(), "events");
}

#[rstest]
fn sparse_dense_accessors(mut run_coll: RunVariableCollection) {
    assert_eq!(run_coll.get_sparse_variables().len(), 8);
    assert!(run_coll.get_dense_variables().is_empty());

    let dense = run_coll["RT"].to_dense(1.0).unwrap();
    run_coll.insert(dense);
    assert_eq!(run_coll.get_sparse_variables().len(), 7);
    assert_eq!(run_coll.get_dense_variables().len(), 1);
    assert!(!run_coll.all_sparse());
    assert!(!run_coll.all_dense());
    assert_eq!(run_coll.sampling_rate().unwrap(), 1.0);
}

// ---------------------------------------------------------------------------
// Sampling-rate resolution
// ---------------------------------------------------------------------------

#[rstest]
#[case::tr("TR", Some(0.5))]
#[case::number("20", Some(20.0))]
#[case::highest_without_dense("highest", None)]
#[case::highest_any_case("HIGHEST", None)]
#[case::sparse_variable("RT", Some(0.5))]
fn get_sampling_rate_tokens(
    run_coll: RunVariableCollection,
    #[case] token: &str,
    #[case] expected: Option<f64>,
) {
    assert_eq!(run_coll.get_sampling_rate(token).unwrap(), expected);
}

#[rstest]
fn get_sampling_rate_explicit_and_default(run_coll: RunVariableCollection) {
    assert_eq!(run_coll.get_sampling_rate(20.0).unwrap(), Some(20.0));
    assert_eq!(run_coll.get_sampling_rate(None::<f64>).unwrap(), Some(10.0));
}

#[rstest]
fn get_sampling_rate_unknown_token(run_coll: RunVariableCollection) {
    let err = run_coll.get_sampling_rate("BLARGH").unwrap_err();
    assert!(matches!(err, VariableError::InvalidSpecification(ref s) if s == "BLARGH"));
}

#[rstest]
fn get_sampling_rate_tr_must_be_unique(mut run_coll: RunVariableCollection) {
    let rt = run_coll.get_mut("RT").unwrap().as_sparse_mut().unwrap();
    rt.run_info_mut()[0].sampling_rate = 0.25;
    let err = run_coll.get_sampling_rate("TR").unwrap_err();
    assert!(matches!(err, VariableError::NonUniqueRate { .. }));
}

#[rstest]
fn get_sampling_rate_highest_dense(mut run_coll: RunVariableCollection) {
    assert_eq!(run_coll.get_sampling_rate("highest").unwrap(), None);
    let slow = dense_like(&run_coll, "slow", 2.0);
    let fast = dense_like(&run_coll, "fast", 12.0);
    run_coll.insert(slow);
    run_coll.insert(fast);
    assert_eq!(run_coll.get_sampling_rate("highest").unwrap(), Some(12.0));
    assert_eq!(run_coll.get_sampling_rate("slow").unwrap(), Some(2.0));
    // Two dense rates and no explicit one.
    assert!(matches!(
        run_coll.sampling_rate(),
        Err(VariableError::NonUniqueRate { .. })
    ));
}

// ---------------------------------------------------------------------------
// Name matching
// ---------------------------------------------------------------------------

#[rstest]
fn match_variables(run_coll: RunVariableCollection) {
    let names = run_coll.match_variable_names("^.{1,2}a", MatchType::Regex).unwrap();
    assert_eq!(names, ["gain", "parametric gain"]);

    let names = run_coll.match_variable_names("re.*", MatchType::Regex).unwrap();
    assert_eq!(names, ["respcat", "respnum"]);

    // Glob must match the whole name.
    assert!(run_coll.match_variable_names("re", MatchType::Glob).unwrap().is_empty());
    let names = run_coll.match_variable_names("*gain", MatchType::Glob).unwrap();
    assert_eq!(names, ["gain", "parametric gain"]);

    let vars = run_coll.match_variables("?T*", MatchType::Glob).unwrap();
    assert_eq!(vars.len(), 2);
    assert!(vars.iter().all(|v| v.is_sparse()));
}

#[rstest]
fn bad_regex_is_an_error(run_coll: RunVariableCollection) {
    let err = run_coll.match_variables("(", MatchType::Regex).unwrap_err();
    assert!(matches!(err, VariableError::Pattern(_)));
}

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

#[rstest]
fn resample_sparse_needs_force_dense(run_coll: RunVariableCollection) {
    let resampled = run_coll.resample(&ResampleOptions::new()).unwrap();
    assert!(resampled.is_empty());
}

#[rstest]
fn resample_force_dense(run_coll: RunVariableCollection) {
    let resampled = run_coll
        .resample(&ResampleOptions::new().force_dense(true))
        .unwrap();
    // trial_type is categorical and stays behind.
    assert_eq!(resampled.len(), 7);
    assert!(resampled.get("trial_type").is_none());
    assert!(resampled.all_dense());
    // 9 runs * 60 s * 10 Hz
    for var in resampled.get_dense_variables() {
        assert_eq!(var.values().len(), 5400);
        assert_eq!(var.sampling_rate(), 10.0);
    }
}

#[rstest]
fn resample_in_place(mut run_coll: RunVariableCollection) {
    run_coll
        .resample_in_place(&ResampleOptions::new().sampling_rate("TR").force_dense(true))
        .unwrap();
    assert_eq!(run_coll.len(), 8);
    assert_eq!(run_coll.get_dense_variables().len(), 7);
    assert!(run_coll["trial_type"].is_sparse());
    assert_eq!(run_coll.sampling_rate().unwrap(), 0.5);
    assert_eq!(run_coll["gain"].n_rows(), 270);
}

#[rstest]
fn resample_mixed_keeps_only_dense(mut run_coll: RunVariableCollection) {
    let fast = dense_like(&run_coll, "fast", 12.0);
    run_coll.insert(fast);
    let resampled = run_coll
        .resample(&ResampleOptions::new().sampling_rate(2.0))
        .unwrap();
    assert_eq!(resampled.names().collect::<Vec<_>>(), ["fast"]);
    let fast = resampled["fast"].as_dense().unwrap();
    assert_eq!(fast.sampling_rate(), 2.0);
    // 9 runs * 60 s * 2 Hz
    assert_eq!(fast.values().len(), 1080);
    assert!(fast.values().iter().all(|v| (v - 1.0).abs() < 1e-9));
}

#[rstest]
#[case::nearest(Interpolation::Nearest, [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0])]
#[case::previous(Interpolation::Previous, [0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0])]
fn resample_kind_is_honoured(#[case] kind: Interpolation, #[case] expected: [f64; 8]) {
    let run = run_collections(&SampleSpec {
        n_subjects: 1,
        n_runs: 1,
        scan_length: 4.0,
        ..SampleSpec::default()
    })
    .unwrap()[0]["RT"]
        .run_info()
        .to_vec();
    let ramp = DenseRunVariable::new("ramp", "physio", vec![0.0, 1.0, 2.0, 3.0], 1.0, run).unwrap();
    let coll = RunVariableCollection::new([ramp.into()]);

    let out = coll
        .resample(&ResampleOptions::new().sampling_rate(2.0).kind(kind))
        .unwrap();
    assert_eq!(out["ramp"].as_dense().unwrap().values(), expected);

    let linear = coll
        .resample(&ResampleOptions::new().sampling_rate(2.0))
        .unwrap();
    assert!((linear["ramp"].as_dense().unwrap().values()[1] - 3.0 / 7.0).abs() < 1e-12);
}

#[rstest]
fn failed_resample_in_place_leaves_collection_untouched(mut run_coll: RunVariableCollection) {
    let before = run_coll.clone();
    let err = run_coll
        .resample_in_place(&ResampleOptions::new().sampling_rate("highest").force_dense(true))
        .unwrap_err();
    assert!(matches!(err, VariableError::RateUnavailable));
    assert_eq!(run_coll, before);
    assert_eq!(run_coll.sampling_rate().unwrap(), 10.0);
}

#[rstest]
fn clone_is_independent(run_coll: RunVariableCollection) {
    let mut copy = run_coll.clone();
    copy.resample_in_place(&ResampleOptions::new().sampling_rate("TR").force_dense(true))
        .unwrap();
    copy.get_mut("trial_type")
        .unwrap()
        .as_sparse_mut()
        .unwrap()
        .run_info_mut()[0]
        .sampling_rate = 0.25;
    copy.remove("PTval");

    assert!(run_coll.all_sparse());
    assert_eq!(run_coll.len(), 8);
    assert_eq!(run_coll.sampling_rate().unwrap(), 10.0);
    assert_eq!(run_coll.get_sampling_rate("TR").unwrap(), Some(0.5));
    assert_eq!(run_coll["trial_type"].run_info()[0].sampling_rate, 0.5);
}

#[rstest]
fn resample_unknown_variable(run_coll: RunVariableCollection) {
    let err = run_coll
        .resample(&ResampleOptions::new().variables(["gain", "nope"]))
        .unwrap_err();
    assert!(matches!(err, VariableError::UnknownVariable(ref n) if n == "nope"));
}

#[rstest]
fn resample_highest_without_dense(run_coll: RunVariableCollection) {
    let err = run_coll
        .resample(&ResampleOptions::new().sampling_rate("highest").force_dense(true))
        .unwrap_err();
    assert!(matches!(err, VariableError::RateUnavailable));
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[rstest]
fn to_df_sparse(run_coll: RunVariableCollection) {
    let n_events = run_coll["gain"].n_rows();

    let wide = run_coll.to_df(&ExportOptions::new()).unwrap();
    assert_eq!(wide.shape(), (n_events, 15));
    let mut expected = vec!["onset", "duration", "datatype", "run", "subject", "suffix", "task"];
    expected.extend(VARIABLE_NAMES);
    assert_eq!(column_names(&wide), expected);

    let long = run_coll
        .to_df(&ExportOptions::new().format(TableFormat::Long))
        .unwrap();
    assert_eq!(long.shape(), (n_events * 8, 9));
    assert_eq!(
        column_names(&long),
        [
            "onset",
            "duration",
            "condition",
            "amplitude",
            "datatype",
            "run",
            "subject",
            "suffix",
            "task"
        ]
    );
}

#[rstest]
fn to_df_dense(run_coll: RunVariableCollection) {
    let opts = ExportOptions::new().sparse(false).sampling_rate("TR");

    let wide = run_coll.to_df(&opts).unwrap();
    // 9 runs * 30 volumes
    assert_eq!(wide.shape(), (270, 18));
    let names = column_names(&wide);
    for meta in ["TaskName", "RepetitionTime", "SliceTiming", "extension"] {
        assert!(names.iter().any(|n| n == meta), "missing {meta}");
    }
    assert!(!names.iter().any(|n| n == "trial_type"));
    assert_eq!(wide.column("duration").unwrap()[0], Value::Float(2.0));

    let long = run_coll.to_df(&opts.format(TableFormat::Long)).unwrap();
    assert_eq!(long.shape(), (270 * 7, 13));
}

#[rstest]
fn to_df_variable_selection(run_coll: RunVariableCollection) {
    let table = run_coll
        .to_df(&ExportOptions::new().variables(["RT", "gain"]))
        .unwrap();
    assert_eq!(table.n_cols(), 9);
    assert!(run_coll
        .to_df(&ExportOptions::new().include_sparse(false))
        .unwrap()
        .is_empty());
    assert!(matches!(
        run_coll.to_df(&ExportOptions::new().include_sparse(false).include_dense(false)),
        Err(VariableError::NothingToExport)
    ));
}

// ---------------------------------------------------------------------------
// Merging and entities
// ---------------------------------------------------------------------------

#[rstest]
fn merge_collections_matches_direct_build(
    run_coll: RunVariableCollection,
    run_coll_list: Vec<RunVariableCollection>,
) {
    assert_eq!(run_coll_list.len(), 9);
    let merged = merge_collections(run_coll_list).unwrap();
    assert_eq!(merged.names().collect::<Vec<_>>(), VARIABLE_NAMES);

    let keys = ["subject", "run", "onset"];
    let opts = ExportOptions::new();
    let df1 = run_coll.to_df(&opts).unwrap().sort_by(&keys);
    let df2 = merged.to_df(&opts).unwrap().sort_by(&keys);
    assert_eq!(df1, df2);
    assert_eq!(merged, run_coll);
}

#[rstest]
fn merged_entities_narrow(run_coll_list: Vec<RunVariableCollection>) {
    let first = &run_coll_list[0].entities();
    assert_eq!(first["subject"], "01");
    assert_eq!(first["run"], "1");

    let sub01 = merge_collections(run_coll_list[..3].iter().cloned()).unwrap();
    let ents = sub01.entities();
    assert_eq!(ents["subject"], "01");
    assert_eq!(ents["task"], "mixedgamblestask");
    assert!(!ents.contains_key("run"));

    let sub02 = merge_collections(run_coll_list[3..6].iter().cloned()).unwrap();
    assert_eq!(sub02.entities()["subject"], "02");

    let all = merge_collections(run_coll_list).unwrap();
    assert!(!all.entities().contains_key("subject"));
}

#[rstest]
fn merge_rejects_mixed_representations(run_coll_list: Vec<RunVariableCollection>) {
    let mut second = run_coll_list[1].clone();
    let dense = second["RT"].to_dense(1.0).unwrap();
    second.insert(dense);
    let err = merge_collections([run_coll_list[0].clone(), second]).unwrap_err();
    assert!(matches!(err, VariableError::MixedKinds { ref name } if name == "RT"));
}

#[rstest]
fn filter_and_split_runs(run_coll: RunVariableCollection) {
    let sub02 = run_coll.filter_runs(&entity_filter([("subject", "02")]));
    assert_eq!(sub02["gain"].run_info().len(), 3);
    assert_eq!(sub02.entities()["subject"], "02");

    let none = run_coll.filter_runs(&entity_filter([("subject", "99")]));
    assert!(none.is_empty());

    let split = run_coll.split_by_run();
    assert_eq!(split.len(), 9);
    assert_eq!(merge_collections(split).unwrap(), run_coll);
}

#[rstest]
fn filter_keeps_event_runs_consistent(run_coll: RunVariableCollection) {
    let run2 = run_coll.filter_runs(&entity_filter([("run", "2")]));
    let gain = run2["gain"].as_sparse().unwrap();
    assert_eq!(gain.run_info().len(), 3);
    assert!(gain.events().iter().all(|ev| ev.run < 3));
    assert!(matches!(&run2["gain"], Variable::Sparse(_)));
}

// ---------------------------------------------------------------------------
// I/O
// ---------------------------------------------------------------------------

#[rstest]
fn parquet_round_trip(run_coll: RunVariableCollection) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.parquet");
    let table = run_coll.to_df(&ExportOptions::new()).unwrap();
    write_table(&table, &path).unwrap();
    let loaded = load_table(&path).unwrap();
    assert_eq!(loaded, table);
}

#[rstest]
fn csv_and_json_keep_shape(run_coll: RunVariableCollection) {
    let dir = tempfile::tempdir().unwrap();
    let table = run_coll
        .to_df(&ExportOptions::new().format(TableFormat::Long))
        .unwrap();
    for name in ["events.csv", "events.json"] {
        let path = dir.path().join(name);
        write_table(&table, &path).unwrap();
        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded.shape(), table.shape(), "{name}");
        assert_eq!(column_names(&loaded), column_names(&table), "{name}");
        // Zero-padded labels are identifiers and come back as text.
        assert_eq!(loaded.column("subject").unwrap()[0], Value::String("01".into()), "{name}");
    }
}

#[rstest]
fn collection_json_round_trip(run_coll: RunVariableCollection) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.json");
    save_collection(&run_coll, &path).unwrap();
    let loaded = load_collection(&path).unwrap();
    assert_eq!(loaded.names().collect::<Vec<_>>(), VARIABLE_NAMES);
    assert_eq!(loaded["gain"], run_coll["gain"]);
    assert_eq!(loaded["trial_type"], run_coll["trial_type"]);
}

#[rstest]
fn collection_json_keeps_missing_dense_samples(run_coll: RunVariableCollection) {
    let runs = run_coll["RT"].run_info()[..1].to_vec();
    let rating = SparseRunVariable::new(
        "rating",
        "events",
        vec![Event::new(0.0, 1.0, Value::Null, 0), Event::new(2.0, 1.0, 3_i64, 0)],
        runs,
    )
    .unwrap();
    let coll = RunVariableCollection::new([rating.to_dense(1.0).unwrap().into()]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dense.json");
    save_collection(&coll, &path).unwrap();
    let loaded = load_collection(&path).unwrap();

    let values = loaded["rating"].as_dense().unwrap().values();
    assert_eq!(values.len(), 60);
    assert!(values[0].is_nan());
    assert_eq!(&values[1..4], [0.0, 3.0, 0.0]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn dense_resample_length_follows_runs(rate in 0.5f64..40.0) {
        let coll = merged_collection(&SampleSpec {
            n_subjects: 1,
            n_runs: 2,
            scan_length: 20.0,
            ..SampleSpec::default()
        })
        .unwrap();
        let dense = dense_like(&coll, "signal", 10.0);
        let resampled = dense.resample(rate, Default::default()).unwrap();
        let expected: usize = dense.run_info().iter().map(|r| r.n_samples(rate)).sum();
        prop_assert_eq!(resampled.values().len(), expected);
        prop_assert!(resampled.values().iter().all(|v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn glob_star_matches_every_name(prefix in "[a-z]{0,4}") {
        let coll = merged_collection(&SampleSpec {
            n_subjects: 1,
            n_runs: 1,
            scan_length: 20.0,
            ..SampleSpec::default()
        })
        .unwrap();
        let pattern = format!("{prefix}*");
        let matched = coll.match_variable_names(&pattern, MatchType::Glob).unwrap();
        let expected: Vec<&str> = VARIABLE_NAMES
            .iter()
            .copied()
            .filter(|n| n.starts_with(prefix.as_str()))
            .collect();
        prop_assert_eq!(matched, expected);
    }
}
